//! Language model rescoring of beam prefixes.

pub mod arpa;

use crate::config::{LmConfig, LmKind};
use crate::error::ModelLoadError;
use crate::lexicon::Lexicon;
use crate::traits::LanguageModel;
use crate::types::{SPACE_LABEL, Vocabulary};
use std::path::Path;
use std::time::Instant;

pub use arpa::{ArpaModel, END_TOKEN, START_TOKEN};

/// Weighted language model shared by decoding workers.
///
/// A prefix's contribution is `alpha * ln P(unit | history) + beta`. Word
/// models score at word boundaries and restrict spellings to the model
/// vocabulary; character models score every emitted label.
pub struct Scorer {
    model: Box<dyn LanguageModel>,
    alpha: f64,
    beta: f64,
    character_based: bool,
    vocabulary: Vocabulary,
    lexicon: Option<Lexicon>,
}

impl std::fmt::Debug for Scorer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scorer")
            .field("alpha", &self.alpha)
            .field("beta", &self.beta)
            .field("character_based", &self.character_based)
            .field("max_order", &self.model.max_order())
            .field("dictionary_size", &self.model.dictionary_size())
            .finish_non_exhaustive()
    }
}

impl Scorer {
    /// Wrap `model` for decoding over `vocabulary`.
    pub fn new<M>(model: M, vocabulary: &Vocabulary, alpha: f64, beta: f64, kind: LmKind) -> Self
    where
        M: LanguageModel + 'static,
    {
        let character_based = match kind {
            LmKind::Auto => model.is_character_based(),
            LmKind::Character => true,
            LmKind::Word => false,
        };

        let lexicon = if character_based {
            None
        } else {
            match Lexicon::build(model.units(), vocabulary) {
                Some(lexicon) if !lexicon.is_empty() => Some(lexicon),
                Some(_) => {
                    tracing::warn!("no model word is spellable with the vocabulary");
                    None
                }
                None => None,
            }
        };

        Self {
            model: Box::new(model),
            alpha,
            beta,
            character_based,
            vocabulary: vocabulary.clone(),
            lexicon,
        }
    }

    /// Load an ARPA model from `path`.
    pub fn load<P: AsRef<Path>>(
        path: P,
        vocabulary: &Vocabulary,
        alpha: f64,
        beta: f64,
        kind: LmKind,
    ) -> Result<Self, ModelLoadError> {
        let path = path.as_ref();
        let start = Instant::now();
        let model = ArpaModel::from_file(path)?;
        let scorer = Self::new(model, vocabulary, alpha, beta, kind);

        tracing::info!(
            path = %path.display(),
            order = scorer.max_order(),
            dictionary_size = scorer.dictionary_size(),
            character_based = scorer.character_based,
            lexicon_words = scorer.lexicon.as_ref().map_or(0, Lexicon::len),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "language model loaded"
        );

        Ok(scorer)
    }

    /// Build the scorer described by `config`, or `None` if it names no model.
    pub fn from_config(
        config: &LmConfig,
        vocabulary: &Vocabulary,
    ) -> Result<Option<Self>, ModelLoadError> {
        config
            .model_path
            .as_ref()
            .map(|path| Self::load(path, vocabulary, config.alpha, config.beta, config.lm_kind))
            .transpose()
    }

    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    pub fn beta(&self) -> f64 {
        self.beta
    }

    /// Replace the weights without reloading the model.
    pub fn reset_weights(&mut self, alpha: f64, beta: f64) {
        tracing::debug!(alpha, beta, "scorer weights reset");
        self.alpha = alpha;
        self.beta = beta;
    }

    pub fn is_character_based(&self) -> bool {
        self.character_based
    }

    pub fn max_order(&self) -> usize {
        self.model.max_order()
    }

    pub fn dictionary_size(&self) -> usize {
        self.model.dictionary_size()
    }

    /// Spelling constraint, present for word models.
    pub fn lexicon(&self) -> Option<&Lexicon> {
        self.lexicon.as_ref()
    }

    pub fn vocabulary(&self) -> &Vocabulary {
        &self.vocabulary
    }

    /// Split a label sequence into the units the model scores.
    pub fn split_labels(&self, labels: &[usize]) -> Vec<String> {
        if self.character_based {
            labels
                .iter()
                .filter_map(|&id| self.vocabulary.label(id))
                .map(str::to_owned)
                .collect()
        } else {
            self.vocabulary
                .render(labels)
                .split(SPACE_LABEL)
                .map(str::to_owned)
                .collect()
        }
    }

    /// The last `max_order` units of `labels`, left-padded with `<s>`.
    ///
    /// For word models the final unit is the (possibly partial) trailing
    /// word.
    pub fn make_ngram(&self, labels: &[usize]) -> Vec<String> {
        let order = self.max_order();
        let mut units = self.split_labels(labels);

        if units.len() > order {
            units.drain(..units.len() - order);
        }

        let mut ngram = vec![START_TOKEN.to_owned(); order - units.len()];
        ngram.append(&mut units);
        ngram
    }

    /// Natural-log probability of the last unit of `ngram` given the rest.
    pub fn log_cond_prob(&self, ngram: &[String]) -> f64 {
        let Some((unit, context)) = ngram.split_last() else {
            return 0.0;
        };
        let context: Vec<&str> = context.iter().map(String::as_str).collect();
        self.model.score_unit(&context, unit)
    }

    /// Weighted contribution `alpha * ln P + beta` of the last unit of `labels`.
    pub fn score_prefix(&self, labels: &[usize]) -> f64 {
        self.alpha * self.log_cond_prob(&self.make_ngram(labels)) + self.beta
    }

    /// Natural-log probability of a full sentence, bracketed by `<s>` and
    /// `</s>`.
    pub fn sentence_log_prob(&self, units: &[&str]) -> f64 {
        let order = self.max_order();
        let mut sentence: Vec<&str> = vec![START_TOKEN; order.saturating_sub(1)];
        sentence.extend_from_slice(units);
        sentence.push(END_TOKEN);

        let first = order.saturating_sub(1);
        (first..sentence.len())
            .map(|i| {
                let context = &sentence[i.saturating_sub(order - 1)..i];
                self.model.score_unit(context, sentence[i])
            })
            .sum()
    }
}
