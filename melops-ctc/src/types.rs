//! Core types for melops-ctc

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Label string that separates words for word-based language models.
pub const SPACE_LABEL: &str = " ";

/// Ordered set of output labels.
///
/// Label `i` corresponds to column `i` of every input frame. One of the
/// labels is the CTC blank; which one is chosen by the decoder configuration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Vocabulary {
    labels: Vec<String>,
    space_id: Option<usize>,
}

impl Vocabulary {
    /// Create a vocabulary from unique labels.
    ///
    /// # Errors
    ///
    /// Returns error if the list is empty or contains a repeated label.
    pub fn new<I, S>(labels: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let labels: Vec<String> = labels.into_iter().map(Into::into).collect();

        if labels.is_empty() {
            return Err(ConfigError::EmptyVocabulary);
        }

        let mut seen = HashSet::with_capacity(labels.len());
        for (index, label) in labels.iter().enumerate() {
            if !seen.insert(label.as_str()) {
                return Err(ConfigError::DuplicateLabel {
                    label: label.clone(),
                    index,
                });
            }
        }

        let space_id = labels.iter().position(|l| l == SPACE_LABEL);

        Ok(Self { labels, space_id })
    }

    /// Create a vocabulary with one label per character of `chars`.
    pub fn from_chars(chars: &str) -> Result<Self, ConfigError> {
        Self::new(chars.chars().map(String::from))
    }

    /// Number of labels, including the blank.
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Index of the word separator label, if the vocabulary has one.
    pub fn space_id(&self) -> Option<usize> {
        self.space_id
    }

    pub fn label(&self, id: usize) -> Option<&str> {
        self.labels.get(id).map(String::as_str)
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn position(&self, label: &str) -> Option<usize> {
        self.labels.iter().position(|l| l == label)
    }

    /// Concatenate the labels of `ids`, skipping ids outside the vocabulary.
    pub fn render(&self, ids: &[usize]) -> String {
        ids.iter().filter_map(|&id| self.label(id)).collect()
    }
}

/// One ranked candidate produced by beam search.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Hypothesis {
    /// Emitted label ids after blank removal and repeat collapsing
    pub tokens: Vec<usize>,
    /// Frame index at which each token had its peak emission probability
    pub timesteps: Vec<usize>,
    /// Ranking score: log path probability plus language model contribution
    pub score: f64,
}

impl Hypothesis {
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Render the tokens as text.
    pub fn text(&self, vocabulary: &Vocabulary) -> String {
        vocabulary.render(&self.tokens)
    }
}
