//! Backoff n-gram model read from the ARPA text format.

use crate::error::ModelLoadError;
use crate::traits::{LanguageModel, OOV_SCORE};
use std::collections::HashMap;
use std::f64::consts::LN_10;
use std::path::Path;
use std::str::FromStr;

pub const START_TOKEN: &str = "<s>";
pub const END_TOKEN: &str = "</s>";
pub const UNK_TOKEN: &str = "<unk>";

fn is_marker(word: &str) -> bool {
    matches!(word, START_TOKEN | END_TOKEN | UNK_TOKEN)
}

/// Log10 probability and backoff weight of one n-gram.
#[derive(Clone, Copy, Debug)]
struct Weights {
    log_prob: f64,
    backoff: f64,
}

/// Katz backoff n-gram model.
///
/// Probabilities are stored as read (log10) and converted to natural log on
/// query.
#[derive(Clone, Debug)]
pub struct ArpaModel {
    words: Vec<String>,
    ids: HashMap<String, u32>,
    /// `grams[n - 1]` holds every n-gram, keyed by word ids
    grams: Vec<HashMap<Vec<u32>, Weights>>,
    units: usize,
    character_based: bool,
}

impl ArpaModel {
    /// Read a model from an ARPA file.
    ///
    /// # Errors
    ///
    /// Returns [`ModelLoadError::Io`] if the file cannot be read, or a parse
    /// error if its content is malformed.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ModelLoadError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ModelLoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        text.parse()
    }

    /// Number of distinct n-grams of order `n`.
    pub fn ngram_count(&self, n: usize) -> usize {
        n.checked_sub(1)
            .and_then(|i| self.grams.get(i))
            .map_or(0, HashMap::len)
    }

    fn id(&self, word: &str) -> Option<u32> {
        if word == UNK_TOKEN {
            return None;
        }
        self.ids.get(word).copied()
    }

    fn intern(&mut self, word: &str) -> u32 {
        if let Some(&id) = self.ids.get(word) {
            return id;
        }
        let id = self.words.len() as u32;
        self.words.push(word.to_owned());
        self.ids.insert(word.to_owned(), id);
        id
    }
}

impl LanguageModel for ArpaModel {
    fn score_unit(&self, context: &[&str], unit: &str) -> f64 {
        let Some(unit) = self.id(unit) else {
            return OOV_SCORE;
        };

        let keep = self.grams.len().saturating_sub(1);
        let mut history = Vec::with_capacity(keep);
        for word in &context[context.len().saturating_sub(keep)..] {
            match self.id(word) {
                Some(id) => history.push(id),
                None => return OOV_SCORE,
            }
        }

        let mut backoff = 0.0f64;
        let mut key = Vec::with_capacity(history.len() + 1);

        for start in 0..=history.len() {
            let ctx = &history[start..];

            key.clear();
            key.extend_from_slice(ctx);
            key.push(unit);

            if let Some(weights) = self.grams[ctx.len()].get(&key) {
                return (weights.log_prob + backoff) * LN_10;
            }

            if !ctx.is_empty()
                && let Some(weights) = self.grams[ctx.len() - 1].get(ctx)
            {
                backoff += weights.backoff;
            }
        }

        OOV_SCORE
    }

    fn max_order(&self) -> usize {
        self.grams.len()
    }

    fn dictionary_size(&self) -> usize {
        self.units
    }

    fn is_character_based(&self) -> bool {
        self.character_based
    }

    fn units(&self) -> Vec<&str> {
        let mut units: Vec<(u32, &str)> = self.grams[0]
            .keys()
            .map(|key| (key[0], self.words[key[0] as usize].as_str()))
            .filter(|(_, word)| !is_marker(word))
            .collect();
        units.sort_unstable_by_key(|&(id, _)| id);
        units.into_iter().map(|(_, word)| word).collect()
    }
}

#[derive(Clone, Copy, PartialEq)]
enum Section {
    Preamble,
    Data,
    Grams(usize),
    End,
}

fn parse_error(line: usize, reason: impl Into<String>) -> ModelLoadError {
    ModelLoadError::Parse {
        line,
        reason: reason.into(),
    }
}

impl FromStr for ArpaModel {
    type Err = ModelLoadError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let mut model = Self {
            words: Vec::new(),
            ids: HashMap::new(),
            grams: Vec::new(),
            units: 0,
            character_based: false,
        };
        let mut declared: Vec<usize> = Vec::new();
        let mut section = Section::Preamble;

        for (index, raw) in text.lines().enumerate() {
            let line_no = index + 1;
            let line = raw.trim();

            if line.is_empty() {
                continue;
            }

            if line == "\\data\\" {
                section = Section::Data;
                continue;
            }

            if line == "\\end\\" {
                section = Section::End;
                break;
            }

            if let Some(n) = line
                .strip_prefix('\\')
                .and_then(|rest| rest.strip_suffix("-grams:"))
            {
                if section == Section::Preamble {
                    return Err(ModelLoadError::MissingHeader);
                }
                let n: usize = n
                    .parse()
                    .map_err(|_| parse_error(line_no, format!("bad section header {line:?}")))?;
                if n == 0 || n > declared.len() {
                    return Err(parse_error(line_no, format!("undeclared order {n}")));
                }
                section = Section::Grams(n);
                continue;
            }

            match section {
                Section::Preamble | Section::End => {}
                Section::Data => {
                    let (n, count) = line
                        .strip_prefix("ngram ")
                        .and_then(|rest| rest.split_once('='))
                        .and_then(|(n, count)| {
                            Some((n.trim().parse::<usize>().ok()?, count.trim().parse().ok()?))
                        })
                        .ok_or_else(|| parse_error(line_no, format!("bad count line {line:?}")))?;

                    if n != declared.len() + 1 {
                        return Err(parse_error(line_no, format!("unexpected order {n}")));
                    }
                    declared.push(count);
                    model.grams.push(HashMap::with_capacity(count));
                }
                Section::Grams(n) => {
                    let fields: Vec<&str> = line.split_whitespace().collect();
                    let backoff = match fields.len() {
                        len if len == n + 1 => None,
                        len if len == n + 2 => Some(fields[n + 1]),
                        len => {
                            return Err(parse_error(
                                line_no,
                                format!("expected {n} words, found {len} fields"),
                            ));
                        }
                    };

                    let log_prob: f64 = fields[0].parse().map_err(|_| {
                        parse_error(line_no, format!("bad probability {:?}", fields[0]))
                    })?;
                    let backoff: f64 = match backoff {
                        Some(b) => b
                            .parse()
                            .map_err(|_| parse_error(line_no, format!("bad backoff {b:?}")))?,
                        None => 0.0,
                    };

                    let key: Vec<u32> = fields[1..=n].iter().map(|w| model.intern(w)).collect();
                    model.grams[n - 1].insert(key, Weights { log_prob, backoff });
                }
            }
        }

        if section == Section::Preamble {
            return Err(ModelLoadError::MissingHeader);
        }

        if declared.is_empty() {
            return Err(ModelLoadError::EmptyModel);
        }

        for (i, (&expected, grams)) in declared.iter().zip(&model.grams).enumerate() {
            if grams.len() != expected {
                return Err(ModelLoadError::CountMismatch {
                    order: i + 1,
                    expected,
                    found: grams.len(),
                });
            }
        }

        let (count, character_based) = {
            let units = model.units();
            let single = !units.is_empty() && units.iter().all(|w| w.chars().count() == 1);
            (units.len(), single)
        };
        model.units = count;
        model.character_based = character_based;

        Ok(model)
    }
}
