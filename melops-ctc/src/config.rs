//! Decoder and language model configuration.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Default number of labels kept per frame after pruning
const DEFAULT_CUTOFF_TOP_N: usize = 40;

/// Default cumulative probability kept per frame (1.0 disables pruning)
const DEFAULT_CUTOFF_PROB: f64 = 1.0;

/// Default number of beams kept after each frame
const DEFAULT_BEAM_WIDTH: usize = 100;

/// Default number of concurrent workers for batch decoding
const DEFAULT_NUM_PROCESSES: usize = 4;

/// Default index of the CTC blank label
const DEFAULT_BLANK_ID: usize = 0;

/// Configuration for CTC beam search.
#[derive(clap::Args, Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecoderConfig {
    /// Number of beams kept after each frame
    #[arg(long, default_value_t = DEFAULT_BEAM_WIDTH)]
    pub beam_width: usize,

    /// Cumulative probability mass of labels explored per frame
    #[arg(long, default_value_t = DEFAULT_CUTOFF_PROB)]
    pub cutoff_prob: f64,

    /// Maximum number of labels explored per frame
    #[arg(long, default_value_t = DEFAULT_CUTOFF_TOP_N)]
    pub cutoff_top_n: usize,

    /// Index of the CTC blank label
    #[arg(long, default_value_t = DEFAULT_BLANK_ID)]
    pub blank_id: usize,

    /// Number of concurrent workers for batch decoding
    #[arg(long, default_value_t = DEFAULT_NUM_PROCESSES)]
    pub num_processes: usize,

    /// Input frames hold natural-log probabilities instead of probabilities
    #[arg(long)]
    pub log_probs_input: bool,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            beam_width: DEFAULT_BEAM_WIDTH,
            cutoff_prob: DEFAULT_CUTOFF_PROB,
            cutoff_top_n: DEFAULT_CUTOFF_TOP_N,
            blank_id: DEFAULT_BLANK_ID,
            num_processes: DEFAULT_NUM_PROCESSES,
            log_probs_input: false,
        }
    }
}

impl DecoderConfig {
    pub fn with_beam_width(mut self, beam_width: usize) -> Self {
        self.beam_width = beam_width;
        self
    }

    pub fn with_cutoff_prob(mut self, cutoff_prob: f64) -> Self {
        self.cutoff_prob = cutoff_prob;
        self
    }

    pub fn with_cutoff_top_n(mut self, cutoff_top_n: usize) -> Self {
        self.cutoff_top_n = cutoff_top_n;
        self
    }

    pub fn with_blank_id(mut self, blank_id: usize) -> Self {
        self.blank_id = blank_id;
        self
    }

    pub fn with_num_processes(mut self, num_processes: usize) -> Self {
        self.num_processes = num_processes;
        self
    }

    pub fn with_log_probs_input(mut self, log_probs_input: bool) -> Self {
        self.log_probs_input = log_probs_input;
        self
    }

    /// Whether pruning keeps every label of a `vocab_size` frame.
    pub fn is_exact(&self, vocab_size: usize) -> bool {
        self.cutoff_prob >= 1.0 && self.cutoff_top_n >= vocab_size
    }

    /// Check the configuration against a vocabulary of `vocab_size` labels.
    ///
    /// # Errors
    ///
    /// Returns the first violated constraint.
    pub fn validate(&self, vocab_size: usize) -> Result<(), ConfigError> {
        if vocab_size == 0 {
            return Err(ConfigError::EmptyVocabulary);
        }

        if self.beam_width == 0 {
            return Err(ConfigError::ZeroBeamWidth);
        }

        if !(self.cutoff_prob > 0.0 && self.cutoff_prob <= 1.0) {
            return Err(ConfigError::InvalidCutoffProb(self.cutoff_prob));
        }

        if self.cutoff_top_n == 0 || self.cutoff_top_n > vocab_size {
            return Err(ConfigError::InvalidCutoffTopN {
                top_n: self.cutoff_top_n,
                vocab_size,
            });
        }

        if self.blank_id >= vocab_size {
            return Err(ConfigError::BlankOutOfRange {
                blank_id: self.blank_id,
                vocab_size,
            });
        }

        if self.num_processes == 0 {
            return Err(ConfigError::ZeroWorkers);
        }

        Ok(())
    }
}

/// Unit a language model scores.
#[derive(clap::ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LmKind {
    /// Detect from the model vocabulary
    #[default]
    Auto,
    /// One label per unit, scored on every emission
    Character,
    /// Space-delimited words, scored at word boundaries
    Word,
}

/// Configuration for language model rescoring.
#[derive(clap::Args, Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LmConfig {
    /// Path to an ARPA language model (rescoring disabled when absent)
    #[arg(long = "lm")]
    pub model_path: Option<PathBuf>,

    /// Weight of the language model log-probability
    #[arg(long, default_value_t = 0.0)]
    pub alpha: f64,

    /// Bonus added per scored word
    #[arg(long, default_value_t = 0.0)]
    pub beta: f64,

    /// Unit the language model scores
    #[arg(long, value_enum, default_value_t = LmKind::Auto)]
    pub lm_kind: LmKind,
}

impl LmConfig {
    /// Create a configuration for the model at `path`.
    pub fn new(path: impl Into<PathBuf>, alpha: f64, beta: f64) -> Self {
        Self {
            model_path: Some(path.into()),
            alpha,
            beta,
            lm_kind: LmKind::Auto,
        }
    }

    pub fn with_kind(mut self, lm_kind: LmKind) -> Self {
        self.lm_kind = lm_kind;
        self
    }
}
