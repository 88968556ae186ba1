//! Error types for melops-ctc organized by decoding stage.

use ndarray_stats::errors::MinMaxError;
use std::path::PathBuf;
use thiserror::Error;

/// Decoder error variants organized by stage.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration or input validation error, raised before any search work
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Language model loading error
    #[error(transparent)]
    ModelLoad(#[from] ModelLoadError),

    /// Streaming state or handle misuse
    #[error(transparent)]
    State(#[from] StateError),

    /// Single-sequence search failure
    #[error(transparent)]
    Sequence(#[from] SequenceError),
}

/// Configuration and input dimension errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Beam width of zero
    #[error("beam width must be at least 1")]
    ZeroBeamWidth,

    /// Cutoff probability outside (0, 1]
    #[error("cutoff probability {0} outside (0, 1]")]
    InvalidCutoffProb(f64),

    /// Cutoff count outside [1, vocabulary size]
    #[error("cutoff top-n {top_n} outside [1, {vocab_size}]")]
    InvalidCutoffTopN { top_n: usize, vocab_size: usize },

    /// Blank index outside the vocabulary
    #[error("blank id {blank_id} out of range for vocabulary of size {vocab_size}")]
    BlankOutOfRange { blank_id: usize, vocab_size: usize },

    /// Worker count of zero
    #[error("number of worker processes must be at least 1")]
    ZeroWorkers,

    /// Empty vocabulary
    #[error("vocabulary is empty")]
    EmptyVocabulary,

    /// Repeated label in the vocabulary
    #[error("duplicate vocabulary label {label:?} at index {index}")]
    DuplicateLabel { label: String, index: usize },

    /// Frame width differs from the vocabulary size
    #[error("frame width {got} does not match vocabulary size {expected}")]
    VocabularyMismatch { expected: usize, got: usize },

    /// Sequence length list does not cover the batch
    #[error("expected {expected} sequence lengths, got {got}")]
    SequenceCount { expected: usize, got: usize },

    /// Declared length exceeds the time extent of the buffer
    #[error("sequence {index} declares length {len} but only {max} frames are available")]
    SequenceTooLong { index: usize, len: usize, max: usize },

    /// Output buffer shape inconsistent with the input
    #[error("output buffer {name} has shape {got:?}, expected {expected:?}")]
    OutputShape {
        name: &'static str,
        expected: Vec<usize>,
        got: Vec<usize>,
    },

    /// Language model configuration without a model file
    #[error("language model configuration names no model file")]
    MissingModelPath,

    /// End-of-stream flags do not cover every stream
    #[error("expected {expected} end-of-stream flags, got {got}")]
    StreamFlagCount { expected: usize, got: usize },
}

/// Language model loading errors.
#[derive(Debug, Error)]
pub enum ModelLoadError {
    /// Model file could not be read
    #[error("failed to read language model {path:?}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Malformed ARPA content
    #[error("invalid ARPA file at line {line}: {reason}")]
    Parse { line: usize, reason: String },

    /// ARPA file lacks the `\data\` header
    #[error("missing \\data\\ section")]
    MissingHeader,

    /// Declared n-gram count does not match the entries found
    #[error("expected {expected} {order}-grams, found {found}")]
    CountMismatch {
        order: usize,
        expected: usize,
        found: usize,
    },

    /// Model declares no n-grams
    #[error("language model has order 0")]
    EmptyModel,
}

/// Streaming state and handle errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StateError {
    /// Call issued against a finalized decoder state
    #[error("decoder state is finalized and accepts no further frames")]
    Finalized,

    /// Handle was released or never issued
    #[error("unknown or released {kind} handle")]
    UnknownHandle { kind: &'static str },

    /// Scorer weights changed while decoder states still share the scorer
    #[error("scorer is shared by {holders} live decoder state(s)")]
    ScorerInUse { holders: usize },

    /// Input frames sized for a different vocabulary than the state
    #[error("decoder state vocabulary size {state} does not match input width {input}")]
    VocabularyMismatch { state: usize, input: usize },
}

/// Isolated failure of one sequence inside a batch.
///
/// Stored in the sequence's result slot; sibling sequences are unaffected.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum SequenceError {
    /// NaN or positive infinity in the input
    #[error("non-finite probability {value} at time {time}, label {label}")]
    NonFiniteProbability { time: usize, label: usize, value: f32 },

    /// Negative value in linear probability input
    #[error("negative probability {value} at time {time}, label {label}")]
    NegativeProbability { time: usize, label: usize, value: f32 },

    /// Frame could not be ranked
    #[error("frame argmax failed")]
    Argmax(#[from] MinMaxError),

    /// Worker panicked while searching this sequence
    #[error("worker panicked: {0}")]
    WorkerPanicked(String),
}

/// Result type alias for melops-ctc operations.
pub type Result<T> = std::result::Result<T, Error>;

// MinMaxError → SequenceError → Error
impl From<MinMaxError> for Error {
    fn from(e: MinMaxError) -> Self {
        Error::Sequence(SequenceError::Argmax(e))
    }
}
