//! melops-ctc: CTC beam search decoding with language model rescoring.
//!
//! This crate turns per-frame label probabilities from a CTC acoustic model
//! into ranked transcription hypotheses, optionally rescored by an n-gram
//! language model, for whole batches or for streams fed chunk by chunk.
//!
//! # Architecture
//!
//! The decoder is built from a few small stages:
//!
//! - [`prune`]: Selects the labels worth exploring at each frame
//! - [`beam::Extender`]: Extends prefix beams by one frame and keeps the best
//! - [`scorer::Scorer`]: Folds weighted [`traits::LanguageModel`] scores into beams
//! - [`state::DecoderState`]: Carries beams across chunks of one stream
//! - [`batch::BatchDecoder`]: Runs many sequences on a bounded worker pool
//!
//! # Quick Start
//!
//! ```ignore
//! use melops_ctc::batch::BatchDecoder;
//! use melops_ctc::config::{DecoderConfig, LmConfig};
//! use melops_ctc::types::Vocabulary;
//!
//! let vocabulary = Vocabulary::new(["_", " ", "a", "b", "c"])?;
//! let config = DecoderConfig::default().with_cutoff_top_n(5);
//! let lm = LmConfig::new("lm.arpa", 0.5, 1.0);
//!
//! let decoder = BatchDecoder::from_config(config, &lm, vocabulary)?;
//!
//! // probs: (batch, time, vocab)
//! for result in decoder.decode(probs.view(), None)? {
//!     let best = &result?[0];
//!     println!("{} ({:.3})", best.text(decoder.vocabulary()), best.score);
//! }
//! ```

pub mod batch;
pub mod beam;
pub mod config;
pub mod error;
pub mod greedy;
pub mod lexicon;
pub mod output;
pub mod prune;
pub mod registry;
pub mod scorer;
pub mod state;
pub mod traits;
pub mod types;

pub use batch::{BatchDecoder, SequenceResult};
pub use config::{DecoderConfig, LmConfig, LmKind};
pub use error::{Error, Result};
pub use state::DecoderState;
pub use types::{Hypothesis, Vocabulary};
