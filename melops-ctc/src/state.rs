//! Streaming decoder state.

use crate::beam::{Beam, Extender};
use crate::config::DecoderConfig;
use crate::error::{Result, SequenceError, StateError};
use crate::prune::{check_frames, prune};
use crate::scorer::Scorer;
use crate::types::{Hypothesis, Vocabulary};
use ndarray::ArrayView2;
use std::sync::Arc;

/// Lifecycle of a [`DecoderState`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    /// No frames consumed yet
    Uninitialized,
    /// Accepting frames
    Active,
    /// End of stream reached; beams are final
    Finalized,
}

/// Beam search state carried across chunks of one stream.
///
/// Feeding a sequence in any number of chunks yields the same hypotheses as
/// decoding it whole, since each frame is extended at its absolute index.
#[derive(Clone, Debug)]
pub struct DecoderState {
    config: DecoderConfig,
    vocab_size: usize,
    space_id: Option<usize>,
    scorer: Option<Arc<Scorer>>,
    beams: Vec<Beam>,
    frames: usize,
    phase: Phase,
}

impl DecoderState {
    /// Create an uninitialized state.
    ///
    /// # Errors
    ///
    /// Returns error if `config` is invalid for `vocabulary`.
    pub fn new(
        config: DecoderConfig,
        vocabulary: &Vocabulary,
        scorer: Option<Arc<Scorer>>,
    ) -> Result<Self> {
        config.validate(vocabulary.len())?;

        Ok(Self {
            config,
            vocab_size: vocabulary.len(),
            space_id: vocabulary.space_id(),
            scorer,
            beams: Vec::new(),
            frames: 0,
            phase: Phase::Uninitialized,
        })
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn is_finalized(&self) -> bool {
        self.phase == Phase::Finalized
    }

    /// Number of frames consumed so far.
    pub fn frames_consumed(&self) -> usize {
        self.frames
    }

    pub fn config(&self) -> &DecoderConfig {
        &self.config
    }

    pub fn scorer(&self) -> Option<&Arc<Scorer>> {
        self.scorer.as_ref()
    }

    /// Consume `frames` and return the current ranked hypotheses.
    ///
    /// With `end_of_stream` set the state is finalized afterwards and
    /// rejects further calls. An empty chunk is accepted.
    ///
    /// # Errors
    ///
    /// Returns error without modifying the state if it is finalized, the
    /// frame width differs from the vocabulary size, or a frame holds an
    /// invalid probability.
    pub fn advance(
        &mut self,
        frames: ArrayView2<f32>,
        end_of_stream: bool,
    ) -> Result<Vec<Hypothesis>> {
        self.check_input(frames.ncols())?;
        Ok(self.extend(frames, end_of_stream)?)
    }

    /// Reject calls a finalized state or a mismatched width would make.
    pub(crate) fn check_input(&self, width: usize) -> std::result::Result<(), StateError> {
        if self.is_finalized() {
            return Err(StateError::Finalized);
        }

        if width != self.vocab_size {
            return Err(StateError::VocabularyMismatch {
                state: self.vocab_size,
                input: width,
            });
        }

        Ok(())
    }

    /// Search over `frames`; the caller has run [`Self::check_input`].
    pub(crate) fn extend(
        &mut self,
        frames: ArrayView2<f32>,
        end_of_stream: bool,
    ) -> std::result::Result<Vec<Hypothesis>, SequenceError> {
        let log_input = self.config.log_probs_input;
        check_frames(frames, log_input)?;

        if self.phase == Phase::Uninitialized {
            self.beams = vec![Beam::root()];
            self.phase = Phase::Active;
        }

        let scorer = self.scorer.clone();
        let extender = self.extender_with(scorer.as_deref());
        let mut beams = std::mem::take(&mut self.beams);

        for (offset, frame) in frames.rows().into_iter().enumerate() {
            let candidates = prune(
                frame,
                self.config.cutoff_prob,
                self.config.cutoff_top_n,
                log_input,
            );
            beams = extender.step(&beams, &candidates, self.frames + offset);
        }

        let hypotheses = extender.finish(&beams);
        self.beams = beams;
        self.frames += frames.nrows();

        if end_of_stream {
            self.phase = Phase::Finalized;
            tracing::debug!(
                frames = self.frames,
                hypotheses = hypotheses.len(),
                "stream finalized"
            );
        }

        Ok(hypotheses)
    }

    /// Current ranked hypotheses, without consuming frames.
    ///
    /// Empty before the first call to [`Self::advance`].
    pub fn snapshot(&self) -> Vec<Hypothesis> {
        self.extender_with(self.scorer.as_deref()).finish(&self.beams)
    }

    fn extender_with<'a>(&self, scorer: Option<&'a Scorer>) -> Extender<'a> {
        Extender {
            blank_id: self.config.blank_id,
            beam_width: self.config.beam_width,
            space_id: self.space_id,
            scorer,
        }
    }
}
