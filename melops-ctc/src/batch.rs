//! Batch and multi-stream decoding over a bounded worker pool.

use crate::config::{DecoderConfig, LmConfig};
use crate::error::{ConfigError, Result, SequenceError};
use crate::output::DenseOutput;
use crate::scorer::Scorer;
use crate::state::DecoderState;
use crate::types::{Hypothesis, Vocabulary};
use ndarray::{ArrayView3, s};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError, mpsc};
use std::thread;

/// Outcome of one sequence of a batch.
pub type SequenceResult = std::result::Result<Vec<Hypothesis>, SequenceError>;

/// Decoder for batches of independent sequences.
///
/// Sequences are searched concurrently on up to `num_processes` scoped
/// worker threads. Result slot `i` always belongs to sequence `i`, and a
/// failing sequence never affects its siblings.
#[derive(Clone, Debug)]
pub struct BatchDecoder {
    config: DecoderConfig,
    vocabulary: Vocabulary,
    scorer: Option<Arc<Scorer>>,
}

impl BatchDecoder {
    /// Create a decoder.
    ///
    /// # Errors
    ///
    /// Returns error if `config` is invalid for `vocabulary`, or the scorer
    /// was built for a vocabulary of a different size.
    pub fn new(
        config: DecoderConfig,
        vocabulary: Vocabulary,
        scorer: Option<Arc<Scorer>>,
    ) -> Result<Self> {
        config.validate(vocabulary.len())?;

        if let Some(scorer) = &scorer
            && scorer.vocabulary().len() != vocabulary.len()
        {
            return Err(ConfigError::VocabularyMismatch {
                expected: vocabulary.len(),
                got: scorer.vocabulary().len(),
            }
            .into());
        }

        Ok(Self {
            config,
            vocabulary,
            scorer,
        })
    }

    /// Create a decoder, loading the language model named by `lm` if any.
    pub fn from_config(
        config: DecoderConfig,
        lm: &LmConfig,
        vocabulary: Vocabulary,
    ) -> Result<Self> {
        let scorer = Scorer::from_config(lm, &vocabulary)?.map(Arc::new);
        Self::new(config, vocabulary, scorer)
    }

    pub fn config(&self) -> &DecoderConfig {
        &self.config
    }

    pub fn vocabulary(&self) -> &Vocabulary {
        &self.vocabulary
    }

    pub fn scorer(&self) -> Option<&Arc<Scorer>> {
        self.scorer.as_ref()
    }

    /// Fresh streaming state sharing this decoder's configuration and scorer.
    pub fn new_state(&self) -> Result<DecoderState> {
        DecoderState::new(self.config, &self.vocabulary, self.scorer.clone())
    }

    /// Decode a `(batch, time, vocab)` buffer.
    ///
    /// `seq_lens[i]` limits sequence `i` to its first frames; without it
    /// every sequence spans the full time axis.
    ///
    /// # Errors
    ///
    /// Returns error before any search if the buffer width, the length list,
    /// or a declared length is inconsistent. Per-sequence failures are
    /// reported in the corresponding result slot.
    pub fn decode(
        &self,
        probs: ArrayView3<f32>,
        seq_lens: Option<&[usize]>,
    ) -> Result<Vec<SequenceResult>> {
        let (batch, _, width) = probs.dim();

        if width != self.vocabulary.len() {
            return Err(ConfigError::VocabularyMismatch {
                expected: self.vocabulary.len(),
                got: width,
            }
            .into());
        }

        let mut states = (0..batch)
            .map(|_| self.new_state())
            .collect::<Result<Vec<_>>>()?;
        let mut refs: Vec<&mut DecoderState> = states.iter_mut().collect();

        decode_streams(
            &mut refs,
            probs,
            seq_lens,
            &vec![true; batch],
            self.config.num_processes,
        )
    }

    /// Decode into preallocated dense buffers of shape
    /// `(batch, beam_width, time)`.
    ///
    /// Slots of failed sequences are zeroed.
    pub fn decode_into(
        &self,
        probs: ArrayView3<f32>,
        seq_lens: Option<&[usize]>,
        out: &mut DenseOutput,
    ) -> Result<Vec<SequenceResult>> {
        let (batch, time, _) = probs.dim();
        out.check_shape(batch, self.config.beam_width, time)?;

        let results = self.decode(probs, seq_lens)?;
        out.fill(&results);

        Ok(results)
    }

    /// Advance several streams by one chunk each.
    ///
    /// `states[i]` consumes `probs[i, ..seq_lens[i], ..]` and is finalized if
    /// `end_of_stream[i]` is set.
    pub fn decode_online(
        &self,
        states: &mut [&mut DecoderState],
        probs: ArrayView3<f32>,
        seq_lens: Option<&[usize]>,
        end_of_stream: &[bool],
    ) -> Result<Vec<SequenceResult>> {
        decode_streams(
            states,
            probs,
            seq_lens,
            end_of_stream,
            self.config.num_processes,
        )
    }
}

/// Resolve per-sequence lengths against a buffer of `batch` sequences with
/// `time` frames each.
pub fn sequence_lengths(
    batch: usize,
    time: usize,
    seq_lens: Option<&[usize]>,
) -> std::result::Result<Vec<usize>, ConfigError> {
    let Some(seq_lens) = seq_lens else {
        return Ok(vec![time; batch]);
    };

    if seq_lens.len() != batch {
        return Err(ConfigError::SequenceCount {
            expected: batch,
            got: seq_lens.len(),
        });
    }

    for (index, &len) in seq_lens.iter().enumerate() {
        if len > time {
            return Err(ConfigError::SequenceTooLong {
                index,
                len,
                max: time,
            });
        }
    }

    Ok(seq_lens.to_vec())
}

/// Advance each of `states` by its chunk of `probs`.
///
/// All inputs are checked before any state changes; if any state is
/// finalized or sized for a different vocabulary, no state is touched.
pub fn decode_streams(
    states: &mut [&mut DecoderState],
    probs: ArrayView3<f32>,
    seq_lens: Option<&[usize]>,
    end_of_stream: &[bool],
    num_processes: usize,
) -> Result<Vec<SequenceResult>> {
    let (batch, time, width) = probs.dim();

    if num_processes == 0 {
        return Err(ConfigError::ZeroWorkers.into());
    }

    if states.len() != batch {
        return Err(ConfigError::SequenceCount {
            expected: batch,
            got: states.len(),
        }
        .into());
    }

    if end_of_stream.len() != batch {
        return Err(ConfigError::StreamFlagCount {
            expected: batch,
            got: end_of_stream.len(),
        }
        .into());
    }

    let lens = sequence_lengths(batch, time, seq_lens)?;

    for state in states.iter() {
        state.check_input(width)?;
    }

    tracing::debug!(
        sequences = batch,
        frames = time,
        workers = num_processes.min(batch),
        "decoding batch"
    );

    let tasks: Vec<_> = states
        .iter_mut()
        .zip(lens)
        .zip(end_of_stream)
        .enumerate()
        .map(|(i, ((state, len), &eos))| (&mut **state, probs.slice(s![i, ..len, ..]), eos))
        .collect();

    Ok(run_pool(tasks, num_processes, |(state, frames, eos)| {
        state.extend(frames, eos)
    }))
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_owned()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic payload".to_owned()
    }
}

/// Run `work` over `tasks` on at most `workers` scoped threads.
///
/// Output slot `i` holds the outcome of task `i`. A panicking task yields
/// [`SequenceError::WorkerPanicked`] in its slot; the worker moves on to the
/// next task.
fn run_pool<T, R, F>(
    tasks: Vec<T>,
    workers: usize,
    work: F,
) -> Vec<std::result::Result<R, SequenceError>>
where
    T: Send,
    R: Send,
    F: Fn(T) -> std::result::Result<R, SequenceError> + Sync,
{
    let total = tasks.len();
    let workers = workers.min(total);
    if workers == 0 {
        return Vec::new();
    }

    let queue = Mutex::new(tasks.into_iter().enumerate());
    let (tx, rx) = mpsc::channel();

    thread::scope(|scope| {
        for _ in 0..workers {
            let tx = tx.clone();
            let queue = &queue;
            let work = &work;

            scope.spawn(move || {
                loop {
                    let next = queue.lock().unwrap_or_else(PoisonError::into_inner).next();
                    let Some((index, task)) = next else {
                        break;
                    };

                    let result = panic::catch_unwind(AssertUnwindSafe(|| work(task)))
                        .unwrap_or_else(|payload| {
                            let message = panic_message(payload);
                            tracing::error!(index, %message, "decoding worker panicked");
                            Err(SequenceError::WorkerPanicked(message))
                        });

                    if tx.send((index, result)).is_err() {
                        break;
                    }
                }
            });
        }
    });
    drop(tx);

    let mut slots: Vec<Option<std::result::Result<R, SequenceError>>> =
        (0..total).map(|_| None).collect();
    for (index, result) in rx {
        slots[index] = Some(result);
    }

    slots
        .into_iter()
        .map(|slot| {
            slot.unwrap_or_else(|| Err(SequenceError::WorkerPanicked("no result produced".into())))
        })
        .collect()
}
