//! Best-path decoding.

use crate::error::{ConfigError, Result};
use crate::prune::{check_frames, to_log_prob};
use crate::types::Hypothesis;
use ndarray::ArrayView2;
use ndarray_stats::QuantileExt;

/// Decode `frames` by taking the most likely label per frame, collapsing
/// repeats and removing blanks.
///
/// The score is the log-probability of the single best alignment, and each
/// token's timestep is the frame of its run where it peaked.
pub fn greedy_decode(
    frames: ArrayView2<f32>,
    blank_id: usize,
    log_input: bool,
) -> Result<Hypothesis> {
    if blank_id >= frames.ncols() {
        return Err(ConfigError::BlankOutOfRange {
            blank_id,
            vocab_size: frames.ncols(),
        }
        .into());
    }
    check_frames(frames, log_input)?;

    let mut hyp = Hypothesis {
        tokens: Vec::new(),
        timesteps: Vec::new(),
        score: 0.0,
    };
    let mut previous = None;
    let mut peak = f64::NEG_INFINITY;

    for (t, frame) in frames.rows().into_iter().enumerate() {
        let label = frame.argmax()?;
        let log_prob = to_log_prob(frame[label], log_input);
        hyp.score += log_prob;

        if label != blank_id {
            if previous == Some(label) {
                if log_prob > peak
                    && let Some(last) = hyp.timesteps.last_mut()
                {
                    *last = t;
                    peak = log_prob;
                }
            } else {
                hyp.tokens.push(label);
                hyp.timesteps.push(t);
                peak = log_prob;
            }
        }

        previous = Some(label);
    }

    Ok(hyp)
}
