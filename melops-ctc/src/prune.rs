//! Per-frame candidate pruning.

use crate::error::SequenceError;
use ndarray::{ArrayView1, ArrayView2};

/// Smallest positive normal `f32`, added before taking logs so zero
/// probabilities stay finite.
const PROB_FLOOR: f64 = f32::MIN_POSITIVE as f64;

/// Label worth exploring at one frame.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Candidate {
    pub label: usize,
    pub log_prob: f64,
}

/// Convert one input value to a natural-log probability.
pub fn to_log_prob(value: f32, log_input: bool) -> f64 {
    if log_input {
        value as f64
    } else {
        (value as f64 + PROB_FLOOR).ln()
    }
}

/// Select the labels of `frame` worth exploring.
///
/// Labels are ordered by descending probability, ties broken by ascending
/// label index. The result is the shortest prefix of that order whose
/// cumulative probability reaches `cutoff_prob`, truncated to
/// `cutoff_top_n` entries. `cutoff_prob = 1` with `cutoff_top_n` equal to the
/// frame width keeps every label.
pub fn prune(
    frame: ArrayView1<f32>,
    cutoff_prob: f64,
    cutoff_top_n: usize,
    log_input: bool,
) -> Vec<Candidate> {
    let mut order: Vec<usize> = (0..frame.len()).collect();

    // Stable sort keeps ascending index order among equal probabilities.
    order.sort_by(|&a, &b| frame[b].total_cmp(&frame[a]));

    let mut keep = order.len();

    if cutoff_prob < 1.0 {
        let mut cumulative = 0.0;
        for (i, &label) in order.iter().enumerate() {
            cumulative += if log_input {
                (frame[label] as f64).exp()
            } else {
                frame[label] as f64
            };

            if cumulative >= cutoff_prob {
                keep = i + 1;
                break;
            }
        }
    }

    order
        .into_iter()
        .take(keep.min(cutoff_top_n))
        .map(|label| Candidate {
            label,
            log_prob: to_log_prob(frame[label], log_input),
        })
        .collect()
}

/// Check that every value of `frames` is a usable probability.
///
/// Log input accepts any value except NaN and positive infinity; linear input
/// additionally rejects negative values.
pub fn check_frames(frames: ArrayView2<f32>, log_input: bool) -> Result<(), SequenceError> {
    for ((time, label), &value) in frames.indexed_iter() {
        if value.is_nan() || value == f32::INFINITY {
            return Err(SequenceError::NonFiniteProbability { time, label, value });
        }

        if !log_input && value < 0.0 {
            return Err(SequenceError::NegativeProbability { time, label, value });
        }
    }

    Ok(())
}
