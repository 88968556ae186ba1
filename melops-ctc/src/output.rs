//! Dense tensor layout of batch results.

use crate::batch::SequenceResult;
use crate::error::ConfigError;
use crate::types::Hypothesis;
use ndarray::{Array2, Array3};

/// Fixed-shape buffers holding the top hypotheses of every sequence.
///
/// `tokens` and `timesteps` are `(batch, beam, time)` and zero-padded past
/// each hypothesis length; `scores` and `lengths` are `(batch, beam)`.
/// Unused beam slots and failed sequences stay zero.
#[derive(Clone, Debug, PartialEq)]
pub struct DenseOutput {
    pub tokens: Array3<i32>,
    pub timesteps: Array3<i32>,
    pub scores: Array2<f32>,
    pub lengths: Array2<i32>,
}

impl DenseOutput {
    pub fn zeros(batch: usize, beam_width: usize, max_len: usize) -> Self {
        Self {
            tokens: Array3::zeros((batch, beam_width, max_len)),
            timesteps: Array3::zeros((batch, beam_width, max_len)),
            scores: Array2::zeros((batch, beam_width)),
            lengths: Array2::zeros((batch, beam_width)),
        }
    }

    /// Lay out `results`, sizing the time axis to the longest hypothesis.
    pub fn from_results(results: &[SequenceResult], beam_width: usize) -> Self {
        let max_len = results
            .iter()
            .flatten()
            .flat_map(|hyps| hyps.iter().take(beam_width))
            .map(Hypothesis::len)
            .max()
            .unwrap_or(0);

        let mut out = Self::zeros(results.len(), beam_width, max_len);
        out.fill(results);
        out
    }

    /// Check every buffer against `(batch, beam_width, max_len)`.
    pub fn check_shape(
        &self,
        batch: usize,
        beam_width: usize,
        max_len: usize,
    ) -> Result<(), ConfigError> {
        let full = [batch, beam_width, max_len];
        let ranked = [batch, beam_width];

        check("tokens", self.tokens.shape(), &full)?;
        check("timesteps", self.timesteps.shape(), &full)?;
        check("scores", self.scores.shape(), &ranked)?;
        check("lengths", self.lengths.shape(), &ranked)
    }

    pub fn clear(&mut self) {
        self.tokens.fill(0);
        self.timesteps.fill(0);
        self.scores.fill(0.0);
        self.lengths.fill(0);
    }

    /// Overwrite every slot with `results`.
    pub fn fill(&mut self, results: &[SequenceResult]) {
        self.clear();
        for (index, result) in results.iter().enumerate() {
            if let Ok(hyps) = result {
                self.write(index, hyps);
            }
        }
    }

    /// Write the top hypotheses of sequence `index`.
    ///
    /// Tokens beyond the time capacity are dropped and `lengths` records the
    /// stored count.
    pub fn write(&mut self, index: usize, hypotheses: &[Hypothesis]) {
        let (_, beam_width, capacity) = self.tokens.dim();

        for (rank, hyp) in hypotheses.iter().take(beam_width).enumerate() {
            let len = hyp.len().min(capacity);

            for t in 0..len {
                self.tokens[[index, rank, t]] = hyp.tokens[t] as i32;
                self.timesteps[[index, rank, t]] = hyp.timesteps[t] as i32;
            }

            self.scores[[index, rank]] = hyp.score as f32;
            self.lengths[[index, rank]] = len as i32;
        }
    }
}

fn check(name: &'static str, got: &[usize], expected: &[usize]) -> Result<(), ConfigError> {
    if got == expected {
        Ok(())
    } else {
        Err(ConfigError::OutputShape {
            name,
            expected: expected.to_vec(),
            got: got.to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SequenceError;

    fn hyp(tokens: &[usize], timesteps: &[usize], score: f64) -> Hypothesis {
        Hypothesis {
            tokens: tokens.to_vec(),
            timesteps: timesteps.to_vec(),
            score,
        }
    }

    #[test]
    fn pads_hypotheses_with_zeros() {
        let results = vec![
            Ok(vec![hyp(&[3, 1, 2], &[0, 2, 4], -1.5), hyp(&[3], &[1], -2.0)]),
            Err(SequenceError::WorkerPanicked("boom".into())),
        ];

        let out = DenseOutput::from_results(&results, 3);

        assert_eq!(out.tokens.dim(), (2, 3, 3));
        assert_eq!(out.tokens.slice(ndarray::s![0, 1, ..]).to_vec(), vec![3, 0, 0]);
        assert_eq!(out.timesteps.slice(ndarray::s![0, 0, ..]).to_vec(), vec![0, 2, 4]);
        assert_eq!(out.lengths.row(0).to_vec(), vec![3, 1, 0]);
        assert_eq!(out.scores[[0, 1]], -2.0);
        assert!(out.lengths.row(1).iter().all(|&l| l == 0));
    }

    #[test]
    fn reports_mismatched_buffer() {
        let out = DenseOutput::zeros(2, 4, 10);

        assert!(out.check_shape(2, 4, 10).is_ok());
        assert!(matches!(
            out.check_shape(2, 5, 10),
            Err(ConfigError::OutputShape { name: "tokens", .. })
        ));
    }

    #[test]
    fn refill_clears_stale_values() {
        let mut out = DenseOutput::zeros(1, 2, 4);
        out.fill(&[Ok(vec![hyp(&[1, 2, 3, 4], &[0, 1, 2, 3], -1.0)])]);
        out.fill(&[Ok(vec![hyp(&[5], &[2], -0.5)])]);

        assert_eq!(out.tokens.slice(ndarray::s![0, 0, ..]).to_vec(), vec![5, 0, 0, 0]);
        assert_eq!(out.lengths[[0, 0]], 1);
    }
}
