//! Prefix beam search step.
//!
//! Each beam tracks the log-probability of all alignments of its label
//! sequence that end in blank (`log_p_blank`) and in its last label
//! (`log_p_nonblank`). Extending a beam by one frame either keeps its labels
//! (blank, or a repeat of the last label collapsing into it) or appends a
//! label. A repeat is only appended when the previous alignment ended in
//! blank.

use crate::lexicon::{self, Lexicon};
use crate::prune::Candidate;
use crate::scorer::Scorer;
use crate::types::Hypothesis;
use std::cmp::Ordering;
use std::collections::HashMap;

/// `ln(e^a + e^b)` without overflow; two `-inf` inputs give `-inf`.
pub fn log_sum_exp(a: f64, b: f64) -> f64 {
    let max = a.max(b);
    if max == f64::NEG_INFINITY {
        return f64::NEG_INFINITY;
    }
    max + ((a - max).exp() + (b - max).exp()).ln()
}

/// One prefix under consideration.
#[derive(Clone, Debug)]
pub struct Beam {
    pub labels: Vec<usize>,
    /// Peak frame of each label
    pub timesteps: Vec<usize>,
    /// Emission log-probability at the peak frame of the last label
    last_peak: f64,
    pub log_p_blank: f64,
    pub log_p_nonblank: f64,
    /// `log_sum_exp(log_p_blank, log_p_nonblank)`, refreshed after each step
    pub score: f64,
    lexicon_state: usize,
}

impl Beam {
    /// The empty prefix with probability one.
    pub fn root() -> Self {
        Self {
            labels: Vec::new(),
            timesteps: Vec::new(),
            last_peak: f64::NEG_INFINITY,
            log_p_blank: 0.0,
            log_p_nonblank: f64::NEG_INFINITY,
            score: 0.0,
            lexicon_state: lexicon::ROOT,
        }
    }

    fn last(&self) -> Option<usize> {
        self.labels.last().copied()
    }

    /// Same prefix with no probability mass yet.
    fn emptied(&self) -> Self {
        Self {
            log_p_blank: f64::NEG_INFINITY,
            log_p_nonblank: f64::NEG_INFINITY,
            score: f64::NEG_INFINITY,
            ..self.clone()
        }
    }

    /// Move the last label's peak to `time` if `log_prob` beats it.
    fn bump_peak(&mut self, log_prob: f64, time: usize) {
        if log_prob > self.last_peak
            && let Some(last) = self.timesteps.last_mut()
        {
            *last = time;
            self.last_peak = log_prob;
        }
    }

    pub fn to_hypothesis(&self, score: f64) -> Hypothesis {
        Hypothesis {
            tokens: self.labels.clone(),
            timesteps: self.timesteps.clone(),
            score,
        }
    }
}

/// Ranking order: higher score, then shorter prefix, then smaller labels.
pub fn rank(a_score: f64, a: &[usize], b_score: f64, b: &[usize]) -> Ordering {
    b_score
        .total_cmp(&a_score)
        .then_with(|| a.len().cmp(&b.len()))
        .then_with(|| a.cmp(b))
}

fn rank_beams(a: &Beam, b: &Beam) -> Ordering {
    rank(a.score, &a.labels, b.score, &b.labels)
}

/// Frame-by-frame beam extension with optional language model folding.
#[derive(Clone, Copy, Debug)]
pub struct Extender<'a> {
    pub blank_id: usize,
    pub beam_width: usize,
    pub space_id: Option<usize>,
    pub scorer: Option<&'a Scorer>,
}

/// Next-generation beams keyed by label sequence.
struct Generation {
    beams: Vec<Beam>,
    index: HashMap<Vec<usize>, usize>,
}

impl Generation {
    fn seeded(previous: &[Beam]) -> Self {
        let mut next = Self {
            beams: Vec::with_capacity(previous.len() * 2),
            index: HashMap::with_capacity(previous.len() * 2),
        };
        for beam in previous {
            next.index.insert(beam.labels.clone(), next.beams.len());
            next.beams.push(beam.emptied());
        }
        next
    }

    fn find(&self, labels: &[usize]) -> Option<usize> {
        self.index.get(labels).copied()
    }

    fn insert(&mut self, beam: Beam) -> usize {
        let slot = self.beams.len();
        self.index.insert(beam.labels.clone(), slot);
        self.beams.push(beam);
        slot
    }
}

impl Extender<'_> {
    fn lexicon(&self) -> Option<&Lexicon> {
        self.scorer.and_then(Scorer::lexicon)
    }

    /// Extend `beams` by one frame at absolute index `time`.
    ///
    /// Returns at most `beam_width` beams sorted by [`rank`], with distinct
    /// label sequences.
    pub fn step(&self, beams: &[Beam], candidates: &[Candidate], time: usize) -> Vec<Beam> {
        let mut next = Generation::seeded(beams);

        let blank = candidates.iter().any(|c| c.label == self.blank_id);
        let implicit_blank = (!blank).then(|| Candidate {
            label: self.blank_id,
            log_prob: f64::NEG_INFINITY,
        });

        for candidate in candidates.iter().chain(implicit_blank.as_ref()) {
            let Candidate { label, log_prob } = *candidate;

            for (slot, beam) in beams.iter().enumerate() {
                if label == self.blank_id {
                    let target = &mut next.beams[slot];
                    target.log_p_blank = log_sum_exp(target.log_p_blank, beam.score + log_prob);
                    continue;
                }

                let repeat = beam.last() == Some(label);
                if repeat {
                    let target = &mut next.beams[slot];
                    target.log_p_nonblank =
                        log_sum_exp(target.log_p_nonblank, beam.log_p_nonblank + log_prob);
                    target.bump_peak(log_prob, time);
                }

                self.append(&mut next, beam, label, log_prob, repeat, time);
            }
        }

        let mut beams = next.beams;
        for beam in &mut beams {
            beam.score = log_sum_exp(beam.log_p_blank, beam.log_p_nonblank);
        }
        beams.sort_by(rank_beams);
        beams.truncate(self.beam_width);

        tracing::trace!(
            time,
            candidates = candidates.len(),
            beams = beams.len(),
            best = beams.first().map(|b| b.score),
            "beam step"
        );

        beams
    }

    fn append(
        &self,
        next: &mut Generation,
        beam: &Beam,
        label: usize,
        log_prob: f64,
        repeat: bool,
        time: usize,
    ) {
        let mut log_p = if repeat {
            beam.log_p_blank + log_prob
        } else {
            beam.score + log_prob
        };

        if log_p == f64::NEG_INFINITY {
            return;
        }

        let lexicon_state = match self.lexicon() {
            Some(lexicon) => match lexicon.step(beam.lexicon_state, label) {
                Some(state) => state,
                None => return,
            },
            None => beam.lexicon_state,
        };

        let mut labels = Vec::with_capacity(beam.labels.len() + 1);
        labels.extend_from_slice(&beam.labels);
        labels.push(label);

        if let Some(scorer) = self.scorer {
            if scorer.is_character_based() {
                log_p += scorer.score_prefix(&labels);
            } else if Some(label) == self.space_id {
                log_p += scorer.score_prefix(&beam.labels);
            }
        }

        let slot = match next.find(&labels) {
            Some(slot) => {
                next.beams[slot].bump_peak(log_prob, time);
                slot
            }
            None => {
                let mut timesteps = Vec::with_capacity(beam.timesteps.len() + 1);
                timesteps.extend_from_slice(&beam.timesteps);
                timesteps.push(time);

                next.insert(Beam {
                    labels,
                    timesteps,
                    last_peak: log_prob,
                    log_p_blank: f64::NEG_INFINITY,
                    log_p_nonblank: f64::NEG_INFINITY,
                    score: f64::NEG_INFINITY,
                    lexicon_state,
                })
            }
        };

        let target = &mut next.beams[slot];
        target.log_p_nonblank = log_sum_exp(target.log_p_nonblank, log_p);
    }

    /// Rank `beams` as final hypotheses.
    ///
    /// Word models add the score of a trailing unfinished word to every
    /// non-empty beam that does not end in a space. Beams with no probability
    /// mass are dropped.
    pub fn finish(&self, beams: &[Beam]) -> Vec<Hypothesis> {
        let mut ranked: Vec<(f64, &Beam)> = beams
            .iter()
            .filter(|beam| beam.score > f64::NEG_INFINITY)
            .map(|beam| (self.final_score(beam), beam))
            .collect();

        ranked.sort_by(|(sa, a), (sb, b)| rank(*sa, &a.labels, *sb, &b.labels));

        ranked
            .into_iter()
            .map(|(score, beam)| beam.to_hypothesis(score))
            .collect()
    }

    fn final_score(&self, beam: &Beam) -> f64 {
        match self.scorer {
            Some(scorer)
                if !scorer.is_character_based()
                    && !beam.labels.is_empty()
                    && beam.last() != self.space_id =>
            {
                beam.score + scorer.score_prefix(&beam.labels)
            }
            _ => beam.score,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidates(probs: &[f64]) -> Vec<Candidate> {
        probs
            .iter()
            .enumerate()
            .map(|(label, &p)| Candidate {
                label,
                log_prob: p.ln(),
            })
            .collect()
    }

    fn extender(beam_width: usize) -> Extender<'static> {
        Extender {
            blank_id: 0,
            beam_width,
            space_id: None,
            scorer: None,
        }
    }

    fn run(extender: &Extender, frames: &[&[f64]]) -> Vec<Beam> {
        let mut beams = vec![Beam::root()];
        for (t, frame) in frames.iter().enumerate() {
            beams = extender.step(&beams, &candidates(frame), t);
        }
        beams
    }

    fn find<'a>(beams: &'a [Beam], labels: &[usize]) -> &'a Beam {
        beams.iter().find(|b| b.labels == labels).unwrap()
    }

    #[test]
    fn log_sum_exp_handles_infinities() {
        assert_eq!(
            log_sum_exp(f64::NEG_INFINITY, f64::NEG_INFINITY),
            f64::NEG_INFINITY
        );
        assert_eq!(log_sum_exp(f64::NEG_INFINITY, -1.5), -1.5);
        assert!((log_sum_exp(0.5f64.ln(), 0.5f64.ln())).abs() < 1e-12);
    }

    #[test]
    fn repeat_collapses_unless_separated_by_blank() {
        // blank = 0, label 1
        let beams = run(&extender(10), &[&[0.4, 0.6], &[0.3, 0.7]]);

        // "1": 11, b1, 1b
        let one = find(&beams, &[1]);
        let expected = (0.6 * 0.7 + 0.4 * 0.7 + 0.6 * 0.3f64).ln();
        assert!((one.score - expected).abs() < 1e-12);

        // "11" would need a blank in between, impossible in two frames
        assert!(beams.iter().all(|b| b.labels != [1, 1]));
    }

    #[test]
    fn total_probability_is_preserved_without_pruning() {
        let beams = run(
            &extender(100),
            &[&[0.2, 0.5, 0.3], &[0.6, 0.1, 0.3], &[0.1, 0.4, 0.5]],
        );

        let total = beams
            .iter()
            .map(|b| b.score)
            .fold(f64::NEG_INFINITY, log_sum_exp);
        assert!(total.abs() < 1e-12);
    }

    #[test]
    fn beams_are_unique_and_ranked() {
        let beams = run(
            &extender(4),
            &[&[0.2, 0.5, 0.3], &[0.6, 0.1, 0.3], &[0.1, 0.4, 0.5]],
        );

        assert_eq!(beams.len(), 4);
        for pair in beams.windows(2) {
            assert_ne!(pair[0].labels, pair[1].labels);
            assert!(pair[0].score >= pair[1].score);
        }
    }

    #[test]
    fn equal_scores_prefer_shorter_then_smaller_labels() {
        let a = (-1.0, vec![2, 1]);
        let b = (-1.0, vec![1, 2]);
        let c = (-1.0, vec![3]);

        let mut all = [a.clone(), b.clone(), c.clone()];
        all.sort_by(|x, y| rank(x.0, &x.1, y.0, &y.1));

        assert_eq!(all, [c, b, a]);
    }

    #[test]
    fn implicit_blank_extends_when_pruned() {
        let ext = extender(10);
        let only_label = [Candidate {
            label: 1,
            log_prob: 0.9f64.ln(),
        }];

        let beams = ext.step(&[Beam::root()], &only_label, 0);

        // the empty prefix survives with -inf blank mass
        assert_eq!(beams.len(), 2);
        assert_eq!(beams[0].labels, [1]);
        assert_eq!(beams[1].score, f64::NEG_INFINITY);
    }

    #[test]
    fn finish_drops_beams_without_mass() {
        let ext = extender(10);
        let only_label = [Candidate {
            label: 1,
            log_prob: 0.9f64.ln(),
        }];

        let beams = ext.step(&[Beam::root()], &only_label, 0);
        let beams = ext.step(&beams, &only_label, 1);
        let hyps = ext.finish(&beams);

        assert!(beams.iter().any(|b| b.score == f64::NEG_INFINITY));
        assert_eq!(hyps.len(), 1);
        assert_eq!(hyps[0].tokens, [1]);
        assert!(hyps[0].score.is_finite());
    }

    #[test]
    fn peak_timestep_follows_highest_emission() {
        // label 1 emitted over three frames, peaking at frame 1
        let beams = run(&extender(10), &[&[0.4, 0.6], &[0.1, 0.9], &[0.3, 0.7]]);

        assert_eq!(find(&beams, &[1]).timesteps, [1]);
    }

    #[test]
    fn zero_probability_extension_is_skipped() {
        let ext = extender(10);
        let frame = [
            Candidate {
                label: 0,
                log_prob: 0.0,
            },
            Candidate {
                label: 1,
                log_prob: f64::NEG_INFINITY,
            },
        ];

        let beams = ext.step(&[Beam::root()], &frame, 0);

        assert_eq!(beams.len(), 1);
        assert!(beams[0].labels.is_empty());
    }
}
