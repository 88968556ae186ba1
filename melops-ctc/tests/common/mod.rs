//! Shared fixtures for melops-ctc integration tests.
//!
//! Two 6-frame distributions over the vocabulary `' ␣ a b c d _` with the
//! blank last. Beam width 20 decodes `P1` to "acdc" and `P2` to "b'a".

#![allow(dead_code)]

use melops_ctc::config::{DecoderConfig, LmConfig, LmKind};
use melops_ctc::types::{Hypothesis, Vocabulary};
use ndarray::{Array2, Array3, Axis, stack};
use std::path::PathBuf;
use std::sync::LazyLock;

pub const LABELS: [&str; 7] = ["'", " ", "a", "b", "c", "d", "_"];
pub const BLANK_ID: usize = 6;

pub const P1: [[f32; 7]; 6] = [
    [0.06390443, 0.21124858, 0.27323887, 0.06870235, 0.0361254, 0.18184413, 0.16493624],
    [0.03309247, 0.22866108, 0.24390638, 0.09699597, 0.31895462, 0.0094893, 0.06890021],
    [0.218104, 0.19992557, 0.18245131, 0.08503348, 0.14903535, 0.08424043, 0.08120984],
    [0.12094152, 0.19162472, 0.01473646, 0.28045061, 0.24246305, 0.05206269, 0.09772094],
    [0.1333387, 0.00550838, 0.00301669, 0.21745861, 0.20803985, 0.41317442, 0.01946335],
    [0.16468227, 0.1980699, 0.1906545, 0.18963251, 0.19860937, 0.04377724, 0.01457421],
];

pub const P2: [[f32; 7]; 6] = [
    [0.08034842, 0.22671944, 0.05799633, 0.36814645, 0.11307441, 0.04468023, 0.10903471],
    [0.09742457, 0.12959763, 0.09435383, 0.21889204, 0.15113123, 0.10219457, 0.20640612],
    [0.45033529, 0.09091417, 0.15333208, 0.07939558, 0.08649316, 0.12298585, 0.01654384],
    [0.02512238, 0.22079203, 0.19664364, 0.11906379, 0.07816055, 0.22538587, 0.13483174],
    [0.17928453, 0.06065261, 0.41153005, 0.1172041, 0.11880313, 0.07113197, 0.04139363],
    [0.15882358, 0.1235788, 0.23376776, 0.20510435, 0.00279306, 0.05294827, 0.22298418],
];

pub static VOCABULARY: LazyLock<Vocabulary> =
    LazyLock::new(|| Vocabulary::new(LABELS).expect("fixture vocabulary is valid"));

/// Exact search with beam width 20.
pub fn config() -> DecoderConfig {
    DecoderConfig::default()
        .with_beam_width(20)
        .with_cutoff_top_n(LABELS.len())
        .with_blank_id(BLANK_ID)
}

pub fn frames(probs: &[[f32; 7]; 6]) -> Array2<f32> {
    Array2::from(probs.to_vec())
}

/// Stack equally long sequences into a `(batch, time, vocab)` buffer.
pub fn batch(sequences: &[&[[f32; 7]; 6]]) -> Array3<f32> {
    let frames: Vec<Array2<f32>> = sequences.iter().map(|p| frames(p)).collect();
    let views: Vec<_> = frames.iter().map(Array2::view).collect();
    stack(Axis(0), &views).expect("sequences share a shape")
}

pub fn lm_path() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/data/test.arpa")
}

/// Unigram character model strongly preferring `b` over `a`.
pub fn char_lm_path() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/data/char.arpa")
}

/// The test model only knows the word "a", which would otherwise be
/// detected as a character model.
pub fn lm_config(alpha: f64, beta: f64) -> LmConfig {
    LmConfig::new(lm_path(), alpha, beta).with_kind(LmKind::Word)
}

pub fn texts(hypotheses: &[Hypothesis]) -> Vec<String> {
    hypotheses.iter().map(|h| h.text(&VOCABULARY)).collect()
}

pub fn best_text(hypotheses: &[Hypothesis]) -> String {
    hypotheses
        .first()
        .map(|h| h.text(&VOCABULARY))
        .unwrap_or_default()
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
