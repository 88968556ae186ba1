//! Core traits for decoder components.

/// Score returned for any n-gram containing a word the model does not know.
pub const OOV_SCORE: f64 = -1000.0;

/// Language model consulted during beam search.
///
/// Implementations are shared read-only across decoding workers, so every
/// query must be reentrant. The decoder never mutates a model; weighting is
/// owned by [`crate::scorer::Scorer`].
pub trait LanguageModel: Send + Sync {
    /// Natural-log probability of `unit` following `context`.
    ///
    /// `context` holds at most `max_order() - 1` preceding units, oldest
    /// first, left-padded with `<s>`. Returns [`OOV_SCORE`] if any unit is
    /// outside the model vocabulary.
    fn score_unit(&self, context: &[&str], unit: &str) -> f64;

    /// Highest n-gram order of the model.
    fn max_order(&self) -> usize;

    /// Number of scoreable units, excluding sentence markers.
    fn dictionary_size(&self) -> usize;

    /// Whether every unit is a single character.
    fn is_character_based(&self) -> bool;

    /// Scoreable units, excluding sentence markers.
    fn units(&self) -> Vec<&str>;
}
