//! Opaque handles over scorers and streaming states.
//!
//! Handles carry a generation counter, so a handle to a released slot stays
//! invalid after the slot is reused.

use crate::batch::{SequenceResult, decode_streams};
use crate::config::{DecoderConfig, LmConfig};
use crate::error::{ConfigError, Result, StateError};
use crate::scorer::Scorer;
use crate::state::DecoderState;
use crate::types::{Hypothesis, Vocabulary};
use ndarray::ArrayView3;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
struct Key {
    index: u32,
    generation: u32,
}

/// Handle to a registered [`Scorer`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ScorerHandle(Key);

/// Handle to a registered [`DecoderState`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct StateHandle(Key);

#[derive(Debug)]
struct Slot<T> {
    generation: u32,
    value: Option<T>,
}

#[derive(Debug)]
struct Arena<T> {
    slots: Vec<Slot<T>>,
    free: Vec<usize>,
    kind: &'static str,
}

impl<T> Arena<T> {
    fn new(kind: &'static str) -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            kind,
        }
    }

    fn insert(&mut self, value: T) -> Key {
        let index = match self.free.pop() {
            Some(index) => {
                self.slots[index].value = Some(value);
                index
            }
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    value: Some(value),
                });
                self.slots.len() - 1
            }
        };

        Key {
            index: index as u32,
            generation: self.slots[index].generation,
        }
    }

    fn unknown(&self) -> StateError {
        StateError::UnknownHandle { kind: self.kind }
    }

    fn get(&self, key: Key) -> std::result::Result<&T, StateError> {
        self.slots
            .get(key.index as usize)
            .filter(|slot| slot.generation == key.generation)
            .and_then(|slot| slot.value.as_ref())
            .ok_or_else(|| self.unknown())
    }

    fn get_mut(&mut self, key: Key) -> std::result::Result<&mut T, StateError> {
        let kind = self.kind;
        self.slots
            .get_mut(key.index as usize)
            .filter(|slot| slot.generation == key.generation)
            .and_then(|slot| slot.value.as_mut())
            .ok_or(StateError::UnknownHandle { kind })
    }

    fn remove(&mut self, key: Key) -> std::result::Result<T, StateError> {
        let kind = self.kind;
        let slot = self
            .slots
            .get_mut(key.index as usize)
            .filter(|slot| slot.generation == key.generation)
            .ok_or(StateError::UnknownHandle { kind })?;

        let value = slot.value.take().ok_or(StateError::UnknownHandle { kind })?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(key.index as usize);

        Ok(value)
    }

    fn len(&self) -> usize {
        self.slots.iter().filter(|slot| slot.value.is_some()).count()
    }

    /// Mutable access to the values of distinct `keys`, in key order.
    fn get_many_mut(&mut self, keys: &[Key]) -> std::result::Result<Vec<&mut T>, StateError> {
        let kind = self.kind;
        let mut wanted: HashMap<usize, usize> = HashMap::with_capacity(keys.len());
        for (position, key) in keys.iter().enumerate() {
            self.get(*key)?;
            if wanted.insert(key.index as usize, position).is_some() {
                // the same stream twice in one call
                return Err(self.unknown());
            }
        }

        let mut found: Vec<Option<&mut T>> = (0..keys.len()).map(|_| None).collect();
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if let Some(&position) = wanted.get(&index) {
                found[position] = slot.value.as_mut();
            }
        }

        found
            .into_iter()
            .map(|value| value.ok_or(StateError::UnknownHandle { kind }))
            .collect()
    }
}

/// Owner of every scorer and streaming state reachable through handles.
#[derive(Debug)]
pub struct Registry {
    scorers: Arena<Arc<Scorer>>,
    states: Arena<DecoderState>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    pub fn new() -> Self {
        Self {
            scorers: Arena::new("scorer"),
            states: Arena::new("state"),
        }
    }

    /// Load the language model named by `config` and register it.
    ///
    /// # Errors
    ///
    /// Returns error if `config` names no model or the model fails to load.
    pub fn create_scorer(
        &mut self,
        config: &LmConfig,
        vocabulary: &Vocabulary,
    ) -> Result<ScorerHandle> {
        let path = config
            .model_path
            .as_ref()
            .ok_or(ConfigError::MissingModelPath)?;
        let scorer = Scorer::load(path, vocabulary, config.alpha, config.beta, config.lm_kind)?;
        Ok(self.insert_scorer(scorer))
    }

    pub fn insert_scorer(&mut self, scorer: Scorer) -> ScorerHandle {
        ScorerHandle(self.scorers.insert(Arc::new(scorer)))
    }

    pub fn scorer(&self, handle: ScorerHandle) -> Result<&Arc<Scorer>> {
        Ok(self.scorers.get(handle.0)?)
    }

    /// Change the weights of a registered scorer.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::ScorerInUse`] while any live state holds the
    /// scorer.
    pub fn reset_weights(&mut self, handle: ScorerHandle, alpha: f64, beta: f64) -> Result<()> {
        let scorer = self.scorers.get_mut(handle.0)?;
        let holders = Arc::strong_count(scorer) - 1;

        match Arc::get_mut(scorer) {
            Some(scorer) => {
                scorer.reset_weights(alpha, beta);
                Ok(())
            }
            None => Err(StateError::ScorerInUse { holders }.into()),
        }
    }

    /// Release a scorer. States created from it keep their own reference.
    pub fn release_scorer(&mut self, handle: ScorerHandle) -> Result<()> {
        self.scorers.remove(handle.0)?;
        Ok(())
    }

    /// Create an uninitialized streaming state.
    pub fn create_state(
        &mut self,
        config: DecoderConfig,
        vocabulary: &Vocabulary,
        scorer: Option<ScorerHandle>,
    ) -> Result<StateHandle> {
        let scorer = match scorer {
            Some(handle) => {
                let scorer = self.scorers.get(handle.0)?;
                if scorer.vocabulary().len() != vocabulary.len() {
                    return Err(ConfigError::VocabularyMismatch {
                        expected: vocabulary.len(),
                        got: scorer.vocabulary().len(),
                    }
                    .into());
                }
                Some(Arc::clone(scorer))
            }
            None => None,
        };

        let state = DecoderState::new(config, vocabulary, scorer)?;
        Ok(StateHandle(self.states.insert(state)))
    }

    pub fn state(&self, handle: StateHandle) -> Result<&DecoderState> {
        Ok(self.states.get(handle.0)?)
    }

    /// Current hypotheses of a stream without consuming frames.
    pub fn snapshot(&self, handle: StateHandle) -> Result<Vec<Hypothesis>> {
        Ok(self.state(handle)?.snapshot())
    }

    pub fn release_state(&mut self, handle: StateHandle) -> Result<()> {
        self.states.remove(handle.0)?;
        Ok(())
    }

    /// Advance the streams behind `handles` by one chunk each.
    ///
    /// Fails without touching any stream if a handle is unknown, repeated,
    /// or refers to a finalized stream.
    pub fn decode_online(
        &mut self,
        handles: &[StateHandle],
        probs: ArrayView3<f32>,
        seq_lens: Option<&[usize]>,
        end_of_stream: &[bool],
        num_processes: usize,
    ) -> Result<Vec<SequenceResult>> {
        let keys: Vec<Key> = handles.iter().map(|handle| handle.0).collect();
        let mut states = self.states.get_many_mut(&keys)?;

        decode_streams(&mut states, probs, seq_lens, end_of_stream, num_processes)
    }

    pub fn scorer_count(&self) -> usize {
        self.scorers.len()
    }

    pub fn state_count(&self) -> usize {
        self.states.len()
    }
}
