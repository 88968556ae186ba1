//! Spelling constraint for word-based language models.

use crate::types::Vocabulary;

/// Lexicon state at the start of a word.
pub const ROOT: usize = 0;

#[derive(Clone, Debug, Default)]
struct Node {
    children: Vec<(usize, usize)>,
    is_word_end: bool,
}

/// Label trie over dictionary words.
///
/// A beam carries a trie state. Extending it with a label is allowed only
/// if the label continues a dictionary word, or is the space label closing a
/// complete word, which returns the state to [`ROOT`].
#[derive(Clone, Debug)]
pub struct Lexicon {
    nodes: Vec<Node>,
    space_id: usize,
    words: usize,
}

impl Lexicon {
    /// Build a lexicon from `words`, spelling each with single-character
    /// labels of `vocabulary`.
    ///
    /// Words containing a character outside the vocabulary are skipped.
    /// Returns `None` if the vocabulary has no space label.
    pub fn build<'a, I>(words: I, vocabulary: &Vocabulary) -> Option<Self>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let space_id = vocabulary.space_id()?;

        let mut lexicon = Self {
            nodes: vec![Node::default()],
            space_id,
            words: 0,
        };

        let mut buf = [0u8; 4];
        for word in words {
            let spelling: Option<Vec<usize>> = word
                .chars()
                .map(|c| vocabulary.position(c.encode_utf8(&mut buf)))
                .collect();

            match spelling {
                Some(labels) if !labels.is_empty() && !labels.contains(&space_id) => {
                    lexicon.insert(&labels);
                }
                _ => tracing::trace!(word, "word not spellable with vocabulary"),
            }
        }

        Some(lexicon)
    }

    fn insert(&mut self, labels: &[usize]) {
        let mut state = ROOT;

        for &label in labels {
            state = match self.child(state, label) {
                Some(next) => next,
                None => {
                    self.nodes.push(Node::default());
                    let next = self.nodes.len() - 1;
                    self.nodes[state].children.push((label, next));
                    next
                }
            };
        }

        if !self.nodes[state].is_word_end {
            self.nodes[state].is_word_end = true;
            self.words += 1;
        }
    }

    fn child(&self, state: usize, label: usize) -> Option<usize> {
        self.nodes[state]
            .children
            .iter()
            .find(|(l, _)| *l == label)
            .map(|&(_, next)| next)
    }

    /// State after emitting `label` from `state`, or `None` if the
    /// resulting spelling leaves the dictionary.
    pub fn step(&self, state: usize, label: usize) -> Option<usize> {
        if label == self.space_id {
            self.nodes[state].is_word_end.then_some(ROOT)
        } else {
            self.child(state, label)
        }
    }

    /// Number of distinct words in the lexicon.
    pub fn len(&self) -> usize {
        self.words
    }

    pub fn is_empty(&self) -> bool {
        self.words == 0
    }
}
