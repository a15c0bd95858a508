//! Character vocabulary for CAPTCHA labels.

use std::collections::HashMap;

/// Default alphabet: digits followed by uppercase ASCII letters.
pub const DEFAULT_ALPHABET: &str = "0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VocabError {
    #[error("vocabulary is empty")]
    Empty,
    #[error("character '{0}' appears more than once in the vocabulary")]
    Duplicate(char),
    #[error("character '{0}' is not in the vocabulary")]
    UnknownChar(char),
    #[error("class index {index} out of range (vocabulary size {size})")]
    IndexOutOfRange { index: usize, size: usize },
}

/// Ordered alphabet with a bijective character ↔ class index mapping.
#[derive(Debug, Clone)]
pub struct Vocabulary {
    chars: Vec<char>,
    index: HashMap<char, usize>,
}

impl Vocabulary {
    pub fn new(alphabet: &str) -> Result<Self, VocabError> {
        let chars: Vec<char> = alphabet.chars().collect();
        if chars.is_empty() {
            return Err(VocabError::Empty);
        }
        let mut index = HashMap::with_capacity(chars.len());
        for (i, &c) in chars.iter().enumerate() {
            if index.insert(c, i).is_some() {
                return Err(VocabError::Duplicate(c));
            }
        }
        Ok(Self { chars, index })
    }

    /// Number of classes per position.
    pub fn len(&self) -> usize {
        self.chars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chars.is_empty()
    }

    pub fn index_of(&self, c: char) -> Option<usize> {
        self.index.get(&c).copied()
    }

    pub fn char_at(&self, index: usize) -> Option<char> {
        self.chars.get(index).copied()
    }

    /// Maps a label string to class indices.
    pub fn encode(&self, text: &str) -> Result<Vec<u32>, VocabError> {
        text.chars()
            .map(|c| {
                self.index_of(c)
                    .map(|i| i as u32)
                    .ok_or(VocabError::UnknownChar(c))
            })
            .collect()
    }

    /// Maps class indices back to a string.
    pub fn decode(&self, indices: &[u32]) -> Result<String, VocabError> {
        indices
            .iter()
            .map(|&i| {
                self.char_at(i as usize).ok_or(VocabError::IndexOutOfRange {
                    index: i as usize,
                    size: self.len(),
                })
            })
            .collect()
    }
}

impl Default for Vocabulary {
    fn default() -> Self {
        let chars: Vec<char> = DEFAULT_ALPHABET.chars().collect();
        let index = chars.iter().enumerate().map(|(i, &c)| (c, i)).collect();
        Self { chars, index }
    }
}
