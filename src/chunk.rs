//! Fixed-window text chunker with overlap.
//!
//! A [`Chunker`] cuts text into windows of at most `max_chars` characters.
//! Consecutive windows share `overlap_chars` characters, so the scan offset
//! advances by `max_chars - overlap_chars` per window. Emission stops as
//! soon as a window reaches the end of the text.
//!
//! Offsets count Unicode scalar values, never bytes, so windows always fall
//! on `char` boundaries.

use crate::config::ChunkingConfig;
use crate::error::ConfigError;

/// Validated chunking parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunker {
    max_chars: usize,
    overlap_chars: usize,
}

impl Chunker {
    /// Rejects `max_chars == 0` and `overlap_chars >= max_chars`, either of
    /// which would stop the offset from advancing.
    pub fn new(max_chars: usize, overlap_chars: usize) -> Result<Self, ConfigError> {
        ChunkingConfig {
            max_chars,
            overlap_chars,
        }
        .validate()?;
        Ok(Self {
            max_chars,
            overlap_chars,
        })
    }

    pub fn from_config(config: &ChunkingConfig) -> Result<Self, ConfigError> {
        Self::new(config.max_chars, config.overlap_chars)
    }

    fn stride(&self) -> usize {
        self.max_chars - self.overlap_chars
    }

    /// Lazily iterate the windows of `text`. Calling again restarts.
    pub fn chunks<'a>(&self, text: &'a str) -> Chunks<'a> {
        let mut boundaries: Vec<usize> = text.char_indices().map(|(i, _)| i).collect();
        boundaries.push(text.len());
        Chunks {
            text,
            boundaries,
            max_chars: self.max_chars,
            stride: self.stride(),
            offset: 0,
            done: text.is_empty(),
        }
    }

    /// Number of windows [`chunks`](Self::chunks) would yield for a text of
    /// `len` characters: `ceil((len - overlap) / (max - overlap))`.
    pub fn chunk_count(&self, len: usize) -> usize {
        if len == 0 {
            return 0;
        }
        if len <= self.max_chars {
            return 1;
        }
        (len - self.overlap_chars).div_ceil(self.stride())
    }
}

/// Iterator over the windows of one text, produced by [`Chunker::chunks`].
#[derive(Debug, Clone)]
pub struct Chunks<'a> {
    text: &'a str,
    /// Byte offset of every char, plus `text.len()` as the final entry.
    boundaries: Vec<usize>,
    max_chars: usize,
    stride: usize,
    /// Current offset in chars.
    offset: usize,
    done: bool,
}

impl<'a> Iterator for Chunks<'a> {
    type Item = &'a str;

    fn next(&mut self) -> Option<&'a str> {
        if self.done {
            return None;
        }
        let char_len = self.boundaries.len() - 1;
        let end = (self.offset + self.max_chars).min(char_len);
        let window = &self.text[self.boundaries[self.offset]..self.boundaries[end]];
        if end >= char_len {
            self.done = true;
        } else {
            self.offset += self.stride;
        }
        Some(window)
    }
}
