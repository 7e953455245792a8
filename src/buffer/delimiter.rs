//! Delimiter-bounded text accumulation.
//!
//! A [`DelimiterBuffer`] collects text fragments as they arrive and hands
//! back every complete segment that ends with the configured delimiter.
//! Fragment boundaries are irrelevant: a delimiter split across two appends
//! is found once both halves are present.

use std::fmt;

/// Accumulates text and extracts delimiter-terminated segments.
///
/// An empty delimiter never matches, so the buffer only grows and
/// [`reset`](Self::reset) always returns nothing.
#[derive(Debug, Clone, Default)]
pub struct DelimiterBuffer {
    store: String,
    delimiter: String,
    /// Byte offset in `store` before which no delimiter occurrence can start.
    scanned: usize,
}

impl DelimiterBuffer {
    /// Create a buffer with no delimiter (segmentation disabled).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a buffer that splits on `delimiter`.
    #[must_use]
    pub fn with_delimiter(delimiter: impl Into<String>) -> Self {
        Self {
            delimiter: delimiter.into(),
            ..Self::default()
        }
    }

    /// The delimiter this buffer splits on.
    #[must_use]
    pub fn delimiter(&self) -> &str {
        &self.delimiter
    }

    /// Append a fragment to the pending content.
    pub fn append(&mut self, fragment: &str) {
        self.store.push_str(fragment);
    }

    /// Whether the pending content holds at least one complete delimiter.
    #[must_use]
    pub fn is_finish(&self) -> bool {
        !self.delimiter.is_empty() && self.store[self.scanned..].contains(self.delimiter.as_str())
    }

    /// Pending content, verbatim.
    #[must_use]
    pub fn pending(&self) -> &str {
        &self.store
    }

    /// Whether nothing is pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    /// Drain every complete segment from the pending content.
    ///
    /// Occurrences are found left to right without overlap. The text before
    /// each occurrence is returned as one segment; whatever follows the last
    /// occurrence stays pending. When there is no occurrence the pending
    /// content is left untouched and the result is empty.
    pub fn reset(&mut self) -> Vec<String> {
        if self.delimiter.is_empty() {
            return Vec::new();
        }

        let mut segments = Vec::new();
        let mut consumed = 0;
        let mut from = self.scanned;

        while let Some(pos) = self.store[from..].find(self.delimiter.as_str()) {
            let start = from + pos;
            segments.push(self.store[consumed..start].to_string());
            consumed = start + self.delimiter.len();
            from = consumed;
        }

        if consumed > 0 {
            self.store.drain(..consumed);
        }
        self.scanned = self.resume_offset();

        segments
    }

    /// First offset where a delimiter could still start, given that the
    /// current content holds no complete occurrence.
    fn resume_offset(&self) -> usize {
        let keep = self.delimiter.len().saturating_sub(1);
        let mut offset = self.store.len().saturating_sub(keep);
        while !self.store.is_char_boundary(offset) {
            offset -= 1;
        }
        offset
    }
}

impl fmt::Display for DelimiterBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.store)
    }
}
