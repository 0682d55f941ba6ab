use crate::core::error::{Error, Result};

/// How far back from a window end to look for whitespace to break on
const BOUNDARY_LOOKBACK: usize = 100;

/// Splits text into overlapping, bounded-size segments.
///
/// Sizes are measured in characters, not bytes.
#[derive(Debug, Clone, Copy)]
pub struct Chunker {
    size: usize,
    overlap: usize,
}

impl Chunker {
    /// `overlap` must be smaller than `size`; anything else is a configuration error.
    pub fn new(size: usize, overlap: usize) -> Result<Self> {
        if size == 0 {
            return Err(Error::Config("chunk size must be greater than 0".to_string()));
        }
        if overlap >= size {
            return Err(Error::Config(format!(
                "chunk overlap ({}) must be smaller than chunk size ({})",
                overlap, size
            )));
        }
        Ok(Self { size, overlap })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn overlap(&self) -> usize {
        self.overlap
    }

    pub fn chunk(&self, text: &str) -> Vec<String> {
        let chars: Vec<char> = text.chars().collect();
        let len = chars.len();
        if len <= self.size {
            return vec![text.to_string()];
        }

        let mut chunks = Vec::new();
        let mut start = 0;

        while start < len {
            let mut end = start + self.size;

            if end < len {
                // Break on whitespace, but never so early that the next start
                // would fail to move forward.
                let lookback = BOUNDARY_LOOKBACK.min(self.size - self.overlap);
                if let Some(back) = (0..lookback).find(|&i| chars[end - i].is_whitespace()) {
                    end -= back;
                }
            } else {
                end = len;
            }

            let chunk: String = chars[start..end].iter().collect();
            let chunk = chunk.trim();
            if !chunk.is_empty() {
                chunks.push(chunk.to_string());
            }

            if end >= len {
                break;
            }
            start = end - self.overlap;
        }

        chunks
    }
}
