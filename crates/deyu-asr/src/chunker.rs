//! Fixed-size PCM framing
//!
//! The recognizer consumes frames of exactly [`CHUNK_SAMPLES`] samples; the
//! remainder of each push waits in a carry-over buffer for the next one.

use std::collections::VecDeque;

/// Samples per frame (60 ms at 16 kHz)
pub const CHUNK_SAMPLES: usize = 960;

/// Splits a sample stream into fixed-size frames
#[derive(Debug)]
pub struct PcmChunker {
    size: usize,
    pending: VecDeque<i16>,
}

impl Default for PcmChunker {
    fn default() -> Self {
        Self::new(CHUNK_SAMPLES)
    }
}

impl PcmChunker {
    /// Create a chunker emitting frames of `size` samples
    #[must_use]
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        Self {
            size,
            pending: VecDeque::with_capacity(size * 2),
        }
    }

    /// Append samples and return every complete frame
    pub fn push(&mut self, samples: &[i16]) -> Vec<Vec<i16>> {
        self.pending.extend(samples.iter().copied());
        let mut frames = Vec::with_capacity(self.pending.len() / self.size);
        while self.pending.len() >= self.size {
            frames.push(self.pending.drain(..self.size).collect());
        }
        frames
    }

    /// Take the short trailing frame, if any
    pub fn flush(&mut self) -> Option<Vec<i16>> {
        if self.pending.is_empty() {
            None
        } else {
            Some(self.pending.drain(..).collect())
        }
    }

    /// Samples waiting for a full frame
    #[must_use]
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Drop buffered samples
    pub fn clear(&mut self) {
        self.pending.clear();
    }
}
