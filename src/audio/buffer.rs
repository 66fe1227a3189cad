//! # Audio Buffer Management
//!
//! Implements the bounded FIFO that accumulates inbound caller audio until there
//! is enough of it to be worth sending to transcription.
//!
//! ## Key Features:
//! - **Byte cap**: The buffer never keeps more than `max_size` bytes once `add` returns
//! - **Whole-chunk eviction**: Old audio is dropped one chunk at a time, never mid-chunk
//! - **Drain semantics**: `get_all` hands back everything and leaves the buffer empty

use std::collections::VecDeque;

/// FIFO of raw audio chunks with a byte-size cap.
///
/// ## Memory Management:
/// - Chunks are stored as they arrived (no copying until `get_all`)
/// - When the running total exceeds the cap, the oldest whole chunks are evicted
/// - A single chunk larger than the cap is evicted entirely, so the buffer may end up empty
#[derive(Debug)]
pub struct AudioBuffer {
    /// Audio chunks in arrival order
    chunks: VecDeque<Vec<u8>>,

    /// Total number of bytes across all chunks
    current_size: usize,

    /// Maximum number of bytes to keep
    max_size: usize,
}

impl AudioBuffer {
    /// Create an empty buffer holding at most `max_size` bytes.
    pub fn new(max_size: usize) -> Self {
        Self {
            chunks: VecDeque::new(),
            current_size: 0,
            max_size,
        }
    }

    /// Append a chunk, evicting the oldest chunks while over the cap.
    ///
    /// ## Rust Concepts:
    /// - **&[u8]**: Borrowed slice; the bytes are copied into an owned chunk
    /// - **while let**: Keep popping until the total fits or nothing is left
    pub fn add(&mut self, chunk: &[u8]) {
        if chunk.is_empty() {
            return;
        }

        self.chunks.push_back(chunk.to_vec());
        self.current_size += chunk.len();

        while self.current_size > self.max_size {
            match self.chunks.pop_front() {
                Some(removed) => self.current_size -= removed.len(),
                None => break,
            }
        }
    }

    /// Return all buffered bytes in order and clear the buffer.
    pub fn get_all(&mut self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.current_size);
        for chunk in self.chunks.drain(..) {
            out.extend_from_slice(&chunk);
        }
        self.current_size = 0;
        out
    }

    /// Number of bytes currently held.
    pub fn len(&self) -> usize {
        self.current_size
    }

    /// Check if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.current_size == 0
    }

    /// Drop everything without returning it.
    pub fn clear(&mut self) {
        self.chunks.clear();
        self.current_size = 0;
    }

    /// The configured byte cap.
    pub fn max_size(&self) -> usize {
        self.max_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_all_returns_bytes_in_order_and_drains() {
        let mut buffer = AudioBuffer::new(100);
        buffer.add(&[1, 2, 3]);
        buffer.add(&[4, 5]);
        assert_eq!(buffer.len(), 5);

        assert_eq!(buffer.get_all(), vec![1, 2, 3, 4, 5]);
        assert!(buffer.is_empty());
        // Drain, not peek
        assert!(buffer.get_all().is_empty());
    }

    #[test]
    fn test_evicts_oldest_whole_chunks() {
        let mut buffer = AudioBuffer::new(10);
        buffer.add(&[1; 4]);
        buffer.add(&[2; 4]);
        buffer.add(&[3; 4]);

        // 12 > 10, so the first chunk goes entirely
        assert_eq!(buffer.len(), 8);
        assert_eq!(buffer.get_all(), [vec![2; 4], vec![3; 4]].concat());
    }

    #[test]
    fn test_never_exceeds_cap_after_add() {
        let mut buffer = AudioBuffer::new(1000);
        for size in [300usize, 450, 120, 999, 1, 640, 10, 700] {
            buffer.add(&vec![0u8; size]);
            assert!(buffer.len() <= buffer.max_size());
        }
    }

    #[test]
    fn test_oversized_chunk_is_not_kept() {
        let mut buffer = AudioBuffer::new(4);
        buffer.add(&[9; 8]);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_clear_and_empty_chunks() {
        let mut buffer = AudioBuffer::new(16);
        buffer.add(&[]);
        assert!(buffer.is_empty());
        buffer.add(&[1, 2]);
        buffer.clear();
        assert_eq!(buffer.len(), 0);
        assert!(buffer.get_all().is_empty());
    }
}
