//! Command buffer
//!
//! Growable byte accumulator for assembling frames across partial reads.

use super::TERMINATOR;

/// Extra capacity reserved whenever the buffer has to grow
pub const GROWTH_SLACK: usize = 512;

/// Append/consume byte accumulator.
///
/// `len() <= capacity()` always holds; capacity only grows.
#[derive(Debug, Default)]
pub struct CommandBuffer {
    data: Vec<u8>,
}

impl CommandBuffer {
    /// Create a buffer with `capacity` bytes preallocated
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: Vec::with_capacity(capacity),
        }
    }

    /// Append bytes, growing to `len + bytes.len() + GROWTH_SLACK` when full
    pub fn add(&mut self, bytes: &[u8]) {
        if self.data.len() + bytes.len() > self.data.capacity() {
            self.data.reserve_exact(bytes.len() + GROWTH_SLACK);
        }
        self.data.extend_from_slice(bytes);
    }

    /// Drop the first `count` bytes and move the remainder to the start
    pub fn remove_start(&mut self, count: usize) {
        let count = count.min(self.data.len());
        self.data.drain(..count);
    }

    /// Index of the first frame terminator
    pub fn find_terminator(&self) -> Option<usize> {
        self.data.iter().position(|&b| b == TERMINATOR)
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.data.capacity()
    }

    /// Forget all contents, keeping the allocation
    pub fn clear(&mut self) {
        self.data.clear();
    }
}
