//! Identifier generation owned by a scheduler.

use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic ID source.
///
/// Shards use a stride equal to the shard count with distinct offsets, so IDs
/// never collide across shards without any shared state.
#[derive(Debug)]
pub struct IdGenerator {
    next: AtomicU64,
    stride: u64,
}

impl IdGenerator {
    pub fn new(first: u64) -> Self {
        Self::strided(first, 1)
    }

    pub fn strided(first: u64, stride: u64) -> Self {
        Self {
            next: AtomicU64::new(first),
            stride: stride.max(1),
        }
    }

    pub fn next_id(&self) -> u64 {
        self.next.fetch_add(self.stride, Ordering::Relaxed)
    }

    /// The ID the next call will return.
    pub fn peek(&self) -> u64 {
        self.next.load(Ordering::Relaxed)
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new(1)
    }
}
