//! Monotonic ID allocation for messages, blocks, threads, and chunks (C1)
//!
//! Message IDs, block IDs, and thread IDs are unique within one Context
//! and allocated from three independent monotonic counters starting at 1.
//! Chunk IDs get a fourth counter for per-chunk identifiers within a
//! streaming message. Allocation is lock-free (`AtomicU64`) so it composes
//! with the writer's own mutex without nesting locks.

use std::sync::atomic::{AtomicU64, Ordering};

/// Allocates `M<n>` / `B<n>` / `T<n>` / `C<n>` identifiers for one Context.
#[derive(Debug, Default)]
pub struct IdAllocator {
    message: AtomicU64,
    block: AtomicU64,
    thread: AtomicU64,
    chunk: AtomicU64,
}

impl IdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate the next message id, formatted `M<n>`.
    pub fn next_message_id(&self) -> String {
        format!("M{}", self.message.fetch_add(1, Ordering::SeqCst) + 1)
    }

    /// Allocate the next block id, formatted `B<n>`.
    pub fn next_block_id(&self) -> String {
        format!("B{}", self.block.fetch_add(1, Ordering::SeqCst) + 1)
    }

    /// Allocate the next thread id, formatted `T<n>`.
    pub fn next_thread_id(&self) -> String {
        format!("T{}", self.thread.fetch_add(1, Ordering::SeqCst) + 1)
    }

    /// Allocate the next chunk id, formatted `C<n>`.
    pub fn next_chunk_id(&self) -> String {
        format!("C{}", self.chunk.fetch_add(1, Ordering::SeqCst) + 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn ids_start_at_one_and_increment() {
        let ids = IdAllocator::new();
        assert_eq!(ids.next_message_id(), "M1");
        assert_eq!(ids.next_message_id(), "M2");
        assert_eq!(ids.next_block_id(), "B1");
        assert_eq!(ids.next_thread_id(), "T1");
        assert_eq!(ids.next_chunk_id(), "C1");
        assert_eq!(ids.next_message_id(), "M3");
    }

    #[test]
    fn counters_are_independent() {
        let ids = IdAllocator::new();
        ids.next_message_id();
        ids.next_message_id();
        ids.next_message_id();
        assert_eq!(ids.next_block_id(), "B1");
    }

    #[test]
    fn concurrent_allocation_never_duplicates() {
        let ids = Arc::new(IdAllocator::new());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let ids = ids.clone();
            handles.push(std::thread::spawn(move || {
                (0..100).map(|_| ids.next_message_id()).collect::<Vec<_>>()
            }));
        }
        let mut all = Vec::new();
        for h in handles {
            all.extend(h.join().unwrap());
        }
        let unique: std::collections::HashSet<_> = all.iter().cloned().collect();
        assert_eq!(unique.len(), all.len());
    }
}
