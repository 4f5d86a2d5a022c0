//! Chunk → worker assignment

/// Picks the worker index for a chunk. Must return a value below `worker_count`.
pub trait AssignmentStrategy: Send + Sync {
    fn assign(&self, chunk_id: u32, worker_count: usize) -> usize;
}

/// `chunk_id mod worker_count`, no load awareness
#[derive(Debug, Clone, Copy, Default)]
pub struct RoundRobin;

impl AssignmentStrategy for RoundRobin {
    fn assign(&self, chunk_id: u32, worker_count: usize) -> usize {
        chunk_id as usize % worker_count.max(1)
    }
}
