//! Mark-and-sweep removal of chunks no checkpoint or template references.

use crate::error::ChunkError;
use crate::fingerprint::ChunkHash;
use crate::sequence::ChunkSequence;
use crate::store::ChunkStore;
use std::collections::HashSet;
use tracing::debug;

/// Statistics from a sweep cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepStats {
    /// Number of chunks scanned during this cycle.
    pub chunks_scanned: usize,
    /// Number of chunks deleted in this cycle.
    pub chunks_reclaimed: usize,
}

/// Tracks reachable chunks and deletes the rest from a store.
#[derive(Debug, Default)]
pub struct ChunkSweeper {
    reachable: HashSet<ChunkHash>,
}

impl ChunkSweeper {
    /// Create a sweeper with no marks.
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark every hash of a sequence as reachable.
    pub fn mark_sequence(&mut self, sequence: &ChunkSequence) {
        self.reachable.extend(sequence.iter().copied());
    }

    /// Mark individual hashes as reachable.
    pub fn mark_reachable(&mut self, hashes: &[ChunkHash]) {
        self.reachable.extend(hashes.iter().copied());
        debug!(count = hashes.len(), "Marked chunks as reachable");
    }

    /// Check if a chunk is marked as reachable.
    pub fn is_marked(&self, hash: &ChunkHash) -> bool {
        self.reachable.contains(hash)
    }

    /// Clear all marks for the next cycle.
    pub fn clear_marks(&mut self) {
        self.reachable.clear();
    }

    /// Delete every stored chunk that is not marked.
    pub fn sweep<S: ChunkStore + ?Sized>(&self, store: &S) -> Result<SweepStats, ChunkError> {
        let all = store.all_hashes()?;
        let mut stats = SweepStats {
            chunks_scanned: all.len(),
            ..Default::default()
        };
        for hash in all.iter().filter(|h| !self.reachable.contains(*h)) {
            if store.delete(hash)? {
                stats.chunks_reclaimed += 1;
            }
        }
        debug!(
            scanned = stats.chunks_scanned,
            reclaimed = stats.chunks_reclaimed,
            "Chunk sweep complete"
        );
        Ok(stats)
    }
}
