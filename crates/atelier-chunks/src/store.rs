//! Chunk persistence boundary.
//!
//! The checkpoint database implements [`ChunkStore`] in production; the
//! in-memory [`MemoryChunkStore`] backs tests and short-lived tools.

use crate::compression::{compress, decompress};
use crate::error::ChunkError;
use crate::fingerprint::{sha256_hash, ChunkHash};
use bytes::Bytes;
use std::collections::{HashMap, HashSet};
use std::sync::RwLock;
use tracing::debug;

/// A chunk row: content address plus its compressed payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredChunk {
    /// SHA-256 of the raw (uncompressed) bytes
    pub hash: ChunkHash,
    /// Zstd frame holding the raw bytes
    pub data: Bytes,
    /// Length of `data`
    pub compressed_size: u64,
}

impl StoredChunk {
    /// Hash and compress raw chunk bytes.
    pub fn from_raw(raw: &[u8], level: i32) -> Result<Self, ChunkError> {
        let data = compress(raw, level)?;
        Ok(Self {
            hash: sha256_hash(raw),
            compressed_size: data.len() as u64,
            data: Bytes::from(data),
        })
    }

    /// Decompress and check that the payload still hashes to its address.
    pub fn verify(&self) -> Result<bool, ChunkError> {
        let raw = decompress(&self.data)?;
        Ok(sha256_hash(&raw) == self.hash)
    }
}

/// Local chunk persistence keyed by content hash.
///
/// Inserts follow an insert-or-ignore policy: a hash that already exists is
/// left untouched and reported as not new, never as an error.
pub trait ChunkStore {
    /// Returns true if a chunk with this hash is stored locally.
    fn contains(&self, hash: &ChunkHash) -> Result<bool, ChunkError>;

    /// Insert a chunk unless its hash is already present.
    /// Returns true if the row was new.
    fn insert_ignore(&self, chunk: StoredChunk) -> Result<bool, ChunkError>;

    /// Fetch a chunk by hash.
    fn get(&self, hash: &ChunkHash) -> Result<Option<StoredChunk>, ChunkError>;

    /// Delete a chunk. Returns true if it existed.
    fn delete(&self, hash: &ChunkHash) -> Result<bool, ChunkError>;

    /// Every stored hash, in no particular order.
    fn all_hashes(&self) -> Result<Vec<ChunkHash>, ChunkError>;

    /// Which of `hashes` are absent locally, deduplicated, in first-seen order.
    fn missing(&self, hashes: &[ChunkHash]) -> Result<Vec<ChunkHash>, ChunkError> {
        let mut seen = HashSet::with_capacity(hashes.len());
        let mut missing = Vec::new();
        for hash in hashes {
            if seen.insert(*hash) && !self.contains(hash)? {
                missing.push(*hash);
            }
        }
        Ok(missing)
    }
}

impl<T: ChunkStore + ?Sized> ChunkStore for &T {
    fn contains(&self, hash: &ChunkHash) -> Result<bool, ChunkError> {
        (**self).contains(hash)
    }

    fn insert_ignore(&self, chunk: StoredChunk) -> Result<bool, ChunkError> {
        (**self).insert_ignore(chunk)
    }

    fn get(&self, hash: &ChunkHash) -> Result<Option<StoredChunk>, ChunkError> {
        (**self).get(hash)
    }

    fn delete(&self, hash: &ChunkHash) -> Result<bool, ChunkError> {
        (**self).delete(hash)
    }

    fn all_hashes(&self) -> Result<Vec<ChunkHash>, ChunkError> {
        (**self).all_hashes()
    }

    fn missing(&self, hashes: &[ChunkHash]) -> Result<Vec<ChunkHash>, ChunkError> {
        (**self).missing(hashes)
    }
}

/// In-memory chunk store using RwLock for thread-safe access.
#[derive(Debug, Default)]
pub struct MemoryChunkStore {
    chunks: RwLock<HashMap<ChunkHash, StoredChunk>>,
}

impl MemoryChunkStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored chunks.
    pub fn len(&self) -> usize {
        self.chunks.read().map(|c| c.len()).unwrap_or(0)
    }

    /// True if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sum of compressed payload sizes.
    pub fn stored_bytes(&self) -> u64 {
        self.chunks
            .read()
            .map(|c| c.values().map(|s| s.compressed_size).sum())
            .unwrap_or(0)
    }
}

fn poisoned<E: std::fmt::Display>(e: E) -> ChunkError {
    ChunkError::Store(e.to_string())
}

impl ChunkStore for MemoryChunkStore {
    fn contains(&self, hash: &ChunkHash) -> Result<bool, ChunkError> {
        Ok(self.chunks.read().map_err(poisoned)?.contains_key(hash))
    }

    fn insert_ignore(&self, chunk: StoredChunk) -> Result<bool, ChunkError> {
        let mut chunks = self.chunks.write().map_err(poisoned)?;
        if chunks.contains_key(&chunk.hash) {
            return Ok(false);
        }
        debug!(hash = %chunk.hash, size = chunk.compressed_size, "Inserted new chunk");
        chunks.insert(chunk.hash, chunk);
        Ok(true)
    }

    fn get(&self, hash: &ChunkHash) -> Result<Option<StoredChunk>, ChunkError> {
        Ok(self.chunks.read().map_err(poisoned)?.get(hash).cloned())
    }

    fn delete(&self, hash: &ChunkHash) -> Result<bool, ChunkError> {
        Ok(self.chunks.write().map_err(poisoned)?.remove(hash).is_some())
    }

    fn all_hashes(&self) -> Result<Vec<ChunkHash>, ChunkError> {
        Ok(self.chunks.read().map_err(poisoned)?.keys().copied().collect())
    }
}
