//! Error types for the atelier-chunks subsystem

use crate::fingerprint::ChunkHash;

/// All errors that can occur while chunking, storing or rebuilding file content
#[derive(Debug, thiserror::Error)]
pub enum ChunkError {
    /// Local filesystem error (stat, open, read, write, mkdir)
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// The content-defined chunker failed while reading its source
    #[error("Chunker failed: {0}")]
    Chunker(String),
    /// Compression operation failed
    #[error("Compression failed: {0}")]
    CompressionFailed(String),
    /// Decompression operation failed
    #[error("Decompression failed: {0}")]
    DecompressionFailed(String),
    /// Chunks referenced by a sequence are not present in the local store.
    /// Pull them from a remote source and retry.
    #[error("{} chunk(s) missing from the local store", missing.len())]
    MissingChunks {
        /// Hashes that were absent, in sequence order
        missing: Vec<ChunkHash>,
    },
    /// A chunk sequence could not be parsed
    #[error("Invalid chunk sequence: {0}")]
    InvalidSequence(String),
    /// A chunk hash was not 64 lowercase hex characters
    #[error("Invalid chunk hash: {0}")]
    InvalidHash(String),
    /// A stored chunk carried a zero-byte payload
    #[error("Chunk {0} has an empty payload")]
    EmptyChunkPayload(ChunkHash),
    /// The chunk store backend failed
    #[error("Chunk store error: {0}")]
    Store(String),
}

impl ChunkError {
    /// True for errors the sync layer should answer with a pull-then-retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ChunkError::MissingChunks { .. })
    }

    /// The missing hashes, if this is a missing-chunks error.
    pub fn missing_chunks(&self) -> Option<&[ChunkHash]> {
        match self {
            ChunkError::MissingChunks { missing } => Some(missing),
            _ => None,
        }
    }
}
