//! Content-defined chunking (FastCDC) and content-addressable deduplication

use crate::compression::{compress, DEFAULT_LEVEL};
use crate::error::ChunkError;
use crate::fingerprint::{sha256_hash, ChunkHash};
use crate::sequence::ChunkSequence;
use crate::store::{ChunkStore, StoredChunk};
use bytes::Bytes;
use fastcdc::v2020::StreamCDC;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use tracing::{debug, info, instrument};

// Bounds accepted by the FastCDC 2020 implementation.
const MIN_SIZE_RANGE: (usize, usize) = (64, 1024 * 1024);
const AVG_SIZE_RANGE: (usize, usize) = (256, 4 * 1024 * 1024);
const MAX_SIZE_RANGE: (usize, usize) = (1024, 16 * 1024 * 1024);

/// Configuration for the FastCDC chunker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkerConfig {
    /// Minimum chunk size in bytes
    pub min_size: usize,
    /// Average (target) chunk size in bytes
    pub avg_size: usize,
    /// Maximum chunk size in bytes
    pub max_size: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            min_size: 512 * 1024,
            avg_size: 1024 * 1024,
            max_size: 8 * 1024 * 1024,
        }
    }
}

impl ChunkerConfig {
    /// Reject sizes the chunker cannot honour instead of letting it panic.
    pub fn validate(&self) -> Result<(), ChunkError> {
        let in_range = |v: usize, (lo, hi): (usize, usize)| v >= lo && v <= hi;
        if !in_range(self.min_size, MIN_SIZE_RANGE)
            || !in_range(self.avg_size, AVG_SIZE_RANGE)
            || !in_range(self.max_size, MAX_SIZE_RANGE)
            || self.min_size > self.avg_size
            || self.avg_size > self.max_size
        {
            return Err(ChunkError::Chunker(format!(
                "unsupported chunk sizes min={} avg={} max={}",
                self.min_size, self.avg_size, self.max_size
            )));
        }
        Ok(())
    }
}

/// Hashes already resolved during one encode pass.
///
/// Scoped to a single operation; the chunk store stays the only cross-call
/// authority on what is stored.
#[derive(Debug, Default)]
pub struct SeenChunks {
    hashes: HashSet<ChunkHash>,
}

impl SeenChunks {
    /// Create an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if this hash was already handled in this pass
    pub fn contains(&self, hash: &ChunkHash) -> bool {
        self.hashes.contains(hash)
    }

    fn insert(&mut self, hash: ChunkHash) {
        self.hashes.insert(hash);
    }

    /// Number of distinct hashes seen
    pub fn len(&self) -> usize {
        self.hashes.len()
    }

    /// True if nothing was seen yet
    pub fn is_empty(&self) -> bool {
        self.hashes.is_empty()
    }
}

/// Statistics from one encode pass
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct EncodeStats {
    /// Raw bytes read from the source
    pub input_bytes: u64,
    /// Chunks produced, duplicates included
    pub chunks_total: usize,
    /// Chunks inserted as new rows
    pub chunks_new: usize,
    /// Chunks whose content was already stored (or seen earlier in this pass)
    pub chunks_reused: usize,
    /// Compressed bytes written for new chunks
    pub bytes_stored: u64,
}

/// Splits files into content-defined chunks and stores unseen ones.
#[derive(Debug, Clone)]
pub struct ChunkCodec {
    config: ChunkerConfig,
    level: i32,
}

impl Default for ChunkCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl ChunkCodec {
    /// Codec with default sizes and compression level
    pub fn new() -> Self {
        Self {
            config: ChunkerConfig::default(),
            level: DEFAULT_LEVEL,
        }
    }

    /// Codec with custom chunk sizes and compression level
    pub fn with_config(config: ChunkerConfig, level: i32) -> Result<Self, ChunkError> {
        config.validate()?;
        Ok(Self { config, level })
    }

    /// Chunker sizes in use
    pub fn config(&self) -> &ChunkerConfig {
        &self.config
    }

    /// Encode a file with a fresh per-call cache.
    /// `progress` receives `(bytes_done, bytes_total)` after every chunk.
    pub fn encode<S, P>(
        &self,
        path: &Path,
        store: &S,
        progress: P,
    ) -> Result<(ChunkSequence, EncodeStats), ChunkError>
    where
        S: ChunkStore + ?Sized,
        P: FnMut(u64, u64),
    {
        let mut seen = SeenChunks::new();
        self.encode_with_cache(path, store, &mut seen, progress)
    }

    /// Encode a file, consulting a caller-supplied cache before the store.
    #[instrument(skip(self, store, seen, progress), fields(path = %path.display()))]
    pub fn encode_with_cache<S, P>(
        &self,
        path: &Path,
        store: &S,
        seen: &mut SeenChunks,
        progress: P,
    ) -> Result<(ChunkSequence, EncodeStats), ChunkError>
    where
        S: ChunkStore + ?Sized,
        P: FnMut(u64, u64),
    {
        let file = File::open(path)?;
        let total = file.metadata()?.len();
        let result = self.encode_reader(BufReader::new(file), total, store, seen, progress)?;
        info!(
            chunks = result.1.chunks_total,
            new = result.1.chunks_new,
            bytes = result.1.input_bytes,
            "Encoded file"
        );
        Ok(result)
    }

    /// Encode any reader. `total` is only used for progress reporting.
    /// Any read or chunker error aborts with no partial sequence.
    pub fn encode_reader<R, S, P>(
        &self,
        reader: R,
        total: u64,
        store: &S,
        seen: &mut SeenChunks,
        mut progress: P,
    ) -> Result<(ChunkSequence, EncodeStats), ChunkError>
    where
        R: Read,
        S: ChunkStore + ?Sized,
        P: FnMut(u64, u64),
    {
        let chunker = StreamCDC::new(
            reader,
            self.config.min_size as u32,
            self.config.avg_size as u32,
            self.config.max_size as u32,
        );
        let mut sequence = ChunkSequence::new();
        let mut stats = EncodeStats::default();

        for entry in chunker {
            let chunk = entry.map_err(|e| match e {
                fastcdc::v2020::Error::IoError(io) => ChunkError::Io(io),
                other => ChunkError::Chunker(other.to_string()),
            })?;
            let hash = sha256_hash(&chunk.data);
            stats.chunks_total += 1;
            stats.input_bytes += chunk.length as u64;

            let known = seen.contains(&hash) || store.contains(&hash)?;
            if known {
                stats.chunks_reused += 1;
            } else {
                let data = compress(&chunk.data, self.level)?;
                let compressed_size = data.len() as u64;
                let inserted = store.insert_ignore(StoredChunk {
                    hash,
                    data: Bytes::from(data),
                    compressed_size,
                })?;
                if inserted {
                    stats.chunks_new += 1;
                    stats.bytes_stored += compressed_size;
                } else {
                    // Another writer stored the same content first.
                    stats.chunks_reused += 1;
                }
                debug!(%hash, offset = chunk.offset, length = chunk.length, inserted, "Stored chunk");
            }

            seen.insert(hash);
            sequence.push(hash);
            progress(stats.input_bytes, total);
        }

        Ok((sequence, stats))
    }
}
