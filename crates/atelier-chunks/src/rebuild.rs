//! Exact file reconstruction from a chunk sequence.
//!
//! Compressed payloads are batched in memory and flushed through one streaming
//! Zstd decoder whenever the batch passes the buffer limit, so peak memory is
//! bounded by the limit rather than by the file size. Output goes to a
//! temporary file next to the destination and is renamed into place only after
//! every chunk has been written.

use crate::compression::{decodes_empty, decompress_into};
use crate::error::ChunkError;
use crate::fingerprint::ChunkHash;
use crate::sequence::ChunkSequence;
use crate::store::ChunkStore;
use serde::{Deserialize, Serialize};
use std::fs::{self, Permissions};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::time::SystemTime;
use tracing::{debug, info, instrument, warn};

/// Compressed bytes accumulated before a decompress-and-write flush
pub const DEFAULT_BUFFER_LIMIT: usize = 100 * 1024 * 1024;

/// What to do when a stored chunk decompresses to zero bytes.
///
/// Whether such a chunk is a legitimate state or corruption has not been
/// settled; the default keeps the historical behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmptyChunkPolicy {
    /// Stop and report success without touching the destination
    #[default]
    TreatAsNoOp,
    /// Fail with [`ChunkError::EmptyChunkPayload`]
    TreatAsCorrupt,
}

/// Result of a rebuild that did not fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RebuildOutcome {
    /// The destination now holds the reconstructed file
    Written {
        /// Decompressed bytes written
        bytes: u64,
        /// Chunks consumed
        chunks: usize,
    },
    /// An empty chunk payload ended the rebuild early; nothing was written
    SkippedEmptyChunk(ChunkHash),
}

/// Turns chunk sequences back into files
#[derive(Debug, Clone)]
pub struct Reconstructor {
    buffer_limit: usize,
    empty_chunk_policy: EmptyChunkPolicy,
}

impl Default for Reconstructor {
    fn default() -> Self {
        Self::new()
    }
}

impl Reconstructor {
    /// Reconstructor with the 100MB buffer and the default empty-chunk policy
    pub fn new() -> Self {
        Self {
            buffer_limit: DEFAULT_BUFFER_LIMIT,
            empty_chunk_policy: EmptyChunkPolicy::default(),
        }
    }

    /// Override the flush threshold
    pub fn with_buffer_limit(mut self, limit: usize) -> Self {
        self.buffer_limit = limit.max(1);
        self
    }

    /// Override the empty-payload policy
    pub fn with_empty_chunk_policy(mut self, policy: EmptyChunkPolicy) -> Self {
        self.empty_chunk_policy = policy;
        self
    }

    /// Rebuild `sequence` into `dest`.
    ///
    /// Fails with [`ChunkError::MissingChunks`] before creating anything if any
    /// referenced chunk is absent locally. When `mtime` is given the rebuilt
    /// file's modification time is set to it. `progress` receives
    /// `(chunks_done, chunks_total)`.
    #[instrument(skip(self, sequence, store, progress), fields(dest = %dest.display(), chunks = sequence.len()))]
    pub fn rebuild<S, P>(
        &self,
        sequence: &ChunkSequence,
        dest: &Path,
        mtime: Option<SystemTime>,
        store: &S,
        mut progress: P,
    ) -> Result<RebuildOutcome, ChunkError>
    where
        S: ChunkStore + ?Sized,
        P: FnMut(u64, u64),
    {
        let missing = store.missing(sequence.hashes())?;
        if !missing.is_empty() {
            warn!(missing = missing.len(), "Rebuild blocked by missing chunks");
            return Err(ChunkError::MissingChunks { missing });
        }

        let parent = match dest.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        let mut tmp = tempfile::Builder::new()
            .prefix(".atelier-rebuild-")
            .tempfile_in(parent)?;

        let total = sequence.len() as u64;
        let mut written = 0u64;
        {
            let mut out = BufWriter::new(tmp.as_file_mut());
            let mut buffer: Vec<u8> = Vec::new();

            for (i, hash) in sequence.iter().enumerate() {
                let chunk = store.get(hash)?.ok_or_else(|| ChunkError::MissingChunks {
                    missing: vec![*hash],
                })?;
                if decodes_empty(&chunk.data)? {
                    match self.empty_chunk_policy {
                        EmptyChunkPolicy::TreatAsNoOp => {
                            warn!(%hash, "Empty chunk payload, rebuild skipped");
                            return Ok(RebuildOutcome::SkippedEmptyChunk(*hash));
                        }
                        EmptyChunkPolicy::TreatAsCorrupt => {
                            return Err(ChunkError::EmptyChunkPayload(*hash));
                        }
                    }
                }

                buffer.extend_from_slice(&chunk.data);
                if buffer.len() > self.buffer_limit {
                    written += decompress_into(&buffer, &mut out)?;
                    debug!(flushed = buffer.len(), written, "Flushed rebuild buffer");
                    buffer.clear();
                }
                progress(i as u64 + 1, total);
            }

            if !buffer.is_empty() {
                written += decompress_into(&buffer, &mut out)?;
            }
            out.flush()?;
        }

        let permissions = match fs::metadata(dest) {
            Ok(meta) => meta.permissions(),
            Err(_) => default_permissions(tmp.as_file())?,
        };
        tmp.as_file().set_permissions(permissions)?;
        if let Some(mtime) = mtime {
            tmp.as_file().set_modified(mtime)?;
        }
        tmp.persist(dest).map_err(|e| e.error)?;

        info!(bytes = written, chunks = sequence.len(), "Rebuilt file");
        Ok(RebuildOutcome::Written {
            bytes: written,
            chunks: sequence.len(),
        })
    }
}

#[cfg(unix)]
fn default_permissions(_file: &fs::File) -> std::io::Result<Permissions> {
    use std::os::unix::fs::PermissionsExt;
    Ok(Permissions::from_mode(0o644))
}

#[cfg(not(unix))]
fn default_permissions(file: &fs::File) -> std::io::Result<Permissions> {
    Ok(file.metadata()?.permissions())
}
