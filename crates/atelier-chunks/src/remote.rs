//! Boundary to the sync layer's remote chunk source.
//!
//! Nothing here retries on its own. The sync layer calls [`ensure_chunks`]
//! after a rebuild fails with missing chunks, then retries the rebuild.

use crate::error::ChunkError;
use crate::fingerprint::ChunkHash;
use crate::sequence::ChunkSequence;
use crate::store::{ChunkStore, StoredChunk};
use tracing::{info, warn};

/// A source able to deliver chunks this store lacks (usually the studio server).
pub trait RemoteChunkSource {
    /// Fetch the given chunks. Hashes the source does not have are left out.
    fn fetch(&self, hashes: &[ChunkHash]) -> Result<Vec<StoredChunk>, ChunkError>;
}

/// Pull every chunk of `sequence` that `local` lacks from `remote`.
///
/// Fetched payloads are verified against their hash before insertion; a chunk
/// that fails verification is dropped. Returns the number of chunks inserted,
/// or [`ChunkError::MissingChunks`] listing what is still absent afterwards.
pub fn ensure_chunks<L, R>(
    sequence: &ChunkSequence,
    local: &L,
    remote: &R,
) -> Result<usize, ChunkError>
where
    L: ChunkStore + ?Sized,
    R: RemoteChunkSource + ?Sized,
{
    let missing = local.missing(sequence.hashes())?;
    if missing.is_empty() {
        return Ok(0);
    }

    let mut inserted = 0;
    for chunk in remote.fetch(&missing)? {
        if !missing.contains(&chunk.hash) {
            continue;
        }
        if !chunk.verify()? {
            warn!(hash = %chunk.hash, "Pulled chunk failed verification");
            continue;
        }
        if local.insert_ignore(chunk)? {
            inserted += 1;
        }
    }

    let still_missing = local.missing(&missing)?;
    if !still_missing.is_empty() {
        return Err(ChunkError::MissingChunks {
            missing: still_missing,
        });
    }
    info!(pulled = inserted, "Pulled missing chunks");
    Ok(inserted)
}
