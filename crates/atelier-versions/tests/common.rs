//! Shared fixtures for checkpoint integration tests.

#![allow(dead_code)]

use atelier_chunks::{
    ChunkCodec, ChunkError, ChunkHash, ChunkSequence, ChunkStore, ChunkerConfig, MemoryChunkStore,
    RemoteChunkSource, SeenChunks, StoredChunk,
};
use atelier_versions::{
    AuthorId, Checkpoint, CheckpointEngine, CheckpointId, GroupId, SqliteStore, TaskId,
};
use chrono::{DateTime, TimeZone, Utc};
use std::io::Cursor;
use std::path::PathBuf;
use tempfile::TempDir;

/// Chunk sizes small enough that a few hundred KiB yields many chunks
pub fn small_chunker() -> ChunkerConfig {
    ChunkerConfig {
        min_size: 1024,
        avg_size: 4096,
        max_size: 16384,
    }
}

pub fn small_codec() -> ChunkCodec {
    ChunkCodec::with_config(small_chunker(), 3).unwrap()
}

/// Deterministic incompressible bytes
pub fn noise(len: usize, seed: u64) -> Vec<u8> {
    let mut state = seed;
    (0..len)
        .map(|_| {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            (state >> 33) as u8
        })
        .collect()
}

pub fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
}

/// A temp working directory plus an in-memory database
pub struct Fixture {
    pub dir: TempDir,
    pub store: SqliteStore,
}

impl Fixture {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().unwrap(),
            store: SqliteStore::open_in_memory().unwrap(),
        }
    }

    pub fn engine(&self) -> CheckpointEngine<'_, SqliteStore> {
        CheckpointEngine::new(&self.store).with_codec(small_codec())
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    pub fn write(&self, name: &str, bytes: &[u8]) -> PathBuf {
        let path = self.path(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(&path, bytes).unwrap();
        path
    }

    pub fn chunk_rows(&self) -> usize {
        self.store.all_hashes().unwrap().len()
    }
}

/// A checkpoint row as a server or legacy import would supply it
pub fn imported(task_id: TaskId, author_id: AuthorId, secs: i64, comment: &str) -> Checkpoint {
    Checkpoint {
        id: CheckpointId::new(),
        created_at: at(secs),
        updated_at: at(secs),
        task_id,
        checksum: atelier_chunks::checksum_bytes(&secs.to_le_bytes()),
        time_modified: at(secs),
        file_size: 0,
        comment: comment.to_string(),
        chunk_sequence: ChunkSequence::new(),
        author_id,
        group_id: Some(GroupId::generate()),
        preview_id: None,
        trashed: false,
        synced: true,
    }
}

/// Chunks held by a simulated studio server
#[derive(Default)]
pub struct RemoteStore {
    pub chunks: MemoryChunkStore,
}

impl RemoteStore {
    /// Encode `data` into the remote store only
    pub fn upload(&self, data: &[u8]) -> ChunkSequence {
        small_codec()
            .encode_reader(
                Cursor::new(data),
                data.len() as u64,
                &self.chunks,
                &mut SeenChunks::new(),
                |_, _| {},
            )
            .unwrap()
            .0
    }
}

impl RemoteChunkSource for RemoteStore {
    fn fetch(&self, hashes: &[ChunkHash]) -> Result<Vec<StoredChunk>, ChunkError> {
        let mut out = Vec::new();
        for hash in hashes {
            if let Some(chunk) = self.chunks.get(hash)? {
                out.push(chunk);
            }
        }
        Ok(out)
    }
}
