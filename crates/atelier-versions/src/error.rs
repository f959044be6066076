//! Error types for checkpoint operations

use crate::types::{CheckpointId, TaskId};
use atelier_chunks::{ChunkError, ChunkHash};

/// Errors that can occur in checkpoint operations.
///
/// A create call on unchanged content is not an error; see
/// [`crate::engine::CreateOutcome::Unchanged`].
#[derive(Debug, thiserror::Error)]
pub enum VersionError {
    /// Rejected before any I/O took place
    #[error("invalid input: {0}")]
    InvalidInput(&'static str),

    /// No checkpoint with this id
    #[error("checkpoint {0} not found")]
    CheckpointNotFound(CheckpointId),

    /// The task has no (live) checkpoint history
    #[error("task {0} has no checkpoints")]
    NoCheckpoints(TaskId),

    /// A checkpoint with this id is already stored
    #[error("checkpoint {0} already exists")]
    CheckpointExists(CheckpointId),

    /// Deleting would leave the task without any live checkpoint
    #[error("refusing to delete the last checkpoint of task {0}")]
    LastCheckpoint(TaskId),

    /// Chunk layer failure, including missing chunks
    #[error(transparent)]
    Chunks(ChunkError),

    /// Local filesystem error
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Storage engine failure
    #[error("sqlite: {0}")]
    Sql(#[from] rusqlite::Error),
}

impl From<ChunkError> for VersionError {
    fn from(err: ChunkError) -> Self {
        match err {
            ChunkError::Io(io) => VersionError::Io(io),
            other => VersionError::Chunks(other),
        }
    }
}

impl VersionError {
    /// True when the caller should pull chunks from the server and retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, VersionError::Chunks(e) if e.is_retryable())
    }

    /// Hashes that blocked a rebuild, if that is what failed.
    pub fn missing_chunks(&self) -> Option<&[ChunkHash]> {
        match self {
            VersionError::Chunks(e) => e.missing_chunks(),
            _ => None,
        }
    }
}
