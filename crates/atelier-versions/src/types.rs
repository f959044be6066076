use atelier_chunks::{Checksum, ChunkSequence};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use uuid::Uuid;

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(Uuid);

        impl $name {
            /// Generates a fresh random identifier
            pub fn new() -> Self {
                $name(Uuid::new_v4())
            }

            /// Wraps an existing UUID
            pub fn from_uuid(id: Uuid) -> Self {
                $name(id)
            }

            /// Returns the underlying UUID
            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s).map($name)
            }
        }
    };
}

uuid_id!(
    /// Identifies one checkpoint row
    CheckpointId
);
uuid_id!(
    /// Identifies the task a checkpoint history belongs to
    TaskId
);
uuid_id!(
    /// Identifies the user who created a checkpoint
    AuthorId
);
uuid_id!(
    /// Identifies the preview image attached to a checkpoint
    PreviewId
);

/// Key shared by the checkpoints of one logical save event
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GroupId(String);

impl GroupId {
    /// Wraps a raw key. Emptiness is checked where checkpoints are created.
    pub fn new(id: impl Into<String>) -> Self {
        GroupId(id.into())
    }

    /// A fresh random key
    pub fn generate() -> Self {
        GroupId(Uuid::new_v4().to_string())
    }

    /// Returns the key as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True if the key is empty or whitespace
    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One immutable version of a task's file.
///
/// Only `trashed`, `synced` and a backfilled `group_id` change after creation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Row identifier
    pub id: CheckpointId,
    /// When the checkpoint was taken (millisecond precision)
    pub created_at: DateTime<Utc>,
    /// When the row's mutable flags last changed
    pub updated_at: DateTime<Utc>,
    /// Owning task
    pub task_id: TaskId,
    /// Fast fingerprint of the file content
    pub checksum: Checksum,
    /// Modification time of the file when it was checkpointed
    pub time_modified: DateTime<Utc>,
    /// Size of the reconstructed file in bytes
    pub file_size: u64,
    /// Free-form save comment, may be empty
    pub comment: String,
    /// Hashes that reconstruct the file
    pub chunk_sequence: ChunkSequence,
    /// Who saved it
    pub author_id: AuthorId,
    /// Save-event key; `None` only for legacy rows awaiting backfill
    pub group_id: Option<GroupId>,
    /// Attached preview, if any
    pub preview_id: Option<PreviewId>,
    /// Soft-deleted
    pub trashed: bool,
    /// Acknowledged by the studio server
    pub synced: bool,
}

/// Where a task's working file lives
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskFile {
    /// A file managed by the store, versioned through checkpoints
    Local(PathBuf),
    /// A pointer to an external path the store does not version
    Linked(PathBuf),
}

impl TaskFile {
    /// Filesystem path of the file or link target
    pub fn path(&self) -> &std::path::Path {
        match self {
            TaskFile::Local(p) | TaskFile::Linked(p) => p,
        }
    }
}

/// Freshness of a working copy relative to its checkpoint history
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileStatus {
    /// Matches the newest checkpoint, or a valid link
    Normal,
    /// Matches an older checkpoint
    Outdated,
    /// Matches no checkpoint
    Modified,
    /// No file and nothing to rebuild it from, or a broken link
    Missing,
    /// No file, but checkpoints exist to rebuild it
    Rebuildable,
}

impl fmt::Display for FileStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FileStatus::Normal => "normal",
            FileStatus::Outdated => "outdated",
            FileStatus::Modified => "modified",
            FileStatus::Missing => "missing",
            FileStatus::Rebuildable => "rebuildable",
        };
        f.write_str(s)
    }
}

/// Milliseconds since the Unix epoch, the storage resolution for timestamps
pub fn to_millis(t: DateTime<Utc>) -> i64 {
    t.timestamp_millis()
}

/// Inverse of [`to_millis`]; out-of-range values clamp to the epoch
pub fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp_millis(ms).unwrap_or_default()
}

/// Truncate to millisecond precision so values survive a storage round trip
pub fn truncate_millis(t: DateTime<Utc>) -> DateTime<Utc> {
    from_millis(to_millis(t))
}
