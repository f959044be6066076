#![warn(missing_docs)]

//! Atelier versioning subsystem: task file checkpoints over the chunk store
//!
//! Create path: Validate → Checksum → Unchanged? → Encode → Stat → Insert
//! Read side:   History → Grouping / Timeline / Working-copy status

pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod grouping;
pub mod sqlite;
pub mod status;
pub mod store;
pub mod timeline;
pub mod types;

pub use config::AtelierConfig;
pub use engine::{CheckpointEngine, CheckpointRecord, CreateOutcome, NewCheckpoint};
pub use error::VersionError;
pub use grouping::{AutoGroup, BackfillGroup, GroupingStrategy};
pub use sqlite::SqliteStore;
pub use status::resolve_status;
pub use store::{CheckpointFilter, CheckpointStore, GroupAssignment};
pub use timeline::{build_timeline, TimelineEntry};
pub use types::{
    AuthorId, Checkpoint, CheckpointId, FileStatus, GroupId, PreviewId, TaskFile, TaskId,
};
