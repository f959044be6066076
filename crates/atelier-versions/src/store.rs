//! Checkpoint persistence trait.
//!
//! Rows are append-only: updates may only touch `trashed`, `synced`,
//! `group_id` and `updated_at`. Listings are newest first.

use crate::error::VersionError;
use crate::types::{Checkpoint, CheckpointId, GroupId, TaskId};
use chrono::{DateTime, Utc};

/// Row selector for listing and bulk deletion. `None` fields match anything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CheckpointFilter {
    /// Restrict to one task
    pub task_id: Option<TaskId>,
    /// Restrict by soft-delete flag
    pub trashed: Option<bool>,
    /// Restrict by sync flag
    pub synced: Option<bool>,
    /// Maximum number of rows returned (ignored by bulk deletion)
    pub limit: Option<usize>,
}

impl CheckpointFilter {
    /// Live (non-trashed) checkpoints of one task
    pub fn live(task_id: TaskId) -> Self {
        Self {
            task_id: Some(task_id),
            trashed: Some(false),
            ..Default::default()
        }
    }

    /// Every checkpoint of one task, trashed included
    pub fn task(task_id: TaskId) -> Self {
        Self {
            task_id: Some(task_id),
            ..Default::default()
        }
    }

    /// Cap the number of rows
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// A backfilled or regrouped save-event key for one checkpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupAssignment {
    /// Checkpoint receiving the key
    pub checkpoint_id: CheckpointId,
    /// The key
    pub group_id: GroupId,
}

/// Generic create/get/update/delete primitives plus the temporal queries
/// the checkpoint engine needs.
pub trait CheckpointStore {
    /// Insert a new row. A duplicate id fails with
    /// [`VersionError::CheckpointExists`].
    fn insert_checkpoint(&self, checkpoint: &Checkpoint) -> Result<(), VersionError>;

    /// Fetch one row by id.
    fn get_checkpoint(&self, id: CheckpointId) -> Result<Option<Checkpoint>, VersionError>;

    /// Persist the mutable columns of an existing row.
    fn update_checkpoint(&self, checkpoint: &Checkpoint) -> Result<(), VersionError>;

    /// Hard-delete one row. Returns true if it existed.
    fn delete_checkpoint(&self, id: CheckpointId) -> Result<bool, VersionError>;

    /// Hard-delete every row matching `filter`. Returns the number removed.
    fn delete_checkpoints_where(&self, filter: &CheckpointFilter) -> Result<usize, VersionError>;

    /// Rows matching `filter`, newest first.
    fn list_checkpoints(&self, filter: &CheckpointFilter) -> Result<Vec<Checkpoint>, VersionError>;

    /// Newest live checkpoint of every task, one row per task.
    fn latest_checkpoints(&self) -> Result<Vec<Checkpoint>, VersionError>;

    /// Newest checkpoint created at or before `at`, one row per task that has one.
    fn latest_checkpoints_as_of(&self, at: DateTime<Utc>) -> Result<Vec<Checkpoint>, VersionError>;

    /// Number of live checkpoints of a task.
    fn count_live_checkpoints(&self, task_id: TaskId) -> Result<usize, VersionError>;

    /// Write group keys in bulk. Returns the number of rows changed.
    fn set_group_ids(&self, assignments: &[GroupAssignment]) -> Result<usize, VersionError>;

    /// Mark rows as acknowledged by the server. Returns the number changed.
    fn mark_synced(&self, ids: &[CheckpointId]) -> Result<usize, VersionError>;

    /// Newest live checkpoint of one task.
    fn latest_checkpoint(&self, task_id: TaskId) -> Result<Option<Checkpoint>, VersionError> {
        Ok(self
            .list_checkpoints(&CheckpointFilter::live(task_id).with_limit(1))?
            .into_iter()
            .next())
    }
}
