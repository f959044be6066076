//! Activity feed built from grouped checkpoints.

use crate::types::{AuthorId, Checkpoint, CheckpointId, GroupId, TaskId};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;

/// One save event: contiguous checkpoints sharing a group key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TimelineEntry {
    /// Shared key; `None` for a single ungrouped legacy checkpoint
    pub group_id: Option<GroupId>,
    /// Author of the newest checkpoint in the event
    pub author_id: AuthorId,
    /// Comment of the newest checkpoint in the event
    pub comment: String,
    /// Oldest creation time in the event
    pub started_at: DateTime<Utc>,
    /// Newest creation time in the event
    pub ended_at: DateTime<Utc>,
    /// Member checkpoints, newest first
    pub checkpoint_ids: Vec<CheckpointId>,
    /// Tasks touched, in first-seen order
    pub task_ids: Vec<TaskId>,
    /// Resolved file paths of the touched tasks
    pub task_paths: Vec<PathBuf>,
    /// Sum of member file sizes
    pub total_size: u64,
}

impl TimelineEntry {
    fn start(cp: &Checkpoint) -> Self {
        Self {
            group_id: cp.group_id.clone(),
            author_id: cp.author_id,
            comment: cp.comment.clone(),
            started_at: cp.created_at,
            ended_at: cp.created_at,
            checkpoint_ids: Vec::new(),
            task_ids: Vec::new(),
            task_paths: Vec::new(),
            total_size: 0,
        }
    }

    fn accepts(&self, cp: &Checkpoint) -> bool {
        self.group_id.is_some() && self.group_id == cp.group_id
    }

    fn absorb(&mut self, cp: &Checkpoint, path: Option<PathBuf>) {
        self.checkpoint_ids.push(cp.id);
        self.started_at = self.started_at.min(cp.created_at);
        self.ended_at = self.ended_at.max(cp.created_at);
        self.total_size = self.total_size.saturating_add(cp.file_size);
        if !self.task_ids.contains(&cp.task_id) {
            self.task_ids.push(cp.task_id);
        }
        if let Some(path) = path.filter(|p| !self.task_paths.contains(p)) {
            self.task_paths.push(path);
        }
    }
}

/// Fold a newest-first checkpoint stream into save events.
///
/// Only contiguous runs of an equal key are folded; a key that reappears after
/// another event starts a new entry. `task_path` resolves a task to its file
/// for display and may return `None` for tasks it cannot place.
pub fn build_timeline<F>(
    checkpoints: &[Checkpoint],
    limit: Option<usize>,
    mut task_path: F,
) -> Vec<TimelineEntry>
where
    F: FnMut(&TaskId) -> Option<PathBuf>,
{
    let mut entries: Vec<TimelineEntry> = Vec::new();
    for cp in checkpoints {
        let continues = entries.last().is_some_and(|e| e.accepts(cp));
        if !continues {
            if limit.is_some_and(|max| entries.len() >= max) {
                break;
            }
            entries.push(TimelineEntry::start(cp));
        }
        let path = task_path(&cp.task_id);
        if let Some(entry) = entries.last_mut() {
            entry.absorb(cp, path);
        }
    }
    entries
}
