//! Clustering of independent checkpoints into logical save events.
//!
//! Two strategies coexist and are intentionally not reconciled:
//!
//! - [`AutoGroup`] runs going forward. It walks all checkpoints newest first
//!   and joins a checkpoint to the previous group only when author and comment
//!   match exactly and the gap is at most 120 seconds.
//! - [`BackfillGroup`] assigns keys to legacy rows that have none. It walks
//!   each author's checkpoints oldest first with a 300 second window, and a
//!   blank comment on either side never forces a split.
//!
//! The same input can cluster differently under each. Windows compare stored
//! wall-clock timestamps, so skew between writers can mis-group.

use crate::store::GroupAssignment;
use crate::types::{Checkpoint, CheckpointId, GroupId};
use chrono::Duration;

/// A named clustering policy
pub trait GroupingStrategy {
    /// Short identifier used in logs
    fn name(&self) -> &'static str;

    /// Partition `checkpoints` into clusters of ids, in scan order.
    fn cluster(&self, checkpoints: &[Checkpoint]) -> Vec<Vec<CheckpointId>>;

    /// Cluster and give each cluster a fresh key.
    fn assign(&self, checkpoints: &[Checkpoint]) -> Vec<GroupAssignment> {
        self.cluster(checkpoints)
            .into_iter()
            .flat_map(|ids| {
                let group_id = GroupId::generate();
                ids.into_iter().map(move |checkpoint_id| GroupAssignment {
                    checkpoint_id,
                    group_id: group_id.clone(),
                })
            })
            .collect()
    }
}

/// Newest-first, strict-comment grouping
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AutoGroup {
    window: Duration,
}

impl AutoGroup {
    /// Default maximum gap between neighbours in one group
    pub const DEFAULT_WINDOW_SECS: u64 = 120;

    /// Strategy with the default window
    pub fn new() -> Self {
        Self::with_window_secs(Self::DEFAULT_WINDOW_SECS)
    }

    /// Strategy with a custom window
    pub fn with_window_secs(secs: u64) -> Self {
        Self {
            window: window(secs),
        }
    }

    fn joins(&self, newer: &Checkpoint, older: &Checkpoint) -> bool {
        newer.author_id == older.author_id
            && newer.comment == older.comment
            && newer.created_at - older.created_at <= self.window
    }
}

impl Default for AutoGroup {
    fn default() -> Self {
        Self::new()
    }
}

impl GroupingStrategy for AutoGroup {
    fn name(&self) -> &'static str {
        "auto"
    }

    fn cluster(&self, checkpoints: &[Checkpoint]) -> Vec<Vec<CheckpointId>> {
        let mut ordered: Vec<&Checkpoint> = checkpoints.iter().collect();
        ordered.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));

        let mut clusters: Vec<Vec<CheckpointId>> = Vec::new();
        let mut prev: Option<&Checkpoint> = None;
        for cp in ordered {
            let joined = prev.is_some_and(|newer| self.joins(newer, cp));
            match clusters.last_mut() {
                Some(current) if joined => current.push(cp.id),
                _ => clusters.push(vec![cp.id]),
            }
            prev = Some(cp);
        }
        clusters
    }
}

/// Per-author, oldest-first, blank-comment-tolerant grouping for legacy rows
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackfillGroup {
    window: Duration,
}

impl BackfillGroup {
    /// Default maximum gap between neighbours in one group
    pub const DEFAULT_WINDOW_SECS: u64 = 300;

    /// Strategy with the default window
    pub fn new() -> Self {
        Self::with_window_secs(Self::DEFAULT_WINDOW_SECS)
    }

    /// Strategy with a custom window
    pub fn with_window_secs(secs: u64) -> Self {
        Self {
            window: window(secs),
        }
    }

    fn splits(&self, older: &Checkpoint, newer: &Checkpoint) -> bool {
        let both_commented = !older.comment.is_empty() && !newer.comment.is_empty();
        older.author_id != newer.author_id
            || newer.created_at - older.created_at > self.window
            || (both_commented && older.comment != newer.comment)
    }
}

impl Default for BackfillGroup {
    fn default() -> Self {
        Self::new()
    }
}

impl GroupingStrategy for BackfillGroup {
    fn name(&self) -> &'static str {
        "backfill"
    }

    fn cluster(&self, checkpoints: &[Checkpoint]) -> Vec<Vec<CheckpointId>> {
        let mut ordered: Vec<&Checkpoint> = checkpoints.iter().collect();
        ordered.sort_by(|a, b| {
            a.author_id
                .cmp(&b.author_id)
                .then(a.created_at.cmp(&b.created_at))
                .then(a.id.cmp(&b.id))
        });

        let mut clusters: Vec<Vec<CheckpointId>> = Vec::new();
        let mut prev: Option<&Checkpoint> = None;
        for cp in ordered {
            let joined = prev.is_some_and(|older| !self.splits(older, cp));
            match clusters.last_mut() {
                Some(current) if joined => current.push(cp.id),
                _ => clusters.push(vec![cp.id]),
            }
            prev = Some(cp);
        }
        clusters
    }
}

fn window(secs: u64) -> Duration {
    let max = i64::MAX / 1000;
    Duration::seconds(i64::try_from(secs).unwrap_or(max).min(max))
}
