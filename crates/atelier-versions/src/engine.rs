//! Checkpoint lifecycle: create, revert, delete and temporal queries.
//!
//! The engine owns no transaction. Callers wrap each operation in the store's
//! ambient transaction (see [`crate::SqliteStore::in_transaction`]).

use crate::config::AtelierConfig;
use crate::error::VersionError;
use crate::grouping::{AutoGroup, BackfillGroup, GroupingStrategy};
use crate::status::resolve_status;
use crate::store::{CheckpointFilter, CheckpointStore};
use crate::timeline::{build_timeline, TimelineEntry};
use crate::types::{
    truncate_millis, AuthorId, Checkpoint, CheckpointId, FileStatus, GroupId, PreviewId, TaskFile,
    TaskId,
};
use atelier_chunks::{
    checksum_file, ensure_chunks, ChunkCodec, ChunkSequence, ChunkStore, ChunkSweeper, Checksum,
    RebuildOutcome, Reconstructor, RemoteChunkSource, SweepStats,
};
use chrono::{DateTime, Duration, Utc};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, info, instrument, warn};

/// Parameters for a new checkpoint.
///
/// Optional fields are derived from the live file when absent.
#[derive(Debug, Clone)]
pub struct NewCheckpoint {
    /// Owning task
    pub task_id: TaskId,
    /// Live file on disk
    pub file_path: PathBuf,
    /// Save comment
    pub comment: String,
    /// Who is saving
    pub author_id: AuthorId,
    /// Save-event key; must not be empty
    pub group_id: GroupId,
    /// Attached preview
    pub preview_id: Option<PreviewId>,
    /// Already-encoded content
    pub chunk_sequence: Option<ChunkSequence>,
    /// Already-known fast checksum
    pub checksum: Option<Checksum>,
    /// Already-known file size
    pub file_size: Option<u64>,
    /// Already-known modification time
    pub time_modified: Option<DateTime<Utc>>,
}

impl NewCheckpoint {
    /// Request with every derivable field left to the engine
    pub fn new(
        task_id: TaskId,
        file_path: impl Into<PathBuf>,
        author_id: AuthorId,
        group_id: GroupId,
    ) -> Self {
        Self {
            task_id,
            file_path: file_path.into(),
            comment: String::new(),
            author_id,
            group_id,
            preview_id: None,
            chunk_sequence: None,
            checksum: None,
            file_size: None,
            time_modified: None,
        }
    }

    /// Set the save comment
    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = comment.into();
        self
    }

    /// Attach a preview
    pub fn with_preview(mut self, preview_id: PreviewId) -> Self {
        self.preview_id = Some(preview_id);
        self
    }

    /// Supply an existing chunk sequence instead of encoding the file
    pub fn with_chunk_sequence(mut self, sequence: ChunkSequence) -> Self {
        self.chunk_sequence = Some(sequence);
        self
    }

    /// Supply a precomputed checksum
    pub fn with_checksum(mut self, checksum: Checksum) -> Self {
        self.checksum = Some(checksum);
        self
    }

    fn validate(&self) -> Result<(), VersionError> {
        if self.group_id.is_empty() {
            return Err(VersionError::InvalidInput("group id must not be empty"));
        }
        if self.file_path.as_os_str().is_empty() {
            return Err(VersionError::InvalidInput("file path must not be empty"));
        }
        Ok(())
    }
}

/// A stored checkpoint plus derived state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointRecord {
    /// The row as persisted
    pub checkpoint: Checkpoint,
    /// Some referenced chunks are not in the local store
    pub has_missing_chunks: bool,
}

/// Result of a create call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreateOutcome {
    /// A new row was written
    Created(CheckpointRecord),
    /// Content matches the latest checkpoint; nothing was written
    Unchanged,
}

impl CreateOutcome {
    /// The new record, if one was created
    pub fn created(self) -> Option<CheckpointRecord> {
        match self {
            CreateOutcome::Created(record) => Some(record),
            CreateOutcome::Unchanged => None,
        }
    }
}

/// Versioning state machine over a store that holds both chunks and checkpoints.
pub struct CheckpointEngine<'a, S: ?Sized> {
    store: &'a S,
    codec: ChunkCodec,
    reconstructor: Reconstructor,
    auto_group: AutoGroup,
    backfill_group: BackfillGroup,
}

impl<'a, S> CheckpointEngine<'a, S>
where
    S: CheckpointStore + ChunkStore + ?Sized,
{
    /// Engine with default chunking, compression and grouping windows
    pub fn new(store: &'a S) -> Self {
        Self {
            store,
            codec: ChunkCodec::new(),
            reconstructor: Reconstructor::new(),
            auto_group: AutoGroup::new(),
            backfill_group: BackfillGroup::new(),
        }
    }

    /// Engine parameterised by configuration
    pub fn from_config(store: &'a S, config: &AtelierConfig) -> Result<Self, VersionError> {
        Ok(Self {
            store,
            codec: ChunkCodec::with_config(config.chunker.clone(), config.compression_level)?,
            reconstructor: Reconstructor::new()
                .with_buffer_limit(config.rebuild_buffer_bytes)
                .with_empty_chunk_policy(config.empty_chunk_policy),
            auto_group: AutoGroup::with_window_secs(config.auto_group_window_secs),
            backfill_group: BackfillGroup::with_window_secs(config.backfill_group_window_secs),
        })
    }

    /// Replace the chunk codec
    pub fn with_codec(mut self, codec: ChunkCodec) -> Self {
        self.codec = codec;
        self
    }

    /// Replace the reconstructor
    pub fn with_reconstructor(mut self, reconstructor: Reconstructor) -> Self {
        self.reconstructor = reconstructor;
        self
    }

    /// Underlying store
    pub fn store(&self) -> &'a S {
        self.store
    }

    /// Record the current content of a task's file.
    ///
    /// Returns [`CreateOutcome::Unchanged`] when the checksum equals the
    /// task's latest checkpoint. `progress` receives `(bytes_done, bytes_total)`
    /// while encoding.
    #[instrument(skip(self, request, progress), fields(task = %request.task_id, path = %request.file_path.display()))]
    pub fn create_checkpoint<P>(
        &self,
        request: NewCheckpoint,
        progress: P,
    ) -> Result<CreateOutcome, VersionError>
    where
        P: FnMut(u64, u64),
    {
        request.validate()?;
        let latest = self.store.latest_checkpoint(request.task_id)?;
        let unchanged = |checksum: Checksum| latest.as_ref().is_some_and(|l| l.checksum == checksum);

        if request.checksum.is_some_and(unchanged) {
            debug!("Checksum unchanged, skipping checkpoint");
            return Ok(CreateOutcome::Unchanged);
        }

        if let Some(sequence) = &request.chunk_sequence {
            if !request.file_path.try_exists()? {
                self.rebuild_into(sequence, &request.file_path, request.time_modified)?;
            }
        }

        let checksum = match request.checksum {
            Some(checksum) => checksum,
            None => checksum_file(&request.file_path)?,
        };
        if unchanged(checksum) {
            debug!(%checksum, "Checksum unchanged, skipping checkpoint");
            return Ok(CreateOutcome::Unchanged);
        }

        let chunk_sequence = match request.chunk_sequence {
            Some(sequence) => sequence,
            None => self.codec.encode(&request.file_path, self.store, progress)?.0,
        };

        let (file_size, time_modified) = match (request.file_size, request.time_modified) {
            (Some(size), Some(mtime)) => (size, mtime),
            (size, mtime) => {
                let meta = fs::metadata(&request.file_path)?;
                (
                    size.unwrap_or(meta.len()),
                    mtime.unwrap_or(DateTime::<Utc>::from(meta.modified()?)),
                )
            }
        };

        let created_at = self.next_created_at(request.task_id)?;
        let checkpoint = Checkpoint {
            id: CheckpointId::new(),
            created_at,
            updated_at: created_at,
            task_id: request.task_id,
            checksum,
            time_modified: truncate_millis(time_modified),
            file_size,
            comment: request.comment,
            chunk_sequence,
            author_id: request.author_id,
            group_id: Some(request.group_id),
            preview_id: request.preview_id,
            trashed: false,
            synced: false,
        };
        self.store.insert_checkpoint(&checkpoint)?;
        let record = self.record(checkpoint)?;

        info!(
            checkpoint = %record.checkpoint.id,
            size = record.checkpoint.file_size,
            chunks = record.checkpoint.chunk_sequence.len(),
            missing = record.has_missing_chunks,
            "Created checkpoint"
        );
        Ok(CreateOutcome::Created(record))
    }

    /// Store a checkpoint that already carries its id and timestamps,
    /// as received from the server.
    pub fn import_checkpoint(&self, checkpoint: Checkpoint) -> Result<CheckpointRecord, VersionError> {
        if checkpoint.group_id.as_ref().is_some_and(GroupId::is_empty) {
            return Err(VersionError::InvalidInput("group id must not be empty"));
        }
        self.store.insert_checkpoint(&checkpoint)?;
        debug!(checkpoint = %checkpoint.id, task = %checkpoint.task_id, "Imported checkpoint");
        self.record(checkpoint)
    }

    /// Write a checkpoint's content to `dest` with its original mtime.
    #[instrument(skip(self, progress), fields(dest = %dest.display()))]
    pub fn revert_to_checkpoint<P>(
        &self,
        id: CheckpointId,
        dest: &Path,
        progress: P,
    ) -> Result<RebuildOutcome, VersionError>
    where
        P: FnMut(u64, u64),
    {
        let checkpoint = self.get_checkpoint(id)?;
        if let Some(parent) = dest.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let outcome = self.reconstructor.rebuild(
            &checkpoint.chunk_sequence,
            dest,
            Some(SystemTime::from(checkpoint.time_modified)),
            self.store,
            progress,
        )?;
        info!(checkpoint = %id, ?outcome, "Reverted to checkpoint");
        Ok(outcome)
    }

    /// Delete a checkpoint.
    ///
    /// With `check_if_last`, refuses to remove the only live checkpoint of its
    /// task. `recycle` soft-deletes; otherwise the row is removed for good.
    pub fn delete_checkpoint(
        &self,
        id: CheckpointId,
        check_if_last: bool,
        recycle: bool,
    ) -> Result<(), VersionError> {
        let mut checkpoint = self.get_checkpoint(id)?;
        if check_if_last
            && !checkpoint.trashed
            && self.store.count_live_checkpoints(checkpoint.task_id)? <= 1
        {
            warn!(checkpoint = %id, task = %checkpoint.task_id, "Refusing to delete last checkpoint");
            return Err(VersionError::LastCheckpoint(checkpoint.task_id));
        }

        if recycle {
            checkpoint.trashed = true;
            checkpoint.updated_at = truncate_millis(Utc::now());
            self.store.update_checkpoint(&checkpoint)?;
        } else {
            self.store.delete_checkpoint(id)?;
        }
        info!(checkpoint = %id, recycle, "Deleted checkpoint");
        Ok(())
    }

    /// Undo a recycle delete.
    pub fn restore_checkpoint(&self, id: CheckpointId) -> Result<Checkpoint, VersionError> {
        let mut checkpoint = self.get_checkpoint(id)?;
        if checkpoint.trashed {
            checkpoint.trashed = false;
            checkpoint.updated_at = truncate_millis(Utc::now());
            self.store.update_checkpoint(&checkpoint)?;
            info!(checkpoint = %id, "Restored checkpoint");
        }
        Ok(checkpoint)
    }

    /// Hard-delete the trashed checkpoints of a task.
    pub fn empty_trash(&self, task_id: TaskId) -> Result<usize, VersionError> {
        let filter = CheckpointFilter {
            trashed: Some(true),
            ..CheckpointFilter::task(task_id)
        };
        let removed = self.store.delete_checkpoints_where(&filter)?;
        info!(task = %task_id, removed, "Emptied checkpoint trash");
        Ok(removed)
    }

    /// Hard-delete every checkpoint of a task.
    pub fn delete_task_history(&self, task_id: TaskId) -> Result<usize, VersionError> {
        let removed = self
            .store
            .delete_checkpoints_where(&CheckpointFilter::task(task_id))?;
        info!(task = %task_id, removed, "Deleted task history");
        Ok(removed)
    }

    /// Fetch a checkpoint by id.
    pub fn get_checkpoint(&self, id: CheckpointId) -> Result<Checkpoint, VersionError> {
        self.store
            .get_checkpoint(id)?
            .ok_or(VersionError::CheckpointNotFound(id))
    }

    /// A task's history, newest first.
    pub fn list_checkpoints(
        &self,
        task_id: TaskId,
        include_trashed: bool,
    ) -> Result<Vec<Checkpoint>, VersionError> {
        let filter = if include_trashed {
            CheckpointFilter::task(task_id)
        } else {
            CheckpointFilter::live(task_id)
        };
        self.store.list_checkpoints(&filter)
    }

    /// Newest live checkpoint of a task.
    pub fn latest_checkpoint(&self, task_id: TaskId) -> Result<Checkpoint, VersionError> {
        self.store
            .latest_checkpoint(task_id)?
            .ok_or(VersionError::NoCheckpoints(task_id))
    }

    /// Newest live checkpoint of every task.
    pub fn latest_checkpoints(&self) -> Result<Vec<Checkpoint>, VersionError> {
        self.store.latest_checkpoints()
    }

    /// The project as it stood at `at`: per task, the newest checkpoint created
    /// at or before that instant.
    pub fn latest_checkpoints_as_of(&self, at: DateTime<Utc>) -> Result<Vec<Checkpoint>, VersionError> {
        self.store.latest_checkpoints_as_of(at)
    }

    /// Freshness of a task's working file.
    pub fn file_status(&self, task_id: TaskId, file: &TaskFile) -> Result<FileStatus, VersionError> {
        let history = match file {
            TaskFile::Linked(_) => Vec::new(),
            TaskFile::Local(_) => self.list_checkpoints(task_id, false)?,
        };
        Ok(resolve_status(file, &history)?)
    }

    /// Regroup every checkpoint with the newest-first strategy.
    pub fn auto_group_checkpoints(&self) -> Result<usize, VersionError> {
        let all = self.store.list_checkpoints(&CheckpointFilter::default())?;
        self.apply_grouping(&self.auto_group, &all)
    }

    /// Give legacy checkpoints without a key one from the backfill strategy.
    pub fn add_missing_group_ids(&self) -> Result<usize, VersionError> {
        let ungrouped: Vec<Checkpoint> = self
            .store
            .list_checkpoints(&CheckpointFilter::default())?
            .into_iter()
            .filter(|cp| cp.group_id.is_none())
            .collect();
        self.apply_grouping(&self.backfill_group, &ungrouped)
    }

    fn apply_grouping<G: GroupingStrategy>(
        &self,
        strategy: &G,
        checkpoints: &[Checkpoint],
    ) -> Result<usize, VersionError> {
        if checkpoints.is_empty() {
            return Ok(0);
        }
        let assignments = strategy.assign(checkpoints);
        let changed = self.store.set_group_ids(&assignments)?;
        info!(strategy = strategy.name(), checkpoints = checkpoints.len(), changed, "Assigned group ids");
        Ok(changed)
    }

    /// Save-event feed over live checkpoints, newest first.
    pub fn timeline<F>(&self, limit: Option<usize>, task_path: F) -> Result<Vec<TimelineEntry>, VersionError>
    where
        F: FnMut(&TaskId) -> Option<PathBuf>,
    {
        let filter = CheckpointFilter {
            trashed: Some(false),
            ..Default::default()
        };
        let checkpoints = self.store.list_checkpoints(&filter)?;
        Ok(build_timeline(&checkpoints, limit, task_path))
    }

    /// Acknowledge checkpoints as uploaded.
    pub fn mark_synced(&self, ids: &[CheckpointId]) -> Result<usize, VersionError> {
        self.store.mark_synced(ids)
    }

    /// Checkpoints the server has not acknowledged yet, newest first.
    pub fn unsynced_checkpoints(&self) -> Result<Vec<Checkpoint>, VersionError> {
        let filter = CheckpointFilter {
            synced: Some(false),
            ..Default::default()
        };
        self.store.list_checkpoints(&filter)
    }

    /// Pull whatever a checkpoint needs from `remote` so it can be reverted.
    pub fn pull_missing_chunks<R>(&self, id: CheckpointId, remote: &R) -> Result<usize, VersionError>
    where
        R: RemoteChunkSource + ?Sized,
    {
        let checkpoint = self.get_checkpoint(id)?;
        Ok(ensure_chunks(&checkpoint.chunk_sequence, self.store, remote)?)
    }

    /// Delete chunks referenced by no checkpoint (trashed ones included) and
    /// by none of `extra_roots`.
    pub fn sweep_unreferenced_chunks(&self, extra_roots: &[ChunkSequence]) -> Result<SweepStats, VersionError> {
        let mut sweeper = ChunkSweeper::new();
        for checkpoint in self.store.list_checkpoints(&CheckpointFilter::default())? {
            sweeper.mark_sequence(&checkpoint.chunk_sequence);
        }
        for sequence in extra_roots {
            sweeper.mark_sequence(sequence);
        }
        Ok(sweeper.sweep(self.store)?)
    }

    fn rebuild_into(
        &self,
        sequence: &ChunkSequence,
        dest: &Path,
        mtime: Option<DateTime<Utc>>,
    ) -> Result<(), VersionError> {
        if let Some(parent) = dest.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let outcome = self.reconstructor.rebuild(
            sequence,
            dest,
            mtime.map(SystemTime::from),
            self.store,
            |_, _| {},
        )?;
        debug!(?outcome, "Rebuilt absent file before checkpointing");
        Ok(())
    }

    /// Now, or one millisecond past the task's newest row if the clock has not
    /// moved beyond it.
    fn next_created_at(&self, task_id: TaskId) -> Result<DateTime<Utc>, VersionError> {
        let now = truncate_millis(Utc::now());
        let newest = self
            .store
            .list_checkpoints(&CheckpointFilter::task(task_id).with_limit(1))?
            .into_iter()
            .next();
        Ok(match newest {
            Some(prev) if now <= prev.created_at => prev.created_at + Duration::milliseconds(1),
            _ => now,
        })
    }

    fn record(&self, checkpoint: Checkpoint) -> Result<CheckpointRecord, VersionError> {
        let has_missing_chunks = !self
            .store
            .missing(checkpoint.chunk_sequence.hashes())?
            .is_empty();
        Ok(CheckpointRecord {
            checkpoint,
            has_missing_chunks,
        })
    }
}
