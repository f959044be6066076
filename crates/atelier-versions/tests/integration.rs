//! Integration tests for the checkpoint engine over an in-memory SQLite store.
//!
//! These cover exact reconstruction, deduplication, the unchanged short
//! circuit, temporal queries, the deletion guard, both grouping strategies and
//! missing-chunk handling.

mod common;

use atelier_chunks::{
    checksum_bytes, checksum_file, sha256_hash, ChunkError, ChunkSequence, ChunkStore,
    EmptyChunkPolicy, RebuildOutcome, SeenChunks, StoredChunk,
};
use atelier_versions::{
    AtelierConfig, AuthorId, CheckpointEngine, CheckpointId, CreateOutcome, FileStatus, GroupId,
    NewCheckpoint, TaskFile, TaskId, VersionError,
};
use chrono::{DateTime, Utc};
use common::{at, imported, noise, small_chunker, small_codec, Fixture, RemoteStore};
use proptest::prelude::*;
use std::collections::HashSet;
use std::fs;
use std::io::Cursor;

fn request(task: TaskId, path: &std::path::Path, author: AuthorId) -> NewCheckpoint {
    NewCheckpoint::new(task, path, author, GroupId::generate())
}

fn create(engine: &CheckpointEngine<'_, atelier_versions::SqliteStore>, req: NewCheckpoint) -> atelier_versions::Checkpoint {
    engine
        .create_checkpoint(req, |_, _| {})
        .unwrap()
        .created()
        .expect("content changed")
        .checkpoint
}

#[test]
fn test_checkpoint_then_revert_is_byte_exact() {
    let fx = Fixture::new();
    let engine = fx.engine();
    let data = noise(300_000, 1);
    let path = fx.write("shot010/comp.nk", &data);
    let task = TaskId::new();

    let record = engine
        .create_checkpoint(request(task, &path, AuthorId::new()).with_comment("first"), |_, _| {})
        .unwrap()
        .created()
        .unwrap();
    assert!(!record.has_missing_chunks);
    assert_eq!(record.checkpoint.file_size, data.len() as u64);
    assert_eq!(record.checkpoint.checksum, checksum_bytes(&data));
    assert!(record.checkpoint.chunk_sequence.len() > 1);

    let dest = fx.path("restore/elsewhere/comp.nk");
    let outcome = engine
        .revert_to_checkpoint(record.checkpoint.id, &dest, |_, _| {})
        .unwrap();
    assert!(matches!(outcome, RebuildOutcome::Written { bytes, .. } if bytes == data.len() as u64));
    assert_eq!(fs::read(&dest).unwrap(), data);
    assert_eq!(checksum_file(&dest).unwrap(), record.checkpoint.checksum);

    let mtime = DateTime::<Utc>::from(fs::metadata(&dest).unwrap().modified().unwrap());
    assert_eq!(mtime, record.checkpoint.time_modified);
}

#[test]
fn test_revert_restores_older_version_in_place() {
    let fx = Fixture::new();
    let engine = fx.engine();
    let task = TaskId::new();
    let author = AuthorId::new();
    let v1 = noise(80_000, 10);
    let mut v2 = v1.clone();
    v2[40_000..40_100].copy_from_slice(&[0u8; 100]);

    let path = fx.write("asset.blend", &v1);
    let first = create(&engine, request(task, &path, author));
    fs::write(&path, &v2).unwrap();
    create(&engine, request(task, &path, author));

    assert_eq!(engine.file_status(task, &TaskFile::Local(path.clone())).unwrap(), FileStatus::Normal);
    engine.revert_to_checkpoint(first.id, &path, |_, _| {}).unwrap();
    assert_eq!(fs::read(&path).unwrap(), v1);
    assert_eq!(engine.file_status(task, &TaskFile::Local(path.clone())).unwrap(), FileStatus::Outdated);
}

#[test]
fn test_encoding_twice_inserts_no_new_chunks() {
    let fx = Fixture::new();
    let codec = small_codec();
    let data = noise(250_000, 2);
    let path = fx.write("plate.exr", &data);

    let (first, stats1) = codec.encode(&path, &fx.store, |_, _| {}).unwrap();
    let rows = fx.chunk_rows();
    assert_eq!(rows, stats1.chunks_new);

    let (second, stats2) = codec.encode(&path, &fx.store, |_, _| {}).unwrap();
    assert_eq!(first, second);
    assert_eq!(stats2.chunks_new, 0);
    assert_eq!(fx.chunk_rows(), rows);
}

#[test]
fn test_shared_byte_range_shares_chunks() {
    let fx = Fixture::new();
    let codec = small_codec();
    let shared = noise(200_000, 3);
    let mut a = noise(30_000, 4);
    a.extend_from_slice(&shared);
    let mut b = noise(70_000, 5);
    b.extend_from_slice(&shared);
    b.extend_from_slice(&noise(10_000, 6));

    let encode = |data: &[u8]| {
        codec
            .encode_reader(Cursor::new(data), data.len() as u64, &fx.store, &mut SeenChunks::new(), |_, _| {})
            .unwrap()
    };
    let (seq_a, _) = encode(&a);
    let (seq_b, stats_b) = encode(&b);

    let hashes_a: HashSet<_> = seq_a.iter().copied().collect();
    let common = seq_b.iter().filter(|h| hashes_a.contains(h)).count();
    assert!(common * 3 >= seq_b.len(), "only {} of {} chunks shared", common, seq_b.len());
    assert!(stats_b.chunks_reused >= common);
}

#[test]
fn test_unchanged_file_creates_no_rows() {
    let fx = Fixture::new();
    let engine = fx.engine();
    let task = TaskId::new();
    let author = AuthorId::new();
    let path = fx.write("rig.ma", &noise(20_000, 7));

    create(&engine, request(task, &path, author));
    let chunks = fx.chunk_rows();
    for _ in 0..2 {
        let outcome = engine
            .create_checkpoint(request(task, &path, author), |_, _| {})
            .unwrap();
        assert_eq!(outcome, CreateOutcome::Unchanged);
    }
    assert_eq!(engine.list_checkpoints(task, true).unwrap().len(), 1);
    assert_eq!(fx.chunk_rows(), chunks);

    let supplied = engine
        .create_checkpoint(
            request(task, &path, author).with_checksum(checksum_file(&path).unwrap()),
            |_, _| {},
        )
        .unwrap();
    assert_eq!(supplied, CreateOutcome::Unchanged);
}

#[test]
fn test_history_is_strictly_newest_first() {
    let fx = Fixture::new();
    let engine = fx.engine();
    let task = TaskId::new();
    let author = AuthorId::new();
    let path = fx.path("notes.txt");

    let mut created = Vec::new();
    for i in 0..5u64 {
        fs::write(&path, format!("revision {i}")).unwrap();
        created.push(create(&engine, request(task, &path, author)).id);
    }

    let history = engine.list_checkpoints(task, false).unwrap();
    let ids: Vec<CheckpointId> = history.iter().map(|c| c.id).collect();
    created.reverse();
    assert_eq!(ids, created);
    assert!(history.windows(2).all(|w| w[0].created_at > w[1].created_at));
    assert_eq!(engine.latest_checkpoint(task).unwrap().id, ids[0]);
}

#[test]
fn test_latest_as_of_is_a_consistent_snapshot() {
    let fx = Fixture::new();
    let engine = fx.engine();
    let author = AuthorId::new();
    let (a, b, c) = (TaskId::new(), TaskId::new(), TaskId::new());
    let a1 = engine.import_checkpoint(imported(a, author, 0, "")).unwrap().checkpoint;
    let a2 = engine.import_checkpoint(imported(a, author, 100, "")).unwrap().checkpoint;
    let b1 = engine.import_checkpoint(imported(b, author, 50, "")).unwrap().checkpoint;
    engine.import_checkpoint(imported(c, author, 500, "")).unwrap();

    let mut snap: Vec<_> = engine
        .latest_checkpoints_as_of(at(99))
        .unwrap()
        .into_iter()
        .map(|cp| cp.id)
        .collect();
    snap.sort();
    let mut expected = vec![a1.id, b1.id];
    expected.sort();
    assert_eq!(snap, expected);

    let snap = engine.latest_checkpoints_as_of(at(100)).unwrap();
    assert!(snap.iter().any(|cp| cp.id == a2.id));
    assert_eq!(snap.len(), 2);
    assert_eq!(engine.latest_checkpoints().unwrap().len(), 3);
}

#[test]
fn test_deletion_guard_protects_last_checkpoint() {
    let fx = Fixture::new();
    let engine = fx.engine();
    let task = TaskId::new();
    let path = fx.write("only.psd", b"layers");
    let only = create(&engine, request(task, &path, AuthorId::new()));

    let err = engine.delete_checkpoint(only.id, true, true).unwrap_err();
    assert!(matches!(err, VersionError::LastCheckpoint(t) if t == task));
    let still = engine.get_checkpoint(only.id).unwrap();
    assert!(!still.trashed);

    engine.delete_checkpoint(only.id, false, false).unwrap();
    assert!(matches!(
        engine.get_checkpoint(only.id),
        Err(VersionError::CheckpointNotFound(_))
    ));
    assert!(matches!(
        engine.latest_checkpoint(task),
        Err(VersionError::NoCheckpoints(_))
    ));
}

#[test]
fn test_recycle_restore_and_empty_trash() {
    let fx = Fixture::new();
    let engine = fx.engine();
    let task = TaskId::new();
    let author = AuthorId::new();
    let path = fx.write("cut.edl", b"v1");
    let first = create(&engine, request(task, &path, author));
    fs::write(&path, b"v2").unwrap();
    let second = create(&engine, request(task, &path, author));

    engine.delete_checkpoint(second.id, true, true).unwrap();
    assert!(engine.get_checkpoint(second.id).unwrap().trashed);
    assert_eq!(engine.latest_checkpoint(task).unwrap().id, first.id);
    assert!(engine.delete_checkpoint(first.id, true, true).is_err());

    let restored = engine.restore_checkpoint(second.id).unwrap();
    assert!(!restored.trashed);
    assert_eq!(engine.latest_checkpoint(task).unwrap().id, second.id);

    engine.delete_checkpoint(second.id, true, true).unwrap();
    assert_eq!(engine.empty_trash(task).unwrap(), 1);
    assert_eq!(engine.list_checkpoints(task, true).unwrap().len(), 1);
    assert_eq!(engine.delete_task_history(task).unwrap(), 1);
    assert!(engine.list_checkpoints(task, true).unwrap().is_empty());
}

#[test]
fn test_grouping_strategies_diverge() {
    let fx = Fixture::new();
    let engine = fx.engine();
    let author = AuthorId::new();
    let mut ids = Vec::new();
    for secs in [0, 10, 20, 220] {
        let mut cp = imported(TaskId::new(), author, secs, "retopo");
        cp.group_id = None;
        ids.push(engine.import_checkpoint(cp).unwrap().checkpoint.id);
    }
    let group_of = |id: CheckpointId| engine.get_checkpoint(id).unwrap().group_id.unwrap();

    assert_eq!(engine.add_missing_group_ids().unwrap(), 4);
    let backfilled: HashSet<_> = ids.iter().map(|id| group_of(*id)).collect();
    assert_eq!(backfilled.len(), 1);
    assert_eq!(engine.add_missing_group_ids().unwrap(), 0);

    assert_eq!(engine.auto_group_checkpoints().unwrap(), 4);
    assert_eq!(group_of(ids[0]), group_of(ids[1]));
    assert_eq!(group_of(ids[1]), group_of(ids[2]));
    assert_ne!(group_of(ids[2]), group_of(ids[3]));

    let timeline = engine.timeline(None, |_| None).unwrap();
    assert_eq!(timeline.len(), 2);
    assert_eq!(timeline[0].checkpoint_ids, vec![ids[3]]);
    assert_eq!(timeline[1].checkpoint_ids.len(), 3);
    assert_eq!(timeline[1].task_ids.len(), 3);
}

#[test]
fn test_missing_chunks_block_revert_until_pulled() {
    let fx = Fixture::new();
    let engine = fx.engine();
    let remote = RemoteStore::default();
    let data = noise(120_000, 8);
    let sequence = remote.upload(&data);

    let mut incoming = imported(TaskId::new(), AuthorId::new(), 0, "from server");
    incoming.chunk_sequence = sequence.clone();
    incoming.checksum = checksum_bytes(&data);
    incoming.file_size = data.len() as u64;
    let record = engine.import_checkpoint(incoming).unwrap();
    assert!(record.has_missing_chunks);

    let dest = fx.path("pulled/anim.abc");
    let err = engine
        .revert_to_checkpoint(record.checkpoint.id, &dest, |_, _| {})
        .unwrap_err();
    assert!(err.is_retryable());
    assert_eq!(err.missing_chunks().map(<[_]>::len), Some(sequence.unique().len()));
    assert!(!dest.exists());
    assert_eq!(fs::read_dir(dest.parent().unwrap()).unwrap().count(), 0);

    let pulled = engine.pull_missing_chunks(record.checkpoint.id, &remote).unwrap();
    assert_eq!(pulled, sequence.unique().len());
    engine.revert_to_checkpoint(record.checkpoint.id, &dest, |_, _| {}).unwrap();
    assert_eq!(fs::read(&dest).unwrap(), data);
}

#[test]
fn test_sequence_without_file_rebuilds_before_checkpointing() {
    let fx = Fixture::new();
    let engine = fx.engine();
    let data = noise(60_000, 9);
    let source = fx.write("source.bin", &data);
    let (sequence, _) = small_codec().encode(&source, &fx.store, |_, _| {}).unwrap();

    let target = fx.path("other/target.bin");
    let record = engine
        .create_checkpoint(
            request(TaskId::new(), &target, AuthorId::new()).with_chunk_sequence(sequence.clone()),
            |_, _| {},
        )
        .unwrap()
        .created()
        .unwrap();
    assert_eq!(fs::read(&target).unwrap(), data);
    assert_eq!(record.checkpoint.checksum, checksum_bytes(&data));
    assert_eq!(record.checkpoint.chunk_sequence, sequence);
    assert_eq!(record.checkpoint.file_size, data.len() as u64);
}

#[test]
fn test_sequence_with_unknown_chunk_is_rejected_without_writing() {
    let fx = Fixture::new();
    let engine = fx.engine();
    let target = fx.path("ghost.bin");
    let sequence = ChunkSequence::from(vec![sha256_hash(b"never stored")]);
    let err = engine
        .create_checkpoint(
            request(TaskId::new(), &target, AuthorId::new()).with_chunk_sequence(sequence),
            |_, _| {},
        )
        .unwrap_err();
    assert!(err.is_retryable());
    assert!(!target.exists());
}

#[test]
fn test_validation_happens_before_io() {
    let fx = Fixture::new();
    let engine = fx.engine();
    let missing = fx.path("does-not-exist");

    let empty_group = NewCheckpoint::new(TaskId::new(), &missing, AuthorId::new(), GroupId::new(" "));
    assert!(matches!(
        engine.create_checkpoint(empty_group, |_, _| {}),
        Err(VersionError::InvalidInput(_))
    ));
    let empty_path = NewCheckpoint::new(TaskId::new(), "", AuthorId::new(), GroupId::generate());
    assert!(matches!(
        engine.create_checkpoint(empty_path, |_, _| {}),
        Err(VersionError::InvalidInput(_))
    ));

    let absent = engine
        .create_checkpoint(request(TaskId::new(), &missing, AuthorId::new()), |_, _| {})
        .unwrap_err();
    assert!(matches!(absent, VersionError::Io(ref e) if e.kind() == std::io::ErrorKind::NotFound));
}

#[test]
fn test_import_duplicate_is_exists_error() {
    let fx = Fixture::new();
    let engine = fx.engine();
    let cp = imported(TaskId::new(), AuthorId::new(), 0, "");
    engine.import_checkpoint(cp.clone()).unwrap();
    let err = engine.import_checkpoint(cp.clone()).unwrap_err();
    assert!(matches!(err, VersionError::CheckpointExists(id) if id == cp.id));
}

#[test]
fn test_empty_file_round_trip() {
    let fx = Fixture::new();
    let engine = fx.engine();
    let path = fx.write("empty.txt", b"");
    let cp = create(&engine, request(TaskId::new(), &path, AuthorId::new()));
    assert!(cp.chunk_sequence.is_empty());
    assert_eq!(cp.file_size, 0);

    let dest = fx.path("empty-restored.txt");
    let outcome = engine.revert_to_checkpoint(cp.id, &dest, |_, _| {}).unwrap();
    assert_eq!(outcome, RebuildOutcome::Written { bytes: 0, chunks: 0 });
    assert_eq!(fs::read(&dest).unwrap(), b"");
}

#[test]
fn test_empty_chunk_payload_policy() {
    let fx = Fixture::new();
    let hollow = StoredChunk::from_raw(b"", 3).unwrap();
    fx.store.insert_ignore(hollow.clone()).unwrap();
    let mut cp = imported(TaskId::new(), AuthorId::new(), 0, "");
    cp.chunk_sequence = ChunkSequence::from(vec![hollow.hash]);
    let id = fx.engine().import_checkpoint(cp).unwrap().checkpoint.id;

    let dest = fx.path("hollow.bin");
    let outcome = fx.engine().revert_to_checkpoint(id, &dest, |_, _| {}).unwrap();
    assert_eq!(outcome, RebuildOutcome::SkippedEmptyChunk(hollow.hash));
    assert!(!dest.exists());

    let config = AtelierConfig {
        chunker: small_chunker(),
        empty_chunk_policy: EmptyChunkPolicy::TreatAsCorrupt,
        ..AtelierConfig::default()
    };
    let strict = CheckpointEngine::from_config(&fx.store, &config).unwrap();
    let err = strict.revert_to_checkpoint(id, &dest, |_, _| {}).unwrap_err();
    assert!(matches!(err, VersionError::Chunks(ChunkError::EmptyChunkPayload(h)) if h == hollow.hash));
}

#[test]
fn test_sync_flags() {
    let fx = Fixture::new();
    let engine = fx.engine();
    let task = TaskId::new();
    let author = AuthorId::new();
    let path = fx.write("lookdev.usd", b"a");
    let first = create(&engine, request(task, &path, author));
    fs::write(&path, b"b").unwrap();
    create(&engine, request(task, &path, author));

    assert_eq!(engine.unsynced_checkpoints().unwrap().len(), 2);
    assert_eq!(engine.mark_synced(&[first.id]).unwrap(), 1);
    let pending = engine.unsynced_checkpoints().unwrap();
    assert_eq!(pending.len(), 1);
    assert_ne!(pending[0].id, first.id);
}

#[test]
fn test_sweep_keeps_referenced_chunks() {
    let fx = Fixture::new();
    let engine = fx.engine();
    let task = TaskId::new();
    let path = fx.write("bake.vdb", &noise(50_000, 11));
    create(&engine, request(task, &path, AuthorId::new()));
    let rows = fx.chunk_rows();
    assert!(rows > 0);

    let stats = engine.sweep_unreferenced_chunks(&[]).unwrap();
    assert_eq!(stats.chunks_reclaimed, 0);
    assert_eq!(fx.chunk_rows(), rows);

    engine.delete_task_history(task).unwrap();
    let stats = engine.sweep_unreferenced_chunks(&[]).unwrap();
    assert_eq!(stats.chunks_reclaimed, rows);
    assert_eq!(fx.chunk_rows(), 0);
}

#[test]
fn test_failed_transaction_leaves_no_rows() {
    let fx = Fixture::new();
    let path = fx.write("scene.hip", &noise(30_000, 12));
    let task = TaskId::new();

    let result: Result<(), VersionError> = fx.store.in_transaction(|store| {
        let engine = CheckpointEngine::new(store).with_codec(small_codec());
        create(&engine, request(task, &path, AuthorId::new()));
        Err(VersionError::InvalidInput("abort"))
    });
    assert!(result.is_err());
    assert!(fx.engine().list_checkpoints(task, true).unwrap().is_empty());
    assert_eq!(fx.chunk_rows(), 0);
}

#[test]
fn test_linked_and_missing_status() {
    let fx = Fixture::new();
    let engine = fx.engine();
    let task = TaskId::new();
    let path = fx.write("model.obj", b"verts");
    create(&engine, request(task, &path, AuthorId::new()));

    fs::remove_file(&path).unwrap();
    assert_eq!(engine.file_status(task, &TaskFile::Local(path.clone())).unwrap(), FileStatus::Rebuildable);
    assert_eq!(engine.file_status(TaskId::new(), &TaskFile::Local(path.clone())).unwrap(), FileStatus::Missing);
    assert_eq!(engine.file_status(task, &TaskFile::Linked(path.clone())).unwrap(), FileStatus::Missing);

    fs::write(&path, b"changed").unwrap();
    assert_eq!(engine.file_status(task, &TaskFile::Local(path.clone())).unwrap(), FileStatus::Modified);
    assert_eq!(engine.file_status(task, &TaskFile::Linked(path)).unwrap(), FileStatus::Normal);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_latest_as_of_never_looks_ahead(
        rows in prop::collection::vec((0usize..3, 0i64..1000), 1..20),
        cutoff in 0i64..1000,
    ) {
        let fx = Fixture::new();
        let engine = fx.engine();
        let tasks = [TaskId::new(), TaskId::new(), TaskId::new()];
        let author = AuthorId::new();
        let mut inserted = Vec::new();
        for (task_idx, secs) in rows {
            let cp = imported(tasks[task_idx], author, secs, "");
            inserted.push(engine.import_checkpoint(cp).unwrap().checkpoint);
        }

        let snapshot = engine.latest_checkpoints_as_of(at(cutoff)).unwrap();
        for task in tasks {
            let eligible: Vec<_> = inserted
                .iter()
                .filter(|cp| cp.task_id == task && cp.created_at <= at(cutoff))
                .collect();
            let picked: Vec<_> = snapshot.iter().filter(|cp| cp.task_id == task).collect();
            if eligible.is_empty() {
                prop_assert!(picked.is_empty());
            } else {
                prop_assert_eq!(picked.len(), 1);
                let newest = eligible.iter().map(|cp| cp.created_at).max().unwrap();
                prop_assert_eq!(picked[0].created_at, newest);
            }
        }
        prop_assert!(snapshot.iter().all(|cp| cp.created_at <= at(cutoff)));
    }
}
