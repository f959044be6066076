//! SQLite-backed chunk and checkpoint storage.

use crate::error::VersionError;
use crate::store::{CheckpointFilter, CheckpointStore, GroupAssignment};
use crate::types::{from_millis, to_millis, Checkpoint, CheckpointId, GroupId, TaskId};
use atelier_chunks::{Checksum, ChunkError, ChunkHash, ChunkStore, StoredChunk};
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

const CHECKPOINT_COLUMNS: &str = "id, created_at, updated_at, task_id, checksum, time_modified, \
     file_size, comment, chunk_sequence, author_id, group_id, preview_id, trashed, synced";

const FILTER_CLAUSE: &str = "(?1 IS NULL OR task_id = ?1) \
     AND (?2 IS NULL OR trashed = ?2) \
     AND (?3 IS NULL OR synced = ?3)";

/// Local database holding both chunk rows and checkpoint rows.
#[derive(Debug)]
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Open (creating if needed) the database file at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, VersionError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        install_schema(&conn)?;
        debug!(path = %path.display(), "Opened checkpoint database");
        Ok(Self { conn })
    }

    /// A private database that lives as long as the handle.
    pub fn open_in_memory() -> Result<Self, VersionError> {
        let conn = Connection::open_in_memory()?;
        install_schema(&conn)?;
        Ok(Self { conn })
    }

    /// Run `f` inside one transaction. Any error rolls every write back.
    pub fn in_transaction<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&Self) -> Result<T, E>,
        E: From<rusqlite::Error>,
    {
        let tx = self.conn.unchecked_transaction()?;
        let out = f(self)?;
        tx.commit()?;
        Ok(out)
    }

    fn query_checkpoints(
        &self,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> Result<Vec<Checkpoint>, VersionError> {
        let mut stmt = self.conn.prepare_cached(sql)?;
        let rows = stmt.query_map(params, checkpoint_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }
}

fn install_schema(conn: &Connection) -> Result<(), VersionError> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS chunks (
          hash TEXT PRIMARY KEY,
          data BLOB NOT NULL,
          compressed_size INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS checkpoints (
          id TEXT PRIMARY KEY,
          created_at INTEGER NOT NULL,
          updated_at INTEGER NOT NULL,
          task_id TEXT NOT NULL,
          checksum TEXT NOT NULL,
          time_modified INTEGER NOT NULL,
          file_size INTEGER NOT NULL,
          comment TEXT NOT NULL DEFAULT '',
          chunk_sequence TEXT NOT NULL DEFAULT '',
          author_id TEXT NOT NULL,
          group_id TEXT,
          preview_id TEXT,
          trashed INTEGER NOT NULL DEFAULT 0,
          synced INTEGER NOT NULL DEFAULT 0
        );

        CREATE INDEX IF NOT EXISTS idx_checkpoints_task_created
          ON checkpoints(task_id, created_at);
        "#,
    )?;
    Ok(())
}

fn checkpoint_from_row(row: &Row<'_>) -> rusqlite::Result<Checkpoint> {
    let checksum: String = row.get(4)?;
    let group_id: Option<String> = row.get(10)?;
    let preview_id: Option<String> = row.get(11)?;
    Ok(Checkpoint {
        id: parse_column(row, 0)?,
        created_at: from_millis(row.get(1)?),
        updated_at: from_millis(row.get(2)?),
        task_id: parse_column(row, 3)?,
        checksum: Checksum::from_hex(&checksum)
            .ok_or_else(|| conversion_failure(4, "invalid checksum".into()))?,
        time_modified: from_millis(row.get(5)?),
        file_size: u64::try_from(row.get::<_, i64>(6)?)
            .map_err(|e| conversion_failure(6, Box::new(e)))?,
        comment: row.get(7)?,
        chunk_sequence: parse_column(row, 8)?,
        author_id: parse_column(row, 9)?,
        group_id: group_id
            .filter(|g| !g.trim().is_empty())
            .map(GroupId::new),
        preview_id: preview_id
            .map(|p| p.parse().map_err(|e| conversion_failure(11, Box::new(e))))
            .transpose()?,
        trashed: row.get(12)?,
        synced: row.get(13)?,
    })
}

fn parse_column<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let raw: String = row.get(idx)?;
    raw.parse()
        .map_err(|e| conversion_failure(idx, Box::new(e)))
}

fn conversion_failure(
    idx: usize,
    err: Box<dyn std::error::Error + Send + Sync>,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, err)
}

fn map_insert_conflict(err: rusqlite::Error, id: CheckpointId) -> VersionError {
    if is_constraint_violation(&err) {
        return VersionError::CheckpointExists(id);
    }
    VersionError::Sql(err)
}

fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    match err {
        rusqlite::Error::SqliteFailure(code, message) => {
            code.code == ErrorCode::ConstraintViolation
                || message.as_deref().is_some_and(|value| {
                    value.contains("UNIQUE constraint failed")
                        || value.contains("PRIMARY KEY constraint failed")
                })
        }
        _ => false,
    }
}

fn to_sqlite_i64<T: TryInto<i64>>(value: T) -> Result<i64, VersionError> {
    value
        .try_into()
        .map_err(|_| VersionError::InvalidInput("numeric overflow"))
}

fn filter_params(
    filter: &CheckpointFilter,
) -> (Option<String>, Option<bool>, Option<bool>) {
    (
        filter.task_id.map(|t| t.to_string()),
        filter.trashed,
        filter.synced,
    )
}

impl CheckpointStore for SqliteStore {
    fn insert_checkpoint(&self, cp: &Checkpoint) -> Result<(), VersionError> {
        let sql = format!(
            "INSERT INTO checkpoints ({CHECKPOINT_COLUMNS}) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)"
        );
        self.conn
            .execute(
                &sql,
                params![
                    cp.id.to_string(),
                    to_millis(cp.created_at),
                    to_millis(cp.updated_at),
                    cp.task_id.to_string(),
                    cp.checksum.to_hex(),
                    to_millis(cp.time_modified),
                    to_sqlite_i64(cp.file_size)?,
                    cp.comment,
                    cp.chunk_sequence.to_string(),
                    cp.author_id.to_string(),
                    cp.group_id.as_ref().map(|g| g.as_str()),
                    cp.preview_id.map(|p| p.to_string()),
                    cp.trashed,
                    cp.synced,
                ],
            )
            .map_err(|e| map_insert_conflict(e, cp.id))?;
        Ok(())
    }

    fn get_checkpoint(&self, id: CheckpointId) -> Result<Option<Checkpoint>, VersionError> {
        let sql = format!("SELECT {CHECKPOINT_COLUMNS} FROM checkpoints WHERE id = ?1");
        Ok(self
            .conn
            .query_row(&sql, params![id.to_string()], checkpoint_from_row)
            .optional()?)
    }

    fn update_checkpoint(&self, cp: &Checkpoint) -> Result<(), VersionError> {
        let changed = self.conn.execute(
            "UPDATE checkpoints SET trashed = ?2, synced = ?3, group_id = ?4, updated_at = ?5 \
             WHERE id = ?1",
            params![
                cp.id.to_string(),
                cp.trashed,
                cp.synced,
                cp.group_id.as_ref().map(|g| g.as_str()),
                to_millis(cp.updated_at),
            ],
        )?;
        if changed == 0 {
            return Err(VersionError::CheckpointNotFound(cp.id));
        }
        Ok(())
    }

    fn delete_checkpoint(&self, id: CheckpointId) -> Result<bool, VersionError> {
        let deleted = self
            .conn
            .execute("DELETE FROM checkpoints WHERE id = ?1", params![id.to_string()])?;
        Ok(deleted > 0)
    }

    fn delete_checkpoints_where(&self, filter: &CheckpointFilter) -> Result<usize, VersionError> {
        let (task, trashed, synced) = filter_params(filter);
        let sql = format!("DELETE FROM checkpoints WHERE {FILTER_CLAUSE}");
        Ok(self.conn.execute(&sql, params![task, trashed, synced])?)
    }

    fn list_checkpoints(&self, filter: &CheckpointFilter) -> Result<Vec<Checkpoint>, VersionError> {
        let (task, trashed, synced) = filter_params(filter);
        let limit = match filter.limit {
            Some(limit) => to_sqlite_i64(limit)?,
            None => -1,
        };
        let sql = format!(
            "SELECT {CHECKPOINT_COLUMNS} FROM checkpoints WHERE {FILTER_CLAUSE} \
             ORDER BY created_at DESC, id DESC LIMIT ?4"
        );
        self.query_checkpoints(&sql, params![task, trashed, synced, limit])
    }

    fn latest_checkpoints(&self) -> Result<Vec<Checkpoint>, VersionError> {
        let sql = format!(
            "SELECT {CHECKPOINT_COLUMNS} FROM ( \
               SELECT *, ROW_NUMBER() OVER ( \
                 PARTITION BY task_id ORDER BY created_at DESC, id DESC \
               ) AS rn FROM checkpoints WHERE trashed = 0 \
             ) WHERE rn = 1 ORDER BY created_at DESC, id DESC"
        );
        self.query_checkpoints(&sql, [])
    }

    fn latest_checkpoints_as_of(&self, at: DateTime<Utc>) -> Result<Vec<Checkpoint>, VersionError> {
        let sql = format!(
            "SELECT {CHECKPOINT_COLUMNS} FROM ( \
               SELECT *, ROW_NUMBER() OVER ( \
                 PARTITION BY task_id ORDER BY created_at DESC, id DESC \
               ) AS rn FROM checkpoints WHERE created_at <= ?1 \
             ) WHERE rn = 1 ORDER BY created_at DESC, id DESC"
        );
        self.query_checkpoints(&sql, params![to_millis(at)])
    }

    fn count_live_checkpoints(&self, task_id: TaskId) -> Result<usize, VersionError> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM checkpoints WHERE task_id = ?1 AND trashed = 0",
            params![task_id.to_string()],
            |row| row.get(0),
        )?;
        Ok(usize::try_from(count).unwrap_or(0))
    }

    fn set_group_ids(&self, assignments: &[GroupAssignment]) -> Result<usize, VersionError> {
        let now = to_millis(Utc::now());
        let mut stmt = self.conn.prepare_cached(
            "UPDATE checkpoints SET group_id = ?2, updated_at = ?3 WHERE id = ?1",
        )?;
        let mut changed = 0;
        for assignment in assignments {
            changed += stmt.execute(params![
                assignment.checkpoint_id.to_string(),
                assignment.group_id.as_str(),
                now,
            ])?;
        }
        Ok(changed)
    }

    fn mark_synced(&self, ids: &[CheckpointId]) -> Result<usize, VersionError> {
        let now = to_millis(Utc::now());
        let mut stmt = self.conn.prepare_cached(
            "UPDATE checkpoints SET synced = 1, updated_at = ?2 WHERE id = ?1 AND synced = 0",
        )?;
        let mut changed = 0;
        for id in ids {
            changed += stmt.execute(params![id.to_string(), now])?;
        }
        Ok(changed)
    }
}

fn chunk_store_error(err: rusqlite::Error) -> ChunkError {
    ChunkError::Store(err.to_string())
}

impl ChunkStore for SqliteStore {
    fn contains(&self, hash: &ChunkHash) -> Result<bool, ChunkError> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT 1 FROM chunks WHERE hash = ?1")
            .map_err(chunk_store_error)?;
        stmt.exists(params![hash.to_hex()]).map_err(chunk_store_error)
    }

    fn insert_ignore(&self, chunk: StoredChunk) -> Result<bool, ChunkError> {
        let size = i64::try_from(chunk.compressed_size)
            .map_err(|_| ChunkError::Store("compressed size overflow".to_string()))?;
        let inserted = self
            .conn
            .prepare_cached(
                "INSERT OR IGNORE INTO chunks (hash, data, compressed_size) VALUES (?1, ?2, ?3)",
            )
            .and_then(|mut stmt| stmt.execute(params![chunk.hash.to_hex(), chunk.data.as_ref(), size]))
            .map_err(chunk_store_error)?;
        Ok(inserted > 0)
    }

    fn get(&self, hash: &ChunkHash) -> Result<Option<StoredChunk>, ChunkError> {
        let row = self
            .conn
            .query_row(
                "SELECT data, compressed_size FROM chunks WHERE hash = ?1",
                params![hash.to_hex()],
                |row| Ok((row.get::<_, Vec<u8>>(0)?, row.get::<_, i64>(1)?)),
            )
            .optional()
            .map_err(chunk_store_error)?;
        Ok(row.map(|(data, size)| StoredChunk {
            hash: *hash,
            data: data.into(),
            compressed_size: u64::try_from(size).unwrap_or_default(),
        }))
    }

    fn delete(&self, hash: &ChunkHash) -> Result<bool, ChunkError> {
        let deleted = self
            .conn
            .execute("DELETE FROM chunks WHERE hash = ?1", params![hash.to_hex()])
            .map_err(chunk_store_error)?;
        Ok(deleted > 0)
    }

    fn all_hashes(&self) -> Result<Vec<ChunkHash>, ChunkError> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT hash FROM chunks")
            .map_err(chunk_store_error)?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(chunk_store_error)?;
        let mut hashes = Vec::new();
        for raw in rows {
            hashes.push(ChunkHash::from_hex(&raw.map_err(chunk_store_error)?)?);
        }
        Ok(hashes)
    }
}
