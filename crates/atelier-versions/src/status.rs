//! Working-copy freshness against checkpoint history.

use crate::types::{Checkpoint, FileStatus, TaskFile};
use atelier_chunks::checksum_file;
use std::io;

/// Classify a task's file against its live history (newest first).
///
/// Linked files are only checked for existence. Local files are compared by
/// fast checksum: the newest checkpoint gives `Normal`, any older one gives
/// `Outdated`, and no match gives `Modified`.
pub fn resolve_status(task: &TaskFile, history: &[Checkpoint]) -> io::Result<FileStatus> {
    match task {
        TaskFile::Linked(target) => Ok(if target.try_exists()? {
            FileStatus::Normal
        } else {
            FileStatus::Missing
        }),
        TaskFile::Local(path) => {
            if !path.try_exists()? {
                return Ok(if history.is_empty() {
                    FileStatus::Missing
                } else {
                    FileStatus::Rebuildable
                });
            }
            let checksum = checksum_file(path)?;
            let status = match history.iter().position(|cp| cp.checksum == checksum) {
                Some(0) => FileStatus::Normal,
                Some(_) => FileStatus::Outdated,
                None => FileStatus::Modified,
            };
            Ok(status)
        }
    }
}
