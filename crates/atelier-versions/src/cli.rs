use crate::config::AtelierConfig;
use crate::engine::{CheckpointEngine, CreateOutcome, NewCheckpoint};
use crate::sqlite::SqliteStore;
use crate::types::{AuthorId, Checkpoint, CheckpointId, GroupId, TaskFile, TaskId};
use anyhow::Result;
use atelier_chunks::RebuildOutcome;
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;

/// Command-line front end over a local checkpoint database
#[derive(Parser)]
#[command(name = "atelier")]
#[command(about = "Atelier task file versioning", long_about = None)]
pub struct Cli {
    /// Configuration file (.toml or .json)
    #[arg(short, long, env = "ATELIER_CONFIG")]
    pub config: Option<PathBuf>,

    /// Database path, overriding the configuration
    #[arg(short, long, env = "ATELIER_DB")]
    pub database: Option<PathBuf>,

    /// Print results as JSON
    #[arg(long)]
    pub json: bool,

    /// Operation to run
    #[command(subcommand)]
    pub command: Command,
}

/// Subcommands of [`Cli`]
#[derive(Subcommand)]
pub enum Command {
    /// Record the current content of a task's file
    Checkpoint {
        /// Owning task
        task: TaskId,
        /// Working file
        path: PathBuf,
        /// Save comment
        #[arg(short, long, default_value = "")]
        comment: String,
        /// Author id
        #[arg(short, long)]
        author: AuthorId,
        /// Save-event key; a fresh one is generated when omitted
        #[arg(short, long)]
        group: Option<String>,
    },
    /// Show a task's history, newest first
    List {
        /// Task to list
        task: TaskId,
        /// Include trashed checkpoints
        #[arg(long)]
        all: bool,
    },
    /// Rebuild a checkpoint's file at a destination
    Revert {
        /// Checkpoint to rebuild
        checkpoint: CheckpointId,
        /// Output path
        dest: PathBuf,
    },
    /// Trash a checkpoint (or remove it with --permanent)
    Delete {
        /// Checkpoint to delete
        checkpoint: CheckpointId,
        /// Allow deleting a task's last live checkpoint
        #[arg(long)]
        force: bool,
        /// Remove the row instead of trashing it
        #[arg(long)]
        permanent: bool,
    },
    /// Take a checkpoint out of the trash
    Restore {
        /// Checkpoint to restore
        checkpoint: CheckpointId,
    },
    /// Compare a working file against its history
    Status {
        /// Owning task
        task: TaskId,
        /// Working file or link target
        path: PathBuf,
        /// The path is an external link rather than a managed file
        #[arg(long)]
        linked: bool,
    },
    /// Newest checkpoint per task at an instant (RFC 3339)
    Snapshot {
        /// Instant to look back to
        #[arg(long)]
        at: DateTime<Utc>,
    },
    /// Recent save events
    Timeline {
        /// Maximum number of events
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },
    /// Assign group ids (regroup all, or backfill legacy rows)
    Group {
        /// Only fill in legacy rows without a group id
        #[arg(long)]
        backfill: bool,
    },
    /// Delete chunks no checkpoint references
    Sweep,
}

impl Cli {
    /// Open the database and run the selected command in one transaction
    pub fn run(self) -> Result<()> {
        let mut config = match &self.config {
            Some(path) => AtelierConfig::from_file(path)?,
            None => AtelierConfig::default(),
        };
        if let Some(database) = &self.database {
            config.database_path = database.clone();
        }

        let store = SqliteStore::open(&config.database_path)?;
        store.in_transaction(|store| {
            let engine = CheckpointEngine::from_config(store, &config)?;
            self.dispatch(&engine)
        })
    }

    fn dispatch(&self, engine: &CheckpointEngine<'_, SqliteStore>) -> Result<()> {
        match &self.command {
            Command::Checkpoint {
                task,
                path,
                comment,
                author,
                group,
            } => {
                let group_id = group.as_deref().map(GroupId::new).unwrap_or_else(GroupId::generate);
                let request = NewCheckpoint::new(*task, path, *author, group_id).with_comment(comment);
                match engine.create_checkpoint(request, progress)? {
                    CreateOutcome::Created(record) => self.emit(&record.checkpoint, || {
                        println!("{}", summary(&record.checkpoint));
                        if record.has_missing_chunks {
                            println!("  (some chunks are not stored locally)");
                        }
                    }),
                    CreateOutcome::Unchanged => {
                        self.emit(&serde_json::json!({ "unchanged": true }), || {
                            println!("unchanged, no checkpoint created")
                        })
                    }
                }
            }
            Command::List { task, all } => {
                let history = engine.list_checkpoints(*task, *all)?;
                self.emit_list(&history)
            }
            Command::Revert { checkpoint, dest } => {
                let outcome = engine.revert_to_checkpoint(*checkpoint, dest, progress)?;
                let (json, line) = match outcome {
                    RebuildOutcome::Written { bytes, chunks } => (
                        serde_json::json!({ "written": bytes, "chunks": chunks }),
                        format!("wrote {} bytes from {} chunks to {}", bytes, chunks, dest.display()),
                    ),
                    RebuildOutcome::SkippedEmptyChunk(hash) => (
                        serde_json::json!({ "skipped_empty_chunk": hash.to_hex() }),
                        format!("skipped: chunk {} has an empty payload", hash),
                    ),
                };
                self.emit(&json, || println!("{}", line))
            }
            Command::Delete {
                checkpoint,
                force,
                permanent,
            } => {
                engine.delete_checkpoint(*checkpoint, !*force, !*permanent)?;
                self.emit(&serde_json::json!({ "deleted": checkpoint }), || {
                    println!("deleted {}", checkpoint)
                })
            }
            Command::Restore { checkpoint } => {
                let restored = engine.restore_checkpoint(*checkpoint)?;
                self.emit(&restored, || println!("restored {}", summary(&restored)))
            }
            Command::Status { task, path, linked } => {
                let file = if *linked {
                    TaskFile::Linked(path.clone())
                } else {
                    TaskFile::Local(path.clone())
                };
                let status = engine.file_status(*task, &file)?;
                self.emit(&status, || println!("{}", status))
            }
            Command::Snapshot { at } => {
                let snapshot = engine.latest_checkpoints_as_of(*at)?;
                self.emit_list(&snapshot)
            }
            Command::Timeline { limit } => {
                let entries = engine.timeline(Some(*limit), |_| None)?;
                self.emit(&entries, || {
                    for entry in &entries {
                        println!(
                            "{}  {} checkpoint(s) across {} task(s)  {}  {}",
                            entry.ended_at.to_rfc3339(),
                            entry.checkpoint_ids.len(),
                            entry.task_ids.len(),
                            entry.author_id,
                            entry.comment
                        );
                    }
                })
            }
            Command::Group { backfill } => {
                let changed = if *backfill {
                    engine.add_missing_group_ids()?
                } else {
                    engine.auto_group_checkpoints()?
                };
                self.emit(&serde_json::json!({ "updated": changed }), || {
                    println!("updated {} checkpoint(s)", changed)
                })
            }
            Command::Sweep => {
                let stats = engine.sweep_unreferenced_chunks(&[])?;
                self.emit(
                    &serde_json::json!({
                        "scanned": stats.chunks_scanned,
                        "reclaimed": stats.chunks_reclaimed,
                    }),
                    || {
                        println!(
                            "scanned {} chunk(s), reclaimed {}",
                            stats.chunks_scanned, stats.chunks_reclaimed
                        )
                    },
                )
            }
        }
    }

    fn emit<T: Serialize>(&self, value: &T, human: impl FnOnce()) -> Result<()> {
        if self.json {
            println!("{}", serde_json::to_string_pretty(value)?);
        } else {
            human();
        }
        Ok(())
    }

    fn emit_list(&self, checkpoints: &[Checkpoint]) -> Result<()> {
        self.emit(&checkpoints, || {
            for cp in checkpoints {
                println!("{}", summary(cp));
            }
        })
    }
}

fn summary(cp: &Checkpoint) -> String {
    format!(
        "{}  {}  task={}  {} bytes  {}{}",
        cp.id,
        cp.created_at.to_rfc3339(),
        cp.task_id,
        cp.file_size,
        cp.comment,
        if cp.trashed { "  [trashed]" } else { "" }
    )
}

fn progress(done: u64, total: u64) {
    tracing::debug!(done, total, "progress");
}
