use atelier_chunks::{ChunkerConfig, EmptyChunkPolicy, DEFAULT_BUFFER_LIMIT};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Tunables for the checkpoint engine and its local database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AtelierConfig {
    /// SQLite database holding chunks and checkpoints
    pub database_path: PathBuf,
    /// FastCDC chunk sizes
    pub chunker: ChunkerConfig,
    /// Zstd level for new chunks
    pub compression_level: i32,
    /// Compressed bytes buffered before each rebuild flush
    pub rebuild_buffer_bytes: usize,
    /// Handling of zero-byte chunk payloads during rebuild
    pub empty_chunk_policy: EmptyChunkPolicy,
    /// Gap allowed between save events grouped going forward
    pub auto_group_window_secs: u64,
    /// Gap allowed between legacy checkpoints during group backfill
    pub backfill_group_window_secs: u64,
}

impl Default for AtelierConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("atelier.db"),
            chunker: ChunkerConfig::default(),
            compression_level: 3,
            rebuild_buffer_bytes: DEFAULT_BUFFER_LIMIT,
            empty_chunk_policy: EmptyChunkPolicy::default(),
            auto_group_window_secs: 120,
            backfill_group_window_secs: 300,
        }
    }
}

impl AtelierConfig {
    /// Load from a `.toml` or `.json` file. Missing keys take their defaults.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();

        match ext.to_lowercase().as_str() {
            "toml" => {
                let config: AtelierConfig = toml::from_str(&contents)?;
                Ok(config)
            }
            "json" => {
                let config: AtelierConfig = serde_json::from_str(&contents)?;
                Ok(config)
            }
            _ => anyhow::bail!("Unsupported config file extension: {}", ext),
        }
    }
}
