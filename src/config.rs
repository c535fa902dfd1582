use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

/// Top-level configuration for the scanstream pipeline.
#[derive(Debug, Deserialize)]
pub struct Config {
    /// Logging verbosity (trace, debug, info, warn, error). Default: "info".
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Upstream event source configuration.
    #[serde(default)]
    pub source: SourceConfig,

    /// Time-series store connection and batching configuration.
    pub store: StoreConfig,

    /// Checkpoint mirror configuration.
    #[serde(default)]
    pub checkpoint: CheckpointConfig,
}

/// Upstream event source configuration.
///
/// The read-pacing knobs mirror what the upstream stream consumer
/// understands; the local replayer honors them so replay behaves like a
/// paced shard read.
#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    /// Name of the upstream stream, used in logs only.
    #[serde(default)]
    pub name: String,

    /// File of newline-delimited JSON events to replay. Absent = stdin.
    #[serde(default)]
    pub path: Option<PathBuf>,

    /// Pause between paced read bursts. Default: 1s.
    #[serde(default = "default_getrecords_interval", with = "humantime_serde")]
    pub getrecords_interval: Duration,

    /// Maximum events consumed per read burst. Default: 10000.
    #[serde(default = "default_getrecords_max")]
    pub getrecords_max: usize,

    /// When set, reads are not paced at all.
    #[serde(default)]
    pub adaptive_reads: bool,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            path: None,
            getrecords_interval: default_getrecords_interval(),
            getrecords_max: default_getrecords_max(),
            adaptive_reads: false,
        }
    }
}

/// Time-series store connection and batching configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// Write API endpoint (e.g., "https://ingest.example.net/write").
    pub endpoint: String,

    /// Store region the writes are pinned to.
    #[serde(default)]
    pub region: String,

    /// Target database name.
    pub database: String,

    /// Target table name.
    pub table: String,

    /// Records per batched write call. Default: 75.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Per-request timeout. Default: 20s.
    #[serde(default = "default_request_timeout", with = "humantime_serde")]
    pub request_timeout: Duration,

    /// Transport-failure retries performed inside the write client.
    /// Default: 10.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Request body compression.
    #[serde(default)]
    pub compression: Compression,
}

/// Request body compression applied by the write client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    #[default]
    None,
    Gzip,
}

/// Checkpoint mirror configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct CheckpointConfig {
    /// Path of the persisted mirror. Absent = checkpointing disabled.
    #[serde(default)]
    pub path: Option<PathBuf>,

    /// How often the pending buffer is snapshotted. Default: 30s.
    #[serde(default = "default_checkpoint_interval", with = "humantime_serde")]
    pub interval: Duration,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            path: None,
            interval: default_checkpoint_interval(),
        }
    }
}

impl Config {
    /// Loads and validates a YAML configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;

        let cfg: Config = serde_yaml::from_str(&data)
            .with_context(|| format!("parsing config file {}", path.display()))?;

        cfg.validate()?;

        Ok(cfg)
    }

    /// Validate the configuration for required fields and consistency.
    pub fn validate(&self) -> Result<()> {
        if self.store.endpoint.is_empty() {
            bail!("store.endpoint is required");
        }

        if self.store.database.is_empty() {
            bail!("store.database is required");
        }

        if self.store.table.is_empty() {
            bail!("store.table is required");
        }

        if self.store.batch_size == 0 {
            bail!("store.batch_size must be positive");
        }

        if self.source.getrecords_max == 0 {
            bail!("source.getrecords_max must be positive");
        }

        Ok(())
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_getrecords_interval() -> Duration {
    Duration::from_secs(1)
}

fn default_getrecords_max() -> usize {
    10_000
}

fn default_batch_size() -> usize {
    75
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(20)
}

fn default_max_retries() -> u32 {
    10
}

fn default_checkpoint_interval() -> Duration {
    Duration::from_secs(30)
}
