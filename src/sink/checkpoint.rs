//! Persisted mirror of the sink's pending-record buffer.
//!
//! The host runtime calls snapshot at its checkpoint cadence; the mirror
//! must always hold a complete, self-consistent copy of the buffer, so a
//! persist is a clear-then-rewrite, never an append.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::point::Record;

/// Durable mirror of the buffered records, in the same wire form used
/// for transmission.
pub trait CheckpointStore {
    /// Atomically replaces the mirror with `records`.
    fn persist(&mut self, records: &[Record]) -> Result<()>;

    /// Loads the mirror, or `None` if no snapshot was ever persisted.
    fn load(&mut self) -> Result<Option<Vec<Record>>>;
}

/// File-backed mirror: one JSON array of records, replaced atomically by
/// writing a sibling temp file and renaming it over the target.
pub struct FileCheckpointStore {
    path: PathBuf,
}

impl FileCheckpointStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CheckpointStore for FileCheckpointStore {
    fn persist(&mut self, records: &[Record]) -> Result<()> {
        let data = serde_json::to_vec(records).context("serializing checkpoint records")?;

        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, &data).with_context(|| format!("writing {}", tmp.display()))?;
        fs::rename(&tmp, &self.path)
            .with_context(|| format!("replacing {}", self.path.display()))?;
        Ok(())
    }

    fn load(&mut self) -> Result<Option<Vec<Record>>> {
        let data = match fs::read(&self.path) {
            Ok(data) => data,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("reading {}", self.path.display()))
            }
        };

        let records = serde_json::from_slice(&data)
            .with_context(|| format!("decoding checkpoint {}", self.path.display()))?;
        Ok(Some(records))
    }
}

/// In-memory mirror for tests and single-process runs without durability.
#[derive(Debug, Default)]
pub struct MemoryCheckpointStore {
    mirror: Option<Vec<Record>>,
}

impl CheckpointStore for MemoryCheckpointStore {
    fn persist(&mut self, records: &[Record]) -> Result<()> {
        self.mirror = Some(records.to_vec());
        Ok(())
    }

    fn load(&mut self) -> Result<Option<Vec<Record>>> {
        Ok(self.mirror.clone())
    }
}
