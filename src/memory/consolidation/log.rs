//! Immutable per-run consolidation records.

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::memory::core::errors::MemoryResult;
use crate::memory::storage::atomic::write_json_atomic;

const PREFIX: &str = "consolidation_";
const EXTENSION: &str = ".json";

/// Outcome of one consolidation run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConsolidationResult {
    /// When the run started.
    pub timestamp: DateTime<Utc>,
    /// Successful episodes considered.
    pub episodes_processed: usize,
    /// New skills.
    pub skills_created: usize,
    /// Existing skills that absorbed new episodes.
    pub skills_updated: usize,
    /// Knowledge triples added or reinforced.
    pub triples_extracted: usize,
    /// Episodes moved to the archive.
    pub episodes_archived: usize,
    /// Analysis only; nothing was written.
    #[serde(default)]
    pub dry_run: bool,
    /// Free-form run details (`message`, `pattern_groups`, `skills`, ...).
    #[serde(default)]
    pub details: BTreeMap<String, serde_json::Value>,
}

impl ConsolidationResult {
    /// A result with every counter at zero.
    #[must_use]
    pub fn empty(timestamp: DateTime<Utc>, dry_run: bool) -> Self {
        Self {
            timestamp,
            episodes_processed: 0,
            skills_created: 0,
            skills_updated: 0,
            triples_extracted: 0,
            episodes_archived: 0,
            dry_run,
            details: BTreeMap::new(),
        }
    }

    /// Attach a detail entry.
    pub fn detail(&mut self, key: &str, value: impl Into<serde_json::Value>) {
        self.details.insert(key.to_string(), value.into());
    }
}

/// Directory of consolidation records, one JSON file per run.
#[derive(Clone, Debug)]
pub struct ConsolidationLog {
    dir: PathBuf,
}

impl ConsolidationLog {
    /// Log stored under `dir`.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Write a new record named after its timestamp. Existing records are never replaced.
    ///
    /// # Errors
    /// Returns an error if the record cannot be written.
    pub async fn append(&self, result: &ConsolidationResult) -> MemoryResult<PathBuf> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let stem = format!("{PREFIX}{}", result.timestamp.format("%Y%m%d_%H%M%S%3f"));
        let mut path = self.dir.join(format!("{stem}{EXTENSION}"));
        let mut suffix = 1;
        while tokio::fs::try_exists(&path).await? {
            path = self.dir.join(format!("{stem}_{suffix}{EXTENSION}"));
            suffix += 1;
        }
        write_json_atomic(&path, result).await?;
        debug!(path = %path.display(), "Wrote consolidation record");
        Ok(path)
    }

    async fn record_paths(&self) -> MemoryResult<Vec<PathBuf>> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };
        let mut paths = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if name.starts_with(PREFIX) && name.ends_with(EXTENSION) {
                paths.push(entry.path());
            }
        }
        paths.sort();
        Ok(paths)
    }

    /// Up to `limit` records, newest first. Unreadable records are skipped.
    ///
    /// # Errors
    /// Returns an error if the directory cannot be listed.
    pub async fn history(&self, limit: usize) -> MemoryResult<Vec<ConsolidationResult>> {
        let mut history = Vec::new();
        for path in self.record_paths().await?.into_iter().rev() {
            if history.len() >= limit {
                break;
            }
            let parsed = match tokio::fs::read(&path).await {
                Ok(bytes) => serde_json::from_slice::<ConsolidationResult>(&bytes)
                    .map_err(|err| err.to_string()),
                Err(err) => Err(err.to_string()),
            };
            match parsed {
                Ok(result) => history.push(result),
                Err(error) => warn!(path = %path.display(), %error, "Skipping unreadable consolidation record"),
            }
        }
        Ok(history)
    }

    /// Number of records on disk.
    ///
    /// # Errors
    /// Returns an error if the directory cannot be listed.
    pub async fn count(&self) -> MemoryResult<usize> {
        Ok(self.record_paths().await?.len())
    }
}
