//! History persistence
//!
//! The on-disk format is plain serde JSON of [`ExecutionHistory`]; it is an
//! implementation detail, not a stable interchange format.

use anyhow::{Context, Result};
use chrono::Utc;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::history::ExecutionHistory;

/// Unique run id: UTC timestamp plus a random suffix
pub fn generate_run_id() -> String {
    let timestamp = Utc::now().format("%Y%m%d_%H%M%S");
    let random: u32 = rand::random::<u32>() % 10000;
    format!("{timestamp}_{random:04}")
}

pub struct HistoryStorage {
    path: PathBuf,
}

impl HistoryStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `<data dir>/testgate/history.json`
    pub fn default_path() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("testgate")
            .join("history.json")
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load history; a missing file yields an empty history
    pub fn load(&self) -> Result<ExecutionHistory> {
        if !self.path.exists() {
            debug!("No history at {}, starting fresh", self.path.display());
            return Ok(ExecutionHistory::default());
        }

        let file = File::open(&self.path)
            .with_context(|| format!("Failed to open history file: {}", self.path.display()))?;
        let history: ExecutionHistory = serde_json::from_reader(BufReader::new(file))
            .with_context(|| format!("Failed to parse history file: {}", self.path.display()))?;

        debug!(
            "Loaded history for {} tests and {} runs",
            history.test_count(),
            history.runs().len()
        );
        Ok(history)
    }

    pub fn save(&self, history: &ExecutionHistory) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create history directory: {}", parent.display())
                })?;
            }
        }

        let file = File::create(&self.path)
            .with_context(|| format!("Failed to create history file: {}", self.path.display()))?;
        serde_json::to_writer_pretty(BufWriter::new(file), history)
            .context("Failed to write history")?;

        info!("Saved history to {}", self.path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Test, TestResult};
    use tempfile::tempdir;

    #[test]
    fn test_run_id_format() {
        let id = generate_run_id();
        assert_eq!(id.len(), "20260101_120000_0000".len());
        assert_eq!(&id[8..9], "_");
    }

    #[test]
    fn test_missing_file_is_empty_history() {
        let dir = tempdir().unwrap();
        let storage = HistoryStorage::new(dir.path().join("none.json"));
        assert!(storage.load().unwrap().is_empty());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempdir().unwrap();
        let storage = HistoryStorage::new(dir.path().join("nested").join("history.json"));

        let mut history = ExecutionHistory::new(5);
        history.record_results(&[TestResult::passed(&Test::new("a", "A"), 12)]);
        storage.save(&history).unwrap();

        let loaded = storage.load().unwrap();
        assert_eq!(loaded, history);
        assert_eq!(loaded.get("a").unwrap().len(), 1);
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("history.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(HistoryStorage::new(path).load().is_err());
    }
}
