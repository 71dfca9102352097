//! Backtest run persistence.
//!
//! Layout: `<root>/index.json` (newest-first index) plus one
//! `<root>/results/<run_id>.json` record per run carrying the full config,
//! result object, and created-at timestamp. The store is capped; saving past
//! the cap evicts the oldest runs and deletes their record files.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Mutex;

pub const DEFAULT_MAX_RUNS: usize = 100;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexEntry {
    pub run_id: String,
    pub created_at: DateTime<Utc>,
    pub total_return: f64,
    pub start_date: String,
    pub end_date: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: String,
    pub created_at: DateTime<Utc>,
    pub config: serde_json::Value,
    pub result: serde_json::Value,
}

pub struct BacktestStore {
    root: PathBuf,
    max_runs: usize,
    // Serializes read-modify-write cycles on index.json.
    index_lock: Mutex<()>,
}

impl BacktestStore {
    pub fn new(root: PathBuf, max_runs: usize) -> Result<Self> {
        let results_dir = root.join("results");
        std::fs::create_dir_all(&results_dir)
            .with_context(|| format!("Failed to create store dir: {}", results_dir.display()))?;
        let store = Self {
            root,
            max_runs: max_runs.max(1),
            index_lock: Mutex::new(()),
        };
        if !store.index_path().exists() {
            store.write_index(&[])?;
        }
        Ok(store)
    }

    /// Build from `BACKTEST_STORAGE_DIR` (default `./backtest_results`).
    pub fn from_env() -> Result<Self> {
        let root = std::env::var("BACKTEST_STORAGE_DIR")
            .map_or_else(|_| PathBuf::from("backtest_results"), PathBuf::from);
        Self::new(root, DEFAULT_MAX_RUNS)
    }

    fn index_path(&self) -> PathBuf {
        self.root.join("index.json")
    }

    fn record_path(&self, run_id: &str) -> PathBuf {
        self.root.join("results").join(format!("{run_id}.json"))
    }

    fn read_index(&self) -> Result<Vec<IndexEntry>> {
        let raw = std::fs::read_to_string(self.index_path())
            .with_context(|| format!("Failed to read index: {}", self.index_path().display()))?;
        serde_json::from_str(&raw).context("Failed to parse backtest index")
    }

    fn write_index(&self, index: &[IndexEntry]) -> Result<()> {
        let raw = serde_json::to_string_pretty(index)?;
        std::fs::write(self.index_path(), raw)
            .with_context(|| format!("Failed to write index: {}", self.index_path().display()))
    }

    /// Persist a run and return its index entry. Evicts the oldest runs
    /// (and their record files) once the cap is exceeded.
    pub fn save(
        &self,
        config: serde_json::Value,
        result: serde_json::Value,
        total_return: f64,
        start_date: &str,
        end_date: &str,
    ) -> Result<IndexEntry> {
        let _guard = self.index_lock.lock().unwrap_or_else(std::sync::PoisonError::into_inner);

        let record = RunRecord {
            run_id: uuid::Uuid::new_v4().to_string(),
            created_at: Utc::now(),
            config,
            result,
        };
        let raw = serde_json::to_string(&record)?;
        let path = self.record_path(&record.run_id);
        std::fs::write(&path, raw)
            .with_context(|| format!("Failed to write record: {}", path.display()))?;

        let entry = IndexEntry {
            run_id: record.run_id.clone(),
            created_at: record.created_at,
            total_return,
            start_date: start_date.to_string(),
            end_date: end_date.to_string(),
        };

        let mut index = self.read_index().unwrap_or_default();
        index.insert(0, entry.clone());
        if index.len() > self.max_runs {
            for evicted in index.split_off(self.max_runs) {
                let stale = self.record_path(&evicted.run_id);
                if let Err(e) = std::fs::remove_file(&stale) {
                    tracing::warn!(run_id = %evicted.run_id, error = %e, "Failed to delete evicted record");
                }
            }
        }
        self.write_index(&index)?;

        tracing::info!(run_id = %record.run_id, total_return, "Saved backtest result");
        Ok(entry)
    }

    /// Newest-first index entries, at most `limit`.
    pub fn index(&self, limit: usize) -> Result<Vec<IndexEntry>> {
        let _guard = self.index_lock.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let mut index = self.read_index()?;
        index.truncate(limit);
        Ok(index)
    }

    /// Full record for a run, if it exists.
    pub fn load(&self, run_id: &str) -> Result<Option<RunRecord>> {
        let path = self.record_path(run_id);
        if !path.exists() {
            return Ok(None);
        }
        let raw = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read record: {}", path.display()))?;
        Ok(Some(serde_json::from_str(&raw)?))
    }

    /// Remove a run from the index and delete its record file.
    pub fn delete(&self, run_id: &str) -> Result<bool> {
        let _guard = self.index_lock.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let mut index = self.read_index()?;
        let before = index.len();
        index.retain(|e| e.run_id != run_id);
        if index.len() == before {
            return Ok(false);
        }
        self.write_index(&index)?;
        let path = self.record_path(run_id);
        if path.exists() {
            std::fs::remove_file(&path)
                .with_context(|| format!("Failed to delete record: {}", path.display()))?;
        }
        Ok(true)
    }
}
