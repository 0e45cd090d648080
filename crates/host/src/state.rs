// crates/host/src/state.rs

//! Progress record written after every top-level iteration, so an
//! interrupted run can pick up where it stopped.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A promotion that produced a new base snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Promotion {
    pub iteration: usize,
    pub snapshot: PathBuf,
    pub snapshot_id: String,
    pub tools: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunState {
    /// Last iteration that finished, successfully or not.
    pub completed_iterations: usize,
    /// Base snapshot for the next iteration.
    pub base_snapshot: PathBuf,
    /// Index into the train ids where the next chunk starts.
    pub train_cursor: usize,
    #[serde(default)]
    pub promotions: Vec<Promotion>,
    #[serde(default)]
    pub last_tested_iteration: Option<usize>,
    pub updated_at: DateTime<Utc>,
}

impl RunState {
    pub fn fresh(base_snapshot: PathBuf) -> Self {
        Self {
            completed_iterations: 0,
            base_snapshot,
            train_cursor: 0,
            promotions: Vec::new(),
            last_tested_iteration: None,
            updated_at: Utc::now(),
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let data = fs::read_to_string(path)
            .with_context(|| format!("failed to read run state {}", path.display()))?;
        serde_json::from_str(&data)
            .with_context(|| format!("failed to parse run state {}", path.display()))
    }

    /// Write through a temp file so a crash never leaves half a state file.
    pub fn save(&mut self, path: &Path) -> Result<()> {
        self.updated_at = Utc::now();
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_string_pretty(self)?)
            .with_context(|| format!("failed to write {}", tmp.display()))?;
        fs::rename(&tmp, path)
            .with_context(|| format!("failed to move run state into {}", path.display()))?;
        Ok(())
    }

    /// Every tool promoted so far, oldest first.
    pub fn promoted_tools(&self) -> Vec<String> {
        self.promotions
            .iter()
            .flat_map(|p| p.tools.iter().cloned())
            .collect()
    }
}
