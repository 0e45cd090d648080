// crates/host/src/failures.rs

//! Fault-analysis input: which recorded tasks went wrong and why.
//!
//! The file is the output of a post-hoc fault assignment over a results file:
//!
//! ```text
//! {"fault_assignment_analysis": [
//!     {"task_id": 12, "author": "agent", "description": "refunded the wrong item"},
//!     ...
//! ]}
//! ```
//!
//! When configured, train chunks follow this list and the suggest step is
//! shown each conversation together with its failure reason.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use libgen_core::trajectory::Trajectory;

/// Fields tried, in order, for a human-readable failure reason.
const REASON_FIELDS: &[&str] = &["description", "reason", "fault_reason"];

/// One task the fault analysis blamed on something.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaultRecord {
    pub task_id: i64,
    #[serde(flatten)]
    pub details: Map<String, Value>,
}

impl FaultRecord {
    /// The failure reason shown to the oracle. Falls back to every recorded
    /// detail when no reason field is present.
    pub fn reason(&self) -> String {
        REASON_FIELDS
            .iter()
            .find_map(|key| self.details.get(*key).and_then(Value::as_str))
            .map(str::to_string)
            .unwrap_or_else(|| Value::Object(self.details.clone()).to_string())
    }
}

#[derive(Deserialize)]
struct FaultAnalysis {
    fault_assignment_analysis: Vec<FaultRecord>,
}

pub fn load_faults(path: &Path) -> Result<Vec<FaultRecord>> {
    let data = fs::read_to_string(path)
        .with_context(|| format!("failed to read fault analysis {}", path.display()))?;
    let analysis: FaultAnalysis = serde_json::from_str(&data)
        .with_context(|| format!("failed to parse fault analysis {}", path.display()))?;
    Ok(analysis.fault_assignment_analysis)
}

pub fn save_faults(path: &Path, faults: &[FaultRecord]) -> Result<()> {
    let analysis = json!({ "fault_assignment_analysis": faults });
    fs::write(path, serde_json::to_string_pretty(&analysis)?)
        .with_context(|| format!("failed to write {}", path.display()))
}

/// Reason for `task`, matched by task id, or by position when the task
/// carries no id.
pub fn reason_for<'f>(
    faults: &'f [FaultRecord],
    task: &Trajectory,
    position: usize,
) -> Option<&'f FaultRecord> {
    match task.task_id {
        Some(id) => faults.iter().find(|f| f.task_id == id),
        None => faults.get(position),
    }
}
