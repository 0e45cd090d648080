// crates/core/src/trajectory.rs

//! Trajectories as written by the execution harness.
//!
//! A results file is a JSON array with one record per executed task. Only the
//! fields the pipeline reads are typed; everything else rides along in
//! `extra` so a trajectory can be echoed back to the oracle unchanged.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::TrajectoryError;

/// Who produced a step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepRole {
    System,
    User,
    Assistant,
    Tool,
    #[serde(other)]
    Other,
}

/// One step of a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub role: StepRole,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Step {
    pub fn tool(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: StepRole::Tool,
            name: Some(name.into()),
            content: Some(content.into()),
            extra: Map::new(),
        }
    }

    pub fn message(role: StepRole, content: impl Into<String>) -> Self {
        Self {
            role,
            name: None,
            content: Some(content.into()),
            extra: Map::new(),
        }
    }

    /// Text payload of the step (empty when absent).
    pub fn payload(&self) -> &str {
        self.content.as_deref().unwrap_or_default()
    }
}

/// The recorded execution of one task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trajectory {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<i64>,
    #[serde(default)]
    pub reward: f64,
    #[serde(default)]
    pub info: Value,
    #[serde(default)]
    pub traj: Vec<Step>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Trajectory {
    pub fn new(task_id: Option<i64>, reward: f64, steps: Vec<Step>) -> Self {
        Self {
            task_id,
            reward,
            info: Value::Null,
            traj: steps,
            extra: Map::new(),
        }
    }

    pub fn steps(&self) -> &[Step] {
        &self.traj
    }

    /// Minimal form kept as generation input: id, steps, reward and info only.
    pub fn minimal(&self) -> Self {
        Self {
            task_id: self.task_id,
            reward: self.reward,
            info: self.info.clone(),
            traj: self.traj.clone(),
            extra: Map::new(),
        }
    }

    /// Compact JSON rendering for prompts.
    pub fn to_prompt_string(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| format!("{:?}", self))
    }
}

/// Read every trajectory in a results file.
pub fn load_results(path: &Path) -> Result<Vec<Trajectory>, TrajectoryError> {
    let data = fs::read_to_string(path).map_err(|source| TrajectoryError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&data).map_err(|source| TrajectoryError::Malformed {
        path: path.to_path_buf(),
        source,
    })
}

/// Read the first trajectory of a single-task results file.
pub fn load_first(path: &Path) -> Result<Trajectory, TrajectoryError> {
    load_results(path)?
        .into_iter()
        .next()
        .ok_or_else(|| TrajectoryError::Empty {
            path: path.to_path_buf(),
        })
}
