// crates/core/src/types.rs

use serde::{Deserialize, Serialize};

use crate::descriptor::ToolDescriptor;

/// Name of a tool as registered in a toolset (unique within a snapshot).
pub type ToolName = String;

/// Speaker of one entry in an oracle conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One message in a running oracle transcript.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub role: Role,
    pub content: String,
}

impl HistoryEntry {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Where a candidate is in its lifecycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CandidateStatus {
    /// Proposed and still being refined.
    #[default]
    Proposed,
    /// Ran cleanly on the refinement batch.
    Accepted,
    /// Refinement budget exhausted while still failing.
    Discarded,
}

/// A proposed tool: its full source text plus the transcript that produced it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateFunction {
    pub name: ToolName,
    pub source_text: String,
    pub descriptor: ToolDescriptor,
    /// Running transcript replayed to the oracle when asking for a fix.
    pub origin_history: Vec<HistoryEntry>,
    #[serde(default)]
    pub status: CandidateStatus,
}

impl CandidateFunction {
    pub fn new(name: impl Into<String>, source_text: String, descriptor: ToolDescriptor) -> Self {
        let origin_history = vec![HistoryEntry::user(format!(
            "Original function: \n{}",
            source_text
        ))];
        Self {
            name: name.into(),
            source_text,
            descriptor,
            origin_history,
            status: CandidateStatus::Proposed,
        }
    }

    /// Record a failed round and replace the body with the oracle's correction.
    pub fn apply_correction(
        &mut self,
        failing_trajectory: &str,
        corrected_source: String,
        explanation: &str,
    ) {
        self.origin_history.push(HistoryEntry::user(format!(
            "Failed Trajectory: \n{}",
            failing_trajectory
        )));
        self.origin_history.push(HistoryEntry::assistant(format!(
            "Corrected function: \n{}, Explanation: \n{}",
            corrected_source, explanation
        )));
        self.source_text = corrected_source;
    }

    /// Number of failing-trajectory/correction pairs appended so far.
    pub fn corrections(&self) -> usize {
        self.origin_history.len().saturating_sub(1) / 2
    }
}
