// crates/host/src/agents/prompt_utils.rs

//! Shared utilities for building agent prompts.

use libgen_core::snapshot::Snapshot;
use libgen_core::trajectory::Trajectory;

use crate::failures::{reason_for, FaultRecord};

/// What the oracle is told about the current toolset.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LibraryView {
    /// Registered tool names, for uniqueness checks.
    pub names: Vec<String>,
    /// One descriptor line per tool.
    pub listing: Vec<String>,
}

impl LibraryView {
    /// Derive the view from the live snapshot rather than any cached text.
    pub fn from_snapshot(snapshot: &Snapshot) -> Self {
        Self {
            names: snapshot.tool_names(),
            listing: snapshot.library_listing(),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.iter().any(|n| n == name)
    }

    pub fn render(&self) -> String {
        if self.listing.is_empty() {
            return "(no tools defined)".to_string();
        }
        self.listing.join("\n")
    }
}

/// One `Conversation: ...` line per task, steps only.
pub fn render_conversations(tasks: &[Trajectory]) -> String {
    tasks
        .iter()
        .map(|t| {
            let steps = serde_json::to_string(t.steps()).unwrap_or_default();
            format!("Conversation: {}", steps)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Like [`render_conversations`], each conversation followed by the reason the
/// fault analysis gave for it.
pub fn render_failed_conversations(tasks: &[Trajectory], faults: &[FaultRecord]) -> String {
    tasks
        .iter()
        .enumerate()
        .map(|(position, t)| {
            let steps = serde_json::to_string(t.steps()).unwrap_or_default();
            let reason = reason_for(faults, t, position)
                .map(FaultRecord::reason)
                .unwrap_or_else(|| "unknown".to_string());
            format!("Conversation: {}\nReason for failure: {}", steps, reason)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Full trajectories, as JSON, for prompts that need rewards and ids too.
pub fn render_tasks(tasks: &[Trajectory]) -> String {
    let minimal: Vec<Trajectory> = tasks.iter().map(Trajectory::minimal).collect();
    serde_json::to_string(&minimal).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use libgen_core::trajectory::{Step, StepRole};

    #[test]
    fn empty_library_renders_placeholder() {
        assert_eq!(LibraryView::default().render(), "(no tools defined)");
    }

    #[test]
    fn conversations_one_line_per_task() {
        let tasks = vec![
            Trajectory::new(Some(1), 1.0, vec![Step::message(StepRole::User, "hi")]),
            Trajectory::new(Some(2), 0.0, vec![Step::tool("find_user", "{}")]),
        ];
        let rendered = render_conversations(&tasks);
        assert_eq!(rendered.lines().count(), 2);
        assert!(rendered.lines().all(|l| l.starts_with("Conversation: ")));
        assert!(rendered.contains("find_user"));
    }

    #[test]
    fn failed_conversations_carry_their_reason() {
        let tasks = vec![
            Trajectory::new(Some(4), 0.0, vec![Step::tool("find_user", "{}")]),
            Trajectory::new(Some(8), 0.0, Vec::new()),
        ];
        let mut details = serde_json::Map::new();
        details.insert("description".into(), "skipped the lookup".into());
        let faults = vec![FaultRecord {
            task_id: 4,
            details,
        }];
        let rendered = render_failed_conversations(&tasks, &faults);
        assert!(rendered.contains("find_user"));
        assert!(rendered.contains("Reason for failure: skipped the lookup"));
        assert!(rendered.ends_with("Reason for failure: unknown"));
    }
}
