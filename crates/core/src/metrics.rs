// crates/core/src/metrics.rs

//! Per-tool call and error statistics for one trajectory.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::trajectory::{StepRole, Trajectory};

/// Substrings that mark a tool result as an error unless configured otherwise.
pub const DEFAULT_ERROR_MARKERS: &[&str] = &["error", "Error"];

/// Call/error facts for one tracked tool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolMetrics {
    pub called: bool,
    pub call_count: usize,
    pub error_in_tool: bool,
}

/// What a trajectory says about a set of tracked tools.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsReport {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<i64>,
    pub num_steps: usize,
    pub task_solved: bool,
    pub error_in_trajectory: bool,
    pub tools: BTreeMap<String, ToolMetrics>,
}

impl MetricsReport {
    pub fn tool(&self, name: &str) -> ToolMetrics {
        self.tools.get(name).copied().unwrap_or_default()
    }

    pub fn error_in_tool(&self, name: &str) -> bool {
        self.tool(name).error_in_tool
    }
}

/// Inspects trajectories for tool-call errors.
#[derive(Debug, Clone)]
pub struct MetricsEvaluator {
    error_markers: Vec<String>,
}

impl Default for MetricsEvaluator {
    fn default() -> Self {
        Self::new(DEFAULT_ERROR_MARKERS.iter().map(|m| m.to_string()).collect())
    }
}

impl MetricsEvaluator {
    pub fn new(error_markers: Vec<String>) -> Self {
        Self { error_markers }
    }

    fn is_error(&self, payload: &str) -> bool {
        self.error_markers
            .iter()
            .any(|m| !m.is_empty() && payload.contains(m.as_str()))
    }

    /// Evaluate `trajectory` for the given tool names.
    ///
    /// An empty trajectory proves nothing, so every tracked tool is reported
    /// as having errored.
    pub fn evaluate<S: AsRef<str>>(&self, trajectory: &Trajectory, tracked: &[S]) -> MetricsReport {
        let num_steps = trajectory.steps().len();
        let empty = num_steps == 0;

        let mut tools: BTreeMap<String, ToolMetrics> = tracked
            .iter()
            .map(|name| {
                (
                    name.as_ref().to_string(),
                    ToolMetrics {
                        error_in_tool: empty,
                        ..ToolMetrics::default()
                    },
                )
            })
            .collect();
        let mut error_in_trajectory = empty;

        for step in trajectory.steps() {
            if step.role != StepRole::Tool {
                continue;
            }
            let Some(entry) = step.name.as_deref().and_then(|n| tools.get_mut(n)) else {
                continue;
            };
            entry.called = true;
            entry.call_count += 1;
            if self.is_error(step.payload()) {
                entry.error_in_tool = true;
                error_in_trajectory = true;
            }
        }

        MetricsReport {
            task_id: trajectory.task_id,
            num_steps,
            task_solved: trajectory.reward > 0.0,
            error_in_trajectory,
            tools,
        }
    }
}

/// Call/error totals for one tool across many reports.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolTotals {
    pub called: bool,
    pub num_calls: usize,
    pub errored: bool,
}

/// Fold per-task reports into per-tool totals. Errors only count for tasks
/// in which the tool was actually called.
pub fn aggregate<S: AsRef<str>>(reports: &[MetricsReport], tools: &[S]) -> BTreeMap<String, ToolTotals> {
    let mut totals: BTreeMap<String, ToolTotals> = tools
        .iter()
        .map(|t| (t.as_ref().to_string(), ToolTotals::default()))
        .collect();

    for report in reports {
        for (name, total) in totals.iter_mut() {
            let m = report.tool(name);
            if m.called {
                total.called = true;
                total.num_calls += m.call_count;
                if m.error_in_tool {
                    total.errored = true;
                }
            }
        }
    }

    totals
}
