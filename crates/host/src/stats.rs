// crates/host/src/stats.rs

//! Per-tool call statistics over a results file.
//!
//! A call whose payload contains `Error: Error` is an unexpected failure; any
//! other `Error:` payload is an error the tool reported on purpose (bad input,
//! missing record). Everything else counts as a success.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use serde::Serialize;

use libgen_core::trajectory::{StepRole, Trajectory};

const FAILURE_MARKER: &str = "Error: Error";
const EXPECTED_ERROR_MARKER: &str = "Error:";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ToolUsage {
    pub calls: usize,
    pub success: usize,
    pub failures: usize,
    pub expected_errors: usize,
}

impl ToolUsage {
    pub fn success_rate(&self) -> f64 {
        if self.calls == 0 {
            0.0
        } else {
            self.success as f64 / self.calls as f64 * 100.0
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ResultsStats {
    pub tasks: usize,
    pub solved: usize,
    pub tools: BTreeMap<String, ToolUsage>,
}

impl ResultsStats {
    pub fn total(&self) -> ToolUsage {
        self.tools.values().fold(ToolUsage::default(), |acc, t| ToolUsage {
            calls: acc.calls + t.calls,
            success: acc.success + t.success,
            failures: acc.failures + t.failures,
            expected_errors: acc.expected_errors + t.expected_errors,
        })
    }

    /// Plain-text table, one row per tool, busiest first.
    pub fn render(&self) -> String {
        let mut rows: Vec<(&String, &ToolUsage)> = self.tools.iter().collect();
        rows.sort_by(|a, b| b.1.calls.cmp(&a.1.calls).then(a.0.cmp(b.0)));

        let width = rows.iter().map(|(n, _)| n.len()).max().unwrap_or(5).max(5);
        let mut out = String::new();
        let _ = writeln!(
            out,
            "tasks: {}  solved: {} ({:.1}%)",
            self.tasks,
            self.solved,
            if self.tasks == 0 { 0.0 } else { self.solved as f64 / self.tasks as f64 * 100.0 }
        );
        let _ = writeln!(
            out,
            "{:<width$}  {:>6}  {:>7}  {:>8}  {:>8}  {:>7}",
            "tool", "calls", "success", "failures", "expected", "rate"
        );
        let total_name = "TOTAL".to_string();
        let total = self.total();
        rows.push((&total_name, &total));
        for (name, usage) in rows {
            let _ = writeln!(
                out,
                "{:<width$}  {:>6}  {:>7}  {:>8}  {:>8}  {:>6.1}%",
                name,
                usage.calls,
                usage.success,
                usage.failures,
                usage.expected_errors,
                usage.success_rate()
            );
        }
        out
    }
}

pub fn compute(trajectories: &[Trajectory]) -> ResultsStats {
    let mut stats = ResultsStats {
        tasks: trajectories.len(),
        solved: trajectories.iter().filter(|t| t.reward > 0.0).count(),
        tools: BTreeMap::new(),
    };

    for step in trajectories.iter().flat_map(|t| t.steps()) {
        if step.role != StepRole::Tool {
            continue;
        }
        let Some(name) = &step.name else { continue };
        let usage = stats.tools.entry(name.clone()).or_default();
        usage.calls += 1;

        let payload = step.payload();
        if payload.contains(FAILURE_MARKER) {
            usage.failures += 1;
        } else if payload.contains(EXPECTED_ERROR_MARKER) {
            usage.expected_errors += 1;
        } else {
            usage.success += 1;
        }
    }

    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use libgen_core::trajectory::Step;

    #[test]
    fn classifies_payloads() {
        let trajectories = vec![
            Trajectory::new(
                Some(1),
                1.0,
                vec![
                    Step::tool("get_order", "{\"id\": 1}"),
                    Step::tool("get_order", "Error: order not found"),
                    Step::tool("get_order", "Error: Error: KeyError 'id'"),
                    Step::message(StepRole::Assistant, "Error: this is not a tool"),
                ],
            ),
            Trajectory::new(Some(2), 0.0, vec![Step::tool("refund", "ok")]),
        ];

        let stats = compute(&trajectories);
        assert_eq!(stats.tasks, 2);
        assert_eq!(stats.solved, 1);
        assert_eq!(
            stats.tools["get_order"],
            ToolUsage {
                calls: 3,
                success: 1,
                failures: 1,
                expected_errors: 1
            }
        );
        assert_eq!(stats.total().calls, 4);

        let table = stats.render();
        let first_row = table.lines().nth(2).unwrap();
        assert!(first_row.starts_with("get_order"));
        assert!(table.lines().last().unwrap().starts_with("TOTAL"));
    }

    #[test]
    fn empty_results() {
        let stats = compute(&[]);
        assert_eq!(stats.total().success_rate(), 0.0);
        assert!(stats.render().contains("tasks: 0"));
    }
}
