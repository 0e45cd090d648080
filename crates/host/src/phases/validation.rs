// crates/host/src/phases/validation.rs

//! Validation phase: run held-out tasks against a snapshot holding every
//! accepted tool, with plain tool calling and no hints.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{info, warn};

use libgen_core::harness::{run_single, Harness, Strategy, TaskSplit};
use libgen_core::metrics::{aggregate, MetricsEvaluator, MetricsReport, ToolTotals};
use libgen_core::trajectory::Trajectory;

use super::AcceptedTool;

pub const METRICS_FILE: &str = "metric_results.json";
pub const SELECTED_FILE: &str = "selected_funcs.json";

#[derive(Debug, Clone)]
pub struct ValidationOutcome {
    pub reports: Vec<MetricsReport>,
    pub totals: BTreeMap<String, ToolTotals>,
    /// Accepted tools that were called and never errored, in acceptance order.
    pub survivors: Vec<String>,
}

#[derive(Serialize)]
struct TaskRecord<'a> {
    task_id: i64,
    metrics: &'a MetricsReport,
    trajectory: &'a Trajectory,
}

#[derive(Serialize)]
struct MetricsFile<'a> {
    tasks: Vec<TaskRecord<'a>>,
    totals: &'a BTreeMap<String, ToolTotals>,
}

/// A tool survives only if some task called it and no call errored.
pub fn survives(totals: &ToolTotals) -> bool {
    totals.called && !totals.errored
}

pub fn run_validation<H: Harness + ?Sized>(
    harness: &H,
    evaluator: &MetricsEvaluator,
    task_ids: &[i64],
    snapshot_path: &Path,
    accepted: &[AcceptedTool],
    output_dir: &Path,
) -> Result<ValidationOutcome> {
    fs::create_dir_all(output_dir)
        .with_context(|| format!("failed to create {}", output_dir.display()))?;
    if task_ids.is_empty() {
        warn!("no validation tasks configured, nothing can survive");
    }

    let names: Vec<&str> = accepted.iter().map(|t| t.name.as_str()).collect();
    let mut trajectories = Vec::with_capacity(task_ids.len());
    let mut reports = Vec::with_capacity(task_ids.len());

    for &task_id in task_ids {
        let output = output_dir.join(format!("validation_results_{}.json", task_id));
        let trajectory = run_single(
            harness,
            task_id,
            TaskSplit::Train,
            snapshot_path,
            Strategy::Plain,
            &output,
            None,
        )
        .with_context(|| format!("validation task {}", task_id))?;
        let report = evaluator.evaluate(&trajectory, &names);
        info!(
            task_id,
            solved = report.task_solved,
            errored = report.error_in_trajectory,
            "validation task done"
        );
        trajectories.push(trajectory);
        reports.push(report);
    }

    let totals = aggregate(&reports, &names);
    let survivors: Vec<String> = accepted
        .iter()
        .filter(|t| totals.get(&t.name).is_some_and(survives))
        .map(|t| t.name.clone())
        .collect();

    for (name, total) in &totals {
        if !survives(total) {
            info!(tool = %name, called = total.called, errored = total.errored, "tool dropped");
        }
    }

    let metrics_file = MetricsFile {
        tasks: task_ids
            .iter()
            .zip(reports.iter().zip(trajectories.iter()))
            .map(|(&task_id, (metrics, trajectory))| TaskRecord {
                task_id,
                metrics,
                trajectory,
            })
            .collect(),
        totals: &totals,
    };
    write_json(&output_dir.join(METRICS_FILE), &metrics_file)?;
    write_json(&output_dir.join(SELECTED_FILE), &survivors)?;

    Ok(ValidationOutcome {
        reports,
        totals,
        survivors,
    })
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let text = serde_json::to_string_pretty(value)?;
    fs::write(path, text).with_context(|| format!("failed to write {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{candidate_source, StubHarness, BASE_SNAPSHOT};
    use libgen_core::trajectory::{Step, StepRole};
    use tempfile::tempdir;

    fn accepted() -> Vec<AcceptedTool> {
        ["order_total", "order_status", "refund"]
            .into_iter()
            .map(|n| AcceptedTool {
                name: n.to_string(),
                source: candidate_source(n),
            })
            .collect()
    }

    #[test]
    fn survivors_were_called_and_never_errored() {
        let dir = tempdir().unwrap();
        let snap = dir.path().join("snap.py");
        fs::write(&snap, BASE_SNAPSHOT).unwrap();

        // order_total is clean, order_status errors once, refund is never called.
        let harness = StubHarness::new(|req, _| {
            let id = req.task_ids[0];
            let status = if id == 11 { "Error: unknown order" } else { "pending" };
            Trajectory::new(
                Some(id),
                1.0,
                vec![
                    Step::message(StepRole::User, "where is my order"),
                    Step::tool("order_total", "{\"total\": 3}"),
                    Step::tool("order_status", status),
                ],
            )
        });

        let outcome = run_validation(
            &harness,
            &MetricsEvaluator::default(),
            &[10, 11],
            &snap,
            &accepted(),
            dir.path(),
        )
        .unwrap();

        assert_eq!(outcome.survivors, vec!["order_total"]);
        assert_eq!(outcome.totals["order_total"].num_calls, 2);
        assert!(outcome.totals["order_status"].errored);
        assert!(!outcome.totals["refund"].called);

        for call in harness.invocations() {
            assert_eq!(call.strategy, Strategy::Plain);
            assert!(call.hint_tool.is_none());
        }

        let selected: Vec<String> =
            serde_json::from_str(&fs::read_to_string(dir.path().join(SELECTED_FILE)).unwrap()).unwrap();
        assert_eq!(selected, vec!["order_total"]);
        let metrics: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(dir.path().join(METRICS_FILE)).unwrap()).unwrap();
        assert_eq!(metrics["tasks"].as_array().unwrap().len(), 2);
        assert_eq!(metrics["tasks"][1]["task_id"], 11);
    }

    #[test]
    fn empty_trajectories_vouch_for_nothing() {
        let dir = tempdir().unwrap();
        let snap = dir.path().join("snap.py");
        fs::write(&snap, BASE_SNAPSHOT).unwrap();

        let harness = StubHarness::new(|req, _| Trajectory::new(Some(req.task_ids[0]), 0.0, Vec::new()));

        let outcome = run_validation(
            &harness,
            &MetricsEvaluator::default(),
            &[0, 1],
            &snap,
            &accepted(),
            dir.path(),
        )
        .unwrap();
        assert!(outcome.survivors.is_empty());
        assert!(outcome.reports.iter().all(|r| r.error_in_trajectory));
    }

    #[test]
    fn no_tasks_means_no_survivors() {
        let dir = tempdir().unwrap();
        let harness = StubHarness::new(|req, _| Trajectory::new(Some(req.task_ids[0]), 1.0, Vec::new()));
        let outcome = run_validation(
            &harness,
            &MetricsEvaluator::default(),
            &[],
            &dir.path().join("unused.py"),
            &accepted(),
            dir.path(),
        )
        .unwrap();
        assert!(outcome.survivors.is_empty());
        assert!(dir.path().join(METRICS_FILE).exists());
    }
}
