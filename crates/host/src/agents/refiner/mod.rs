// crates/host/src/agents/refiner/mod.rs

//! Refiner agent: runs a candidate against a batch of tasks and asks the
//! oracle for targeted fixes until it runs cleanly or the budget is spent.
//!
//! Each round composes a fresh trial snapshot from the base plus the current
//! body, then runs the tasks one at a time in reference-assisted mode. The
//! first task whose trajectory shows the candidate erroring ends the round;
//! the next round starts again from the first task.

pub mod prompts;

use std::path::Path;

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use libgen_core::descriptor::{function_name, parse_tool_body};
use libgen_core::harness::{run_single, Harness, Strategy, TaskSplit};
use libgen_core::metrics::MetricsEvaluator;
use libgen_core::oracle::{complete_json, string_field, CompletionRequest, Oracle};
use libgen_core::snapshot::{Addend, Snapshot};
use libgen_core::trajectory::Trajectory;
use libgen_core::types::{CandidateFunction, CandidateStatus};

use super::prompt_utils::LibraryView;
use prompts::{fix_prompt, fix_request};

/// Result of refining one candidate.
#[derive(Debug, Clone)]
pub struct RefineOutcome {
    pub accepted: bool,
    pub candidate: CandidateFunction,
    /// Rounds actually run.
    pub rounds: usize,
    /// The task that failed in each failing round.
    pub failing_tasks: Vec<i64>,
}

#[derive(Debug, Clone, Copy)]
pub struct RefineLimits {
    pub max_refinement_tries: usize,
    pub reply_attempts: usize,
}

pub struct Refiner<'a, O: Oracle + ?Sized, H: Harness + ?Sized> {
    oracle: &'a O,
    harness: &'a H,
    evaluator: &'a MetricsEvaluator,
    limits: RefineLimits,
    split: TaskSplit,
}

impl<'a, O: Oracle + ?Sized, H: Harness + ?Sized> Refiner<'a, O, H> {
    pub fn new(
        oracle: &'a O,
        harness: &'a H,
        evaluator: &'a MetricsEvaluator,
        limits: RefineLimits,
    ) -> Self {
        Self {
            oracle,
            harness,
            evaluator,
            limits,
            split: TaskSplit::Train,
        }
    }

    /// Refine `candidate` on `task_ids` against `base`.
    ///
    /// Trial snapshots go to `trial_path`, per-task trajectories under
    /// `output_dir`. Harness and file errors propagate; oracle failures
    /// discard the candidate.
    pub fn refine(
        &self,
        mut candidate: CandidateFunction,
        task_ids: &[i64],
        base: &Snapshot,
        trial_path: &Path,
        output_dir: &Path,
        library: &LibraryView,
    ) -> Result<RefineOutcome> {
        let max_rounds = self.limits.max_refinement_tries.max(1);
        let mut failing_tasks = Vec::new();

        for round in 1..=max_rounds {
            let trial = base.compose(&Addend::Function(candidate.source_text.clone()));
            trial
                .persist(trial_path)
                .with_context(|| format!("round {} of `{}`", round, candidate.name))?;
            debug!(round, tool = %candidate.name, snapshot = trial.id(), "trial snapshot written");

            let failure = self.first_failure(&candidate.name, task_ids, trial_path, output_dir, round)?;

            let Some((task_id, trajectory)) = failure else {
                info!(round, tool = %candidate.name, "candidate ran cleanly");
                candidate.status = CandidateStatus::Accepted;
                return Ok(RefineOutcome {
                    accepted: true,
                    candidate,
                    rounds: round,
                    failing_tasks,
                });
            };

            warn!(round, max_rounds, task_id, tool = %candidate.name, "candidate errored");
            failing_tasks.push(task_id);

            if let Err(e) = self.correct(&mut candidate, &trajectory, library) {
                warn!(tool = %candidate.name, error = %e, "no correction available, discarding");
                candidate.status = CandidateStatus::Discarded;
                return Ok(RefineOutcome {
                    accepted: false,
                    candidate,
                    rounds: round,
                    failing_tasks,
                });
            }
        }

        candidate.status = CandidateStatus::Discarded;
        Ok(RefineOutcome {
            accepted: false,
            candidate,
            rounds: max_rounds,
            failing_tasks,
        })
    }

    /// Run tasks in order and stop at the first one where `tool` errors.
    fn first_failure(
        &self,
        tool: &str,
        task_ids: &[i64],
        trial_path: &Path,
        output_dir: &Path,
        round: usize,
    ) -> Result<Option<(i64, Trajectory)>> {
        for &task_id in task_ids {
            let output = output_dir.join(format!("{}_round_{}_task_{}.json", tool, round, task_id));
            let trajectory = run_single(
                self.harness,
                task_id,
                self.split,
                trial_path,
                Strategy::ReferenceAssisted,
                &output,
                Some(tool),
            )?;
            let report = self.evaluator.evaluate(&trajectory, &[tool]);
            if report.error_in_tool(tool) {
                return Ok(Some((task_id, trajectory)));
            }
        }
        Ok(None)
    }

    /// Ask for a fix and fold it into the candidate's history.
    fn correct(
        &self,
        candidate: &mut CandidateFunction,
        trajectory: &Trajectory,
        library: &LibraryView,
    ) -> Result<()> {
        let rendered = trajectory.to_prompt_string();
        let request = CompletionRequest::new(
            fix_prompt(),
            fix_request(&library.render(), &candidate.source_text, &rendered),
        )
        .with_history(&candidate.origin_history)
        .json();

        let reply = complete_json(self.oracle, &request, self.limits.reply_attempts)?;
        let fixed = string_field(&reply, "new_function")?;
        let explanation = string_field(&reply, "explanation").unwrap_or_default();

        let previous = candidate.source_text.clone();
        let usable = function_name(&fixed).as_deref() == Some(candidate.name.as_str())
            && parse_tool_body(&fixed).is_ok();
        candidate.apply_correction(&rendered, fixed, &explanation);
        if !usable {
            warn!(tool = %candidate.name, "correction renamed the tool or broke its body, keeping previous one");
            candidate.source_text = previous;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{candidate_source, tool_trajectory, ScriptedOracle, StubHarness, BASE_SNAPSHOT};
    use libgen_core::error::OracleError;
    use serde_json::json;
    use tempfile::tempdir;

    fn candidate() -> CandidateFunction {
        let src = candidate_source("order_total");
        let descriptor = parse_tool_body(&src).unwrap();
        CandidateFunction::new("order_total", src, descriptor)
    }

    fn fixed_source() -> String {
        candidate_source("order_total").replace("return str(order_id)", "return str(order_id).strip()")
    }

    fn fix_reply(src: &str) -> String {
        json!({"explanation": "strip whitespace", "new_function": src}).to_string()
    }

    fn limits() -> RefineLimits {
        RefineLimits {
            max_refinement_tries: 2,
            reply_attempts: 1,
        }
    }

    #[test]
    fn clean_candidate_is_accepted_in_one_round() {
        let dir = tempdir().unwrap();
        let oracle = ScriptedOracle::new(Vec::new());
        let harness = StubHarness::new(|req, _| {
            tool_trajectory(req.task_ids[0], "order_total", "{\"total\": 10}")
        });
        let evaluator = MetricsEvaluator::default();
        let refiner = Refiner::new(&oracle, &harness, &evaluator, limits());

        let outcome = refiner
            .refine(
                candidate(),
                &[0, 1],
                &Snapshot::from_text(BASE_SNAPSHOT),
                &dir.path().join("trial.py"),
                dir.path(),
                &LibraryView::default(),
            )
            .unwrap();

        assert!(outcome.accepted);
        assert_eq!(outcome.rounds, 1);
        assert_eq!(outcome.candidate.status, CandidateStatus::Accepted);
        assert_eq!(outcome.candidate.corrections(), 0);
        assert_eq!(oracle.calls(), 0);

        let calls = harness.invocations();
        assert_eq!(calls.len(), 2);
        for call in &calls {
            assert_eq!(call.strategy, Strategy::ReferenceAssisted);
            assert_eq!(call.hint_tool.as_deref(), Some("order_total"));
            assert!(call.snapshot_text.contains("@mcp.tool()\ndef order_total(order_id):"));
        }
    }

    #[test]
    fn stops_scanning_at_first_failing_task() {
        let dir = tempdir().unwrap();
        let oracle = ScriptedOracle::new(vec![
            fix_reply(&candidate_source("order_total")),
            fix_reply(&candidate_source("order_total")),
        ]);
        let harness = StubHarness::new(|req, _| {
            let id = req.task_ids[0];
            let payload = if id == 2 { "Error: order not found" } else { "{}" };
            tool_trajectory(id, "order_total", payload)
        });
        let evaluator = MetricsEvaluator::default();
        let refiner = Refiner::new(&oracle, &harness, &evaluator, limits());

        let outcome = refiner
            .refine(
                candidate(),
                &[1, 2, 3, 4, 5],
                &Snapshot::from_text(BASE_SNAPSHOT),
                &dir.path().join("trial.py"),
                dir.path(),
                &LibraryView::default(),
            )
            .unwrap();

        assert!(!outcome.accepted);
        assert_eq!(outcome.failing_tasks, vec![2, 2]);
        assert_eq!(harness.invoked_ids(), vec![1, 2, 1, 2]);
    }

    #[test]
    fn always_failing_candidate_collects_two_corrections() {
        let dir = tempdir().unwrap();
        let oracle = ScriptedOracle::new(vec![fix_reply(&fixed_source()), fix_reply(&fixed_source())]);
        let harness = StubHarness::new(|req, _| {
            tool_trajectory(req.task_ids[0], "order_total", "Error: invalid id")
        });
        let evaluator = MetricsEvaluator::default();
        let refiner = Refiner::new(&oracle, &harness, &evaluator, limits());

        let outcome = refiner
            .refine(
                candidate(),
                &[0, 1],
                &Snapshot::from_text(BASE_SNAPSHOT),
                &dir.path().join("trial.py"),
                dir.path(),
                &LibraryView::default(),
            )
            .unwrap();

        assert!(!outcome.accepted);
        assert_eq!(outcome.candidate.status, CandidateStatus::Discarded);
        assert_eq!(outcome.candidate.corrections(), 2);
        assert_eq!(outcome.candidate.origin_history.len(), 5);
        assert!(outcome.candidate.origin_history[1]
            .content
            .starts_with("Failed Trajectory:"));
        assert_eq!(oracle.calls(), 2);

        // The fix request replays the history ahead of the new message.
        let second = &oracle.requests()[1];
        assert_eq!(second.messages.len(), 4);
        assert!(second.last_user_message().starts_with("Old Library:"));

        // Round two runs the corrected body.
        let calls = harness.invocations();
        assert!(calls[1].snapshot_text.contains(".strip()"));
    }

    #[test]
    fn correction_can_rescue_a_candidate() {
        let dir = tempdir().unwrap();
        let oracle = ScriptedOracle::new(vec![fix_reply(&fixed_source())]);
        let harness = StubHarness::new(|req, text| {
            let payload = if text.contains(".strip()") { "{}" } else { "Error: bad id" };
            tool_trajectory(req.task_ids[0], "order_total", payload)
        });
        let evaluator = MetricsEvaluator::default();
        let refiner = Refiner::new(&oracle, &harness, &evaluator, limits());

        let outcome = refiner
            .refine(
                candidate(),
                &[0, 1],
                &Snapshot::from_text(BASE_SNAPSHOT),
                &dir.path().join("trial.py"),
                dir.path(),
                &LibraryView::default(),
            )
            .unwrap();

        assert!(outcome.accepted);
        assert_eq!(outcome.rounds, 2);
        assert_eq!(outcome.candidate.source_text, fixed_source());
        assert_eq!(harness.invoked_ids(), vec![0, 0, 1]);
    }

    #[test]
    fn renamed_correction_keeps_previous_body() {
        let dir = tempdir().unwrap();
        let oracle = ScriptedOracle::new(vec![
            fix_reply(&candidate_source("something_else")),
            fix_reply(&candidate_source("something_else")),
        ]);
        let harness = StubHarness::new(|req, _| {
            tool_trajectory(req.task_ids[0], "order_total", "Error: nope")
        });
        let evaluator = MetricsEvaluator::default();
        let refiner = Refiner::new(&oracle, &harness, &evaluator, limits());

        let outcome = refiner
            .refine(
                candidate(),
                &[0],
                &Snapshot::from_text(BASE_SNAPSHOT),
                &dir.path().join("trial.py"),
                dir.path(),
                &LibraryView::default(),
            )
            .unwrap();
        assert_eq!(outcome.candidate.source_text, candidate_source("order_total"));
        assert_eq!(outcome.candidate.corrections(), 2);
    }

    #[test]
    fn correction_with_leading_import_keeps_previous_body() {
        let dir = tempdir().unwrap();
        let leading = format!("import re\n\n{}", candidate_source("order_total"));
        let oracle = ScriptedOracle::new(vec![fix_reply(&leading), fix_reply(&leading)]);
        let harness = StubHarness::new(|req, snapshot| {
            assert!(!snapshot.contains("import re"));
            tool_trajectory(req.task_ids[0], "order_total", "Error: nope")
        });
        let evaluator = MetricsEvaluator::default();
        let refiner = Refiner::new(&oracle, &harness, &evaluator, limits());

        let outcome = refiner
            .refine(
                candidate(),
                &[0],
                &Snapshot::from_text(BASE_SNAPSHOT),
                &dir.path().join("trial.py"),
                dir.path(),
                &LibraryView::default(),
            )
            .unwrap();
        assert_eq!(outcome.candidate.source_text, candidate_source("order_total"));
        assert_eq!(outcome.candidate.corrections(), 2);
    }

    #[test]
    fn oracle_outage_discards_without_more_rounds() {
        let dir = tempdir().unwrap();
        let oracle = ScriptedOracle::from_results(vec![Err(OracleError::Status {
            status: 500,
            body: "down".into(),
        })]);
        let harness = StubHarness::new(|req, _| {
            tool_trajectory(req.task_ids[0], "order_total", "Error: nope")
        });
        let evaluator = MetricsEvaluator::default();
        let refiner = Refiner::new(&oracle, &harness, &evaluator, limits());

        let outcome = refiner
            .refine(
                candidate(),
                &[0, 1],
                &Snapshot::from_text(BASE_SNAPSHOT),
                &dir.path().join("trial.py"),
                dir.path(),
                &LibraryView::default(),
            )
            .unwrap();
        assert!(!outcome.accepted);
        assert_eq!(outcome.rounds, 1);
        assert_eq!(harness.invoked_ids(), vec![0]);
    }
}
