// crates/host/src/runner.rs

//! Top-level experiment driver.
//!
//! Each iteration takes the next chunk of train tasks, generates candidate
//! tools against the current base snapshot, validates them on held-out tasks
//! and promotes the survivors into the next base. A failing iteration is
//! logged and skipped; progress is saved after every iteration.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use regex::Regex;
use serde_json::{json, Value};
use tracing::{debug, error, info, warn};

use libgen_core::harness::{run_single, Harness, RunRequest, Strategy, TaskSplit};
use libgen_core::metrics::MetricsEvaluator;
use libgen_core::oracle::Oracle;
use libgen_core::snapshot::{Addend, Snapshot};
use libgen_core::trajectory::{load_results, Trajectory};

use crate::agents::{ProposalLimits, Proposer, RefineLimits, Refiner};
use crate::config::{ExperimentConfig, InputMode};
use crate::failures::{load_faults, save_faults, FaultRecord};
use crate::log::{self, Phase};
use crate::paths::{ExperimentPaths, SnapshotStage};
use crate::phases::{promote, run_generation, run_validation, AcceptedTool, GenerationPaths};
use crate::state::{Promotion, RunState};
use crate::stats;

pub struct Runner<'a, O: Oracle + ?Sized, H: Harness + ?Sized> {
    config: &'a ExperimentConfig,
    paths: &'a ExperimentPaths,
    oracle: &'a O,
    harness: &'a H,
    evaluator: MetricsEvaluator,
}

impl<'a, O: Oracle + ?Sized, H: Harness + ?Sized> Runner<'a, O, H> {
    pub fn new(
        config: &'a ExperimentConfig,
        paths: &'a ExperimentPaths,
        oracle: &'a O,
        harness: &'a H,
    ) -> Self {
        Self {
            config,
            paths,
            oracle,
            harness,
            evaluator: MetricsEvaluator::new(config.runner.error_markers.clone()),
        }
    }

    /// Run until the iteration ceiling or the train split runs out.
    pub fn run(&self, resume: bool) -> Result<RunState> {
        self.paths.create()?;
        let mut state = self.initial_state(resume)?;

        log::phase(Phase::Input, state.completed_iterations);
        let tasks = self.resolve_input_tasks(&state.base_snapshot, resume)?;
        info!(tasks = tasks.len(), "input tasks ready");
        let faults = self.resolve_failures(resume)?;

        let splits = &self.config.splits;
        let train_ids = match &faults {
            Some(faults) => faults.iter().map(|f| f.task_id).collect(),
            None => splits.train_ids.ids(),
        };
        let validation_ids = splits.validation_ids.ids();
        let runner = &self.config.runner;

        while state.completed_iterations < runner.max_iterations {
            let iteration = state.completed_iterations + 1;
            let start = state.train_cursor;
            if start >= train_ids.len() {
                info!(iteration, "train split exhausted");
                break;
            }
            let end = (start + runner.generation_phase_chunk_size).min(train_ids.len());
            let chunk_ids = &train_ids[start..end];
            let (chunk_tasks, chunk_faults) = match &faults {
                Some(faults) => {
                    let positions: Vec<usize> = chunk_ids.iter().filter_map(|&id| usize::try_from(id).ok()).collect();
                    (select_tasks(&tasks, chunk_ids, &positions), &faults[start..end])
                }
                None => {
                    let positions: Vec<usize> = (start..end).collect();
                    (select_tasks(&tasks, chunk_ids, &positions), &[][..])
                }
            };
            info!(iteration, tasks = ?chunk_ids, "iteration started");

            match self.run_iteration(iteration, &state.base_snapshot, &chunk_tasks, chunk_faults, chunk_ids, &validation_ids) {
                Ok(Some(promotion)) => {
                    info!(iteration, tools = ?promotion.tools, snapshot = %promotion.snapshot.display(), "base snapshot advanced");
                    state.base_snapshot = promotion.snapshot.clone();
                    state.promotions.push(promotion);
                }
                Ok(None) => info!(iteration, "base snapshot unchanged"),
                Err(e) => error!(iteration, error = %format!("{:#}", e), "iteration aborted"),
            }

            state.completed_iterations = iteration;
            state.train_cursor = end;
            state.save(&self.paths.state())?;

            if iteration % runner.test_after_iterations == 0 {
                self.test_and_record(iteration, &mut state)?;
            }
        }

        let done = state.completed_iterations;
        if done > 0 && state.last_tested_iteration != Some(done) {
            self.test_and_record(done, &mut state)?;
        }

        info!(
            iterations = done,
            promoted = ?state.promoted_tools(),
            base = %state.base_snapshot.display(),
            "experiment finished"
        );
        Ok(state)
    }

    fn initial_state(&self, resume: bool) -> Result<RunState> {
        let state_path = self.paths.state();
        if state_path.exists() {
            if !resume {
                bail!(
                    "experiment {} already has progress; pass --resume to continue it",
                    self.paths.root().display()
                );
            }
            let state = RunState::load(&state_path)?;
            info!(completed = state.completed_iterations, base = %state.base_snapshot.display(), "resuming");
            return Ok(state);
        }

        self.write_manifest()?;
        let base_path = &self.config.library.base_library_path;
        let base = Snapshot::load(base_path)
            .with_context(|| format!("failed to load base library {}", base_path.display()))?;
        let copy = self.paths.base_library_copy();
        base.compose(&Addend::Empty).persist(&copy)?;
        info!(tools = base.tool_names().len(), snapshot = base.id(), "base library copied");

        let mut state = RunState::fresh(copy);
        state.save(&state_path)?;
        Ok(state)
    }

    fn write_manifest(&self) -> Result<()> {
        let manifest = json!({
            "experiment_name": self.config.experiment_name,
            "env": self.config.env.as_str(),
            "created_at": Utc::now().to_rfc3339(),
            "config": self.config,
        });
        let path = self.paths.manifest();
        fs::write(&path, serde_json::to_string_pretty(&manifest)?)
            .with_context(|| format!("failed to write {}", path.display()))
    }

    /// Conversations shown to the oracle, saved under input/ once resolved.
    fn resolve_input_tasks(&self, base_snapshot: &Path, resume: bool) -> Result<Vec<Trajectory>> {
        let saved = self.paths.input_tasks();
        if resume && saved.exists() {
            info!(path = %saved.display(), "reusing saved input tasks");
            return Ok(load_results(&saved)?);
        }

        let input = &self.config.input_tasks;
        let tasks = match input.mode {
            InputMode::Explicit => {
                let path = input
                    .explicit_path
                    .as_deref()
                    .context("input_tasks.explicit_path is required in explicit mode")?;
                info!(path = %path.display(), "using explicit input tasks");
                load_results(path)?
            }
            InputMode::LatestForEnv => {
                let env = input.validate_env_in_file.then(|| self.config.env.as_str());
                let path = find_latest_results(&input.logs_dir, &input.filename_glob, env)?;
                info!(path = %path.display(), "using latest results file");
                load_results(&path)?
            }
            InputMode::BaseLibrary => self.warmup(base_snapshot)?,
        };

        let minimal: Vec<Trajectory> = tasks.iter().map(Trajectory::minimal).collect();
        fs::write(&saved, serde_json::to_string_pretty(&minimal)?)
            .with_context(|| format!("failed to write {}", saved.display()))?;
        Ok(minimal)
    }

    /// Fault analysis driving the train chunks, saved under input/ once read.
    fn resolve_failures(&self, resume: bool) -> Result<Option<Vec<FaultRecord>>> {
        let Some(path) = self.config.input_tasks.failures_path.as_deref() else {
            return Ok(None);
        };
        let saved = self.paths.input_failures();
        if resume && saved.exists() {
            info!(path = %saved.display(), "reusing saved fault analysis");
            return load_faults(&saved).map(Some);
        }
        let faults = load_faults(path)?;
        info!(path = %path.display(), failures = faults.len(), "train chunks follow the fault analysis");
        save_faults(&saved, &faults)?;
        Ok(Some(faults))
    }

    /// Run the whole train split against the base library in one call.
    fn warmup(&self, base_snapshot: &Path) -> Result<Vec<Trajectory>> {
        let dir = self.paths.warmup_dir();
        fs::create_dir_all(&dir).with_context(|| format!("failed to create {}", dir.display()))?;
        let output = dir.join("train_results.json");
        let ids = self.config.splits.train_ids.ids();
        info!(tasks = ids.len(), "warm-up run on the base library");

        fs::write(&output, "").with_context(|| format!("failed to reset {}", output.display()))?;
        self.harness.run_task(&RunRequest {
            task_ids: &ids,
            split: TaskSplit::Train,
            snapshot_path: base_snapshot,
            strategy: Strategy::Plain,
            output_path: &output,
            hint_tool: None,
        })?;
        load_results(&output).with_context(|| "warm-up produced no usable results".to_string())
    }

    fn run_iteration(
        &self,
        iteration: usize,
        base_path: &Path,
        tasks: &[Trajectory],
        failures: &[FaultRecord],
        train_ids: &[i64],
        validation_ids: &[i64],
    ) -> Result<Option<Promotion>> {
        let runner = &self.config.runner;
        let paths = self.paths;

        log::phase(Phase::Generation, iteration);
        let base = Snapshot::load(base_path)?;
        let before = paths.snapshot(SnapshotStage::BeforeGeneration, iteration);
        base.compose(&Addend::Empty).persist(&before)?;

        let proposer = Proposer::new(
            self.oracle,
            ProposalLimits {
                max_doc_trials: runner.max_doc_trials,
                reply_attempts: runner.oracle_reply_attempts,
            },
        )
        .with_failures(failures);
        let refiner = Refiner::new(
            self.oracle,
            self.harness,
            &self.evaluator,
            RefineLimits {
                max_refinement_tries: runner.max_refinement_tries,
                reply_attempts: runner.oracle_reply_attempts,
            },
        );

        let after_generation = paths.snapshot(SnapshotStage::AfterGeneration, iteration);
        let generation = run_generation(
            &proposer,
            &refiner,
            tasks,
            train_ids,
            &GenerationPaths {
                base_snapshot: &before,
                working_snapshot: &paths.snapshot(SnapshotStage::Working, iteration),
                trial_snapshot: &paths.snapshot(SnapshotStage::Trial, iteration),
                output_snapshot: &after_generation,
                output_dir: &paths.generation_dir(iteration),
            },
            runner.generation_phase_iterations,
        )?;
        if !generation.any_succeeded() {
            info!(iteration, "generation accepted no tools");
            return Ok(None);
        }
        self.save_functions(&generation.accepted)?;

        log::phase(Phase::Validation, iteration);
        let validation = run_validation(
            self.harness,
            &self.evaluator,
            validation_ids,
            &after_generation,
            &generation.accepted,
            &paths.validation_dir(iteration),
        )?;
        if validation.survivors.is_empty() {
            info!(iteration, "no tools survived validation");
            return Ok(None);
        }

        log::phase(Phase::Promotion, iteration);
        let promoted = promote(&base, &generation.accepted, &validation.survivors)?;
        let after_validation = paths.snapshot(SnapshotStage::AfterValidation, iteration);
        promoted.persist(&after_validation)?;

        Ok(Some(Promotion {
            iteration,
            snapshot: after_validation,
            snapshot_id: promoted.id().to_string(),
            tools: validation.survivors,
        }))
    }

    fn save_functions(&self, accepted: &[AcceptedTool]) -> Result<()> {
        let dir = self.paths.functions_dir();
        for tool in accepted {
            let path = dir.join(format!("{}.txt", tool.name));
            fs::write(&path, &tool.source)
                .with_context(|| format!("failed to write {}", path.display()))?;
        }
        Ok(())
    }

    fn test_and_record(&self, iteration: usize, state: &mut RunState) -> Result<()> {
        if let Err(e) = self.test_phase(iteration, &state.base_snapshot) {
            error!(iteration, error = %format!("{:#}", e), "test phase failed");
        }
        state.last_tested_iteration = Some(iteration);
        state.save(&self.paths.state())
    }

    /// Plain runs of the test split against the current base.
    fn test_phase(&self, iteration: usize, base_snapshot: &Path) -> Result<()> {
        let ids = self.config.splits.test_ids.ids();
        if ids.is_empty() {
            return Ok(());
        }
        log::phase(Phase::Test, iteration);

        let dir = self.paths.test_dir(iteration);
        fs::create_dir_all(&dir).with_context(|| format!("failed to create {}", dir.display()))?;

        let mut results = Vec::with_capacity(ids.len());
        let mut not_run = Vec::new();
        for &task_id in &ids {
            let output = dir.join(format!("test_results_{}.json", task_id));
            match run_single(self.harness, task_id, TaskSplit::Test, base_snapshot, Strategy::Plain, &output, None) {
                Ok(t) => results.push(t),
                Err(e) => {
                    warn!(task_id, error = %format!("{:#}", e), "test task produced no trajectory");
                    not_run.push(task_id);
                }
            }
        }

        let summary = stats::compute(&results);
        debug!("\n{}", summary.render());
        info!(
            iteration,
            tasks = summary.tasks,
            solved = summary.solved,
            missing = not_run.len(),
            "test phase done"
        );

        fs::write(dir.join("test_results.json"), serde_json::to_string_pretty(&results)?)
            .with_context(|| format!("failed to write results in {}", dir.display()))?;
        let record: Value = json!({
            "iteration": iteration,
            "snapshot": base_snapshot,
            "not_run": not_run,
            "stats": summary,
        });
        fs::write(dir.join("summary.json"), serde_json::to_string_pretty(&record)?)
            .with_context(|| format!("failed to write summary in {}", dir.display()))?;
        Ok(())
    }
}

/// Tasks for one chunk: matched by task id where the results carry ids,
/// otherwise taken from `positions`.
fn select_tasks(tasks: &[Trajectory], ids: &[i64], positions: &[usize]) -> Vec<Trajectory> {
    let by_id: Vec<Trajectory> = tasks
        .iter()
        .filter(|t| t.task_id.is_some_and(|id| ids.contains(&id)))
        .map(Trajectory::minimal)
        .collect();
    if !by_id.is_empty() {
        return by_id;
    }
    positions
        .iter()
        .filter_map(|&p| tasks.get(p))
        .map(Trajectory::minimal)
        .collect()
}

/// Newest results file in `dir` whose name matches `glob`. With `env`, the
/// newest file whose first entry names that env (or names none) wins; if no
/// file qualifies, the newest overall is used.
pub fn find_latest_results(dir: &Path, glob: &str, env: Option<&str>) -> Result<PathBuf> {
    let pattern = glob_to_regex(glob)?;
    let entries = fs::read_dir(dir)
        .with_context(|| format!("failed to list results directory {}", dir.display()))?;

    let mut candidates: Vec<(SystemTime, PathBuf)> = entries
        .filter_map(|e| e.ok())
        .filter(|e| e.path().is_file())
        .filter(|e| pattern.is_match(&e.file_name().to_string_lossy()))
        .filter_map(|e| {
            let modified = e.metadata().and_then(|m| m.modified()).ok()?;
            Some((modified, e.path()))
        })
        .collect();
    candidates.sort_by(|a, b| b.0.cmp(&a.0));

    let Some((_, newest)) = candidates.first() else {
        bail!("no results matching {} in {}", glob, dir.display());
    };
    let Some(env) = env else {
        return Ok(newest.clone());
    };

    for (_, path) in &candidates {
        let Ok(results) = load_results(path) else {
            continue;
        };
        let Some(first) = results.first() else {
            continue;
        };
        let file_env = first
            .info
            .get("env")
            .or_else(|| first.info.get("environment"))
            .and_then(Value::as_str);
        match file_env {
            None => return Ok(path.clone()),
            Some(e) if e == env => return Ok(path.clone()),
            Some(_) => {}
        }
    }
    Ok(newest.clone())
}

fn glob_to_regex(glob: &str) -> Result<Regex> {
    let escaped = regex::escape(glob).replace(r"\*", ".*").replace(r"\?", ".");
    Regex::new(&format!("^{}$", escaped)).with_context(|| format!("bad filename pattern {}", glob))
}
