// crates/core/src/harness.rs

//! The task-execution harness contract and its subprocess implementation.
//!
//! The harness runs a simulated conversation for each task id against a
//! toolset snapshot and writes a results file. Exit status is logged but never
//! trusted: correctness is judged only by reading the results file back.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::trajectory::{load_first, Trajectory};

/// How the simulated agent is driven.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
    /// Ordinary tool calling.
    Plain,
    /// Shown the prior trajectory and nudged toward the hinted tool.
    ReferenceAssisted,
}

/// Which split of the environment's task pool the ids refer to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskSplit {
    Train,
    Test,
}

impl TaskSplit {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskSplit::Train => "train",
            TaskSplit::Test => "test",
        }
    }
}

/// One harness invocation.
#[derive(Debug, Clone)]
pub struct RunRequest<'a> {
    pub task_ids: &'a [i64],
    pub split: TaskSplit,
    pub snapshot_path: &'a Path,
    pub strategy: Strategy,
    pub output_path: &'a Path,
    pub hint_tool: Option<&'a str>,
}

/// Abstract execution harness. Calls block until the run finishes.
pub trait Harness {
    fn run_task(&self, request: &RunRequest<'_>) -> Result<()>;
}

impl<T: Harness + ?Sized> Harness for &T {
    fn run_task(&self, request: &RunRequest<'_>) -> Result<()> {
        (**self).run_task(request)
    }
}

/// Run a single task and read its trajectory back. The output file is
/// truncated first so a stale result is never mistaken for a fresh one.
pub fn run_single<H: Harness + ?Sized>(
    harness: &H,
    task_id: i64,
    split: TaskSplit,
    snapshot_path: &Path,
    strategy: Strategy,
    output_path: &Path,
    hint_tool: Option<&str>,
) -> Result<Trajectory> {
    if let Some(parent) = output_path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    fs::write(output_path, "")
        .with_context(|| format!("failed to reset {}", output_path.display()))?;

    let ids = [task_id];
    harness.run_task(&RunRequest {
        task_ids: &ids,
        split,
        snapshot_path,
        strategy,
        output_path,
        hint_tool,
    })?;

    let trajectory = load_first(output_path)
        .with_context(|| format!("task {} produced no usable trajectory", task_id))?;
    Ok(trajectory)
}

/// Parameters passed through to the harness command line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HarnessSettings {
    /// Program to execute, e.g. "python".
    pub program: String,
    /// Leading arguments, e.g. ["run.py"].
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
    pub model: String,
    pub model_provider: String,
    pub user_model: String,
    pub user_model_provider: String,
    #[serde(default = "default_user_strategy")]
    pub user_strategy: String,
    #[serde(default = "default_plain_strategy")]
    pub plain_strategy: String,
    #[serde(default = "default_reference_strategy")]
    pub reference_strategy: String,
    #[serde(default = "default_concurrency")]
    pub max_concurrency: u32,
    #[serde(default)]
    pub temperature: f32,
    #[serde(default = "default_seed")]
    pub seed: u64,
    #[serde(default = "default_trials")]
    pub num_trials: u32,
}

fn default_user_strategy() -> String {
    "llm".to_string()
}

fn default_plain_strategy() -> String {
    "tool-calling".to_string()
}

fn default_reference_strategy() -> String {
    "tool-calling-with-reference".to_string()
}

fn default_concurrency() -> u32 {
    1
}

fn default_seed() -> u64 {
    42
}

fn default_trials() -> u32 {
    1
}

/// Harness run as a subprocess per invocation.
pub struct CommandHarness {
    settings: HarnessSettings,
    env: String,
}

impl CommandHarness {
    pub fn new(settings: HarnessSettings, env: impl Into<String>) -> Self {
        Self {
            settings,
            env: env.into(),
        }
    }

    fn strategy_name(&self, strategy: Strategy) -> &str {
        match strategy {
            Strategy::Plain => &self.settings.plain_strategy,
            Strategy::ReferenceAssisted => &self.settings.reference_strategy,
        }
    }

    /// Full argument list after the program name.
    pub fn command_args(&self, request: &RunRequest<'_>) -> Vec<String> {
        let s = &self.settings;
        let mut args = s.args.clone();
        args.extend([
            "--agent-strategy".to_string(),
            self.strategy_name(request.strategy).to_string(),
            "--env".to_string(),
            self.env.clone(),
            "--model".to_string(),
            s.model.clone(),
            "--model-provider".to_string(),
            s.model_provider.clone(),
            "--user-model".to_string(),
            s.user_model.clone(),
            "--user-model-provider".to_string(),
            s.user_model_provider.clone(),
            "--user-strategy".to_string(),
            s.user_strategy.clone(),
            "--max-concurrency".to_string(),
            s.max_concurrency.to_string(),
            "--temperature".to_string(),
            s.temperature.to_string(),
            "--seed".to_string(),
            s.seed.to_string(),
            "--num-trials".to_string(),
            s.num_trials.to_string(),
            "--task-split".to_string(),
            request.split.as_str().to_string(),
            "--task-ids".to_string(),
        ]);
        args.extend(request.task_ids.iter().map(|id| id.to_string()));
        args.extend([
            "--mcp-server".to_string(),
            request.snapshot_path.display().to_string(),
            "--ckpt-path".to_string(),
            request.output_path.display().to_string(),
        ]);
        if let Some(tool) = request.hint_tool {
            args.extend(["--new-func".to_string(), tool.to_string()]);
        }
        args
    }
}

impl Harness for CommandHarness {
    fn run_task(&self, request: &RunRequest<'_>) -> Result<()> {
        let args = self.command_args(request);
        debug!(program = %self.settings.program, ?args, "launching harness");

        let mut cmd = Command::new(&self.settings.program);
        cmd.args(&args);
        if let Some(dir) = &self.settings.working_dir {
            cmd.current_dir(dir);
        }

        let output = cmd
            .output()
            .with_context(|| format!("failed to launch harness `{}`", self.settings.program))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let tail: Vec<&str> = stderr.lines().rev().take(10).collect();
            warn!(
                status = %output.status,
                tasks = ?request.task_ids,
                stderr_tail = %tail.into_iter().rev().collect::<Vec<_>>().join("\n"),
                "harness exited unsuccessfully"
            );
        }
        Ok(())
    }
}
