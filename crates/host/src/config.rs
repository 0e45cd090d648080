// crates/host/src/config.rs

//! Experiment configuration, read from a JSON file.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use libgen_core::harness::HarnessSettings;
use libgen_core::metrics::DEFAULT_ERROR_MARKERS;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {message}")]
    InvalidValue { key: &'static str, message: String },

    #[error("missing required configuration: {key}. {hint}")]
    MissingRequired { key: &'static str, hint: &'static str },
}

/// Simulated environment the harness runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnvName {
    Retail,
    Airline,
}

impl EnvName {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnvName::Retail => "retail",
            EnvName::Airline => "airline",
        }
    }
}

/// Task ids of one split: `[start, end)`, `{"start", "end"}`, or an explicit list.
///
/// A list of exactly two ids is read as a range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum IdSplit {
    Range { start: i64, end: i64 },
    List(Vec<i64>),
}

impl IdSplit {
    pub fn ids(&self) -> Vec<i64> {
        match self {
            IdSplit::Range { start, end } => (*start..*end).collect(),
            IdSplit::List(ids) if ids.len() == 2 => (ids[0]..ids[1]).collect(),
            IdSplit::List(ids) => ids.clone(),
        }
    }

    fn validate(&self, key: &'static str) -> Result<(), ConfigError> {
        let (start, end) = match self {
            IdSplit::Range { start, end } => (*start, *end),
            IdSplit::List(ids) if ids.len() == 2 => (ids[0], ids[1]),
            IdSplit::List(_) => return Ok(()),
        };
        if start > end {
            return Err(ConfigError::InvalidValue {
                key,
                message: format!("range start {} is after end {}", start, end),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Splits {
    pub train_ids: IdSplit,
    pub validation_ids: IdSplit,
    pub test_ids: IdSplit,
}

/// Where the conversations shown to the oracle come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputMode {
    /// A results file named by `explicit_path`.
    Explicit,
    /// The newest results file for the env under `logs_dir`.
    LatestForEnv,
    /// A warm-up run of the train split against the base library.
    BaseLibrary,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputTasksConfig {
    pub mode: InputMode,
    #[serde(default)]
    pub explicit_path: Option<PathBuf>,
    #[serde(default = "default_logs_dir")]
    pub logs_dir: PathBuf,
    #[serde(default = "default_filename_glob")]
    pub filename_glob: String,
    #[serde(default = "default_true")]
    pub validate_env_in_file: bool,
    /// Fault analysis of the input tasks. When set, train chunks follow its
    /// task list and suggestions are made from the failure reasons.
    #[serde(default)]
    pub failures_path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LibraryConfig {
    pub base_library_path: PathBuf,
}

/// Loop bounds and batch sizes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunnerConfig {
    #[serde(default = "default_generation_iterations")]
    pub generation_phase_iterations: usize,
    #[serde(default = "default_chunk_size")]
    pub generation_phase_chunk_size: usize,
    #[serde(default = "default_two")]
    pub max_refinement_tries: usize,
    #[serde(default = "default_two")]
    pub max_doc_trials: usize,
    #[serde(default = "default_reply_attempts")]
    pub oracle_reply_attempts: usize,
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
    #[serde(default = "default_test_after")]
    pub test_after_iterations: usize,
    #[serde(default = "default_error_markers")]
    pub error_markers: Vec<String>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            generation_phase_iterations: default_generation_iterations(),
            generation_phase_chunk_size: default_chunk_size(),
            max_refinement_tries: default_two(),
            max_doc_trials: default_two(),
            oracle_reply_attempts: default_reply_attempts(),
            max_iterations: default_max_iterations(),
            test_after_iterations: default_test_after(),
            error_markers: default_error_markers(),
        }
    }
}

/// Chat-completions endpoint used as the oracle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OracleConfig {
    /// Falls back to LIBGEN_ORACLE_ENDPOINT.
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Falls back to LIBGEN_ORACLE_MODEL.
    #[serde(default)]
    pub model: Option<String>,
    /// Name of the environment variable holding the API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default)]
    pub temperature: f32,
    #[serde(default = "default_transport_attempts")]
    pub max_attempts: u32,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            model: None,
            api_key_env: default_api_key_env(),
            temperature: 0.0,
            max_attempts: default_transport_attempts(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IoConfig {
    #[serde(default = "default_experiments_root")]
    pub experiments_root: PathBuf,
    #[serde(default = "default_snapshot_subdir")]
    pub snapshot_subdir: String,
}

impl Default for IoConfig {
    fn default() -> Self {
        Self {
            experiments_root: default_experiments_root(),
            snapshot_subdir: default_snapshot_subdir(),
        }
    }
}

/// Full experiment configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentConfig {
    pub experiment_name: String,
    pub env: EnvName,
    pub input_tasks: InputTasksConfig,
    pub library: LibraryConfig,
    pub splits: Splits,
    #[serde(default)]
    pub runner: RunnerConfig,
    pub harness: HarnessSettings,
    #[serde(default)]
    pub oracle: OracleConfig,
    #[serde(default)]
    pub io: IoConfig,
}

impl ExperimentConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let data = fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let config: ExperimentConfig = serde_json::from_str(&data)
            .with_context(|| format!("failed to parse config {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.experiment_name.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "experiment_name",
                message: "must not be empty".to_string(),
            });
        }
        if self.input_tasks.mode == InputMode::Explicit && self.input_tasks.explicit_path.is_none()
        {
            return Err(ConfigError::MissingRequired {
                key: "input_tasks.explicit_path",
                hint: "explicit mode needs the results file to read tasks from",
            });
        }
        self.splits.train_ids.validate("splits.train_ids")?;
        self.splits.validation_ids.validate("splits.validation_ids")?;
        self.splits.test_ids.validate("splits.test_ids")?;
        if self.splits.train_ids.ids().is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "splits.train_ids",
                message: "must name at least one task".to_string(),
            });
        }

        let r = &self.runner;
        for (key, value) in [
            ("runner.generation_phase_chunk_size", r.generation_phase_chunk_size),
            ("runner.max_refinement_tries", r.max_refinement_tries),
            ("runner.max_doc_trials", r.max_doc_trials),
            ("runner.oracle_reply_attempts", r.oracle_reply_attempts),
            ("runner.test_after_iterations", r.test_after_iterations),
        ] {
            if value == 0 {
                return Err(ConfigError::InvalidValue {
                    key,
                    message: "must be at least 1".to_string(),
                });
            }
        }
        if r.error_markers.iter().all(|m| m.is_empty()) {
            return Err(ConfigError::InvalidValue {
                key: "runner.error_markers",
                message: "at least one non-empty marker is required".to_string(),
            });
        }
        if self.harness.program.trim().is_empty() {
            return Err(ConfigError::MissingRequired {
                key: "harness.program",
                hint: "the command that runs a task, e.g. \"python\"",
            });
        }
        Ok(())
    }
}

fn default_logs_dir() -> PathBuf {
    PathBuf::from("results")
}

fn default_filename_glob() -> String {
    "*.json".to_string()
}

fn default_true() -> bool {
    true
}

fn default_generation_iterations() -> usize {
    3
}

fn default_chunk_size() -> usize {
    5
}

fn default_two() -> usize {
    2
}

fn default_reply_attempts() -> usize {
    3
}

fn default_max_iterations() -> usize {
    10
}

fn default_test_after() -> usize {
    6
}

fn default_error_markers() -> Vec<String> {
    DEFAULT_ERROR_MARKERS.iter().map(|m| m.to_string()).collect()
}

fn default_api_key_env() -> String {
    "LIBGEN_ORACLE_API_KEY".to_string()
}

fn default_transport_attempts() -> u32 {
    3
}

fn default_experiments_root() -> PathBuf {
    PathBuf::from("experiments")
}

fn default_snapshot_subdir() -> String {
    "snapshots".to_string()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use serde_json::json;

    pub(crate) fn sample() -> serde_json::Value {
        json!({
            "experiment_name": "retail_libgen",
            "env": "retail",
            "input_tasks": {"mode": "explicit", "explicit_path": "results/base.json"},
            "library": {"base_library_path": "mcp/retail_server.py"},
            "splits": {
                "train_ids": [0, 50],
                "validation_ids": {"start": 50, "end": 80},
                "test_ids": [80, 85, 90]
            },
            "harness": {
                "program": "python",
                "args": ["run.py"],
                "model": "gpt-4o",
                "model_provider": "openai",
                "user_model": "gpt-4o",
                "user_model_provider": "openai"
            }
        })
    }

    #[test]
    fn parses_with_defaults() {
        let config: ExperimentConfig = serde_json::from_value(sample()).unwrap();
        config.validate().unwrap();
        assert_eq!(config.runner.max_refinement_tries, 2);
        assert_eq!(config.runner.max_doc_trials, 2);
        assert_eq!(config.runner.error_markers, vec!["error", "Error"]);
        assert_eq!(config.io.snapshot_subdir, "snapshots");
        assert_eq!(config.oracle.api_key_env, "LIBGEN_ORACLE_API_KEY");
        assert_eq!(config.harness.plain_strategy, "tool-calling");
    }

    #[test]
    fn id_split_forms() {
        let config: ExperimentConfig = serde_json::from_value(sample()).unwrap();
        assert_eq!(config.splits.train_ids.ids().len(), 50);
        assert_eq!(config.splits.validation_ids.ids(), (50..80).collect::<Vec<_>>());
        assert_eq!(config.splits.test_ids.ids(), vec![80, 85, 90]);
    }

    #[test]
    fn rejects_inverted_range() {
        let mut raw = sample();
        raw["splits"]["train_ids"] = json!([10, 2]);
        let config: ExperimentConfig = serde_json::from_value(raw).unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { key: "splits.train_ids", .. })
        ));
    }

    #[test]
    fn explicit_mode_needs_a_path() {
        let mut raw = sample();
        raw["input_tasks"] = json!({"mode": "explicit"});
        let config: ExperimentConfig = serde_json::from_value(raw).unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingRequired { .. })
        ));
    }

    #[test]
    fn rejects_unknown_env_and_zero_bounds() {
        let mut raw = sample();
        raw["env"] = json!("banking");
        assert!(serde_json::from_value::<ExperimentConfig>(raw).is_err());

        let mut raw = sample();
        raw["runner"] = json!({"max_refinement_tries": 0});
        let config: ExperimentConfig = serde_json::from_value(raw).unwrap();
        assert!(config.validate().is_err());
    }
}
