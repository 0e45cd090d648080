// crates/host/src/paths.rs

//! On-disk layout of one experiment.
//!
//! ```text
//! <experiments_root>/<experiment_name>/
//!   manifest.json
//!   state.json
//!   input/            tasks.json, library_base.py
//!   logs/             experiment.log
//!   warmup/           base-library run used as input tasks
//!   phases/iteration_N/{generation,validation}/
//!   test/iteration_N/
//!   artifacts/functions/<tool>.txt
//!   artifacts/<snapshot_subdir>/<env>_server_<stage>_iteration_N.py
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::config::ExperimentConfig;

/// Phase boundary a snapshot file belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotStage {
    BeforeGeneration,
    /// Scratch copy the generation rounds build on.
    Working,
    /// Base plus the candidate under refinement.
    Trial,
    AfterGeneration,
    AfterValidation,
}

impl SnapshotStage {
    fn as_str(&self) -> &'static str {
        match self {
            SnapshotStage::BeforeGeneration => "before_generation",
            SnapshotStage::Working => "working",
            SnapshotStage::Trial => "trial",
            SnapshotStage::AfterGeneration => "after_generation",
            SnapshotStage::AfterValidation => "after_validation",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExperimentPaths {
    root: PathBuf,
    env: String,
    snapshot_subdir: String,
}

impl ExperimentPaths {
    pub fn new(config: &ExperimentConfig) -> Self {
        Self {
            root: config.io.experiments_root.join(&config.experiment_name),
            env: config.env.as_str().to_string(),
            snapshot_subdir: config.io.snapshot_subdir.clone(),
        }
    }

    /// Create the fixed directories.
    pub fn create(&self) -> Result<()> {
        for dir in [
            self.input_dir(),
            self.logs_dir(),
            self.root.join("phases"),
            self.root.join("test"),
            self.functions_dir(),
            self.snapshots_dir(),
        ] {
            fs::create_dir_all(&dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
        }
        Ok(())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn manifest(&self) -> PathBuf {
        self.root.join("manifest.json")
    }

    pub fn state(&self) -> PathBuf {
        self.root.join("state.json")
    }

    pub fn input_dir(&self) -> PathBuf {
        self.root.join("input")
    }

    pub fn input_tasks(&self) -> PathBuf {
        self.input_dir().join("tasks.json")
    }

    pub fn input_failures(&self) -> PathBuf {
        self.input_dir().join("failures.json")
    }

    pub fn base_library_copy(&self) -> PathBuf {
        self.input_dir().join("library_base.py")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    pub fn experiment_log(&self) -> PathBuf {
        self.logs_dir().join("experiment.log")
    }

    pub fn warmup_dir(&self) -> PathBuf {
        self.root.join("warmup")
    }

    pub fn iteration_dir(&self, iteration: usize) -> PathBuf {
        self.root.join("phases").join(format!("iteration_{}", iteration))
    }

    pub fn generation_dir(&self, iteration: usize) -> PathBuf {
        self.iteration_dir(iteration).join("generation")
    }

    pub fn validation_dir(&self, iteration: usize) -> PathBuf {
        self.iteration_dir(iteration).join("validation")
    }

    pub fn test_dir(&self, iteration: usize) -> PathBuf {
        self.root.join("test").join(format!("iteration_{}", iteration))
    }

    pub fn functions_dir(&self) -> PathBuf {
        self.root.join("artifacts").join("functions")
    }

    pub fn snapshots_dir(&self) -> PathBuf {
        self.root.join("artifacts").join(&self.snapshot_subdir)
    }

    /// Every stage/iteration pair maps to its own file.
    pub fn snapshot(&self, stage: SnapshotStage, iteration: usize) -> PathBuf {
        self.snapshots_dir().join(format!(
            "{}_server_{}_iteration_{}.py",
            self.env,
            stage.as_str(),
            iteration
        ))
    }
}
