// crates/host/src/log.rs

//! Logging setup: a stderr layer, plus a plain-text file layer inside the
//! experiment directory once one is known.

use std::fs::{self, OpenOptions};
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Pipeline stage, for section banners in the log.
#[derive(Clone, Copy, Debug)]
pub enum Phase {
    Input,
    Generation,
    Validation,
    Promotion,
    Test,
}

impl Phase {
    fn name(&self) -> &'static str {
        match self {
            Phase::Input => "input",
            Phase::Generation => "generation",
            Phase::Validation => "validation",
            Phase::Promotion => "promotion",
            Phase::Test => "test",
        }
    }
}

/// Install the global subscriber. RUST_LOG wins over `verbose`.
pub fn init(verbose: bool, log_file: Option<&Path>) -> Result<()> {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let file_layer = match log_file {
        Some(path) => {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create {}", parent.display()))?;
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("failed to open log file {}", path.display()))?;
            Some(
                fmt::layer()
                    .with_ansi(false)
                    .with_target(false)
                    .with_writer(Arc::new(file)),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(file_layer)
        .try_init()
        .context("failed to install the tracing subscriber")?;
    Ok(())
}

/// Mark the start of a phase.
pub fn phase(phase: Phase, iteration: usize) {
    info!(iteration, phase = phase.name(), "==== {} ====", phase.name());
}
