// crates/host/src/cli.rs

//! Command-line surface.
//!
//! - `run`: run or resume an experiment from a config file
//! - `stats`: per-tool call statistics for results files
//! - `compose`: fold a function body or tool name into a snapshot file
//! - `check-descriptor`: parse a candidate's structured docstring

use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use libgen_core::chat_client::ChatCompletionsClient;
use libgen_core::descriptor::parse_tool_body;
use libgen_core::harness::CommandHarness;
use libgen_core::snapshot::{compose_file, Addend};
use libgen_core::trajectory::load_results;

use crate::config::{ExperimentConfig, OracleConfig};
use crate::log;
use crate::paths::ExperimentPaths;
use crate::runner::Runner;
use crate::stats;

#[derive(Parser, Debug)]
#[command(name = "libgen")]
#[command(about = "Grow an agent's tool library from its own conversations")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Debug-level logging (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run an experiment
    Run {
        /// Experiment config (JSON)
        #[arg(long)]
        config: PathBuf,

        /// Continue from the experiment's saved state
        #[arg(long)]
        resume: bool,
    },

    /// Tool call statistics for one or more results files
    Stats {
        #[arg(long, required = true, num_args = 1..)]
        results: Vec<PathBuf>,

        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Compose a snapshot file with a function body or a tool name
    Compose {
        #[arg(long)]
        base: PathBuf,

        /// File holding the addend, or `-` for stdin
        #[arg(long)]
        addend: String,

        #[arg(long)]
        out: PathBuf,
    },

    /// Parse the structured docstring of a candidate function
    CheckDescriptor {
        #[arg(long)]
        file: PathBuf,
    },
}

pub fn run_command(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Run { config, resume } => run_experiment(&config, resume, cli.verbose),
        Command::Stats { results, json } => {
            log::init(cli.verbose, None)?;
            run_stats(&results, json)
        }
        Command::Compose { base, addend, out } => {
            log::init(cli.verbose, None)?;
            run_compose(&base, &addend, &out)
        }
        Command::CheckDescriptor { file } => {
            log::init(cli.verbose, None)?;
            run_check_descriptor(&file)
        }
    }
}

fn run_experiment(config_path: &Path, resume: bool, verbose: bool) -> Result<()> {
    let config = ExperimentConfig::load(config_path)?;
    let paths = ExperimentPaths::new(&config);
    log::init(verbose, Some(&paths.experiment_log()))?;
    info!(
        experiment = %config.experiment_name,
        env = config.env.as_str(),
        root = %paths.root().display(),
        resume,
        "starting"
    );

    let oracle = build_oracle(&config.oracle)?;
    let harness = CommandHarness::new(config.harness.clone(), config.env.as_str());
    Runner::new(&config, &paths, &oracle, &harness).run(resume)?;
    Ok(())
}

/// Config values win; environment variables fill the gaps.
fn build_oracle(config: &OracleConfig) -> Result<ChatCompletionsClient> {
    let endpoint = match &config.endpoint {
        Some(e) => e.clone(),
        None => std::env::var("LIBGEN_ORACLE_ENDPOINT")
            .context("oracle.endpoint not configured and LIBGEN_ORACLE_ENDPOINT not set")?,
    };
    let model = match &config.model {
        Some(m) => m.clone(),
        None => std::env::var("LIBGEN_ORACLE_MODEL")
            .context("oracle.model not configured and LIBGEN_ORACLE_MODEL not set")?,
    };
    let api_key = std::env::var(&config.api_key_env)
        .with_context(|| format!("{} not set", config.api_key_env))?;

    Ok(ChatCompletionsClient::new(&endpoint, &model, &api_key)?
        .with_temperature(config.temperature)
        .with_max_attempts(config.max_attempts))
}

fn run_stats(files: &[PathBuf], json: bool) -> Result<()> {
    for file in files {
        let trajectories = load_results(file)?;
        let summary = stats::compute(&trajectories);
        if json {
            println!("{}", serde_json::to_string_pretty(&summary)?);
        } else {
            println!("== {}", file.display());
            println!("{}", summary.render());
        }
    }
    Ok(())
}

fn run_compose(base: &Path, addend: &str, out: &Path) -> Result<()> {
    let text = if addend == "-" {
        let mut buf = String::new();
        io::stdin()
            .read_to_string(&mut buf)
            .context("failed to read addend from stdin")?;
        buf
    } else {
        fs::read_to_string(addend).with_context(|| format!("failed to read addend {}", addend))?
    };

    let snapshot = compose_file(base, &Addend::classify(&text), out)?;
    println!(
        "{} ({} tools, id {})",
        out.display(),
        snapshot.tool_names().len(),
        snapshot.id()
    );
    Ok(())
}

fn run_check_descriptor(file: &Path) -> Result<()> {
    let source =
        fs::read_to_string(file).with_context(|| format!("failed to read {}", file.display()))?;
    let descriptor = parse_tool_body(&source)?;
    println!("{}", serde_json::to_string_pretty(&descriptor)?);
    println!("{}", descriptor.listing_line());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_run_and_stats() {
        let cli = Cli::try_parse_from(["libgen", "run", "--config", "exp.json", "--resume", "-v"]).unwrap();
        assert!(cli.verbose);
        assert!(matches!(cli.command, Command::Run { resume: true, .. }));

        let cli = Cli::try_parse_from(["libgen", "stats", "--results", "a.json", "b.json"]).unwrap();
        match cli.command {
            Command::Stats { results, json } => {
                assert_eq!(results.len(), 2);
                assert!(!json);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn stats_requires_a_file() {
        assert!(Cli::try_parse_from(["libgen", "stats"]).is_err());
    }

    #[test]
    fn missing_key_variable_is_named() {
        let config = OracleConfig {
            endpoint: Some("http://localhost:9/v1".into()),
            model: Some("m".into()),
            api_key_env: "LIBGEN_TEST_KEY_THAT_IS_NOT_SET".into(),
            ..OracleConfig::default()
        };
        let err = build_oracle(&config).err().unwrap();
        assert!(err.to_string().contains("LIBGEN_TEST_KEY_THAT_IS_NOT_SET"));
    }
}
