// crates/host/src/phases/generation.rs

//! Generation phase: a fixed number of propose-then-refine rounds.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde_json::json;
use tracing::{info, warn};

use libgen_core::harness::Harness;
use libgen_core::oracle::Oracle;
use libgen_core::snapshot::{Addend, Snapshot};
use libgen_core::trajectory::Trajectory;

use super::AcceptedTool;
use crate::agents::prompt_utils::LibraryView;
use crate::agents::{ProposalError, Proposer, Refiner};

/// Files the phase reads and writes.
#[derive(Debug, Clone, Copy)]
pub struct GenerationPaths<'p> {
    pub base_snapshot: &'p Path,
    pub working_snapshot: &'p Path,
    pub trial_snapshot: &'p Path,
    pub output_snapshot: &'p Path,
    pub output_dir: &'p Path,
}

#[derive(Debug, Clone)]
pub struct GenerationOutcome {
    /// Accepted tools, in acceptance order.
    pub accepted: Vec<AcceptedTool>,
    /// Base plus every accepted tool; also written to the output path.
    pub snapshot: Snapshot,
}

impl GenerationOutcome {
    pub fn any_succeeded(&self) -> bool {
        !self.accepted.is_empty()
    }

    pub fn names(&self) -> Vec<String> {
        self.accepted.iter().map(|t| t.name.clone()).collect()
    }
}

/// Run `iterations` rounds. A round whose proposal or refinement fails is
/// skipped; the working snapshot only grows on acceptance.
pub fn run_generation<O, H>(
    proposer: &Proposer<'_, O>,
    refiner: &Refiner<'_, O, H>,
    tasks: &[Trajectory],
    task_ids: &[i64],
    paths: &GenerationPaths<'_>,
    iterations: usize,
) -> Result<GenerationOutcome>
where
    O: Oracle + ?Sized,
    H: Harness + ?Sized,
{
    fs::create_dir_all(paths.output_dir)
        .with_context(|| format!("failed to create {}", paths.output_dir.display()))?;

    let mut working = Snapshot::load(paths.base_snapshot)?.compose(&Addend::Empty);
    working.persist(paths.working_snapshot)?;
    let mut accepted: Vec<AcceptedTool> = Vec::new();

    for round in 1..=iterations {
        let library = LibraryView::from_snapshot(&working);
        info!(round, iterations, tools = library.names.len(), "generation round");

        let candidate = match proposer.propose(tasks, &library) {
            Ok(c) => c,
            Err(ProposalError::Oracle(e)) => {
                return Err(e).context(format!("generation round {}", round));
            }
            Err(e) => {
                warn!(round, error = %e, "no candidate this round");
                continue;
            }
        };

        let outcome = refiner.refine(
            candidate,
            task_ids,
            &working,
            paths.trial_snapshot,
            paths.output_dir,
            &library,
        )?;

        let record = paths.output_dir.join(format!("round_{}.json", round));
        let summary = json!({
            "round": round,
            "accepted": outcome.accepted,
            "refinement_rounds": outcome.rounds,
            "failing_tasks": outcome.failing_tasks,
            "candidate": outcome.candidate,
        });
        fs::write(&record, serde_json::to_string_pretty(&summary)?)
            .with_context(|| format!("failed to write {}", record.display()))?;

        if !outcome.accepted {
            info!(round, tool = %outcome.candidate.name, "candidate discarded");
            continue;
        }

        let tool = AcceptedTool {
            name: outcome.candidate.name,
            source: outcome.candidate.source_text,
        };
        working = working.compose(&Addend::Function(tool.source.clone()));
        working.persist(paths.working_snapshot)?;
        info!(round, tool = %tool.name, snapshot = working.id(), "tool accepted");
        accepted.push(tool);
    }

    working.persist(paths.output_snapshot)?;
    Ok(GenerationOutcome {
        accepted,
        snapshot: working,
    })
}
