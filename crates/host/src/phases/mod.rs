// crates/host/src/phases/mod.rs

//! The three phases of one top-level iteration: generation, validation and
//! promotion.

pub mod generation;
pub mod promotion;
pub mod validation;

use serde::{Deserialize, Serialize};

/// A tool that passed refinement, with its full body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcceptedTool {
    pub name: String,
    pub source: String,
}

pub use generation::{run_generation, GenerationOutcome, GenerationPaths};
pub use promotion::promote;
pub use validation::{run_validation, ValidationOutcome};
