// crates/host/src/agents/mod.rs

//! Oracle-driven agents of the library-generation pipeline.
//!
//! Each agent is self-contained with its own:
//! - mod.rs (agent loop)
//! - prompts.rs (system prompts)

pub mod prompt_utils;

pub mod proposer;
pub mod refiner;

pub use proposer::{ProposalError, ProposalLimits, Proposer};
pub use refiner::{RefineLimits, RefineOutcome, Refiner};
