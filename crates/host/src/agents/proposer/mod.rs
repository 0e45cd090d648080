// crates/host/src/agents/proposer/mod.rs

//! Proposer agent: turns a batch of recorded conversations into one new
//! candidate tool.
//!
//! Each attempt runs four oracle steps: suggest a function, define it,
//! normalize its docstring into a descriptor, then harden its argument
//! handling. An attempt whose result has no parseable descriptor, or that
//! redefines a tool already in the library, is thrown away and the next
//! attempt starts over from a fresh suggestion.

pub mod prompts;

use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, info, warn};

use libgen_core::descriptor::{function_name, parse_tool_body};
use libgen_core::error::OracleError;
use libgen_core::oracle::{complete_json, string_field, CompletionRequest, Oracle};
use libgen_core::trajectory::Trajectory;
use libgen_core::types::CandidateFunction;

use super::prompt_utils::{
    render_conversations, render_failed_conversations, render_tasks, LibraryView,
};
use crate::failures::FaultRecord;
use prompts::*;

#[derive(Debug, Error)]
pub enum ProposalError {
    /// Every attempt produced an unusable candidate.
    #[error("no usable candidate after {attempts} attempt(s): {last}")]
    Exhausted { attempts: usize, last: String },

    /// The oracle refused outright; retrying will not help.
    #[error("oracle rejected the request: {0}")]
    Oracle(OracleError),
}

/// Why a single attempt failed.
#[derive(Debug, Error)]
enum AttemptError {
    #[error("descriptor unusable: {0}")]
    Descriptor(String),
    #[error("{0}")]
    Oracle(#[from] OracleError),
}

/// Bounds for one proposal.
#[derive(Debug, Clone, Copy)]
pub struct ProposalLimits {
    /// Full suggest-to-descriptor attempts, and normalize passes per attempt.
    pub max_doc_trials: usize,
    /// Replies requested per oracle step before giving up on it.
    pub reply_attempts: usize,
}

pub struct Proposer<'a, O: Oracle + ?Sized> {
    oracle: &'a O,
    limits: ProposalLimits,
    failures: &'a [FaultRecord],
}

impl<'a, O: Oracle + ?Sized> Proposer<'a, O> {
    pub fn new(oracle: &'a O, limits: ProposalLimits) -> Self {
        Self {
            oracle,
            limits,
            failures: &[],
        }
    }

    /// Suggest from failed conversations and their fault-analysis reasons.
    pub fn with_failures(mut self, failures: &'a [FaultRecord]) -> Self {
        self.failures = failures;
        self
    }

    /// Propose one candidate for `library` from `tasks`.
    pub fn propose(
        &self,
        tasks: &[Trajectory],
        library: &LibraryView,
    ) -> Result<CandidateFunction, ProposalError> {
        let attempts = self.limits.max_doc_trials.max(1);
        let mut last = String::new();

        for attempt in 1..=attempts {
            match self.attempt(tasks, library) {
                Ok(candidate) => {
                    info!(attempt, tool = %candidate.name, "candidate proposed");
                    return Ok(candidate);
                }
                Err(AttemptError::Oracle(e)) if !e.is_transient() => {
                    return Err(ProposalError::Oracle(e));
                }
                Err(e) => {
                    warn!(attempt, attempts, error = %e, "proposal attempt failed");
                    last = e.to_string();
                }
            }
        }

        Err(ProposalError::Exhausted { attempts, last })
    }

    fn attempt(
        &self,
        tasks: &[Trajectory],
        library: &LibraryView,
    ) -> Result<CandidateFunction, AttemptError> {
        let rendered_library = library.render();

        // A: suggest
        let (system, conversations) = if self.failures.is_empty() {
            (suggest_prompt(), render_conversations(tasks))
        } else {
            (
                suggest_from_failures_prompt(),
                render_failed_conversations(tasks, self.failures),
            )
        };
        let suggestion = self.ask(system, suggest_request(&conversations, &rendered_library))?;
        let suggested_name = string_field(&suggestion, "name")?;
        debug!(name = %suggested_name, "function suggested");

        // B: define
        let defined = self.ask(
            define_prompt(),
            define_request(
                &rendered_library,
                &Value::Object(suggestion).to_string(),
                &render_tasks(tasks),
            ),
        )?;
        let definition = string_field(&defined, "new_function")?;

        // C: normalize, retried while the descriptor does not parse
        let normalized = self.normalize(definition)?;

        // D: self-correct, kept only if the descriptor survives
        let corrected = self
            .ask(self_correct_prompt(), normalized.clone())
            .and_then(|reply| string_field(&reply, "new_function"));
        let source = match corrected {
            Ok(fixed) if parse_tool_body(&fixed).is_ok() => fixed,
            Ok(_) => {
                warn!("self-correction broke the descriptor, keeping normalized version");
                normalized
            }
            Err(e) if !e.is_transient() => return Err(e.into()),
            Err(e) => {
                warn!(error = %e, "self-correction reply unusable, keeping normalized version");
                normalized
            }
        };

        let descriptor =
            parse_tool_body(&source).map_err(|e| AttemptError::Descriptor(e.to_string()))?;
        let name = function_name(&source).unwrap_or_else(|| descriptor.name.clone());
        if name != suggested_name {
            debug!(suggested = %suggested_name, defined = %name, "oracle renamed the function");
        }
        if library.contains(&name) {
            return Err(AttemptError::Descriptor(format!(
                "`{}` is already in the library",
                name
            )));
        }

        Ok(CandidateFunction::new(name, source, descriptor))
    }

    fn normalize(&self, definition: String) -> Result<String, AttemptError> {
        let passes = self.limits.max_doc_trials.max(1);
        let mut current = definition;
        let mut last_failure = String::new();

        for pass in 1..=passes {
            let reply = self.ask(normalize_prompt(), normalize_request(&current))?;
            current = string_field(&reply, "function")?;
            match parse_tool_body(&current) {
                Ok(_) => return Ok(current),
                Err(e) => {
                    debug!(pass, error = %e, "normalized docstring still unstructured");
                    last_failure = e.to_string();
                }
            }
        }

        Err(AttemptError::Descriptor(last_failure))
    }

    fn ask(&self, system: String, user: String) -> Result<Map<String, Value>, OracleError> {
        let request = CompletionRequest::new(system, user).json();
        complete_json(self.oracle, &request, self.limits.reply_attempts)
    }
}
