// crates/core/src/error.rs

//! Error taxonomy for the library-generation pipeline.
//!
//! Recoverable conditions (a descriptor that does not parse, a tool that
//! errored in a trajectory) are values the state machine branches on. The
//! variants here are the ones callers need to tell apart; everything else is
//! carried as `anyhow::Error` with context.

use std::path::PathBuf;

use thiserror::Error;

/// Why a candidate's documentation could not be turned into a descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DescriptorError {
    #[error("no top-level function definition found")]
    NoFunctionFound,

    #[error("tool body must open with its `def`, found `{0}`")]
    LeadingStatement(String),

    #[error("docstring of `{function}` is not a structured object: {reason}")]
    NotStructured { function: String, reason: String },
}

/// Failures while reading or writing toolset snapshots.
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("failed to read snapshot {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write snapshot {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("refusing to overwrite base snapshot {0} in place")]
    SameTarget(PathBuf),
}

/// Failures while reading back a harness results file.
#[derive(Debug, Error)]
pub enum TrajectoryError {
    #[error("failed to read trajectory file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed trajectory file {path}: {source}")]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("trajectory file {path} contains no results")]
    Empty { path: PathBuf },
}

/// Failures talking to the text-generation oracle.
#[derive(Debug, Error)]
pub enum OracleError {
    #[error("oracle transport error: {0}")]
    Transport(String),

    #[error("oracle returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("oracle returned an empty reply")]
    EmptyReply,

    #[error("oracle reply is missing field `{0}`")]
    MissingField(String),

    #[error("oracle reply is not valid JSON: {0}")]
    MalformedReply(String),
}

impl OracleError {
    /// Transient conditions are worth another attempt; a hard HTTP rejection is not.
    pub fn is_transient(&self) -> bool {
        match self {
            OracleError::Transport(_) => true,
            OracleError::Status { status, .. } => *status == 429 || *status >= 500,
            OracleError::EmptyReply
            | OracleError::MissingField(_)
            | OracleError::MalformedReply(_) => true,
        }
    }
}
