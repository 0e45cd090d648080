// crates/core/src/lib.rs

//! Building blocks for growing a tool library from recorded conversations:
//! candidate descriptors, trajectory metrics, immutable toolset snapshots,
//! and the oracle and harness contracts the pipeline drives.

pub mod chat_client;
pub mod descriptor;
pub mod error;
pub mod harness;
pub mod metrics;
pub mod oracle;
pub mod snapshot;
pub mod trajectory;
pub mod types;
