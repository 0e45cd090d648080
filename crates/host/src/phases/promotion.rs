// crates/host/src/phases/promotion.rs

//! Promotion: fold surviving tools into the next base snapshot.

use anyhow::{bail, Result};
use tracing::{info, warn};

use libgen_core::snapshot::{Addend, Snapshot};

use super::AcceptedTool;

/// Append each survivor's body to `previous`, one at a time and in the order
/// given, so survivor order decides tool order in the result.
pub fn promote(
    previous: &Snapshot,
    accepted: &[AcceptedTool],
    survivors: &[String],
) -> Result<Snapshot> {
    survivors.iter().try_fold(previous.clone(), |snapshot, name| {
        let Some(tool) = accepted.iter().find(|t| &t.name == name) else {
            bail!("survivor `{}` is not among the accepted tools", name);
        };
        if snapshot.contains_tool(name) {
            warn!(tool = %name, "already in the base snapshot, skipping");
            return Ok(snapshot);
        }
        let next = snapshot.compose(&Addend::Function(tool.source.clone()));
        info!(tool = %name, snapshot = next.id(), "tool promoted");
        Ok(next)
    })
}
