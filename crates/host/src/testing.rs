// crates/host/src/testing.rs

//! Test doubles for the oracle and the execution harness.
//!
//! - [`ScriptedOracle`]: replays canned replies and records every request
//! - [`StubHarness`]: answers each run with a trajectory chosen by a closure
//!   and records the invocation

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fs;
use std::path::PathBuf;

use anyhow::Result;
use serde_json::json;

use libgen_core::error::OracleError;
use libgen_core::harness::{Harness, RunRequest, Strategy};
use libgen_core::oracle::{CompletionRequest, Oracle};
use libgen_core::trajectory::{Step, StepRole, Trajectory};

/// A toolset with one registered tool and the two-line footer.
pub const BASE_SNAPSHOT: &str = r#"from mcp.server.fastmcp import FastMCP

mcp = FastMCP("retail")

@mcp.tool()
def find_user(user_id):
    """{"name": "find_user", "description": "Look up a user.", "parameters": {"properties": {"user_id": {"type": "string"}}, "required": ["user_id"]}}"""
    return "{}"

if __name__ == "__main__":
    mcp.run()
"#;

/// A well-formed candidate body with a structured docstring.
pub fn candidate_source(name: &str) -> String {
    let doc = json!({
        "type": "function",
        "function": {
            "name": name,
            "description": "Total for an order.",
            "parameters": {
                "type": "object",
                "properties": {"order_id": {"type": "string", "description": "Order id"}},
                "required": ["order_id"]
            }
        }
    });
    format!(
        "def {}(order_id):\n    \"\"\"{}\"\"\"\n    return str(order_id)\n",
        name, doc
    )
}

/// A short trajectory in which `tool` answers with `payload`.
pub fn tool_trajectory(task_id: i64, tool: &str, payload: &str) -> Trajectory {
    Trajectory::new(
        Some(task_id),
        1.0,
        vec![
            Step::message(StepRole::User, "help me"),
            Step::tool(tool, payload),
            Step::message(StepRole::Assistant, "done"),
        ],
    )
}

/// Oracle that replays canned replies in order.
pub struct ScriptedOracle {
    replies: RefCell<VecDeque<Result<String, OracleError>>>,
    requests: RefCell<Vec<CompletionRequest>>,
}

impl ScriptedOracle {
    pub fn new(replies: Vec<String>) -> Self {
        Self::from_results(replies.into_iter().map(Ok).collect())
    }

    pub fn from_results(replies: Vec<Result<String, OracleError>>) -> Self {
        Self {
            replies: RefCell::new(replies.into()),
            requests: RefCell::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.requests.borrow().len()
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.borrow().clone()
    }
}

impl Oracle for ScriptedOracle {
    fn complete(&self, request: &CompletionRequest) -> Result<String, OracleError> {
        self.requests.borrow_mut().push(request.clone());
        self.replies
            .borrow_mut()
            .pop_front()
            .unwrap_or(Err(OracleError::EmptyReply))
    }
}

/// One recorded harness call.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub task_ids: Vec<i64>,
    pub strategy: Strategy,
    pub hint_tool: Option<String>,
    pub snapshot_path: PathBuf,
    pub snapshot_text: String,
}

/// Harness whose trajectories come from a closure over the request and the
/// snapshot text it was pointed at.
pub struct StubHarness<F> {
    respond: F,
    invocations: RefCell<Vec<Invocation>>,
}

impl<F> StubHarness<F>
where
    F: Fn(&RunRequest<'_>, &str) -> Trajectory,
{
    pub fn new(respond: F) -> Self {
        Self {
            respond,
            invocations: RefCell::new(Vec::new()),
        }
    }

    pub fn invocations(&self) -> Vec<Invocation> {
        self.invocations.borrow().clone()
    }

    /// Task ids in call order.
    pub fn invoked_ids(&self) -> Vec<i64> {
        self.invocations
            .borrow()
            .iter()
            .flat_map(|i| i.task_ids.clone())
            .collect()
    }
}

impl<F> Harness for StubHarness<F>
where
    F: Fn(&RunRequest<'_>, &str) -> Trajectory,
{
    fn run_task(&self, request: &RunRequest<'_>) -> Result<()> {
        let snapshot_text = fs::read_to_string(request.snapshot_path)?;
        let trajectory = (self.respond)(request, &snapshot_text);
        fs::write(request.output_path, serde_json::to_string(&vec![trajectory])?)?;

        self.invocations.borrow_mut().push(Invocation {
            task_ids: request.task_ids.to_vec(),
            strategy: request.strategy,
            hint_tool: request.hint_tool.map(str::to_string),
            snapshot_path: request.snapshot_path.to_path_buf(),
            snapshot_text,
        });
        Ok(())
    }
}
