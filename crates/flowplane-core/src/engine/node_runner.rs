//! Inline node execution seam.
//!
//! The engine does not know what an HTTP request or connector action *does*;
//! it hands the node and the current context to a `NodeRunner` and consumes
//! the result. The production runner lives in the infrastructure crate; the
//! engine tests use canned stubs.

use serde_json::Value;
use thiserror::Error;

use flowplane_types::dsl::Node;
use flowplane_types::workflow::WorkflowRun;

use super::context::RunContext;

/// Output of a successfully executed node.
#[derive(Debug, Clone)]
pub struct NodeResult {
    pub output: Value,
}

impl NodeResult {
    pub fn new(output: Value) -> Self {
        Self { output }
    }
}

/// A node-level execution failure. Recorded as a `node_failed` event; never
/// propagated to the trigger caller.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct NodeRunError(pub String);

impl NodeRunError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Executes the work of a single inline node.
pub trait NodeRunner: Send + Sync {
    fn run(
        &self,
        run: &WorkflowRun,
        node: &Node,
        ctx: &RunContext,
    ) -> impl Future<Output = Result<NodeResult, NodeRunError>> + Send;
}
