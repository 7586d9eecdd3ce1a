//! Node dispatch: execution locale decision and remote result resolution.
//!
//! `dispatch` either executes the node inline (through the `NodeRunner`,
//! honoring its bounded retry policy) or ships it to a paired executor and
//! returns immediately with the dispatch `request_id`. `resolve` is the
//! single entry point for remote results regardless of how they arrived
//! (inbound push or outbound poll); it appends the result events and
//! re-enqueues the run so any worker can continue it.

use std::sync::Arc;

use serde_json::json;
use tracing::{debug, warn};
use uuid::Uuid;

use flowplane_types::dsl::{ExecutionMode, Node};
use flowplane_types::error::EngineError;
use flowplane_types::event::{EventLevel, NewRunEvent, RunEventType};
use flowplane_types::workflow::WorkflowRun;

use crate::queue::{RunJob, RunQueue};
use crate::repository::{EventRepository, RunRepository};

use super::context::RunContext;
use super::executor::{DispatchRequest, ExecutorRegistry, ExecutorTransport, RemoteResult};
use super::node_runner::{NodeResult, NodeRunner};

/// What `dispatch` produced.
#[derive(Debug)]
pub enum DispatchOutcome {
    /// The node ran inline. `Err` carries the final failure message after
    /// retries were exhausted.
    Completed(Result<NodeResult, String>),
    /// The node was shipped to a remote executor; the run should suspend
    /// until the result is resolved.
    Pending { request_id: Uuid },
}

/// Decides execution locale per node and consumes remote results.
pub struct NodeDispatcher<S, R, T, Q> {
    store: Arc<S>,
    runner: Arc<R>,
    registry: Arc<ExecutorRegistry>,
    transport: Arc<T>,
    queue: Arc<Q>,
}

impl<S, R, T, Q> NodeDispatcher<S, R, T, Q>
where
    S: RunRepository + EventRepository,
    R: NodeRunner,
    T: ExecutorTransport,
    Q: RunQueue,
{
    pub fn new(
        store: Arc<S>,
        runner: Arc<R>,
        registry: Arc<ExecutorRegistry>,
        transport: Arc<T>,
        queue: Arc<Q>,
    ) -> Self {
        Self {
            store,
            runner,
            registry,
            transport,
            queue,
        }
    }

    pub fn registry(&self) -> &ExecutorRegistry {
        &self.registry
    }

    /// Execute one node in its configured locale.
    pub async fn dispatch(
        &self,
        run: &WorkflowRun,
        node: &Node,
        ctx: &RunContext,
    ) -> Result<DispatchOutcome, EngineError> {
        match &node.execution {
            ExecutionMode::Inline => Ok(DispatchOutcome::Completed(
                self.run_inline(run, node, ctx).await,
            )),
            ExecutionMode::NodeLocal => self.dispatch_remote(run, node, ctx, "local").await,
            ExecutionMode::Executor { pool } => self.dispatch_remote(run, node, ctx, pool).await,
        }
    }

    /// Inline execution with the node's bounded retry policy. Returns the
    /// final result; per-attempt failures before the last are logged, not
    /// recorded as events.
    async fn run_inline(
        &self,
        run: &WorkflowRun,
        node: &Node,
        ctx: &RunContext,
    ) -> Result<NodeResult, String> {
        let max_attempts = node.retry.as_ref().map_or(1, |r| r.max_attempts.max(1));
        let mut last_error = String::new();
        for attempt in 1..=max_attempts {
            match self.runner.run(run, node, ctx).await {
                Ok(result) => return Ok(result),
                Err(err) => {
                    last_error = err.to_string();
                    if attempt < max_attempts {
                        debug!(
                            run_id = %run.run_id,
                            node_id = %node.id,
                            attempt,
                            error = %last_error,
                            "node attempt failed, retrying"
                        );
                    }
                }
            }
        }
        Err(last_error)
    }

    async fn dispatch_remote(
        &self,
        run: &WorkflowRun,
        node: &Node,
        ctx: &RunContext,
        pool: &str,
    ) -> Result<DispatchOutcome, EngineError> {
        let capability = node.config.kind();
        let executor = self
            .registry
            .select(&run.organization_id, Some(pool), capability)
            .ok_or_else(|| EngineError::NoExecutorAvailable {
                capability: capability.to_string(),
            })?;

        let request_id = Uuid::now_v7();
        // Event first: a crash between append and send leaves an unresolved
        // dispatch the timeout sweep will fail, never silent loss.
        self.store
            .append_event(
                NewRunEvent::new(
                    run.run_id,
                    RunEventType::NodeDispatched,
                    format!("node '{}' dispatched to executor '{}'", node.id, executor.executor_id),
                )
                .at_node(node.id.clone())
                .attempt(run.attempt_count)
                .payload(json!({
                    "request_id": request_id,
                    "executor_id": executor.executor_id,
                    "pool": pool,
                })),
            )
            .await?;

        let request = DispatchRequest {
            request_id,
            run_id: run.run_id,
            organization_id: run.organization_id,
            node_id: node.id.clone(),
            kind: capability.to_string(),
            config: serde_json::to_value(&node.config).unwrap_or_default(),
            context: ctx.to_value(),
        };
        if let Err(err) = self.transport.send(&executor.executor_id, request).await {
            warn!(run_id = %run.run_id, node_id = %node.id, error = %err, "dispatch send failed");
            return Ok(DispatchOutcome::Completed(Err(err.to_string())));
        }

        debug!(run_id = %run.run_id, node_id = %node.id, %request_id, "node dispatched");
        Ok(DispatchOutcome::Pending { request_id })
    }

    /// Consume a remote result. Idempotent on `request_id`: matching starts
    /// at the dispatch event and scans forward in append order, so a
    /// duplicate or late result is ignored. Returns whether this call
    /// resolved the dispatch.
    pub async fn resolve(&self, result: RemoteResult) -> Result<bool, EngineError> {
        let events = self.store.replay_events(&result.run_id).await?;
        let request_id = json!(result.request_id);
        let Some(dispatched) = events.iter().find(|e| {
            e.event_type == RunEventType::NodeDispatched
                && e.payload.get("request_id") == Some(&request_id)
        }) else {
            warn!(run_id = %result.run_id, request_id = %result.request_id, "result for unknown dispatch");
            return Ok(false);
        };
        let already_resolved = events.iter().any(|e| {
            e.seq > dispatched.seq
                && e.event_type == RunEventType::RemoteResultReceived
                && e.payload.get("request_id") == Some(&request_id)
        });
        if already_resolved {
            return Ok(false);
        }

        let run = self
            .store
            .get_run(&result.run_id)
            .await?
            .ok_or(EngineError::RunNotFound(result.run_id))?;

        self.store
            .append_event(
                NewRunEvent::new(
                    run.run_id,
                    RunEventType::RemoteResultReceived,
                    format!("remote result received for node '{}'", result.node_id),
                )
                .at_node(result.node_id.clone())
                .attempt(run.attempt_count)
                .payload(json!({ "request_id": result.request_id, "success": result.success })),
            )
            .await?;

        if result.success {
            self.store
                .append_event(
                    NewRunEvent::new(
                        run.run_id,
                        RunEventType::NodeSucceeded,
                        format!("node '{}' succeeded", result.node_id),
                    )
                    .at_node(result.node_id.clone())
                    .attempt(run.attempt_count)
                    .payload(json!({ "output": result.output })),
                )
                .await?;
        } else {
            let error = result.error.as_deref().unwrap_or("remote execution failed");
            self.store
                .append_event(
                    NewRunEvent::new(
                        run.run_id,
                        RunEventType::NodeFailed,
                        format!("node '{}' failed: {error}", result.node_id),
                    )
                    .at_node(result.node_id.clone())
                    .attempt(run.attempt_count)
                    .level(EventLevel::Error)
                    .payload(json!({ "error": error })),
                )
                .await?;
        }

        self.queue
            .enqueue(RunJob::resume(run.run_id, run.organization_id))
            .await?;
        Ok(true)
    }
}
