//! The run state machine.
//!
//! `drive` processes one claimed run as far as it can go in this invocation:
//! to a terminal state, to an approval block, or to a remote-dispatch
//! suspension. Position is never stored as a row; it is recovered by
//! replaying the event log, so any worker can pick up any run. Traversal is
//! deterministic: among simultaneously ready nodes the lexicographically
//! smallest id executes first.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::{Duration, Utc};
use serde_json::json;
use tracing::{debug, info, warn};
use uuid::Uuid;

use flowplane_types::approval::ApprovalRequest;
use flowplane_types::dsl::{Dsl, Edge, EdgeKind, JoinMode, Node, NodeConfig};
use flowplane_types::error::EngineError;
use flowplane_types::event::{EventLevel, NewRunEvent, RunEvent, RunEventType};
use flowplane_types::workflow::{BlockedState, RunStatus, WorkflowRun};

use crate::queue::RunQueue;
use crate::repository::EngineStore;

use super::context::RunContext;
use super::dispatcher::{DispatchOutcome, NodeDispatcher};
use super::executor::ExecutorTransport;
use super::node_runner::NodeRunner;

/// Engine timing knobs.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Claim lease duration per drive invocation.
    pub lease_secs: i64,
    /// How long a remote dispatch may stay unresolved.
    pub dispatch_timeout_secs: i64,
    /// Default approval expiry when the node policy has no override.
    pub approval_timeout_secs: i64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            lease_secs: 60,
            dispatch_timeout_secs: 300,
            approval_timeout_secs: 86_400,
        }
    }
}

/// How a drive invocation left the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Another worker holds the claim, or the run is not claimable.
    NotClaimed,
    /// The run reached a terminal state.
    Completed(RunStatus),
    /// The run blocked on an approval; no lease is held.
    Blocked,
    /// One or more dispatches are outstanding; the lease was released and
    /// the run continues when a result is resolved.
    AwaitingRemote,
}

/// Per-node position recovered from the event log plus this invocation's
/// progress.
#[derive(Default)]
struct Replay {
    started: bool,
    succeeded: BTreeSet<String>,
    failed: BTreeSet<String>,
    skipped: BTreeSet<String>,
    /// Outstanding dispatches: node id -> request id.
    awaiting: BTreeMap<String, Uuid>,
    /// Nodes whose approval gate has been passed.
    approved: BTreeSet<String>,
}

impl Replay {
    fn from_events(events: &[RunEvent]) -> Self {
        let mut replay = Self::default();
        for event in events {
            match event.event_type {
                RunEventType::RunStarted => replay.started = true,
                RunEventType::NodeDispatched => {
                    if let (Some(node), Some(request_id)) = (
                        &event.node_id,
                        event
                            .payload
                            .get("request_id")
                            .and_then(|v| v.as_str())
                            .and_then(|s| Uuid::parse_str(s).ok()),
                    ) {
                        replay.awaiting.insert(node.clone(), request_id);
                    }
                }
                RunEventType::NodeSucceeded => {
                    if let Some(node) = &event.node_id {
                        replay.succeeded.insert(node.clone());
                        replay.failed.remove(node);
                        replay.awaiting.remove(node);
                    }
                }
                RunEventType::NodeFailed => {
                    if let Some(node) = &event.node_id {
                        replay.failed.insert(node.clone());
                        replay.awaiting.remove(node);
                    }
                }
                RunEventType::NodeSkipped => {
                    if let Some(node) = &event.node_id {
                        replay.skipped.insert(node.clone());
                    }
                }
                RunEventType::RunResumed => {
                    if let Some(node) = event.payload.get("node_id").and_then(|v| v.as_str()) {
                        replay.approved.insert(node.to_string());
                    }
                }
                _ => {}
            }
        }
        replay
    }

    fn resolved(&self, node_id: &str) -> bool {
        self.succeeded.contains(node_id)
            || self.failed.contains(node_id)
            || self.skipped.contains(node_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EdgeState {
    Active,
    /// Not traversable. `failed` distinguishes an upstream failure from an
    /// untaken branch or skipped source.
    Dead { failed: bool },
    Unresolved,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Readiness {
    Ready,
    Wait,
    Skip,
    /// Join-only: the join itself fails (upstream branch failed).
    Fail,
}

/// Drives claimed runs through their graphs.
pub struct RunEngine<S, R, T, Q> {
    store: Arc<S>,
    dispatcher: NodeDispatcher<S, R, T, Q>,
    config: EngineConfig,
}

impl<S, R, T, Q> RunEngine<S, R, T, Q>
where
    S: EngineStore,
    R: NodeRunner,
    T: ExecutorTransport,
    Q: RunQueue,
{
    pub fn new(store: Arc<S>, dispatcher: NodeDispatcher<S, R, T, Q>, config: EngineConfig) -> Self {
        Self {
            store,
            dispatcher,
            config,
        }
    }

    pub fn dispatcher(&self) -> &NodeDispatcher<S, R, T, Q> {
        &self.dispatcher
    }

    /// Claim and process one run as far as it can go.
    pub async fn drive(&self, run_id: Uuid, worker_id: &str) -> Result<Outcome, EngineError> {
        let lease_until = Utc::now() + Duration::seconds(self.config.lease_secs);
        let Some(run) = self.store.claim_run(&run_id, worker_id, lease_until).await? else {
            debug!(%run_id, worker_id, "claim lost");
            return Ok(Outcome::NotClaimed);
        };

        let definition = self
            .store
            .get_definition(&run.workflow_id)
            .await?
            .ok_or(EngineError::DefinitionNotFound(run.workflow_id))?;
        let dsl = definition.dsl;

        let events = self.store.replay_events(&run_id).await?;
        let mut replay = Replay::from_events(&events);
        let mut ctx = RunContext::from_events(run.input.clone(), &events);

        if !replay.started {
            self.store
                .append_event(
                    NewRunEvent::new(run_id, RunEventType::RunStarted, "run started")
                        .attempt(run.attempt_count),
                )
                .await?;
            replay.started = true;
        }

        // Failures resolved while the run was suspended (remote failure,
        // dispatch timeout) surface here on re-claim.
        for node_id in replay.failed.clone() {
            if !failure_absorbed(&dsl, &node_id) {
                return self
                    .fail_run(&run, &format!("node '{node_id}' failed"))
                    .await;
            }
        }

        loop {
            let edge_states = self.edge_states(&dsl, &replay, &ctx);

            // Skips first: propagate dead branches before picking work.
            let mut skipped_any = false;
            for (node_id, node) in &dsl.nodes {
                if replay.resolved(node_id) || replay.awaiting.contains_key(node_id) {
                    continue;
                }
                if readiness(node, &dsl, &edge_states) == Readiness::Skip {
                    self.store
                        .append_event(
                            NewRunEvent::new(
                                run_id,
                                RunEventType::NodeSkipped,
                                format!("node '{node_id}' skipped"),
                            )
                            .at_node(node_id.clone())
                            .attempt(run.attempt_count),
                        )
                        .await?;
                    replay.skipped.insert(node_id.clone());
                    skipped_any = true;
                }
            }
            if skipped_any {
                continue;
            }

            // Failing joins next.
            let failing_join = dsl.nodes.iter().find(|(node_id, node)| {
                !replay.resolved(node_id)
                    && !replay.awaiting.contains_key(node_id.as_str())
                    && readiness(node, &dsl, &edge_states) == Readiness::Fail
            });
            if let Some((join_id, _)) = failing_join {
                let join_id = join_id.clone();
                self.record_node_failure(&run, &join_id, "upstream branch failed")
                    .await?;
                replay.failed.insert(join_id.clone());
                if failure_absorbed(&dsl, &join_id) {
                    continue;
                }
                return self
                    .fail_run(&run, &format!("node '{join_id}' failed"))
                    .await;
            }

            // Pick the smallest ready node.
            let ready = dsl.nodes.iter().find(|(node_id, node)| {
                !replay.resolved(node_id)
                    && !replay.awaiting.contains_key(node_id.as_str())
                    && readiness(node, &dsl, &edge_states) == Readiness::Ready
            });
            let Some((node_id, node)) = ready else {
                if !replay.awaiting.is_empty() {
                    self.store.release_lease(&run_id, worker_id).await?;
                    debug!(%run_id, outstanding = replay.awaiting.len(), "awaiting remote results");
                    return Ok(Outcome::AwaitingRemote);
                }
                return self.succeed_run(&run).await;
            };
            let node_id = node_id.clone();

            // Approval gate before any execution of this node.
            if node
                .policy
                .as_ref()
                .is_some_and(|p| p.require_approval)
                && !replay.approved.contains(&node_id)
            {
                return self.block_for_approval(&run, node, &ctx).await;
            }

            match &node.config {
                NodeConfig::Condition { expression } => {
                    let result = ctx.evaluate(expression);
                    self.record_node_success(&run, &node_id, json!({ "result": result }))
                        .await?;
                    ctx.record_output(node_id.clone(), json!({ "result": result }));
                    replay.succeeded.insert(node_id);
                }
                NodeConfig::ParallelJoin { mode, .. } => {
                    let output = json!({ "joined": true, "mode": mode });
                    self.record_node_success(&run, &node_id, output.clone()).await?;
                    ctx.record_output(node_id.clone(), output);
                    replay.succeeded.insert(node_id);
                }
                _ => match self.dispatcher.dispatch(&run, node, &ctx).await? {
                    DispatchOutcome::Completed(Ok(result)) => {
                        self.record_node_success(&run, &node_id, result.output.clone())
                            .await?;
                        ctx.record_output(node_id.clone(), result.output);
                        replay.succeeded.insert(node_id);
                    }
                    DispatchOutcome::Completed(Err(error)) => {
                        self.record_node_failure(&run, &node_id, &error).await?;
                        replay.failed.insert(node_id.clone());
                        if !failure_absorbed(&dsl, &node_id) {
                            return self
                                .fail_run(&run, &format!("node '{node_id}' failed: {error}"))
                                .await;
                        }
                    }
                    DispatchOutcome::Pending { request_id } => {
                        replay.awaiting.insert(node_id, request_id);
                    }
                },
            }
        }
    }

    fn edge_states<'a>(
        &self,
        dsl: &'a Dsl,
        replay: &Replay,
        ctx: &RunContext,
    ) -> BTreeMap<&'a str, EdgeState> {
        dsl.edges
            .iter()
            .map(|edge| (edge.id.as_str(), edge_state(edge, replay, ctx)))
            .collect()
    }

    async fn record_node_success(
        &self,
        run: &WorkflowRun,
        node_id: &str,
        output: serde_json::Value,
    ) -> Result<(), EngineError> {
        self.store
            .append_event(
                NewRunEvent::new(
                    run.run_id,
                    RunEventType::NodeSucceeded,
                    format!("node '{node_id}' succeeded"),
                )
                .at_node(node_id.to_string())
                .attempt(run.attempt_count)
                .payload(json!({ "output": output })),
            )
            .await?;
        Ok(())
    }

    async fn record_node_failure(
        &self,
        run: &WorkflowRun,
        node_id: &str,
        error: &str,
    ) -> Result<(), EngineError> {
        self.store
            .append_event(
                NewRunEvent::new(
                    run.run_id,
                    RunEventType::NodeFailed,
                    format!("node '{node_id}' failed: {error}"),
                )
                .at_node(node_id.to_string())
                .attempt(run.attempt_count)
                .level(EventLevel::Error)
                .payload(json!({ "error": error })),
            )
            .await?;
        Ok(())
    }

    async fn succeed_run(&self, run: &WorkflowRun) -> Result<Outcome, EngineError> {
        self.store
            .append_event(
                NewRunEvent::new(run.run_id, RunEventType::RunSucceeded, "run succeeded")
                    .attempt(run.attempt_count),
            )
            .await?;
        self.store
            .finish_run(&run.run_id, RunStatus::Succeeded, None)
            .await?;
        info!(run_id = %run.run_id, "run succeeded");
        Ok(Outcome::Completed(RunStatus::Succeeded))
    }

    async fn fail_run(&self, run: &WorkflowRun, error: &str) -> Result<Outcome, EngineError> {
        self.store
            .append_event(
                NewRunEvent::new(run.run_id, RunEventType::RunFailed, error.to_string())
                    .attempt(run.attempt_count)
                    .level(EventLevel::Error)
                    .payload(json!({ "error": error })),
            )
            .await?;
        self.store
            .finish_run(&run.run_id, RunStatus::Failed, Some(error))
            .await?;
        warn!(run_id = %run.run_id, error, "run failed");
        Ok(Outcome::Completed(RunStatus::Failed))
    }

    async fn block_for_approval(
        &self,
        run: &WorkflowRun,
        node: &Node,
        ctx: &RunContext,
    ) -> Result<Outcome, EngineError> {
        let policy = node.policy.as_ref();
        let timeout_secs = policy
            .and_then(|p| p.approval_timeout_secs)
            .map(|s| s as i64)
            .unwrap_or(self.config.approval_timeout_secs);
        let now = Utc::now();
        let expires_at = now + Duration::seconds(timeout_secs);

        let approval = ApprovalRequest::pending(
            run.run_id,
            node.id.clone(),
            policy.and_then(|p| p.approval_reason.clone()),
            ctx.to_value(),
            run.requested_by_user_id,
            expires_at,
        );
        self.store.create_approval(&approval).await?;

        let blocked = BlockedState {
            request_id: approval.id,
            node_id: node.id.clone(),
            node_type: node.config.kind().to_string(),
            kind: "approval".to_string(),
            blocked_at: now,
            timeout_at: expires_at,
        };
        if !self.store.block_run(&run.run_id, &blocked).await? {
            return Err(EngineError::ClaimContended(run.run_id));
        }
        self.store
            .append_event(
                NewRunEvent::new(
                    run.run_id,
                    RunEventType::RunBlocked,
                    format!("run blocked awaiting approval for node '{}'", node.id),
                )
                .at_node(node.id.clone())
                .attempt(run.attempt_count)
                .payload(json!({ "request_id": approval.id, "kind": "approval" })),
            )
            .await?;
        info!(run_id = %run.run_id, node_id = %node.id, approval_id = %approval.id, "run blocked");
        Ok(Outcome::Blocked)
    }
}

fn edge_state(edge: &Edge, replay: &Replay, ctx: &RunContext) -> EdgeState {
    if replay.failed.contains(&edge.from) {
        return EdgeState::Dead { failed: true };
    }
    if replay.skipped.contains(&edge.from) {
        return EdgeState::Dead { failed: false };
    }
    if !replay.succeeded.contains(&edge.from) {
        return EdgeState::Unresolved;
    }
    match edge.kind {
        EdgeKind::Always => EdgeState::Active,
        EdgeKind::CondTrue | EdgeKind::CondFalse => {
            let result = ctx
                .output_of(&edge.from)
                .and_then(|o| o.get("result"))
                .and_then(|v| v.as_bool())
                .unwrap_or(false);
            let taken = (edge.kind == EdgeKind::CondTrue) == result;
            if taken {
                EdgeState::Active
            } else {
                EdgeState::Dead { failed: false }
            }
        }
    }
}

fn readiness(node: &Node, dsl: &Dsl, edge_states: &BTreeMap<&str, EdgeState>) -> Readiness {
    let incoming: Vec<EdgeState> = dsl
        .edges_to(&node.id)
        .map(|e| edge_states[e.id.as_str()])
        .collect();
    if incoming.is_empty() {
        return Readiness::Ready;
    }

    let active = incoming.iter().filter(|s| **s == EdgeState::Active).count();
    let unresolved = incoming
        .iter()
        .filter(|s| **s == EdgeState::Unresolved)
        .count();
    let dead_failed = incoming
        .iter()
        .filter(|s| matches!(s, EdgeState::Dead { failed: true }))
        .count();
    let dead = incoming.len() - active - unresolved;

    if let NodeConfig::ParallelJoin { mode, fail_fast } = &node.config {
        return match mode {
            JoinMode::All => {
                if dead_failed > 0 && (*fail_fast || unresolved == 0) {
                    Readiness::Fail
                } else if dead > 0 && unresolved == 0 {
                    // Non-failure dead branches make "all" unsatisfiable.
                    Readiness::Skip
                } else if unresolved == 0 {
                    Readiness::Ready
                } else {
                    Readiness::Wait
                }
            }
            JoinMode::Any => {
                if active > 0 {
                    Readiness::Ready
                } else if dead_failed > 0 && *fail_fast {
                    Readiness::Fail
                } else if unresolved == 0 {
                    if dead_failed > 0 {
                        Readiness::Fail
                    } else {
                        Readiness::Skip
                    }
                } else {
                    Readiness::Wait
                }
            }
        };
    }

    if unresolved > 0 {
        Readiness::Wait
    } else if active > 0 {
        Readiness::Ready
    } else {
        Readiness::Skip
    }
}

/// A node failure is absorbed, rather than failing the run, only when every
/// outgoing edge feeds an any-mode join without fail-fast; the join can still
/// be satisfied by a sibling branch.
fn failure_absorbed(dsl: &Dsl, node_id: &str) -> bool {
    let mut targets = dsl.edges_from(node_id).peekable();
    if targets.peek().is_none() {
        return false;
    }
    targets.all(|edge| {
        dsl.nodes.get(&edge.to).is_some_and(|target| {
            matches!(
                target.config,
                NodeConfig::ParallelJoin {
                    mode: JoinMode::Any,
                    fail_fast: false,
                }
            )
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::executor::{ExecutorRegistry, RemoteResult};
    use crate::engine::test_support::{RecordingTransport, StubRunner, TestQueue, executor_info};
    use crate::queue::JobKind;
    use crate::repository::memory::MemoryStore;
    use crate::repository::{
        ApprovalRepository, DefinitionRepository, EventRepository, RunRepository,
    };
    use flowplane_types::approval::ApprovalDecision;
    use flowplane_types::dsl::{
        ConditionExpr, ConditionOp, ExecutionMode, NodePolicy, TriggerSpec,
    };
    use flowplane_types::workflow::{DefinitionStatus, WorkflowDefinition};
    use std::collections::BTreeMap as Map;

    struct Harness {
        store: Arc<MemoryStore>,
        runner: Arc<StubRunner>,
        transport: Arc<RecordingTransport>,
        queue: Arc<TestQueue>,
        registry: Arc<ExecutorRegistry>,
        engine: RunEngine<MemoryStore, StubRunner, RecordingTransport, TestQueue>,
    }

    fn harness() -> Harness {
        let store = Arc::new(MemoryStore::new());
        let runner = Arc::new(StubRunner::new());
        let transport = Arc::new(RecordingTransport::new());
        let queue = Arc::new(TestQueue::new());
        let registry = Arc::new(ExecutorRegistry::new());
        let dispatcher = NodeDispatcher::new(
            store.clone(),
            runner.clone(),
            registry.clone(),
            transport.clone(),
            queue.clone(),
        );
        let engine = RunEngine::new(store.clone(), dispatcher, EngineConfig::default());
        Harness {
            store,
            runner,
            transport,
            queue,
            registry,
            engine,
        }
    }

    fn http_node(id: &str) -> Node {
        Node {
            id: id.to_string(),
            config: NodeConfig::HttpRequest {
                method: "GET".to_string(),
                url: "https://example.com".to_string(),
                headers: Map::new(),
                body: None,
            },
            execution: ExecutionMode::Inline,
            policy: None,
            retry: None,
        }
    }

    fn condition_node(id: &str, pointer: &str) -> Node {
        Node {
            id: id.to_string(),
            config: NodeConfig::Condition {
                expression: ConditionExpr {
                    left: pointer.to_string(),
                    op: ConditionOp::Truthy,
                    right: None,
                },
            },
            execution: ExecutionMode::Inline,
            policy: None,
            retry: None,
        }
    }

    fn join_node(id: &str, mode: JoinMode, fail_fast: bool) -> Node {
        Node {
            id: id.to_string(),
            config: NodeConfig::ParallelJoin { mode, fail_fast },
            execution: ExecutionMode::Inline,
            policy: None,
            retry: None,
        }
    }

    fn edge(id: &str, from: &str, to: &str, kind: EdgeKind) -> Edge {
        Edge {
            id: id.to_string(),
            from: from.to_string(),
            to: to.to_string(),
            kind,
        }
    }

    async fn seed(
        h: &Harness,
        nodes: Vec<Node>,
        edges: Vec<Edge>,
        input: serde_json::Value,
    ) -> WorkflowRun {
        let dsl = Dsl {
            trigger: TriggerSpec::Manual {},
            nodes: nodes.into_iter().map(|n| (n.id.clone(), n)).collect(),
            edges,
        };
        let def = WorkflowDefinition {
            workflow_id: Uuid::now_v7(),
            organization_id: Uuid::now_v7(),
            family_id: Uuid::now_v7(),
            revision: 1,
            status: DefinitionStatus::Published,
            name: "test".to_string(),
            dsl,
            editor_state: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        h.store.save_definition(&def).await.unwrap();
        let run = WorkflowRun::admitted(
            def.organization_id,
            def.workflow_id,
            "manual",
            None,
            input,
        );
        h.store.create_run(&run).await.unwrap();
        run
    }

    async fn event_types(h: &Harness, run_id: &Uuid) -> Vec<RunEventType> {
        h.store
            .replay_events(run_id)
            .await
            .unwrap()
            .iter()
            .map(|e| e.event_type)
            .collect()
    }

    #[tokio::test]
    async fn single_node_run_succeeds() {
        let h = harness();
        let run = seed(&h, vec![http_node("fetch")], vec![], json!({})).await;

        let outcome = h.engine.drive(run.run_id, "w1").await.unwrap();
        assert_eq!(outcome, Outcome::Completed(RunStatus::Succeeded));

        let stored = h.store.get_run(&run.run_id).await.unwrap().unwrap();
        assert_eq!(stored.status, RunStatus::Succeeded);
        assert_eq!(stored.attempt_count, 0);
        assert!(stored.ended_at.is_some());

        let types = event_types(&h, &run.run_id).await;
        assert_eq!(
            types,
            vec![
                RunEventType::RunStarted,
                RunEventType::NodeSucceeded,
                RunEventType::RunSucceeded,
            ]
        );
    }

    #[tokio::test]
    async fn chain_executes_in_order() {
        let h = harness();
        let run = seed(
            &h,
            vec![http_node("c-last"), http_node("a-first"), http_node("b-mid")],
            vec![
                edge("e1", "a-first", "b-mid", EdgeKind::Always),
                edge("e2", "b-mid", "c-last", EdgeKind::Always),
            ],
            json!({}),
        )
        .await;

        let outcome = h.engine.drive(run.run_id, "w1").await.unwrap();
        assert_eq!(outcome, Outcome::Completed(RunStatus::Succeeded));
        assert_eq!(h.runner.calls(), vec!["a-first", "b-mid", "c-last"]);
    }

    #[tokio::test]
    async fn condition_takes_matching_branch_and_skips_other() {
        let h = harness();
        let run = seed(
            &h,
            vec![
                condition_node("check", "/input/approved"),
                http_node("yes"),
                http_node("no"),
            ],
            vec![
                edge("e1", "check", "yes", EdgeKind::CondTrue),
                edge("e2", "check", "no", EdgeKind::CondFalse),
            ],
            json!({"approved": true}),
        )
        .await;

        let outcome = h.engine.drive(run.run_id, "w1").await.unwrap();
        assert_eq!(outcome, Outcome::Completed(RunStatus::Succeeded));
        assert_eq!(h.runner.calls(), vec!["yes"]);

        let events = h.store.replay_events(&run.run_id).await.unwrap();
        let skipped: Vec<_> = events
            .iter()
            .filter(|e| e.event_type == RunEventType::NodeSkipped)
            .filter_map(|e| e.node_id.clone())
            .collect();
        assert_eq!(skipped, vec!["no"]);
    }

    #[tokio::test]
    async fn node_failure_fails_run() {
        let h = harness();
        h.runner.program("fetch", Err("upstream 500".to_string()));
        let run = seed(
            &h,
            vec![http_node("fetch"), http_node("after")],
            vec![edge("e1", "fetch", "after", EdgeKind::Always)],
            json!({}),
        )
        .await;

        let outcome = h.engine.drive(run.run_id, "w1").await.unwrap();
        assert_eq!(outcome, Outcome::Completed(RunStatus::Failed));

        let stored = h.store.get_run(&run.run_id).await.unwrap().unwrap();
        assert_eq!(stored.status, RunStatus::Failed);
        assert!(stored.error.as_deref().unwrap().contains("fetch"));
        // Downstream node never executed.
        assert_eq!(h.runner.calls(), vec!["fetch"]);

        let types = event_types(&h, &run.run_id).await;
        assert_eq!(
            types,
            vec![
                RunEventType::RunStarted,
                RunEventType::NodeFailed,
                RunEventType::RunFailed,
            ]
        );
    }

    #[tokio::test]
    async fn bounded_retry_recovers() {
        let h = harness();
        h.runner.program("fetch", Err("flaky".to_string()));
        h.runner.program("fetch", Ok(json!({"status": 200})));
        let mut node = http_node("fetch");
        node.retry = Some(flowplane_types::dsl::RetryPolicy { max_attempts: 2 });
        let run = seed(&h, vec![node], vec![], json!({})).await;

        let outcome = h.engine.drive(run.run_id, "w1").await.unwrap();
        assert_eq!(outcome, Outcome::Completed(RunStatus::Succeeded));
        assert_eq!(h.runner.calls().len(), 2);
    }

    #[tokio::test]
    async fn parallel_branches_join_all() {
        let h = harness();
        let run = seed(
            &h,
            vec![
                http_node("left"),
                http_node("right"),
                join_node("merge", JoinMode::All, false),
                http_node("after"),
            ],
            vec![
                edge("e1", "left", "merge", EdgeKind::Always),
                edge("e2", "right", "merge", EdgeKind::Always),
                edge("e3", "merge", "after", EdgeKind::Always),
            ],
            json!({}),
        )
        .await;

        let outcome = h.engine.drive(run.run_id, "w1").await.unwrap();
        assert_eq!(outcome, Outcome::Completed(RunStatus::Succeeded));
        assert_eq!(h.runner.calls(), vec!["left", "right", "after"]);
    }

    #[tokio::test]
    async fn any_join_absorbs_branch_failure() {
        let h = harness();
        h.runner.program("left", Err("branch down".to_string()));
        let run = seed(
            &h,
            vec![
                http_node("left"),
                http_node("right"),
                join_node("merge", JoinMode::Any, false),
            ],
            vec![
                edge("e1", "left", "merge", EdgeKind::Always),
                edge("e2", "right", "merge", EdgeKind::Always),
            ],
            json!({}),
        )
        .await;

        let outcome = h.engine.drive(run.run_id, "w1").await.unwrap();
        assert_eq!(outcome, Outcome::Completed(RunStatus::Succeeded));
    }

    #[tokio::test]
    async fn all_join_fails_when_branch_fails() {
        let h = harness();
        h.runner.program("left", Err("branch down".to_string()));
        let run = seed(
            &h,
            vec![
                http_node("left"),
                http_node("right"),
                join_node("merge", JoinMode::All, true),
            ],
            vec![
                edge("e1", "left", "merge", EdgeKind::Always),
                edge("e2", "right", "merge", EdgeKind::Always),
            ],
            json!({}),
        )
        .await;

        let outcome = h.engine.drive(run.run_id, "w1").await.unwrap();
        assert_eq!(outcome, Outcome::Completed(RunStatus::Failed));
    }

    #[tokio::test]
    async fn approval_gate_blocks_run() {
        let h = harness();
        let mut gated = http_node("payout");
        gated.policy = Some(NodePolicy {
            require_approval: true,
            approval_reason: Some("large payout".to_string()),
            approval_timeout_secs: None,
        });
        let run = seed(&h, vec![gated], vec![], json!({"amount": 9000})).await;

        let outcome = h.engine.drive(run.run_id, "w1").await.unwrap();
        assert_eq!(outcome, Outcome::Blocked);

        let stored = h.store.get_run(&run.run_id).await.unwrap().unwrap();
        assert_eq!(stored.status, RunStatus::Blocked);
        let blocked = stored.blocked.unwrap();
        assert_eq!(blocked.node_id, "payout");
        assert_eq!(blocked.kind, "approval");
        assert!(stored.lease_worker_id.is_none());

        let approval = h.store.get_approval(&blocked.request_id).await.unwrap().unwrap();
        assert_eq!(approval.run_id, run.run_id);
        assert_eq!(approval.node_id, "payout");
        // The gated node never executed.
        assert!(h.runner.calls().is_empty());
    }

    #[tokio::test]
    async fn approved_run_resumes_and_completes() {
        let h = harness();
        let mut gated = http_node("payout");
        gated.policy = Some(NodePolicy {
            require_approval: true,
            approval_reason: None,
            approval_timeout_secs: None,
        });
        let run = seed(&h, vec![gated], vec![], json!({})).await;

        assert_eq!(h.engine.drive(run.run_id, "w1").await.unwrap(), Outcome::Blocked);
        let blocked = h
            .store
            .get_run(&run.run_id)
            .await
            .unwrap()
            .unwrap()
            .blocked
            .unwrap();

        // Approval decision path, as the gate performs it.
        assert!(
            h.store
                .mark_decided(&blocked.request_id, ApprovalDecision::Approved, None, None)
                .await
                .unwrap()
        );
        assert!(
            h.store
                .resume_blocked(&run.run_id, &blocked.request_id)
                .await
                .unwrap()
        );
        h.store
            .append_event(
                NewRunEvent::new(run.run_id, RunEventType::RunResumed, "approved")
                    .at_node("payout")
                    .payload(json!({"node_id": "payout", "decision": "approved"})),
            )
            .await
            .unwrap();

        let outcome = h.engine.drive(run.run_id, "w2").await.unwrap();
        assert_eq!(outcome, Outcome::Completed(RunStatus::Succeeded));
        let stored = h.store.get_run(&run.run_id).await.unwrap().unwrap();
        assert_eq!(stored.attempt_count, 1);
        assert_eq!(h.runner.calls(), vec!["payout"]);
    }

    #[tokio::test]
    async fn remote_node_suspends_then_resumes() {
        let h = harness();
        let mut remote = http_node("fetch");
        remote.execution = ExecutionMode::NodeLocal;
        let run = seed(
            &h,
            vec![remote, http_node("z-after")],
            vec![edge("e1", "fetch", "z-after", EdgeKind::Always)],
            json!({}),
        )
        .await;
        h.registry
            .register(executor_info("agent-1", run.organization_id, "local", &["http.request"]));

        let outcome = h.engine.drive(run.run_id, "w1").await.unwrap();
        assert_eq!(outcome, Outcome::AwaitingRemote);

        let stored = h.store.get_run(&run.run_id).await.unwrap().unwrap();
        assert_eq!(stored.status, RunStatus::Running);
        assert!(stored.lease_worker_id.is_none());

        let sent = h.transport.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].node_id, "fetch");

        let resolved = h
            .engine
            .dispatcher()
            .resolve(RemoteResult {
                request_id: sent[0].request_id,
                run_id: run.run_id,
                node_id: "fetch".to_string(),
                success: true,
                output: json!({"status": 200}),
                error: None,
            })
            .await
            .unwrap();
        assert!(resolved);
        let jobs = h.queue.jobs();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].kind, JobKind::Resume);

        // Another worker picks up the continuation.
        let outcome = h.engine.drive(run.run_id, "w2").await.unwrap();
        assert_eq!(outcome, Outcome::Completed(RunStatus::Succeeded));
        assert_eq!(h.runner.calls(), vec!["z-after"]);
    }

    #[tokio::test]
    async fn remote_failure_fails_run_on_resume() {
        let h = harness();
        let mut remote = http_node("fetch");
        remote.execution = ExecutionMode::NodeLocal;
        let run = seed(&h, vec![remote], vec![], json!({})).await;
        h.registry
            .register(executor_info("agent-1", run.organization_id, "local", &["http.request"]));

        assert_eq!(
            h.engine.drive(run.run_id, "w1").await.unwrap(),
            Outcome::AwaitingRemote
        );
        let sent = h.transport.sent();
        h.engine
            .dispatcher()
            .resolve(RemoteResult {
                request_id: sent[0].request_id,
                run_id: run.run_id,
                node_id: "fetch".to_string(),
                success: false,
                output: json!(null),
                error: Some("device offline".to_string()),
            })
            .await
            .unwrap();

        let outcome = h.engine.drive(run.run_id, "w2").await.unwrap();
        assert_eq!(outcome, Outcome::Completed(RunStatus::Failed));
        let stored = h.store.get_run(&run.run_id).await.unwrap().unwrap();
        assert!(stored.error.is_some());
    }

    #[tokio::test]
    async fn contended_claim_returns_not_claimed() {
        let h = harness();
        let run = seed(&h, vec![http_node("fetch")], vec![], json!({})).await;
        let lease = Utc::now() + Duration::seconds(60);
        h.store.claim_run(&run.run_id, "other", lease).await.unwrap();

        let outcome = h.engine.drive(run.run_id, "w1").await.unwrap();
        assert_eq!(outcome, Outcome::NotClaimed);
        assert!(h.runner.calls().is_empty());
    }

    #[tokio::test]
    async fn terminal_run_is_not_reprocessed() {
        let h = harness();
        let run = seed(&h, vec![http_node("fetch")], vec![], json!({})).await;
        assert_eq!(
            h.engine.drive(run.run_id, "w1").await.unwrap(),
            Outcome::Completed(RunStatus::Succeeded)
        );
        // Replayed start job.
        assert_eq!(
            h.engine.drive(run.run_id, "w1").await.unwrap(),
            Outcome::NotClaimed
        );
        assert_eq!(h.runner.calls().len(), 1);
    }
}
