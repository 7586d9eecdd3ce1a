//! Workflow DSL graph types.
//!
//! The canonical DSL form (v3) is a directed graph: a trigger, a map of typed
//! nodes, and a list of kinded edges. A legacy flat node-list form (v2) still
//! arrives from old clients and is upgraded to a linear v3 chain before
//! validation. The engine never sees a v2 document.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Trigger spec
// ---------------------------------------------------------------------------

/// How a workflow is started.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TriggerSpec {
    /// Started explicitly through the API.
    Manual {},
    /// Started by an inbound webhook delivery.
    Webhook {
        /// Human label for the endpoint shown in the editor.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        label: Option<String>,
    },
    /// Started by an inbound channel event (chat platform, email, ...).
    Channel {
        /// Channel identifier the subscription routes on.
        channel: String,
        /// Event type to match (e.g. "message_created").
        event_type: String,
    },
}

// ---------------------------------------------------------------------------
// Nodes
// ---------------------------------------------------------------------------

/// Where a node's work is performed.
///
/// `NodeLocal` and `Executor` are *remote*: the step is shipped to a paired
/// executor agent and its result arrives asynchronously.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ExecutionMode {
    /// Run in-process on the control plane.
    Inline,
    /// Run on the tenant's paired device agent.
    NodeLocal,
    /// Run on a remote executor drawn from a named pool.
    Executor { pool: String },
}

impl ExecutionMode {
    /// Whether this mode dispatches to a remote executor.
    pub fn is_remote(&self) -> bool {
        !matches!(self, ExecutionMode::Inline)
    }
}

impl Default for ExecutionMode {
    fn default() -> Self {
        ExecutionMode::Inline
    }
}

/// Comparison operator for condition expressions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOp {
    Eq,
    Ne,
    Contains,
    /// True when the left operand is present and not null/false/empty.
    Truthy,
}

/// A condition evaluated against the accumulated run context.
///
/// `left` is a JSON pointer into the context object (e.g. `/input/amount` or
/// `/nodes/fetch/output/status`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConditionExpr {
    pub left: String,
    pub op: ConditionOp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub right: Option<serde_json::Value>,
}

/// How a parallel join resolves its incoming branches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinMode {
    /// Every incoming branch must succeed.
    All,
    /// The first successful branch satisfies the join.
    Any,
}

/// Node-type-specific configuration.
///
/// A closed tagged enum: adding a node type is a compile-time-checked change,
/// and dispatch over node kinds is an exhaustive match.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NodeConfig {
    /// Make an HTTP request.
    HttpRequest {
        method: String,
        url: String,
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        headers: BTreeMap<String, String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        body: Option<serde_json::Value>,
    },
    /// Execute an AI agent with a prompt.
    Agent {
        agent: String,
        prompt: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        model: Option<String>,
    },
    /// Invoke a third-party connector action.
    Connector {
        provider: String,
        action: String,
        #[serde(default)]
        params: serde_json::Value,
    },
    /// Branch on a condition; outgoing edges must be cond_true/cond_false.
    Condition { expression: ConditionExpr },
    /// Join parallel upstream branches.
    ParallelJoin {
        mode: JoinMode,
        #[serde(default)]
        fail_fast: bool,
    },
}

impl NodeConfig {
    /// Stable kind string used in events, capability matching, and blocked
    /// run metadata.
    pub fn kind(&self) -> &'static str {
        match self {
            NodeConfig::HttpRequest { .. } => "http.request",
            NodeConfig::Agent { .. } => "ai.agent",
            NodeConfig::Connector { .. } => "connector.action",
            NodeConfig::Condition { .. } => "condition",
            NodeConfig::ParallelJoin { .. } => "parallel.join",
        }
    }
}

/// Execution policy attached to a node.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct NodePolicy {
    /// Pause the run and require a human sign-off before this node executes.
    #[serde(default)]
    pub require_approval: bool,
    /// Reason shown to the approver.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approval_reason: Option<String>,
    /// Override for the approval timeout.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approval_timeout_secs: Option<u64>,
}

/// Bounded retry policy for a node.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryPolicy {
    /// Maximum attempts including the first (default 1 = no retry).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

fn default_max_attempts() -> u32 {
    1
}

/// A single step in the workflow graph.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Node {
    /// User-defined node id, unique within the graph.
    pub id: String,
    /// Node-type-specific configuration.
    pub config: NodeConfig,
    /// Execution locale.
    #[serde(default)]
    pub execution: ExecutionMode,
    /// Approval/policy gate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy: Option<NodePolicy>,
    /// Bounded retry policy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryPolicy>,
}

// ---------------------------------------------------------------------------
// Edges
// ---------------------------------------------------------------------------

/// The kind of a control edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
    /// Unconditional continuation.
    Always,
    /// Taken when the source condition node evaluates true.
    CondTrue,
    /// Taken when the source condition node evaluates false.
    CondFalse,
}

/// A directed control edge between two nodes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Edge {
    pub id: String,
    pub from: String,
    pub to: String,
    pub kind: EdgeKind,
}

// ---------------------------------------------------------------------------
// DSL documents
// ---------------------------------------------------------------------------

/// Canonical (v3) workflow DSL: trigger + node map + kinded edges.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Dsl {
    pub trigger: TriggerSpec,
    /// Nodes keyed by node id. BTreeMap keeps traversal deterministic.
    pub nodes: BTreeMap<String, Node>,
    #[serde(default)]
    pub edges: Vec<Edge>,
}

impl Dsl {
    /// Nodes with no incoming edges, in key order. These are the entry
    /// points the engine seeds its ready set with.
    pub fn entry_nodes(&self) -> Vec<&Node> {
        self.nodes
            .values()
            .filter(|n| !self.edges.iter().any(|e| e.to == n.id))
            .collect()
    }

    /// Outgoing edges of a node, in declaration order.
    pub fn edges_from<'a>(&'a self, node_id: &str) -> impl Iterator<Item = &'a Edge> {
        let id = node_id.to_string();
        self.edges.iter().filter(move |e| e.from == id)
    }

    /// Incoming edges of a node, in declaration order.
    pub fn edges_to<'a>(&'a self, node_id: &str) -> impl Iterator<Item = &'a Edge> {
        let id = node_id.to_string();
        self.edges.iter().filter(move |e| e.to == id)
    }
}

/// Legacy (v2) flat node-list DSL. Order-implied: node N runs after node N-1.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DslV2 {
    pub trigger: TriggerSpec,
    pub nodes: Vec<Node>,
}

/// Envelope accepted on the wire: either form, distinguished by `version`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "version")]
pub enum DslDocument {
    #[serde(rename = "2")]
    V2(DslV2),
    #[serde(rename = "3")]
    V3(Dsl),
}

// ---------------------------------------------------------------------------
// Validation violations
// ---------------------------------------------------------------------------

/// Stable machine codes for structural DSL violations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ViolationCode {
    EmptyNodeId,
    NodeIdMismatch,
    DuplicateEdgeId,
    UnknownEdgeEndpoint,
    ConditionEdgeKindInvalid,
    ConditionBranchDuplicated,
    CondKindOnNonCondition,
    CycleDetected,
    ParallelRemoteNotSupported,
}

impl ViolationCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ViolationCode::EmptyNodeId => "EMPTY_NODE_ID",
            ViolationCode::NodeIdMismatch => "NODE_ID_MISMATCH",
            ViolationCode::DuplicateEdgeId => "DUPLICATE_EDGE_ID",
            ViolationCode::UnknownEdgeEndpoint => "UNKNOWN_EDGE_ENDPOINT",
            ViolationCode::ConditionEdgeKindInvalid => "CONDITION_EDGE_KIND_INVALID",
            ViolationCode::ConditionBranchDuplicated => "CONDITION_BRANCH_DUPLICATED",
            ViolationCode::CondKindOnNonCondition => "COND_KIND_ON_NON_CONDITION",
            ViolationCode::CycleDetected => "CYCLE_DETECTED",
            ViolationCode::ParallelRemoteNotSupported => "PARALLEL_REMOTE_NOT_SUPPORTED",
        }
    }
}

/// One structural violation found by the validator.
///
/// `node_id`/`edge_id` are set when the violation can be pinned to a graph
/// element, for UI highlighting.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DslViolation {
    pub code: ViolationCode,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edge_id: Option<String>,
}

impl DslViolation {
    pub fn new(code: ViolationCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            node_id: None,
            edge_id: None,
        }
    }

    pub fn at_node(mut self, node_id: impl Into<String>) -> Self {
        self.node_id = Some(node_id.into());
        self
    }

    pub fn at_edge(mut self, edge_id: impl Into<String>) -> Self {
        self.edge_id = Some(edge_id.into());
        self
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn http_node(id: &str) -> Node {
        Node {
            id: id.to_string(),
            config: NodeConfig::HttpRequest {
                method: "POST".to_string(),
                url: "https://example.com/hook".to_string(),
                headers: BTreeMap::new(),
                body: Some(json!({"ok": true})),
            },
            execution: ExecutionMode::Inline,
            policy: None,
            retry: None,
        }
    }

    fn two_node_dsl() -> Dsl {
        let mut nodes = BTreeMap::new();
        nodes.insert("a".to_string(), http_node("a"));
        nodes.insert("b".to_string(), http_node("b"));
        Dsl {
            trigger: TriggerSpec::Manual {},
            nodes,
            edges: vec![Edge {
                id: "e1".to_string(),
                from: "a".to_string(),
                to: "b".to_string(),
                kind: EdgeKind::Always,
            }],
        }
    }

    #[test]
    fn node_config_serde_tagged() {
        let cfg = NodeConfig::Condition {
            expression: ConditionExpr {
                left: "/input/amount".to_string(),
                op: ConditionOp::Eq,
                right: Some(json!(100)),
            },
        };
        let s = serde_json::to_string(&cfg).unwrap();
        assert!(s.contains("\"type\":\"condition\""));
        let parsed: NodeConfig = serde_json::from_str(&s).unwrap();
        assert!(matches!(parsed, NodeConfig::Condition { .. }));
    }

    #[test]
    fn node_config_kind_strings() {
        assert_eq!(
            NodeConfig::ParallelJoin {
                mode: JoinMode::All,
                fail_fast: true
            }
            .kind(),
            "parallel.join"
        );
        assert_eq!(
            NodeConfig::Agent {
                agent: "summarizer".to_string(),
                prompt: "summarize".to_string(),
                model: None
            }
            .kind(),
            "ai.agent"
        );
    }

    #[test]
    fn execution_mode_remote() {
        assert!(!ExecutionMode::Inline.is_remote());
        assert!(ExecutionMode::NodeLocal.is_remote());
        assert!(
            ExecutionMode::Executor {
                pool: "gpu".to_string()
            }
            .is_remote()
        );
    }

    #[test]
    fn execution_mode_serde() {
        let m: ExecutionMode =
            serde_json::from_value(json!({"mode": "executor", "pool": "default"})).unwrap();
        assert_eq!(
            m,
            ExecutionMode::Executor {
                pool: "default".to_string()
            }
        );
    }

    #[test]
    fn dsl_entry_nodes_and_edges() {
        let dsl = two_node_dsl();
        let entries = dsl.entry_nodes();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].id, "a");
        assert_eq!(dsl.edges_from("a").count(), 1);
        assert_eq!(dsl.edges_to("b").count(), 1);
        assert_eq!(dsl.edges_to("a").count(), 0);
    }

    #[test]
    fn dsl_document_version_tag() {
        let dsl = two_node_dsl();
        let doc = DslDocument::V3(dsl);
        let s = serde_json::to_string(&doc).unwrap();
        assert!(s.contains("\"version\":\"3\""));
        let parsed: DslDocument = serde_json::from_str(&s).unwrap();
        assert!(matches!(parsed, DslDocument::V3(_)));
    }

    #[test]
    fn dsl_v2_roundtrip() {
        let v2 = DslV2 {
            trigger: TriggerSpec::Webhook { label: None },
            nodes: vec![http_node("first"), http_node("second")],
        };
        let s = serde_json::to_string(&DslDocument::V2(v2)).unwrap();
        assert!(s.contains("\"version\":\"2\""));
        let parsed: DslDocument = serde_json::from_str(&s).unwrap();
        match parsed {
            DslDocument::V2(d) => assert_eq!(d.nodes.len(), 2),
            _ => panic!("expected v2"),
        }
    }

    #[test]
    fn violation_codes_stable() {
        assert_eq!(
            ViolationCode::ParallelRemoteNotSupported.as_str(),
            "PARALLEL_REMOTE_NOT_SUPPORTED"
        );
        let v = DslViolation::new(ViolationCode::UnknownEdgeEndpoint, "edge points nowhere")
            .at_edge("e9");
        assert_eq!(v.edge_id.as_deref(), Some("e9"));
        let s = serde_json::to_string(&v).unwrap();
        assert!(s.contains("UNKNOWN_EDGE_ENDPOINT"));
    }

    #[test]
    fn trigger_spec_serde() {
        let t = TriggerSpec::Channel {
            channel: "support".to_string(),
            event_type: "message_created".to_string(),
        };
        let s = serde_json::to_string(&t).unwrap();
        assert!(s.contains("\"type\":\"channel\""));
        let parsed: TriggerSpec = serde_json::from_str(&s).unwrap();
        assert_eq!(parsed, t);
    }
}
