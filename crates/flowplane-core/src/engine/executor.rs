//! Paired executor registry and transport seam.
//!
//! Remote nodes are shipped to a paired executor agent over a duplex channel
//! the infrastructure layer owns. The engine only needs two things: pick an
//! available executor matching the node's capability (and pool, for
//! `executor` mode), and push a `DispatchRequest` down the transport. Results
//! come back through `NodeDispatcher::resolve`, whichever way they arrived.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

/// A connected executor agent and what it can do.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorInfo {
    pub executor_id: String,
    pub organization_id: Uuid,
    /// Named pool for `executor`-mode selection. Device agents register the
    /// implicit "local" pool.
    pub pool: String,
    /// Node kind strings this executor accepts, e.g. "http.request".
    pub capabilities: Vec<String>,
}

impl ExecutorInfo {
    pub fn supports(&self, capability: &str) -> bool {
        self.capabilities.iter().any(|c| c == capability)
    }
}

/// Live registry of paired executors, keyed by executor id.
///
/// Registration tracks connection state only; it is not durable. A restart
/// empties the registry and executors re-pair.
#[derive(Default)]
pub struct ExecutorRegistry {
    executors: DashMap<String, ExecutorInfo>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, info: ExecutorInfo) {
        self.executors.insert(info.executor_id.clone(), info);
    }

    pub fn unregister(&self, executor_id: &str) {
        self.executors.remove(executor_id);
    }

    pub fn len(&self) -> usize {
        self.executors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.executors.is_empty()
    }

    /// Pick an executor for the organization matching capability and, when
    /// given, pool. Deterministic: lowest executor id wins, so tests and
    /// retries select stably.
    pub fn select(
        &self,
        organization_id: &Uuid,
        pool: Option<&str>,
        capability: &str,
    ) -> Option<ExecutorInfo> {
        self.executors
            .iter()
            .filter(|entry| {
                let e = entry.value();
                e.organization_id == *organization_id
                    && e.supports(capability)
                    && pool.is_none_or(|p| e.pool == p)
            })
            .min_by(|a, b| a.key().cmp(b.key()))
            .map(|entry| entry.value().clone())
    }
}

/// One unit of remote work addressed to an executor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchRequest {
    /// Correlates the eventual result back to the dispatch event.
    pub request_id: Uuid,
    pub run_id: Uuid,
    pub organization_id: Uuid,
    pub node_id: String,
    /// Node kind string, doubles as the required capability.
    pub kind: String,
    /// The node's config, serialized for the executor.
    pub config: Value,
    /// Context snapshot the executor may template against.
    pub context: Value,
}

/// A remote execution result, however it arrived (push or poll).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteResult {
    pub request_id: Uuid,
    pub run_id: Uuid,
    pub node_id: String,
    pub success: bool,
    #[serde(default)]
    pub output: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Transport failure pushing a dispatch to an executor.
#[derive(Debug, Error)]
#[error("transport to executor '{executor_id}' failed: {message}")]
pub struct TransportError {
    pub executor_id: String,
    pub message: String,
}

/// Outbound half of the executor channel.
pub trait ExecutorTransport: Send + Sync {
    fn send(
        &self,
        executor_id: &str,
        request: DispatchRequest,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;
}
