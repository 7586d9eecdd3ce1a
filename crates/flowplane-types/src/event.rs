//! Run event log types.
//!
//! Events are append-only and causally ordered per run by a store-assigned
//! `seq`. They are the sole audit and replay source: the engine rebuilds run
//! context from `NodeSucceeded` payloads and answers "has this dispatch been
//! resolved" by scanning forward from the `NodeDispatched` event.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunEventType {
    RunStarted,
    NodeDispatched,
    RemoteResultReceived,
    NodeSucceeded,
    NodeFailed,
    NodeSkipped,
    RunBlocked,
    RunResumed,
    RunSucceeded,
    RunFailed,
}

impl RunEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunEventType::RunStarted => "run_started",
            RunEventType::NodeDispatched => "node_dispatched",
            RunEventType::RemoteResultReceived => "remote_result_received",
            RunEventType::NodeSucceeded => "node_succeeded",
            RunEventType::NodeFailed => "node_failed",
            RunEventType::NodeSkipped => "node_skipped",
            RunEventType::RunBlocked => "run_blocked",
            RunEventType::RunResumed => "run_resumed",
            RunEventType::RunSucceeded => "run_succeeded",
            RunEventType::RunFailed => "run_failed",
        }
    }
}

/// Severity for UI filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventLevel {
    Info,
    Warn,
    Error,
}

/// A persisted run event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunEvent {
    pub id: Uuid,
    /// Store-assigned, strictly increasing append order.
    pub seq: i64,
    pub run_id: Uuid,
    pub event_type: RunEventType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
    pub attempt_count: u32,
    pub level: EventLevel,
    pub message: String,
    /// Event-type-specific data: `request_id` for dispatches, `output` for
    /// node successes, `error` for failures.
    #[serde(default)]
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// An event before the store assigns `seq` and `created_at`.
#[derive(Debug, Clone)]
pub struct NewRunEvent {
    pub run_id: Uuid,
    pub event_type: RunEventType,
    pub node_id: Option<String>,
    pub attempt_count: u32,
    pub level: EventLevel,
    pub message: String,
    pub payload: serde_json::Value,
}

impl NewRunEvent {
    pub fn new(run_id: Uuid, event_type: RunEventType, message: impl Into<String>) -> Self {
        Self {
            run_id,
            event_type,
            node_id: None,
            attempt_count: 0,
            level: EventLevel::Info,
            message: message.into(),
            payload: serde_json::Value::Null,
        }
    }

    pub fn at_node(mut self, node_id: impl Into<String>) -> Self {
        self.node_id = Some(node_id.into());
        self
    }

    pub fn attempt(mut self, attempt_count: u32) -> Self {
        self.attempt_count = attempt_count;
        self
    }

    pub fn level(mut self, level: EventLevel) -> Self {
        self.level = level;
        self
    }

    pub fn payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }
}

/// One page of a cursor-paginated event read.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventPage {
    pub events: Vec<RunEvent>,
    /// Pass as `after` to fetch the next page. None when exhausted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<i64>,
}
