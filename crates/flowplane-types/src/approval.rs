//! Approval request types.
//!
//! An `ApprovalRequest` is created exactly when a run blocks on an
//! approval-gated node, tied 1:1 to that `(run_id, node_id)` block. It is
//! resolved exactly once: the first decision (or timeout expiry) wins.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Resolution state of an approval request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
    Expired,
}

impl ApprovalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApprovalStatus::Pending => "pending",
            ApprovalStatus::Approved => "approved",
            ApprovalStatus::Rejected => "rejected",
            ApprovalStatus::Expired => "expired",
        }
    }
}

/// The decision a caller can take on a pending request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalDecision {
    Approved,
    Rejected,
}

/// A human sign-off request for a blocked run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub id: Uuid,
    pub run_id: Uuid,
    pub node_id: String,
    pub status: ApprovalStatus,
    /// Why sign-off is needed, from the node policy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Snapshot of run context shown to the approver.
    #[serde(default)]
    pub context: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requested_by_user_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decided_by_user_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decision_note: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decided_at: Option<DateTime<Utc>>,
}

impl ApprovalRequest {
    /// Build a new pending request for a blocking node.
    pub fn pending(
        run_id: Uuid,
        node_id: impl Into<String>,
        reason: Option<String>,
        context: serde_json::Value,
        requested_by_user_id: Option<Uuid>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            run_id,
            node_id: node_id.into(),
            status: ApprovalStatus::Pending,
            reason,
            context,
            requested_by_user_id,
            decided_by_user_id: None,
            decision_note: None,
            expires_at,
            created_at: Utc::now(),
            decided_at: None,
        }
    }
}
