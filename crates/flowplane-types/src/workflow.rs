//! Workflow definition and run types.
//!
//! A `WorkflowDefinition` is one revision of a workflow within a family.
//! Drafts are editable; a published revision is immutable and edits clone a
//! new draft. A `WorkflowRun` is one execution instance, with a blocked
//! sub-state for approval gates and lease fields for single-writer claims.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::dsl::Dsl;

// ---------------------------------------------------------------------------
// Definition
// ---------------------------------------------------------------------------

/// Lifecycle status of a definition revision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DefinitionStatus {
    Draft,
    Published,
}

impl DefinitionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DefinitionStatus::Draft => "draft",
            DefinitionStatus::Published => "published",
        }
    }
}

/// One revision of a workflow definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    /// UUIDv7 of this revision.
    pub workflow_id: Uuid,
    /// Owning tenant.
    pub organization_id: Uuid,
    /// Groups revisions of "the same" workflow.
    pub family_id: Uuid,
    /// Monotonic per family.
    pub revision: i64,
    pub status: DefinitionStatus,
    pub name: String,
    pub dsl: Dsl,
    /// Opaque canvas layout. The engine never reads this.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub editor_state: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkflowDefinition {
    pub fn is_published(&self) -> bool {
        self.status == DefinitionStatus::Published
    }
}

// ---------------------------------------------------------------------------
// Run
// ---------------------------------------------------------------------------

/// Overall status of a workflow run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Queued,
    Running,
    Blocked,
    Succeeded,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Queued => "queued",
            RunStatus::Running => "running",
            RunStatus::Blocked => "blocked",
            RunStatus::Succeeded => "succeeded",
            RunStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Succeeded | RunStatus::Failed)
    }
}

/// Fields describing why a run is blocked. Set and cleared together.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BlockedState {
    /// The pending `ApprovalRequest` this block is tied to.
    pub request_id: Uuid,
    pub node_id: String,
    pub node_type: String,
    /// Block kind, e.g. "approval".
    pub kind: String,
    pub blocked_at: DateTime<Utc>,
    pub timeout_at: DateTime<Utc>,
}

/// A single execution instance of a workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowRun {
    pub run_id: Uuid,
    pub organization_id: Uuid,
    /// Definition revision this run executes.
    pub workflow_id: Uuid,
    pub trigger_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requested_by_user_id: Option<Uuid>,
    pub status: RunStatus,
    /// Incremented each time execution resumes after a block or retry.
    pub attempt_count: u32,
    pub input: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blocked: Option<BlockedState>,
    /// Worker currently holding the run claim.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lease_worker_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lease_expires_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl WorkflowRun {
    /// Build a freshly admitted run in `Queued`.
    pub fn admitted(
        organization_id: Uuid,
        workflow_id: Uuid,
        trigger_type: impl Into<String>,
        requested_by_user_id: Option<Uuid>,
        input: serde_json::Value,
    ) -> Self {
        Self {
            run_id: Uuid::now_v7(),
            organization_id,
            workflow_id,
            trigger_type: trigger_type.into(),
            requested_by_user_id,
            status: RunStatus::Queued,
            attempt_count: 0,
            input,
            started_at: None,
            ended_at: None,
            blocked: None,
            lease_worker_id: None,
            lease_expires_at: None,
            error: None,
            created_at: Utc::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn run_status_terminal() {
        assert!(RunStatus::Succeeded.is_terminal());
        assert!(RunStatus::Failed.is_terminal());
        assert!(!RunStatus::Blocked.is_terminal());
        assert!(!RunStatus::Queued.is_terminal());
    }

    #[test]
    fn run_status_serde_snake_case() {
        let s = serde_json::to_string(&RunStatus::Blocked).unwrap();
        assert_eq!(s, "\"blocked\"");
        let parsed: RunStatus = serde_json::from_str("\"succeeded\"").unwrap();
        assert_eq!(parsed, RunStatus::Succeeded);
    }

    #[test]
    fn admitted_run_defaults() {
        let org = Uuid::now_v7();
        let wf = Uuid::now_v7();
        let run = WorkflowRun::admitted(org, wf, "webhook", None, json!({"k": "v"}));
        assert_eq!(run.status, RunStatus::Queued);
        assert_eq!(run.attempt_count, 0);
        assert!(run.started_at.is_none());
        assert!(run.blocked.is_none());
        assert!(run.lease_worker_id.is_none());
    }

    #[test]
    fn run_json_roundtrip_with_blocked_state() {
        let mut run = WorkflowRun::admitted(
            Uuid::now_v7(),
            Uuid::now_v7(),
            "manual",
            Some(Uuid::now_v7()),
            json!({}),
        );
        run.status = RunStatus::Blocked;
        run.blocked = Some(BlockedState {
            request_id: Uuid::now_v7(),
            node_id: "review".to_string(),
            node_type: "connector.action".to_string(),
            kind: "approval".to_string(),
            blocked_at: Utc::now(),
            timeout_at: Utc::now(),
        });
        let s = serde_json::to_string(&run).unwrap();
        let parsed: WorkflowRun = serde_json::from_str(&s).unwrap();
        assert_eq!(parsed.status, RunStatus::Blocked);
        assert_eq!(parsed.blocked.unwrap().node_id, "review");
    }
}
