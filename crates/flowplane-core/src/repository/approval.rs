//! Approval request storage port.

use chrono::{DateTime, Utc};
use flowplane_types::approval::{ApprovalDecision, ApprovalRequest};
use flowplane_types::error::RepositoryError;
use uuid::Uuid;

/// Persistence contract for approval requests.
pub trait ApprovalRepository: Send + Sync {
    fn create_approval(
        &self,
        approval: &ApprovalRequest,
    ) -> impl Future<Output = Result<(), RepositoryError>> + Send;

    fn get_approval(
        &self,
        id: &Uuid,
    ) -> impl Future<Output = Result<Option<ApprovalRequest>, RepositoryError>> + Send;

    /// Record a decision iff the request is still pending (single
    /// conditional update). Returns `true` when this call transitioned the
    /// request; `false` when it was already decided or expired.
    fn mark_decided(
        &self,
        id: &Uuid,
        decision: ApprovalDecision,
        decided_by_user_id: Option<Uuid>,
        decision_note: Option<&str>,
    ) -> impl Future<Output = Result<bool, RepositoryError>> + Send;

    /// Flip pending requests past their `expires_at` to `expired` and
    /// return them (timeout sweep input).
    fn expire_pending(
        &self,
        now: DateTime<Utc>,
    ) -> impl Future<Output = Result<Vec<ApprovalRequest>, RepositoryError>> + Send;
}
