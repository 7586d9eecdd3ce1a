//! Workflow run storage port.
//!
//! The run row carries both the lifecycle status and the single-writer claim
//! lease. Every transition that must be atomic (claim, block, resume,
//! fail-blocked) is a single conditional update whose success is reported by
//! the return value -- callers never issue read-then-write pairs.

use chrono::{DateTime, Utc};
use flowplane_types::error::RepositoryError;
use flowplane_types::workflow::{BlockedState, RunStatus, WorkflowRun};
use uuid::Uuid;

/// Persistence contract for workflow runs.
pub trait RunRepository: Send + Sync {
    /// Create a freshly admitted run record.
    fn create_run(
        &self,
        run: &WorkflowRun,
    ) -> impl Future<Output = Result<(), RepositoryError>> + Send;

    /// Hard-delete a run (queue handoff compensation only).
    /// Returns `true` if the run existed.
    fn delete_run(
        &self,
        run_id: &Uuid,
    ) -> impl Future<Output = Result<bool, RepositoryError>> + Send;

    fn get_run(
        &self,
        run_id: &Uuid,
    ) -> impl Future<Output = Result<Option<WorkflowRun>, RepositoryError>> + Send;

    /// Runs of a definition revision, newest first.
    fn list_runs(
        &self,
        workflow_id: &Uuid,
        limit: u32,
    ) -> impl Future<Output = Result<Vec<WorkflowRun>, RepositoryError>> + Send;

    /// Queued runs with no lease created at or before `cutoff`. These are
    /// runs whose enqueue never happened or was lost (a producer crash, or a
    /// resume whose queue handoff failed); the sweeper re-enqueues them.
    fn list_unleased_queued(
        &self,
        cutoff: DateTime<Utc>,
    ) -> impl Future<Output = Result<Vec<WorkflowRun>, RepositoryError>> + Send;

    /// Claim a run for processing: succeeds iff the run is `queued`, or
    /// `running` with no lease (awaiting-remote continuation) or an expired
    /// lease (crashed worker reclaim). On success
    /// the run is `running`, holds the caller's lease, and `started_at` is
    /// set on first claim only. Returns the claimed run, or `None` when the
    /// claim was lost.
    fn claim_run(
        &self,
        run_id: &Uuid,
        worker_id: &str,
        lease_until: DateTime<Utc>,
    ) -> impl Future<Output = Result<Option<WorkflowRun>, RepositoryError>> + Send;

    /// Release the lease without changing status (suspension points).
    /// No-op when the caller no longer holds the lease.
    fn release_lease(
        &self,
        run_id: &Uuid,
        worker_id: &str,
    ) -> impl Future<Output = Result<(), RepositoryError>> + Send;

    /// `running -> blocked` with the blocked fields, atomically; clears the
    /// lease. Returns `false` when the run was not `running`.
    fn block_run(
        &self,
        run_id: &Uuid,
        blocked: &BlockedState,
    ) -> impl Future<Output = Result<bool, RepositoryError>> + Send;

    /// `blocked -> queued` with an optimistic check on `blocked_request_id`;
    /// clears blocked fields and increments `attempt_count`. Returns `false`
    /// when the run was not blocked on that request (safe no-op for replayed
    /// resume messages and concurrent decisions).
    fn resume_blocked(
        &self,
        run_id: &Uuid,
        request_id: &Uuid,
    ) -> impl Future<Output = Result<bool, RepositoryError>> + Send;

    /// `blocked -> failed` with the same optimistic check (rejection or
    /// timeout). Returns `false` when the run was not blocked on that
    /// request.
    fn fail_blocked(
        &self,
        run_id: &Uuid,
        request_id: &Uuid,
        error: &str,
    ) -> impl Future<Output = Result<bool, RepositoryError>> + Send;

    /// Terminal transition from `running`; sets `ended_at` and clears the
    /// lease.
    fn finish_run(
        &self,
        run_id: &Uuid,
        status: RunStatus,
        error: Option<&str>,
    ) -> impl Future<Output = Result<(), RepositoryError>> + Send;
}
