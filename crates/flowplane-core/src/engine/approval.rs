//! Approval gate: exactly-once decisions and blocked-run resumption.
//!
//! The gate is the only component permitted to move a blocked run back into
//! the queue. Both halves are conditional store updates: `mark_decided` wins
//! or loses on the pending status, `resume_blocked` wins or loses on the
//! blocked request id. Losing either race is reported, never retried, so two
//! concurrent decisions produce one resumption.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use flowplane_types::approval::{ApprovalDecision, ApprovalRequest};
use flowplane_types::error::{ApprovalError, RepositoryError};
use flowplane_types::event::{EventLevel, NewRunEvent, RunEventType};

use crate::queue::{RunJob, RunQueue};
use crate::repository::EngineStore;

/// Result of a decision call.
#[derive(Debug, Clone)]
pub struct DecisionOutcome {
    pub approval: ApprovalRequest,
    /// Whether this call moved the blocked run back into the queue.
    pub resumed: bool,
}

pub struct ApprovalGate<S, Q> {
    store: Arc<S>,
    queue: Arc<Q>,
}

impl<S, Q> ApprovalGate<S, Q>
where
    S: EngineStore,
    Q: RunQueue,
{
    pub fn new(store: Arc<S>, queue: Arc<Q>) -> Self {
        Self { store, queue }
    }

    /// Record a decision on a pending approval. The first decision wins; a
    /// second call fails with `AlreadyDecided` and has no side effect.
    pub async fn decide(
        &self,
        approval_id: Uuid,
        decision: ApprovalDecision,
        decided_by_user_id: Option<Uuid>,
        note: Option<&str>,
    ) -> Result<DecisionOutcome, ApprovalError> {
        let approval = self
            .store
            .get_approval(&approval_id)
            .await?
            .ok_or(ApprovalError::NotFound)?;

        if !self
            .store
            .mark_decided(&approval_id, decision, decided_by_user_id, note)
            .await?
        {
            return Err(ApprovalError::AlreadyDecided(approval_id));
        }

        let resumed = match decision {
            ApprovalDecision::Approved => {
                let resumed = self
                    .store
                    .resume_blocked(&approval.run_id, &approval_id)
                    .await?;
                if resumed {
                    self.store
                        .append_event(
                            NewRunEvent::new(
                                approval.run_id,
                                RunEventType::RunResumed,
                                format!("approval granted for node '{}'", approval.node_id),
                            )
                            .at_node(approval.node_id.clone())
                            .payload(json!({
                                "node_id": approval.node_id,
                                "request_id": approval_id,
                                "decision": "approved",
                            })),
                        )
                        .await?;
                    let run = self
                        .store
                        .get_run(&approval.run_id)
                        .await?
                        .ok_or(ApprovalError::NotFound)?;
                    // A failed enqueue leaves the run queued with no lease
                    // and no job; the stranded sweep re-enqueues it.
                    self.queue
                        .enqueue(RunJob::resume(run.run_id, run.organization_id))
                        .await
                        .map_err(ApprovalError::QueueUnavailable)?;
                    info!(run_id = %approval.run_id, %approval_id, "blocked run resumed");
                } else {
                    // Decided but the run was no longer blocked on this
                    // request (e.g. already failed by the timeout sweep).
                    warn!(run_id = %approval.run_id, %approval_id, "approval decided but run not resumed");
                }
                resumed
            }
            ApprovalDecision::Rejected => {
                let failed = self
                    .store
                    .fail_blocked(&approval.run_id, &approval_id, "approval rejected")
                    .await?;
                if failed {
                    self.store
                        .append_event(
                            NewRunEvent::new(
                                approval.run_id,
                                RunEventType::RunFailed,
                                format!("approval rejected for node '{}'", approval.node_id),
                            )
                            .at_node(approval.node_id.clone())
                            .level(EventLevel::Error)
                            .payload(json!({
                                "request_id": approval_id,
                                "error": "approval rejected",
                            })),
                        )
                        .await?;
                    info!(run_id = %approval.run_id, %approval_id, "blocked run rejected");
                }
                false
            }
        };

        let approval = self
            .store
            .get_approval(&approval_id)
            .await?
            .ok_or(ApprovalError::NotFound)?;
        Ok(DecisionOutcome { approval, resumed })
    }

    /// Expire pending approvals past their deadline and fail their runs.
    /// Called by the sweeper; safe to run concurrently with decisions (the
    /// pending check and the blocked check each race at the store).
    pub async fn expire(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<ApprovalRequest>, RepositoryError> {
        let expired = self.store.expire_pending(now).await?;
        for approval in &expired {
            let failed = self
                .store
                .fail_blocked(&approval.run_id, &approval.id, "approval timed out")
                .await?;
            if failed {
                self.store
                    .append_event(
                        NewRunEvent::new(
                            approval.run_id,
                            RunEventType::RunFailed,
                            format!("approval timed out for node '{}'", approval.node_id),
                        )
                        .at_node(approval.node_id.clone())
                        .level(EventLevel::Error)
                        .payload(json!({
                            "request_id": approval.id,
                            "error": "approval timed out",
                        })),
                    )
                    .await?;
                warn!(run_id = %approval.run_id, approval_id = %approval.id, "approval expired, run failed");
            }
        }
        Ok(expired)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::test_support::TestQueue;
    use crate::queue::JobKind;
    use crate::repository::memory::MemoryStore;
    use crate::repository::{ApprovalRepository, RunRepository};
    use flowplane_types::approval::ApprovalStatus;
    use flowplane_types::workflow::{BlockedState, RunStatus, WorkflowRun};
    use serde_json::json;

    struct Fixture {
        store: Arc<MemoryStore>,
        queue: Arc<TestQueue>,
        gate: ApprovalGate<MemoryStore, TestQueue>,
        run: WorkflowRun,
        approval: ApprovalRequest,
    }

    async fn blocked_fixture(expires_at: DateTime<Utc>) -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let queue = Arc::new(TestQueue::new());
        let gate = ApprovalGate::new(store.clone(), queue.clone());

        let run = WorkflowRun::admitted(Uuid::now_v7(), Uuid::now_v7(), "manual", None, json!({}));
        store.create_run(&run).await.unwrap();
        let lease = Utc::now() + chrono::Duration::seconds(60);
        store.claim_run(&run.run_id, "w1", lease).await.unwrap();

        let approval = ApprovalRequest::pending(
            run.run_id,
            "payout",
            Some("large payout".to_string()),
            json!({"amount": 9000}),
            None,
            expires_at,
        );
        store.create_approval(&approval).await.unwrap();
        let blocked = BlockedState {
            request_id: approval.id,
            node_id: "payout".to_string(),
            node_type: "http.request".to_string(),
            kind: "approval".to_string(),
            blocked_at: Utc::now(),
            timeout_at: expires_at,
        };
        assert!(store.block_run(&run.run_id, &blocked).await.unwrap());

        Fixture {
            store,
            queue,
            gate,
            run,
            approval,
        }
    }

    #[tokio::test]
    async fn approve_resumes_exactly_once() {
        let f = blocked_fixture(Utc::now() + chrono::Duration::hours(1)).await;

        let outcome = f
            .gate
            .decide(f.approval.id, ApprovalDecision::Approved, None, Some("lgtm"))
            .await
            .unwrap();
        assert!(outcome.resumed);
        assert_eq!(outcome.approval.status, ApprovalStatus::Approved);
        assert_eq!(outcome.approval.decision_note.as_deref(), Some("lgtm"));

        let run = f.store.get_run(&f.run.run_id).await.unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Queued);
        assert_eq!(run.attempt_count, 1);
        assert!(run.blocked.is_none());

        let jobs = f.queue.jobs();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].kind, JobKind::Resume);

        // Second decision loses.
        let err = f
            .gate
            .decide(f.approval.id, ApprovalDecision::Rejected, None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, ApprovalError::AlreadyDecided(_)));
        // And enqueues nothing further.
        assert_eq!(f.queue.jobs().len(), 1);
    }

    #[tokio::test]
    async fn approve_with_failed_enqueue_is_recovered_by_stranded_sweep() {
        let f = blocked_fixture(Utc::now() + chrono::Duration::hours(1)).await;
        f.queue.set_fail(true);

        let err = f
            .gate
            .decide(f.approval.id, ApprovalDecision::Approved, None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, ApprovalError::QueueUnavailable(_)));

        // The decision stuck and the run is queued, but no job made it out.
        let run = f.store.get_run(&f.run.run_id).await.unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Queued);
        assert!(run.blocked.is_none());
        assert!(f.queue.jobs().is_empty());
        let err = f
            .gate
            .decide(f.approval.id, ApprovalDecision::Approved, None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, ApprovalError::AlreadyDecided(_)));

        // Once the queue is healthy again the stranded sweep re-enqueues.
        f.queue.set_fail(false);
        let sweeper = crate::engine::Sweeper::new(f.store.clone(), f.queue.clone(), 300);
        let later = Utc::now() + chrono::Duration::seconds(61);
        assert_eq!(sweeper.sweep_stranded(later).await.unwrap(), 1);
        let jobs = f.queue.jobs();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].run_id, f.run.run_id);
        assert_eq!(jobs[0].kind, JobKind::Resume);
    }

    #[tokio::test]
    async fn reject_fails_run() {
        let f = blocked_fixture(Utc::now() + chrono::Duration::hours(1)).await;

        let outcome = f
            .gate
            .decide(f.approval.id, ApprovalDecision::Rejected, None, None)
            .await
            .unwrap();
        assert!(!outcome.resumed);
        assert_eq!(outcome.approval.status, ApprovalStatus::Rejected);

        let run = f.store.get_run(&f.run.run_id).await.unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(run.error.as_deref(), Some("approval rejected"));
        assert!(f.queue.jobs().is_empty());
    }

    #[tokio::test]
    async fn unknown_approval_not_found() {
        let f = blocked_fixture(Utc::now() + chrono::Duration::hours(1)).await;
        let err = f
            .gate
            .decide(Uuid::now_v7(), ApprovalDecision::Approved, None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, ApprovalError::NotFound));
    }

    #[tokio::test]
    async fn expiry_fails_blocked_run() {
        let f = blocked_fixture(Utc::now() - chrono::Duration::seconds(5)).await;

        let expired = f.gate.expire(Utc::now()).await.unwrap();
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].id, f.approval.id);

        let run = f.store.get_run(&f.run.run_id).await.unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(run.error.as_deref(), Some("approval timed out"));

        let stored = f.store.get_approval(&f.approval.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ApprovalStatus::Expired);

        // Deciding after expiry loses.
        let err = f
            .gate
            .decide(f.approval.id, ApprovalDecision::Approved, None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, ApprovalError::AlreadyDecided(_)));
    }
}
