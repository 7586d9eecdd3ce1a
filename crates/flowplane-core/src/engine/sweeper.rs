//! Time-based sweeps for the two suspension timeouts.
//!
//! The sweeps run outside any request path. Approval expiry flips pending
//! requests to expired and fails their runs through the gate's optimistic
//! checks. Dispatch expiry fails remote steps whose result never arrived and
//! re-enqueues the run so a worker surfaces the failure through the normal
//! state machine path. The stranded sweep re-enqueues queued runs whose job
//! was lost between the status flip and the queue handoff.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use tracing::warn;

use flowplane_types::error::EngineError;
use flowplane_types::event::{EventLevel, NewRunEvent, RunEventType};

use crate::queue::{RunJob, RunQueue};
use crate::repository::EngineStore;

use super::approval::ApprovalGate;

/// How long a queued run may sit without a lease before the stranded sweep
/// re-enqueues it. Long enough that a healthy queue drains the run first.
const STRANDED_GRACE_SECS: i64 = 60;

pub struct Sweeper<S, Q> {
    store: Arc<S>,
    queue: Arc<Q>,
    gate: ApprovalGate<S, Q>,
    dispatch_timeout_secs: i64,
}

impl<S, Q> Sweeper<S, Q>
where
    S: EngineStore,
    Q: RunQueue,
{
    pub fn new(store: Arc<S>, queue: Arc<Q>, dispatch_timeout_secs: i64) -> Self {
        let gate = ApprovalGate::new(store.clone(), queue.clone());
        Self {
            store,
            queue,
            gate,
            dispatch_timeout_secs,
        }
    }

    /// Expire overdue approvals and fail their runs. Returns how many
    /// expired.
    pub async fn sweep_approvals(&self, now: DateTime<Utc>) -> Result<usize, EngineError> {
        let expired = self.gate.expire(now).await?;
        Ok(expired.len())
    }

    /// Fail dispatches that stayed unresolved past the timeout and
    /// re-enqueue their runs. Returns how many timed out.
    pub async fn sweep_dispatches(&self, now: DateTime<Utc>) -> Result<usize, EngineError> {
        let cutoff = now - Duration::seconds(self.dispatch_timeout_secs);
        let overdue = self.store.list_unresolved_dispatches(cutoff).await?;
        let mut failed = 0usize;
        for dispatch in overdue {
            let Some(run) = self.store.get_run(&dispatch.run_id).await? else {
                continue;
            };
            if run.status.is_terminal() {
                continue;
            }
            let Some(node_id) = dispatch.node_id.clone() else {
                continue;
            };
            warn!(
                run_id = %dispatch.run_id,
                node_id = %node_id,
                "dispatch timed out"
            );
            self.store
                .append_event(
                    NewRunEvent::new(
                        dispatch.run_id,
                        RunEventType::NodeFailed,
                        format!("node '{node_id}' failed: dispatch timed out"),
                    )
                    .at_node(node_id)
                    .attempt(run.attempt_count)
                    .level(EventLevel::Error)
                    .payload(json!({
                        "error": "dispatch timed out",
                        "request_id": dispatch.payload.get("request_id"),
                    })),
                )
                .await?;
            self.queue
                .enqueue(RunJob::resume(run.run_id, run.organization_id))
                .await?;
            failed += 1;
        }
        Ok(failed)
    }

    /// Re-enqueue queued runs whose job never made it onto the queue. A run
    /// lands here when the producer crashed between the status flip and the
    /// handoff, or when an approval resume's enqueue failed. Safe against a
    /// job that is merely slow: a duplicate job loses the claim and is a
    /// no-op. Returns how many were re-enqueued.
    pub async fn sweep_stranded(&self, now: DateTime<Utc>) -> Result<usize, EngineError> {
        let cutoff = now - Duration::seconds(STRANDED_GRACE_SECS);
        let stranded = self.store.list_unleased_queued(cutoff).await?;
        let mut requeued = 0usize;
        for run in stranded {
            warn!(run_id = %run.run_id, "queued run has no job, re-enqueueing");
            let job = if run.started_at.is_none() {
                RunJob::start(run.run_id, run.organization_id)
            } else {
                RunJob::resume(run.run_id, run.organization_id)
            };
            self.queue.enqueue(job).await?;
            requeued += 1;
        }
        Ok(requeued)
    }
}
