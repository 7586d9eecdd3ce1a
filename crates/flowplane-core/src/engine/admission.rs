//! Trigger admission: the only path that creates runs.
//!
//! Admission is saga-shaped around the queue handoff: the run row is created
//! first so its id is stable, then the enqueue is attempted, and a producer
//! failure compensates by retracting the run (and its idempotency record).
//! The caller observes that no run was created. Idempotency keys make
//! at-least-once upstream delivery admit at most one run per
//! (subscription, key).

use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use tracing::{info, warn};
use uuid::Uuid;

use flowplane_types::error::{AdmissionError, RepositoryError};
use flowplane_types::trigger::{TriggerAdmission, TriggerSubscription};
use flowplane_types::workflow::WorkflowRun;

use crate::queue::{RunJob, RunQueue};
use crate::repository::{DefinitionRepository, RunRepository, TriggerRepository};

/// An accepted trigger delivery.
#[derive(Debug, Clone)]
pub struct Admission {
    pub run: WorkflowRun,
    /// True when a prior delivery with the same idempotency key already
    /// admitted this run; nothing new was created or enqueued.
    pub duplicate: bool,
}

pub struct AdmissionService<S, Q> {
    store: Arc<S>,
    queue: Arc<Q>,
}

impl<S, Q> AdmissionService<S, Q>
where
    S: DefinitionRepository + RunRepository + TriggerRepository,
    Q: RunQueue,
{
    pub fn new(store: Arc<S>, queue: Arc<Q>) -> Self {
        Self { store, queue }
    }

    /// Start a run on a specific published definition revision.
    pub async fn start_manual(
        &self,
        organization_id: Uuid,
        workflow_id: Uuid,
        requested_by_user_id: Option<Uuid>,
        input: Value,
    ) -> Result<WorkflowRun, AdmissionError> {
        let definition = self
            .store
            .get_definition(&workflow_id)
            .await?
            .ok_or(AdmissionError::WorkflowNotFound)?;
        if definition.organization_id != organization_id {
            return Err(AdmissionError::TenantMismatch);
        }
        if !definition.is_published() {
            return Err(AdmissionError::NotPublished(workflow_id));
        }

        let run = WorkflowRun::admitted(
            organization_id,
            workflow_id,
            "manual",
            requested_by_user_id,
            input,
        );
        self.store.create_run(&run).await?;
        self.handoff(&run).await?;
        info!(run_id = %run.run_id, %workflow_id, "manual run admitted");
        Ok(run)
    }

    /// Admit a webhook delivery addressed by URL token.
    pub async fn admit_webhook(
        &self,
        token: &str,
        idempotency_key: Option<&str>,
        payload: Value,
    ) -> Result<Admission, AdmissionError> {
        let subscription = self
            .store
            .find_by_webhook_token(token)
            .await?
            .ok_or(AdmissionError::SubscriptionNotFound)?;
        self.admit(&subscription, "webhook", idempotency_key, payload)
            .await
    }

    /// Admit an inbound channel event matched on (channel, event type).
    pub async fn admit_channel(
        &self,
        channel: &str,
        event_type: &str,
        idempotency_key: Option<&str>,
        payload: Value,
    ) -> Result<Admission, AdmissionError> {
        let subscription = self
            .store
            .find_by_channel(channel, event_type)
            .await?
            .ok_or(AdmissionError::SubscriptionNotFound)?;
        self.admit(&subscription, "channel", idempotency_key, payload)
            .await
    }

    async fn admit(
        &self,
        subscription: &TriggerSubscription,
        trigger_type: &str,
        idempotency_key: Option<&str>,
        payload: Value,
    ) -> Result<Admission, AdmissionError> {
        // Disabled subscriptions are indistinguishable from unknown ones.
        if !subscription.enabled {
            return Err(AdmissionError::SubscriptionNotFound);
        }

        if let Some(key) = idempotency_key
            && let Some(prior) = self.store.get_admission(&subscription.id, key).await?
        {
            match self.store.get_run(&prior.run_id).await? {
                Some(run) => {
                    info!(run_id = %run.run_id, key, "duplicate delivery, returning prior admission");
                    return Ok(Admission {
                        run,
                        duplicate: true,
                    });
                }
                None => {
                    // Stale record from an interrupted compensation; clear
                    // it and admit fresh.
                    self.store.delete_admission(&subscription.id, key).await?;
                }
            }
        }

        let definition = self
            .store
            .current_published(&subscription.workflow_id)
            .await?
            .ok_or(AdmissionError::NotPublished(subscription.workflow_id))?;

        let run = WorkflowRun::admitted(
            subscription.organization_id,
            definition.workflow_id,
            trigger_type,
            None,
            payload,
        );
        self.store.create_run(&run).await?;

        let mut recorded_key = None;
        if let Some(key) = idempotency_key {
            let admission = TriggerAdmission {
                subscription_id: subscription.id,
                idempotency_key: key.to_string(),
                run_id: run.run_id,
                created_at: Utc::now(),
            };
            match self.store.record_admission(&admission).await {
                Ok(()) => recorded_key = Some(key),
                Err(RepositoryError::Conflict(_)) => {
                    // A concurrent delivery won the record; drop our run and
                    // return its admission.
                    self.store.delete_run(&run.run_id).await?;
                    let prior = self
                        .store
                        .get_admission(&subscription.id, key)
                        .await?
                        .ok_or(RepositoryError::NotFound)?;
                    let run = self
                        .store
                        .get_run(&prior.run_id)
                        .await?
                        .ok_or(RepositoryError::NotFound)?;
                    return Ok(Admission {
                        run,
                        duplicate: true,
                    });
                }
                Err(other) => return Err(other.into()),
            }
        }

        self.handoff_with_key(&run, subscription, recorded_key).await?;
        info!(run_id = %run.run_id, subscription_id = %subscription.id, trigger_type, "run admitted");
        Ok(Admission {
            run,
            duplicate: false,
        })
    }

    async fn handoff(&self, run: &WorkflowRun) -> Result<(), AdmissionError> {
        if let Err(err) = self
            .queue
            .enqueue(RunJob::start(run.run_id, run.organization_id))
            .await
        {
            warn!(run_id = %run.run_id, error = %err, "queue handoff failed, retracting run");
            self.store.delete_run(&run.run_id).await?;
            return Err(AdmissionError::QueueUnavailable(err));
        }
        Ok(())
    }

    async fn handoff_with_key(
        &self,
        run: &WorkflowRun,
        subscription: &TriggerSubscription,
        recorded_key: Option<&str>,
    ) -> Result<(), AdmissionError> {
        if let Err(err) = self
            .queue
            .enqueue(RunJob::start(run.run_id, run.organization_id))
            .await
        {
            warn!(run_id = %run.run_id, error = %err, "queue handoff failed, retracting run");
            if let Some(key) = recorded_key {
                self.store.delete_admission(&subscription.id, key).await?;
            }
            self.store.delete_run(&run.run_id).await?;
            return Err(AdmissionError::QueueUnavailable(err));
        }
        Ok(())
    }
}
