//! In-memory store implementing every repository port.
//!
//! The engine is generic over the store traits, so this double backs the
//! core test suite and any embedded use. Conditional transitions mirror the
//! SQLite implementation's semantics exactly: a transition "succeeds" only
//! when the precondition held under the lock, which is what makes the
//! optimistic checks meaningful in tests.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use flowplane_types::approval::{ApprovalDecision, ApprovalRequest, ApprovalStatus};
use flowplane_types::error::RepositoryError;
use flowplane_types::event::{EventPage, NewRunEvent, RunEvent, RunEventType};
use flowplane_types::trigger::{RoutingConfig, TriggerAdmission, TriggerSubscription};
use flowplane_types::workflow::{
    BlockedState, DefinitionStatus, RunStatus, WorkflowDefinition, WorkflowRun,
};

use super::{
    ApprovalRepository, DefinitionRepository, EventRepository, RunRepository, TriggerRepository,
};

#[derive(Default)]
struct Inner {
    definitions: HashMap<Uuid, WorkflowDefinition>,
    runs: HashMap<Uuid, WorkflowRun>,
    events: Vec<RunEvent>,
    approvals: HashMap<Uuid, ApprovalRequest>,
    subscriptions: HashMap<Uuid, TriggerSubscription>,
    admissions: HashMap<(Uuid, String), TriggerAdmission>,
    next_seq: i64,
}

/// Shared in-memory store. Clone-free: wrap in `Arc` to share.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of run rows currently stored (compensation assertions).
    pub fn run_count(&self) -> usize {
        self.inner.lock().unwrap().runs.len()
    }

    /// Number of admission records currently stored.
    pub fn admission_count(&self) -> usize {
        self.inner.lock().unwrap().admissions.len()
    }
}

impl DefinitionRepository for MemoryStore {
    async fn save_definition(&self, def: &WorkflowDefinition) -> Result<(), RepositoryError> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(existing) = inner.definitions.get(&def.workflow_id)
            && existing.status == DefinitionStatus::Published
        {
            return Err(RepositoryError::Conflict(
                "published definition is immutable".to_string(),
            ));
        }
        inner.definitions.insert(def.workflow_id, def.clone());
        Ok(())
    }

    async fn get_definition(
        &self,
        workflow_id: &Uuid,
    ) -> Result<Option<WorkflowDefinition>, RepositoryError> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .definitions
            .get(workflow_id)
            .cloned())
    }

    async fn current_published(
        &self,
        family_id: &Uuid,
    ) -> Result<Option<WorkflowDefinition>, RepositoryError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .definitions
            .values()
            .filter(|d| d.family_id == *family_id && d.status == DefinitionStatus::Published)
            .max_by_key(|d| d.revision)
            .cloned())
    }

    async fn publish(&self, workflow_id: &Uuid) -> Result<WorkflowDefinition, RepositoryError> {
        let mut inner = self.inner.lock().unwrap();
        let family_id = inner
            .definitions
            .get(workflow_id)
            .map(|d| d.family_id)
            .ok_or(RepositoryError::NotFound)?;

        for def in inner.definitions.values_mut() {
            if def.family_id == family_id
                && def.workflow_id != *workflow_id
                && def.status == DefinitionStatus::Published
            {
                def.status = DefinitionStatus::Draft;
            }
        }
        let def = inner.definitions.get_mut(workflow_id).unwrap();
        def.status = DefinitionStatus::Published;
        def.updated_at = Utc::now();
        Ok(def.clone())
    }

    async fn list_revisions(
        &self,
        family_id: &Uuid,
    ) -> Result<Vec<WorkflowDefinition>, RepositoryError> {
        let inner = self.inner.lock().unwrap();
        let mut revs: Vec<_> = inner
            .definitions
            .values()
            .filter(|d| d.family_id == *family_id)
            .cloned()
            .collect();
        revs.sort_by_key(|d| d.revision);
        Ok(revs)
    }

    async fn max_revision(&self, family_id: &Uuid) -> Result<i64, RepositoryError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .definitions
            .values()
            .filter(|d| d.family_id == *family_id)
            .map(|d| d.revision)
            .max()
            .unwrap_or(0))
    }
}

impl RunRepository for MemoryStore {
    async fn create_run(&self, run: &WorkflowRun) -> Result<(), RepositoryError> {
        self.inner
            .lock()
            .unwrap()
            .runs
            .insert(run.run_id, run.clone());
        Ok(())
    }

    async fn delete_run(&self, run_id: &Uuid) -> Result<bool, RepositoryError> {
        Ok(self.inner.lock().unwrap().runs.remove(run_id).is_some())
    }

    async fn get_run(&self, run_id: &Uuid) -> Result<Option<WorkflowRun>, RepositoryError> {
        Ok(self.inner.lock().unwrap().runs.get(run_id).cloned())
    }

    async fn list_runs(
        &self,
        workflow_id: &Uuid,
        limit: u32,
    ) -> Result<Vec<WorkflowRun>, RepositoryError> {
        let inner = self.inner.lock().unwrap();
        let mut runs: Vec<_> = inner
            .runs
            .values()
            .filter(|r| r.workflow_id == *workflow_id)
            .cloned()
            .collect();
        runs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        runs.truncate(limit as usize);
        Ok(runs)
    }

    async fn list_unleased_queued(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<WorkflowRun>, RepositoryError> {
        let inner = self.inner.lock().unwrap();
        let mut runs: Vec<_> = inner
            .runs
            .values()
            .filter(|r| {
                r.status == RunStatus::Queued
                    && r.lease_worker_id.is_none()
                    && r.created_at <= cutoff
            })
            .cloned()
            .collect();
        runs.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(runs)
    }

    async fn claim_run(
        &self,
        run_id: &Uuid,
        worker_id: &str,
        lease_until: DateTime<Utc>,
    ) -> Result<Option<WorkflowRun>, RepositoryError> {
        let now = Utc::now();
        let mut inner = self.inner.lock().unwrap();
        let Some(run) = inner.runs.get_mut(run_id) else {
            return Ok(None);
        };
        let claimable = match run.status {
            RunStatus::Queued => true,
            RunStatus::Running => run
                .lease_expires_at
                .is_none_or(|expires| expires <= now),
            _ => false,
        };
        if !claimable {
            return Ok(None);
        }
        run.status = RunStatus::Running;
        if run.started_at.is_none() {
            run.started_at = Some(now);
        }
        run.lease_worker_id = Some(worker_id.to_string());
        run.lease_expires_at = Some(lease_until);
        Ok(Some(run.clone()))
    }

    async fn release_lease(&self, run_id: &Uuid, worker_id: &str) -> Result<(), RepositoryError> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(run) = inner.runs.get_mut(run_id)
            && run.lease_worker_id.as_deref() == Some(worker_id)
        {
            run.lease_worker_id = None;
            run.lease_expires_at = None;
        }
        Ok(())
    }

    async fn block_run(
        &self,
        run_id: &Uuid,
        blocked: &BlockedState,
    ) -> Result<bool, RepositoryError> {
        let mut inner = self.inner.lock().unwrap();
        let Some(run) = inner.runs.get_mut(run_id) else {
            return Ok(false);
        };
        if run.status != RunStatus::Running {
            return Ok(false);
        }
        run.status = RunStatus::Blocked;
        run.blocked = Some(blocked.clone());
        run.lease_worker_id = None;
        run.lease_expires_at = None;
        Ok(true)
    }

    async fn resume_blocked(
        &self,
        run_id: &Uuid,
        request_id: &Uuid,
    ) -> Result<bool, RepositoryError> {
        let mut inner = self.inner.lock().unwrap();
        let Some(run) = inner.runs.get_mut(run_id) else {
            return Ok(false);
        };
        let matches = run.status == RunStatus::Blocked
            && run.blocked.as_ref().is_some_and(|b| b.request_id == *request_id);
        if !matches {
            return Ok(false);
        }
        run.status = RunStatus::Queued;
        run.blocked = None;
        run.attempt_count += 1;
        Ok(true)
    }

    async fn fail_blocked(
        &self,
        run_id: &Uuid,
        request_id: &Uuid,
        error: &str,
    ) -> Result<bool, RepositoryError> {
        let mut inner = self.inner.lock().unwrap();
        let Some(run) = inner.runs.get_mut(run_id) else {
            return Ok(false);
        };
        let matches = run.status == RunStatus::Blocked
            && run.blocked.as_ref().is_some_and(|b| b.request_id == *request_id);
        if !matches {
            return Ok(false);
        }
        run.status = RunStatus::Failed;
        run.blocked = None;
        run.error = Some(error.to_string());
        run.ended_at = Some(Utc::now());
        Ok(true)
    }

    async fn finish_run(
        &self,
        run_id: &Uuid,
        status: RunStatus,
        error: Option<&str>,
    ) -> Result<(), RepositoryError> {
        let mut inner = self.inner.lock().unwrap();
        let run = inner.runs.get_mut(run_id).ok_or(RepositoryError::NotFound)?;
        run.status = status;
        run.error = error.map(String::from);
        run.ended_at = Some(Utc::now());
        run.lease_worker_id = None;
        run.lease_expires_at = None;
        Ok(())
    }
}

impl EventRepository for MemoryStore {
    async fn append_event(&self, event: NewRunEvent) -> Result<RunEvent, RepositoryError> {
        let mut inner = self.inner.lock().unwrap();
        inner.next_seq += 1;
        let stored = RunEvent {
            id: Uuid::now_v7(),
            seq: inner.next_seq,
            run_id: event.run_id,
            event_type: event.event_type,
            node_id: event.node_id,
            attempt_count: event.attempt_count,
            level: event.level,
            message: event.message,
            payload: event.payload,
            created_at: Utc::now(),
        };
        inner.events.push(stored.clone());
        Ok(stored)
    }

    async fn list_events(
        &self,
        run_id: &Uuid,
        limit: u32,
        after: Option<i64>,
    ) -> Result<EventPage, RepositoryError> {
        let inner = self.inner.lock().unwrap();
        let events: Vec<_> = inner
            .events
            .iter()
            .filter(|e| e.run_id == *run_id && after.is_none_or(|seq| e.seq > seq))
            .take(limit as usize)
            .cloned()
            .collect();
        let next_cursor = if events.len() == limit as usize {
            events.last().map(|e| e.seq)
        } else {
            None
        };
        Ok(EventPage {
            events,
            next_cursor,
        })
    }

    async fn replay_events(&self, run_id: &Uuid) -> Result<Vec<RunEvent>, RepositoryError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .events
            .iter()
            .filter(|e| e.run_id == *run_id)
            .cloned()
            .collect())
    }

    async fn list_unresolved_dispatches(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<RunEvent>, RepositoryError> {
        let inner = self.inner.lock().unwrap();
        let mut out = Vec::new();
        for ev in &inner.events {
            if ev.event_type != RunEventType::NodeDispatched || ev.created_at > cutoff {
                continue;
            }
            let request_id = ev.payload.get("request_id").cloned();
            let resolved = inner.events.iter().any(|later| {
                later.run_id == ev.run_id
                    && later.seq > ev.seq
                    && ((later.event_type == RunEventType::RemoteResultReceived
                        && later.payload.get("request_id") == request_id.as_ref())
                        || (later.node_id == ev.node_id
                            && matches!(
                                later.event_type,
                                RunEventType::NodeSucceeded | RunEventType::NodeFailed
                            )))
            });
            if !resolved {
                out.push(ev.clone());
            }
        }
        Ok(out)
    }
}

impl ApprovalRepository for MemoryStore {
    async fn create_approval(&self, approval: &ApprovalRequest) -> Result<(), RepositoryError> {
        self.inner
            .lock()
            .unwrap()
            .approvals
            .insert(approval.id, approval.clone());
        Ok(())
    }

    async fn get_approval(&self, id: &Uuid) -> Result<Option<ApprovalRequest>, RepositoryError> {
        Ok(self.inner.lock().unwrap().approvals.get(id).cloned())
    }

    async fn mark_decided(
        &self,
        id: &Uuid,
        decision: ApprovalDecision,
        decided_by_user_id: Option<Uuid>,
        decision_note: Option<&str>,
    ) -> Result<bool, RepositoryError> {
        let mut inner = self.inner.lock().unwrap();
        let Some(approval) = inner.approvals.get_mut(id) else {
            return Ok(false);
        };
        if approval.status != ApprovalStatus::Pending {
            return Ok(false);
        }
        approval.status = match decision {
            ApprovalDecision::Approved => ApprovalStatus::Approved,
            ApprovalDecision::Rejected => ApprovalStatus::Rejected,
        };
        approval.decided_by_user_id = decided_by_user_id;
        approval.decision_note = decision_note.map(String::from);
        approval.decided_at = Some(Utc::now());
        Ok(true)
    }

    async fn expire_pending(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<ApprovalRequest>, RepositoryError> {
        let mut inner = self.inner.lock().unwrap();
        let mut expired = Vec::new();
        for approval in inner.approvals.values_mut() {
            if approval.status == ApprovalStatus::Pending && approval.expires_at <= now {
                approval.status = ApprovalStatus::Expired;
                approval.decided_at = Some(now);
                expired.push(approval.clone());
            }
        }
        Ok(expired)
    }
}

impl TriggerRepository for MemoryStore {
    async fn create_subscription(&self, sub: &TriggerSubscription) -> Result<(), RepositoryError> {
        self.inner
            .lock()
            .unwrap()
            .subscriptions
            .insert(sub.id, sub.clone());
        Ok(())
    }

    async fn get_subscription(
        &self,
        id: &Uuid,
    ) -> Result<Option<TriggerSubscription>, RepositoryError> {
        Ok(self.inner.lock().unwrap().subscriptions.get(id).cloned())
    }

    async fn find_by_webhook_token(
        &self,
        token: &str,
    ) -> Result<Option<TriggerSubscription>, RepositoryError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .subscriptions
            .values()
            .find(|s| matches!(&s.routing, RoutingConfig::Webhook { token: t, .. } if t == token))
            .cloned())
    }

    async fn find_by_channel(
        &self,
        channel: &str,
        event_type: &str,
    ) -> Result<Option<TriggerSubscription>, RepositoryError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .subscriptions
            .values()
            .find(|s| {
                matches!(
                    &s.routing,
                    RoutingConfig::Channel { channel: c, event_filter }
                        if c == channel && event_filter == event_type
                )
            })
            .cloned())
    }

    async fn set_enabled(&self, id: &Uuid, enabled: bool) -> Result<bool, RepositoryError> {
        let mut inner = self.inner.lock().unwrap();
        match inner.subscriptions.get_mut(id) {
            Some(sub) => {
                sub.enabled = enabled;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn get_admission(
        &self,
        subscription_id: &Uuid,
        idempotency_key: &str,
    ) -> Result<Option<TriggerAdmission>, RepositoryError> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .admissions
            .get(&(*subscription_id, idempotency_key.to_string()))
            .cloned())
    }

    async fn record_admission(&self, admission: &TriggerAdmission) -> Result<(), RepositoryError> {
        let mut inner = self.inner.lock().unwrap();
        let key = (admission.subscription_id, admission.idempotency_key.clone());
        if inner.admissions.contains_key(&key) {
            return Err(RepositoryError::Conflict(
                "admission already recorded".to_string(),
            ));
        }
        inner.admissions.insert(key, admission.clone());
        Ok(())
    }

    async fn delete_admission(
        &self,
        subscription_id: &Uuid,
        idempotency_key: &str,
    ) -> Result<(), RepositoryError> {
        self.inner
            .lock()
            .unwrap()
            .admissions
            .remove(&(*subscription_id, idempotency_key.to_string()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowplane_types::dsl::{Dsl, TriggerSpec};
    use serde_json::json;
    use std::collections::BTreeMap;

    fn sample_definition(status: DefinitionStatus) -> WorkflowDefinition {
        WorkflowDefinition {
            workflow_id: Uuid::now_v7(),
            organization_id: Uuid::now_v7(),
            family_id: Uuid::now_v7(),
            revision: 1,
            status,
            name: "invoice-sync".to_string(),
            dsl: Dsl {
                trigger: TriggerSpec::Manual {},
                nodes: BTreeMap::new(),
                edges: vec![],
            },
            editor_state: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn published_definition_is_immutable() {
        let store = MemoryStore::new();
        let def = sample_definition(DefinitionStatus::Published);
        // First insert is allowed (nothing stored yet).
        store.save_definition(&def).await.unwrap();
        let err = store.save_definition(&def).await.unwrap_err();
        assert!(matches!(err, RepositoryError::Conflict(_)));
    }

    #[tokio::test]
    async fn publish_demotes_previous_revision() {
        let store = MemoryStore::new();
        let v1 = sample_definition(DefinitionStatus::Draft);
        let family = v1.family_id;
        let mut v2 = sample_definition(DefinitionStatus::Draft);
        v2.family_id = family;
        v2.revision = 2;
        store.save_definition(&v1).await.unwrap();
        store.save_definition(&v2).await.unwrap();

        store.publish(&v1.workflow_id).await.unwrap();
        store.publish(&v2.workflow_id).await.unwrap();

        let current = store.current_published(&family).await.unwrap().unwrap();
        assert_eq!(current.workflow_id, v2.workflow_id);
        let revs = store.list_revisions(&family).await.unwrap();
        let published: Vec<_> = revs
            .iter()
            .filter(|d| d.status == DefinitionStatus::Published)
            .collect();
        assert_eq!(published.len(), 1);
    }

    #[tokio::test]
    async fn claim_is_exclusive_until_lease_expires() {
        let store = MemoryStore::new();
        let run = WorkflowRun::admitted(Uuid::now_v7(), Uuid::now_v7(), "manual", None, json!({}));
        store.create_run(&run).await.unwrap();

        let lease = Utc::now() + chrono::Duration::seconds(60);
        let claimed = store.claim_run(&run.run_id, "w1", lease).await.unwrap();
        assert!(claimed.is_some());
        assert!(claimed.unwrap().started_at.is_some());

        // Second worker loses while the lease is live.
        let contender = store.claim_run(&run.run_id, "w2", lease).await.unwrap();
        assert!(contender.is_none());

        // Expired lease is reclaimable.
        let expired = Utc::now() - chrono::Duration::seconds(1);
        {
            let mut inner = store.inner.lock().unwrap();
            inner.runs.get_mut(&run.run_id).unwrap().lease_expires_at = Some(expired);
        }
        let reclaimed = store.claim_run(&run.run_id, "w2", lease).await.unwrap();
        assert!(reclaimed.is_some());
    }

    #[tokio::test]
    async fn resume_blocked_is_idempotent() {
        let store = MemoryStore::new();
        let run = WorkflowRun::admitted(Uuid::now_v7(), Uuid::now_v7(), "manual", None, json!({}));
        store.create_run(&run).await.unwrap();
        let lease = Utc::now() + chrono::Duration::seconds(60);
        store.claim_run(&run.run_id, "w1", lease).await.unwrap();

        let request_id = Uuid::now_v7();
        let blocked = BlockedState {
            request_id,
            node_id: "review".to_string(),
            node_type: "connector.action".to_string(),
            kind: "approval".to_string(),
            blocked_at: Utc::now(),
            timeout_at: Utc::now() + chrono::Duration::hours(1),
        };
        assert!(store.block_run(&run.run_id, &blocked).await.unwrap());

        assert!(store.resume_blocked(&run.run_id, &request_id).await.unwrap());
        // Replayed resume is a safe no-op.
        assert!(!store.resume_blocked(&run.run_id, &request_id).await.unwrap());

        let resumed = store.get_run(&run.run_id).await.unwrap().unwrap();
        assert_eq!(resumed.status, RunStatus::Queued);
        assert_eq!(resumed.attempt_count, 1);
        assert!(resumed.blocked.is_none());
    }

    #[tokio::test]
    async fn event_pagination_by_seq() {
        let store = MemoryStore::new();
        let run_id = Uuid::now_v7();
        for i in 0..5 {
            store
                .append_event(NewRunEvent::new(
                    run_id,
                    RunEventType::NodeSucceeded,
                    format!("event {i}"),
                ))
                .await
                .unwrap();
        }
        let page1 = store.list_events(&run_id, 2, None).await.unwrap();
        assert_eq!(page1.events.len(), 2);
        let cursor = page1.next_cursor.unwrap();
        let page2 = store.list_events(&run_id, 2, Some(cursor)).await.unwrap();
        assert_eq!(page2.events.len(), 2);
        assert!(page2.events[0].seq > page1.events[1].seq);
        let page3 = store
            .list_events(&run_id, 10, page2.next_cursor)
            .await
            .unwrap();
        assert_eq!(page3.events.len(), 1);
        assert!(page3.next_cursor.is_none());
    }

    #[tokio::test]
    async fn unresolved_dispatch_detection() {
        let store = MemoryStore::new();
        let run_id = Uuid::now_v7();
        let req = Uuid::now_v7().to_string();
        store
            .append_event(
                NewRunEvent::new(run_id, RunEventType::NodeDispatched, "dispatched")
                    .at_node("fetch")
                    .payload(json!({"request_id": req})),
            )
            .await
            .unwrap();

        let cutoff = Utc::now() + chrono::Duration::seconds(1);
        let unresolved = store.list_unresolved_dispatches(cutoff).await.unwrap();
        assert_eq!(unresolved.len(), 1);

        store
            .append_event(
                NewRunEvent::new(run_id, RunEventType::RemoteResultReceived, "result")
                    .at_node("fetch")
                    .payload(json!({"request_id": req})),
            )
            .await
            .unwrap();
        let unresolved = store.list_unresolved_dispatches(cutoff).await.unwrap();
        assert!(unresolved.is_empty());
    }

    #[tokio::test]
    async fn approval_decided_exactly_once() {
        let store = MemoryStore::new();
        let approval = ApprovalRequest::pending(
            Uuid::now_v7(),
            "review",
            None,
            json!({}),
            None,
            Utc::now() + chrono::Duration::hours(1),
        );
        store.create_approval(&approval).await.unwrap();

        let first = store
            .mark_decided(&approval.id, ApprovalDecision::Approved, None, None)
            .await
            .unwrap();
        assert!(first);
        let second = store
            .mark_decided(&approval.id, ApprovalDecision::Rejected, None, None)
            .await
            .unwrap();
        assert!(!second);

        let stored = store.get_approval(&approval.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ApprovalStatus::Approved);
    }

    #[tokio::test]
    async fn admission_records_are_unique() {
        let store = MemoryStore::new();
        let admission = TriggerAdmission {
            subscription_id: Uuid::now_v7(),
            idempotency_key: "evt-1".to_string(),
            run_id: Uuid::now_v7(),
            created_at: Utc::now(),
        };
        store.record_admission(&admission).await.unwrap();
        let err = store.record_admission(&admission).await.unwrap_err();
        assert!(matches!(err, RepositoryError::Conflict(_)));

        store
            .delete_admission(&admission.subscription_id, "evt-1")
            .await
            .unwrap();
        assert_eq!(store.admission_count(), 0);
    }
}
