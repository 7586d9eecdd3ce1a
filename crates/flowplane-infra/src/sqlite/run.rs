//! SQLite `RunRepository` implementation.
//!
//! Claim, block, resume, and fail-blocked are single conditional UPDATEs;
//! the WHERE clause is the precondition and `rows_affected` is the verdict.
//! Lease comparison happens in SQL on RFC 3339 strings, whose lexicographic
//! order matches time order.

use chrono::{DateTime, Utc};
use sqlx::Row;
use uuid::Uuid;

use flowplane_core::repository::RunRepository;
use flowplane_types::error::RepositoryError;
use flowplane_types::workflow::{BlockedState, RunStatus, WorkflowRun};

use super::{SqliteStore, enum_str, format_datetime, parse_datetime, parse_enum, parse_json, parse_uuid, query_err};

struct RunRow {
    run_id: String,
    organization_id: String,
    workflow_id: String,
    trigger_type: String,
    requested_by_user_id: Option<String>,
    status: String,
    attempt_count: i64,
    input: String,
    started_at: Option<String>,
    ended_at: Option<String>,
    blocked_request_id: Option<String>,
    blocked_node_id: Option<String>,
    blocked_node_type: Option<String>,
    blocked_kind: Option<String>,
    blocked_at: Option<String>,
    blocked_timeout_at: Option<String>,
    lease_worker_id: Option<String>,
    lease_expires_at: Option<String>,
    error: Option<String>,
    created_at: String,
}

impl RunRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            run_id: row.try_get("run_id")?,
            organization_id: row.try_get("organization_id")?,
            workflow_id: row.try_get("workflow_id")?,
            trigger_type: row.try_get("trigger_type")?,
            requested_by_user_id: row.try_get("requested_by_user_id")?,
            status: row.try_get("status")?,
            attempt_count: row.try_get("attempt_count")?,
            input: row.try_get("input")?,
            started_at: row.try_get("started_at")?,
            ended_at: row.try_get("ended_at")?,
            blocked_request_id: row.try_get("blocked_request_id")?,
            blocked_node_id: row.try_get("blocked_node_id")?,
            blocked_node_type: row.try_get("blocked_node_type")?,
            blocked_kind: row.try_get("blocked_kind")?,
            blocked_at: row.try_get("blocked_at")?,
            blocked_timeout_at: row.try_get("blocked_timeout_at")?,
            lease_worker_id: row.try_get("lease_worker_id")?,
            lease_expires_at: row.try_get("lease_expires_at")?,
            error: row.try_get("error")?,
            created_at: row.try_get("created_at")?,
        })
    }

    fn into_run(self) -> Result<WorkflowRun, RepositoryError> {
        let status: RunStatus = parse_enum(&self.status)?;

        // The blocked columns are set and cleared as a group.
        let blocked = match (
            &self.blocked_request_id,
            &self.blocked_node_id,
            &self.blocked_node_type,
            &self.blocked_kind,
            &self.blocked_at,
            &self.blocked_timeout_at,
        ) {
            (Some(request_id), Some(node_id), Some(node_type), Some(kind), Some(at), Some(timeout)) => {
                Some(BlockedState {
                    request_id: parse_uuid(request_id)?,
                    node_id: node_id.clone(),
                    node_type: node_type.clone(),
                    kind: kind.clone(),
                    blocked_at: parse_datetime(at)?,
                    timeout_at: parse_datetime(timeout)?,
                })
            }
            _ => None,
        };

        Ok(WorkflowRun {
            run_id: parse_uuid(&self.run_id)?,
            organization_id: parse_uuid(&self.organization_id)?,
            workflow_id: parse_uuid(&self.workflow_id)?,
            trigger_type: self.trigger_type,
            requested_by_user_id: self
                .requested_by_user_id
                .as_deref()
                .map(parse_uuid)
                .transpose()?,
            status,
            attempt_count: self.attempt_count as u32,
            input: parse_json(&self.input)?,
            started_at: self.started_at.as_deref().map(parse_datetime).transpose()?,
            ended_at: self.ended_at.as_deref().map(parse_datetime).transpose()?,
            blocked,
            lease_worker_id: self.lease_worker_id,
            lease_expires_at: self
                .lease_expires_at
                .as_deref()
                .map(parse_datetime)
                .transpose()?,
            error: self.error,
            created_at: parse_datetime(&self.created_at)?,
        })
    }
}

impl RunRepository for SqliteStore {
    async fn create_run(&self, run: &WorkflowRun) -> Result<(), RepositoryError> {
        let status = enum_str(&run.status)?;
        let input = serde_json::to_string(&run.input)
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        sqlx::query(
            r#"INSERT INTO workflow_runs
               (run_id, organization_id, workflow_id, trigger_type, requested_by_user_id,
                status, attempt_count, input, started_at, ended_at, lease_worker_id,
                lease_expires_at, error, created_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(run.run_id.to_string())
        .bind(run.organization_id.to_string())
        .bind(run.workflow_id.to_string())
        .bind(&run.trigger_type)
        .bind(run.requested_by_user_id.map(|u| u.to_string()))
        .bind(&status)
        .bind(run.attempt_count as i64)
        .bind(&input)
        .bind(run.started_at.as_ref().map(format_datetime))
        .bind(run.ended_at.as_ref().map(format_datetime))
        .bind(&run.lease_worker_id)
        .bind(run.lease_expires_at.as_ref().map(format_datetime))
        .bind(&run.error)
        .bind(format_datetime(&run.created_at))
        .execute(&self.pool.writer)
        .await
        .map_err(query_err)?;

        Ok(())
    }

    async fn delete_run(&self, run_id: &Uuid) -> Result<bool, RepositoryError> {
        let result = sqlx::query("DELETE FROM workflow_runs WHERE run_id = ?")
            .bind(run_id.to_string())
            .execute(&self.pool.writer)
            .await
            .map_err(query_err)?;
        Ok(result.rows_affected() > 0)
    }

    async fn get_run(&self, run_id: &Uuid) -> Result<Option<WorkflowRun>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM workflow_runs WHERE run_id = ?")
            .bind(run_id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(query_err)?;

        match row {
            Some(row) => {
                let r = RunRow::from_row(&row).map_err(query_err)?;
                Ok(Some(r.into_run()?))
            }
            None => Ok(None),
        }
    }

    async fn list_runs(
        &self,
        workflow_id: &Uuid,
        limit: u32,
    ) -> Result<Vec<WorkflowRun>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT * FROM workflow_runs WHERE workflow_id = ? ORDER BY created_at DESC LIMIT ?",
        )
        .bind(workflow_id.to_string())
        .bind(limit as i64)
        .fetch_all(&self.pool.reader)
        .await
        .map_err(query_err)?;

        let mut runs = Vec::with_capacity(rows.len());
        for row in &rows {
            let r = RunRow::from_row(row).map_err(query_err)?;
            runs.push(r.into_run()?);
        }
        Ok(runs)
    }

    async fn list_unleased_queued(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<WorkflowRun>, RepositoryError> {
        let rows = sqlx::query(
            r#"SELECT * FROM workflow_runs
               WHERE status = 'queued' AND lease_worker_id IS NULL AND created_at <= ?
               ORDER BY created_at ASC"#,
        )
        .bind(format_datetime(&cutoff))
        .fetch_all(&self.pool.reader)
        .await
        .map_err(query_err)?;

        let mut runs = Vec::with_capacity(rows.len());
        for row in &rows {
            let r = RunRow::from_row(row).map_err(query_err)?;
            runs.push(r.into_run()?);
        }
        Ok(runs)
    }

    async fn claim_run(
        &self,
        run_id: &Uuid,
        worker_id: &str,
        lease_until: DateTime<Utc>,
    ) -> Result<Option<WorkflowRun>, RepositoryError> {
        let now = format_datetime(&Utc::now());
        let result = sqlx::query(
            r#"UPDATE workflow_runs
               SET status = 'running',
                   started_at = COALESCE(started_at, ?),
                   lease_worker_id = ?,
                   lease_expires_at = ?
               WHERE run_id = ?
                 AND (status = 'queued'
                      OR (status = 'running'
                          AND (lease_expires_at IS NULL OR lease_expires_at <= ?)))"#,
        )
        .bind(&now)
        .bind(worker_id)
        .bind(format_datetime(&lease_until))
        .bind(run_id.to_string())
        .bind(&now)
        .execute(&self.pool.writer)
        .await
        .map_err(query_err)?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }
        self.get_run(run_id).await
    }

    async fn release_lease(&self, run_id: &Uuid, worker_id: &str) -> Result<(), RepositoryError> {
        sqlx::query(
            "UPDATE workflow_runs SET lease_worker_id = NULL, lease_expires_at = NULL WHERE run_id = ? AND lease_worker_id = ?",
        )
        .bind(run_id.to_string())
        .bind(worker_id)
        .execute(&self.pool.writer)
        .await
        .map_err(query_err)?;
        Ok(())
    }

    async fn block_run(
        &self,
        run_id: &Uuid,
        blocked: &BlockedState,
    ) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            r#"UPDATE workflow_runs
               SET status = 'blocked',
                   blocked_request_id = ?,
                   blocked_node_id = ?,
                   blocked_node_type = ?,
                   blocked_kind = ?,
                   blocked_at = ?,
                   blocked_timeout_at = ?,
                   lease_worker_id = NULL,
                   lease_expires_at = NULL
               WHERE run_id = ? AND status = 'running'"#,
        )
        .bind(blocked.request_id.to_string())
        .bind(&blocked.node_id)
        .bind(&blocked.node_type)
        .bind(&blocked.kind)
        .bind(format_datetime(&blocked.blocked_at))
        .bind(format_datetime(&blocked.timeout_at))
        .bind(run_id.to_string())
        .execute(&self.pool.writer)
        .await
        .map_err(query_err)?;

        Ok(result.rows_affected() > 0)
    }

    async fn resume_blocked(
        &self,
        run_id: &Uuid,
        request_id: &Uuid,
    ) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            r#"UPDATE workflow_runs
               SET status = 'queued',
                   blocked_request_id = NULL,
                   blocked_node_id = NULL,
                   blocked_node_type = NULL,
                   blocked_kind = NULL,
                   blocked_at = NULL,
                   blocked_timeout_at = NULL,
                   attempt_count = attempt_count + 1
               WHERE run_id = ? AND status = 'blocked' AND blocked_request_id = ?"#,
        )
        .bind(run_id.to_string())
        .bind(request_id.to_string())
        .execute(&self.pool.writer)
        .await
        .map_err(query_err)?;

        Ok(result.rows_affected() > 0)
    }

    async fn fail_blocked(
        &self,
        run_id: &Uuid,
        request_id: &Uuid,
        error: &str,
    ) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            r#"UPDATE workflow_runs
               SET status = 'failed',
                   blocked_request_id = NULL,
                   blocked_node_id = NULL,
                   blocked_node_type = NULL,
                   blocked_kind = NULL,
                   blocked_at = NULL,
                   blocked_timeout_at = NULL,
                   error = ?,
                   ended_at = ?
               WHERE run_id = ? AND status = 'blocked' AND blocked_request_id = ?"#,
        )
        .bind(error)
        .bind(format_datetime(&Utc::now()))
        .bind(run_id.to_string())
        .bind(request_id.to_string())
        .execute(&self.pool.writer)
        .await
        .map_err(query_err)?;

        Ok(result.rows_affected() > 0)
    }

    async fn finish_run(
        &self,
        run_id: &Uuid,
        status: RunStatus,
        error: Option<&str>,
    ) -> Result<(), RepositoryError> {
        let status = enum_str(&status)?;
        let result = sqlx::query(
            r#"UPDATE workflow_runs
               SET status = ?,
                   error = ?,
                   ended_at = ?,
                   lease_worker_id = NULL,
                   lease_expires_at = NULL
               WHERE run_id = ?"#,
        )
        .bind(&status)
        .bind(error)
        .bind(format_datetime(&Utc::now()))
        .bind(run_id.to_string())
        .execute(&self.pool.writer)
        .await
        .map_err(query_err)?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sqlite::test_util::test_store;
    use chrono::Duration;
    use flowplane_core::repository::DefinitionRepository;
    use flowplane_types::dsl::{Dsl, TriggerSpec};
    use flowplane_types::workflow::{DefinitionStatus, WorkflowDefinition};
    use serde_json::json;
    use std::collections::BTreeMap;

    async fn seeded_run(store: &SqliteStore) -> WorkflowRun {
        let def = WorkflowDefinition {
            workflow_id: Uuid::now_v7(),
            organization_id: Uuid::now_v7(),
            family_id: Uuid::now_v7(),
            revision: 1,
            status: DefinitionStatus::Published,
            name: "t".to_string(),
            dsl: Dsl {
                trigger: TriggerSpec::Manual {},
                nodes: BTreeMap::new(),
                edges: vec![],
            },
            editor_state: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        store.save_definition(&def).await.unwrap();
        let run = WorkflowRun::admitted(
            def.organization_id,
            def.workflow_id,
            "manual",
            None,
            json!({"amount": 42}),
        );
        store.create_run(&run).await.unwrap();
        run
    }

    #[tokio::test]
    async fn create_get_roundtrip() {
        let store = test_store().await;
        let run = seeded_run(&store).await;

        let loaded = store.get_run(&run.run_id).await.unwrap().unwrap();
        assert_eq!(loaded.status, RunStatus::Queued);
        assert_eq!(loaded.input["amount"], 42);
        assert!(loaded.blocked.is_none());
    }

    #[tokio::test]
    async fn claim_is_exclusive_until_lease_expires() {
        let store = test_store().await;
        let run = seeded_run(&store).await;

        let lease = Utc::now() + Duration::seconds(60);
        let claimed = store.claim_run(&run.run_id, "w1", lease).await.unwrap();
        assert!(claimed.is_some());
        assert!(claimed.unwrap().started_at.is_some());

        let contender = store.claim_run(&run.run_id, "w2", lease).await.unwrap();
        assert!(contender.is_none());

        // Expired lease is reclaimable by another worker.
        let expired = Utc::now() - Duration::seconds(1);
        sqlx::query("UPDATE workflow_runs SET lease_expires_at = ? WHERE run_id = ?")
            .bind(crate::sqlite::format_datetime(&expired))
            .bind(run.run_id.to_string())
            .execute(&store.pool.writer)
            .await
            .unwrap();
        let reclaimed = store.claim_run(&run.run_id, "w2", lease).await.unwrap();
        assert!(reclaimed.is_some());
        assert_eq!(
            reclaimed.unwrap().lease_worker_id.as_deref(),
            Some("w2")
        );
    }

    #[tokio::test]
    async fn released_lease_is_reclaimable() {
        let store = test_store().await;
        let run = seeded_run(&store).await;

        let lease = Utc::now() + Duration::seconds(60);
        store.claim_run(&run.run_id, "w1", lease).await.unwrap().unwrap();
        store.release_lease(&run.run_id, "w1").await.unwrap();

        // Still running, but with no lease a new claim succeeds.
        let claimed = store.claim_run(&run.run_id, "w2", lease).await.unwrap();
        assert!(claimed.is_some());
    }

    #[tokio::test]
    async fn block_resume_cycle() {
        let store = test_store().await;
        let run = seeded_run(&store).await;
        let lease = Utc::now() + Duration::seconds(60);
        store.claim_run(&run.run_id, "w1", lease).await.unwrap().unwrap();

        let request_id = Uuid::now_v7();
        let blocked = BlockedState {
            request_id,
            node_id: "review".to_string(),
            node_type: "connector.action".to_string(),
            kind: "approval".to_string(),
            blocked_at: Utc::now(),
            timeout_at: Utc::now() + Duration::hours(1),
        };
        assert!(store.block_run(&run.run_id, &blocked).await.unwrap());

        let stored = store.get_run(&run.run_id).await.unwrap().unwrap();
        assert_eq!(stored.status, RunStatus::Blocked);
        assert_eq!(stored.blocked.as_ref().unwrap().request_id, request_id);
        assert!(stored.lease_worker_id.is_none());

        assert!(store.resume_blocked(&run.run_id, &request_id).await.unwrap());
        // Replayed resume is a safe no-op.
        assert!(!store.resume_blocked(&run.run_id, &request_id).await.unwrap());

        let resumed = store.get_run(&run.run_id).await.unwrap().unwrap();
        assert_eq!(resumed.status, RunStatus::Queued);
        assert_eq!(resumed.attempt_count, 1);
        assert!(resumed.blocked.is_none());
    }

    #[tokio::test]
    async fn fail_blocked_requires_matching_request() {
        let store = test_store().await;
        let run = seeded_run(&store).await;
        let lease = Utc::now() + Duration::seconds(60);
        store.claim_run(&run.run_id, "w1", lease).await.unwrap().unwrap();

        let request_id = Uuid::now_v7();
        let blocked = BlockedState {
            request_id,
            node_id: "review".to_string(),
            node_type: "http.request".to_string(),
            kind: "approval".to_string(),
            blocked_at: Utc::now(),
            timeout_at: Utc::now() + Duration::hours(1),
        };
        store.block_run(&run.run_id, &blocked).await.unwrap();

        let wrong = Uuid::now_v7();
        assert!(!store.fail_blocked(&run.run_id, &wrong, "x").await.unwrap());
        assert!(
            store
                .fail_blocked(&run.run_id, &request_id, "approval rejected")
                .await
                .unwrap()
        );

        let failed = store.get_run(&run.run_id).await.unwrap().unwrap();
        assert_eq!(failed.status, RunStatus::Failed);
        assert_eq!(failed.error.as_deref(), Some("approval rejected"));
        assert!(failed.ended_at.is_some());
    }

    #[tokio::test]
    async fn finish_and_delete() {
        let store = test_store().await;
        let run = seeded_run(&store).await;
        let lease = Utc::now() + Duration::seconds(60);
        store.claim_run(&run.run_id, "w1", lease).await.unwrap().unwrap();

        store
            .finish_run(&run.run_id, RunStatus::Succeeded, None)
            .await
            .unwrap();
        let done = store.get_run(&run.run_id).await.unwrap().unwrap();
        assert_eq!(done.status, RunStatus::Succeeded);
        assert!(done.ended_at.is_some());
        assert!(done.lease_worker_id.is_none());

        assert!(store.delete_run(&run.run_id).await.unwrap());
        assert!(!store.delete_run(&run.run_id).await.unwrap());
    }

    #[tokio::test]
    async fn unleased_queued_listing_skips_claimed_and_fresh_runs() {
        let store = test_store().await;
        let stale = seeded_run(&store).await;
        let claimed = seeded_run(&store).await;
        store
            .claim_run(&claimed.run_id, "w1", Utc::now() + Duration::seconds(60))
            .await
            .unwrap()
            .unwrap();
        let mut fresh = WorkflowRun::admitted(
            stale.organization_id,
            stale.workflow_id,
            "manual",
            None,
            json!({}),
        );
        fresh.created_at = Utc::now() + Duration::seconds(120);
        store.create_run(&fresh).await.unwrap();

        let listed = store.list_unleased_queued(Utc::now()).await.unwrap();
        let ids: Vec<_> = listed.iter().map(|r| r.run_id).collect();
        assert_eq!(ids, vec![stale.run_id]);
    }

    #[tokio::test]
    async fn list_runs_newest_first() {
        let store = test_store().await;
        let first = seeded_run(&store).await;
        let mut second = WorkflowRun::admitted(
            first.organization_id,
            first.workflow_id,
            "manual",
            None,
            json!({}),
        );
        second.created_at = first.created_at + Duration::seconds(5);
        store.create_run(&second).await.unwrap();

        let runs = store.list_runs(&first.workflow_id, 10).await.unwrap();
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].run_id, second.run_id);

        let limited = store.list_runs(&first.workflow_id, 1).await.unwrap();
        assert_eq!(limited.len(), 1);
    }
}
