//! SQLite `ApprovalRepository` implementation.
//!
//! Exactly-once decisions rest on the `status = 'pending'` guard in the
//! decide UPDATE. Expiry flips and returns the expired rows in one
//! transaction so the sweep never double-reports.

use chrono::{DateTime, Utc};
use sqlx::Row;
use uuid::Uuid;

use flowplane_core::repository::ApprovalRepository;
use flowplane_types::approval::{ApprovalDecision, ApprovalRequest, ApprovalStatus};
use flowplane_types::error::RepositoryError;

use super::{SqliteStore, enum_str, format_datetime, parse_datetime, parse_enum, parse_json, parse_uuid, query_err};

struct ApprovalRow {
    id: String,
    run_id: String,
    node_id: String,
    status: String,
    reason: Option<String>,
    context: String,
    requested_by_user_id: Option<String>,
    decided_by_user_id: Option<String>,
    decision_note: Option<String>,
    expires_at: String,
    created_at: String,
    decided_at: Option<String>,
}

impl ApprovalRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            run_id: row.try_get("run_id")?,
            node_id: row.try_get("node_id")?,
            status: row.try_get("status")?,
            reason: row.try_get("reason")?,
            context: row.try_get("context")?,
            requested_by_user_id: row.try_get("requested_by_user_id")?,
            decided_by_user_id: row.try_get("decided_by_user_id")?,
            decision_note: row.try_get("decision_note")?,
            expires_at: row.try_get("expires_at")?,
            created_at: row.try_get("created_at")?,
            decided_at: row.try_get("decided_at")?,
        })
    }

    fn into_approval(self) -> Result<ApprovalRequest, RepositoryError> {
        let status: ApprovalStatus = parse_enum(&self.status)?;
        Ok(ApprovalRequest {
            id: parse_uuid(&self.id)?,
            run_id: parse_uuid(&self.run_id)?,
            node_id: self.node_id,
            status,
            reason: self.reason,
            context: parse_json(&self.context)?,
            requested_by_user_id: self
                .requested_by_user_id
                .as_deref()
                .map(parse_uuid)
                .transpose()?,
            decided_by_user_id: self
                .decided_by_user_id
                .as_deref()
                .map(parse_uuid)
                .transpose()?,
            decision_note: self.decision_note,
            expires_at: parse_datetime(&self.expires_at)?,
            created_at: parse_datetime(&self.created_at)?,
            decided_at: self.decided_at.as_deref().map(parse_datetime).transpose()?,
        })
    }
}

impl ApprovalRepository for SqliteStore {
    async fn create_approval(&self, approval: &ApprovalRequest) -> Result<(), RepositoryError> {
        let status = enum_str(&approval.status)?;
        let context = serde_json::to_string(&approval.context)
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        sqlx::query(
            r#"INSERT INTO approvals
               (id, run_id, node_id, status, reason, context, requested_by_user_id,
                decided_by_user_id, decision_note, expires_at, created_at, decided_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(approval.id.to_string())
        .bind(approval.run_id.to_string())
        .bind(&approval.node_id)
        .bind(&status)
        .bind(&approval.reason)
        .bind(&context)
        .bind(approval.requested_by_user_id.map(|u| u.to_string()))
        .bind(approval.decided_by_user_id.map(|u| u.to_string()))
        .bind(&approval.decision_note)
        .bind(format_datetime(&approval.expires_at))
        .bind(format_datetime(&approval.created_at))
        .bind(approval.decided_at.as_ref().map(format_datetime))
        .execute(&self.pool.writer)
        .await
        .map_err(query_err)?;

        Ok(())
    }

    async fn get_approval(&self, id: &Uuid) -> Result<Option<ApprovalRequest>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM approvals WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(query_err)?;

        match row {
            Some(row) => {
                let r = ApprovalRow::from_row(&row).map_err(query_err)?;
                Ok(Some(r.into_approval()?))
            }
            None => Ok(None),
        }
    }

    async fn mark_decided(
        &self,
        id: &Uuid,
        decision: ApprovalDecision,
        decided_by_user_id: Option<Uuid>,
        decision_note: Option<&str>,
    ) -> Result<bool, RepositoryError> {
        let status = match decision {
            ApprovalDecision::Approved => "approved",
            ApprovalDecision::Rejected => "rejected",
        };
        let result = sqlx::query(
            r#"UPDATE approvals
               SET status = ?, decided_by_user_id = ?, decision_note = ?, decided_at = ?
               WHERE id = ? AND status = 'pending'"#,
        )
        .bind(status)
        .bind(decided_by_user_id.map(|u| u.to_string()))
        .bind(decision_note)
        .bind(format_datetime(&Utc::now()))
        .bind(id.to_string())
        .execute(&self.pool.writer)
        .await
        .map_err(query_err)?;

        Ok(result.rows_affected() > 0)
    }

    async fn expire_pending(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<ApprovalRequest>, RepositoryError> {
        let now_str = format_datetime(&now);
        let mut tx = self.pool.writer.begin().await.map_err(query_err)?;

        let rows = sqlx::query(
            "SELECT * FROM approvals WHERE status = 'pending' AND expires_at <= ? ORDER BY expires_at ASC",
        )
        .bind(&now_str)
        .fetch_all(&mut *tx)
        .await
        .map_err(query_err)?;

        sqlx::query(
            "UPDATE approvals SET status = 'expired', decided_at = ? WHERE status = 'pending' AND expires_at <= ?",
        )
        .bind(&now_str)
        .bind(&now_str)
        .execute(&mut *tx)
        .await
        .map_err(query_err)?;

        tx.commit().await.map_err(query_err)?;

        let mut expired = Vec::with_capacity(rows.len());
        for row in &rows {
            let mut approval = ApprovalRow::from_row(row).map_err(query_err)?.into_approval()?;
            approval.status = ApprovalStatus::Expired;
            approval.decided_at = Some(now);
            expired.push(approval);
        }
        Ok(expired)
    }
}
