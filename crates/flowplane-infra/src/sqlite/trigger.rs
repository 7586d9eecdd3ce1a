//! SQLite `TriggerRepository` implementation.
//!
//! Routing config is stored as a JSON blob with the lookup keys (webhook
//! token, channel + event filter) denormalized into indexed columns. The
//! admission table's composite primary key is what makes concurrent
//! same-key deliveries race safely: the loser gets a unique violation,
//! surfaced as `Conflict`.

use chrono::Utc;
use sqlx::Row;
use uuid::Uuid;

use flowplane_core::repository::TriggerRepository;
use flowplane_types::error::RepositoryError;
use flowplane_types::trigger::{RoutingConfig, SubscriptionKind, TriggerAdmission, TriggerSubscription};

use super::{SqliteStore, enum_str, format_datetime, parse_datetime, parse_enum, parse_uuid, query_err};

struct SubscriptionRow {
    id: String,
    organization_id: String,
    workflow_id: String,
    trigger_type: String,
    enabled: i64,
    routing: String,
    created_at: String,
}

impl SubscriptionRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            organization_id: row.try_get("organization_id")?,
            workflow_id: row.try_get("workflow_id")?,
            trigger_type: row.try_get("trigger_type")?,
            enabled: row.try_get("enabled")?,
            routing: row.try_get("routing")?,
            created_at: row.try_get("created_at")?,
        })
    }

    fn into_subscription(self) -> Result<TriggerSubscription, RepositoryError> {
        let trigger_type: SubscriptionKind = parse_enum(&self.trigger_type)?;
        let routing: RoutingConfig = serde_json::from_str(&self.routing)
            .map_err(|e| RepositoryError::Query(format!("invalid routing JSON: {e}")))?;
        Ok(TriggerSubscription {
            id: parse_uuid(&self.id)?,
            organization_id: parse_uuid(&self.organization_id)?,
            workflow_id: parse_uuid(&self.workflow_id)?,
            trigger_type,
            enabled: self.enabled != 0,
            routing,
            created_at: parse_datetime(&self.created_at)?,
        })
    }
}

/// Lookup columns derived from the routing config.
fn routing_keys(routing: &RoutingConfig) -> (Option<&str>, Option<&str>, Option<&str>) {
    match routing {
        RoutingConfig::Webhook { token, .. } => (Some(token.as_str()), None, None),
        RoutingConfig::Channel {
            channel,
            event_filter,
        } => (None, Some(channel.as_str()), Some(event_filter.as_str())),
    }
}

impl TriggerRepository for SqliteStore {
    async fn create_subscription(&self, sub: &TriggerSubscription) -> Result<(), RepositoryError> {
        let trigger_type = enum_str(&sub.trigger_type)?;
        let routing = serde_json::to_string(&sub.routing)
            .map_err(|e| RepositoryError::Query(e.to_string()))?;
        let (webhook_token, channel, event_filter) = routing_keys(&sub.routing);

        sqlx::query(
            r#"INSERT INTO trigger_subscriptions
               (id, organization_id, workflow_id, trigger_type, enabled, routing,
                webhook_token, channel, event_filter, created_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(sub.id.to_string())
        .bind(sub.organization_id.to_string())
        .bind(sub.workflow_id.to_string())
        .bind(&trigger_type)
        .bind(sub.enabled as i64)
        .bind(&routing)
        .bind(webhook_token)
        .bind(channel)
        .bind(event_filter)
        .bind(format_datetime(&sub.created_at))
        .execute(&self.pool.writer)
        .await
        .map_err(|e| {
            if e.as_database_error().is_some_and(|d| d.is_unique_violation()) {
                RepositoryError::Conflict("webhook token already in use".to_string())
            } else {
                query_err(e)
            }
        })?;

        Ok(())
    }

    async fn get_subscription(
        &self,
        id: &Uuid,
    ) -> Result<Option<TriggerSubscription>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM trigger_subscriptions WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(query_err)?;

        match row {
            Some(row) => {
                let r = SubscriptionRow::from_row(&row).map_err(query_err)?;
                Ok(Some(r.into_subscription()?))
            }
            None => Ok(None),
        }
    }

    async fn find_by_webhook_token(
        &self,
        token: &str,
    ) -> Result<Option<TriggerSubscription>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM trigger_subscriptions WHERE webhook_token = ?")
            .bind(token)
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(query_err)?;

        match row {
            Some(row) => {
                let r = SubscriptionRow::from_row(&row).map_err(query_err)?;
                Ok(Some(r.into_subscription()?))
            }
            None => Ok(None),
        }
    }

    async fn find_by_channel(
        &self,
        channel: &str,
        event_type: &str,
    ) -> Result<Option<TriggerSubscription>, RepositoryError> {
        let row = sqlx::query(
            "SELECT * FROM trigger_subscriptions WHERE channel = ? AND event_filter = ?",
        )
        .bind(channel)
        .bind(event_type)
        .fetch_optional(&self.pool.reader)
        .await
        .map_err(query_err)?;

        match row {
            Some(row) => {
                let r = SubscriptionRow::from_row(&row).map_err(query_err)?;
                Ok(Some(r.into_subscription()?))
            }
            None => Ok(None),
        }
    }

    async fn set_enabled(&self, id: &Uuid, enabled: bool) -> Result<bool, RepositoryError> {
        let result = sqlx::query("UPDATE trigger_subscriptions SET enabled = ? WHERE id = ?")
            .bind(enabled as i64)
            .bind(id.to_string())
            .execute(&self.pool.writer)
            .await
            .map_err(query_err)?;
        Ok(result.rows_affected() > 0)
    }

    async fn get_admission(
        &self,
        subscription_id: &Uuid,
        idempotency_key: &str,
    ) -> Result<Option<TriggerAdmission>, RepositoryError> {
        let row = sqlx::query(
            "SELECT subscription_id, idempotency_key, run_id, created_at FROM trigger_admissions WHERE subscription_id = ? AND idempotency_key = ?",
        )
        .bind(subscription_id.to_string())
        .bind(idempotency_key)
        .fetch_optional(&self.pool.reader)
        .await
        .map_err(query_err)?;

        match row {
            Some(row) => {
                let subscription_id: String =
                    row.try_get("subscription_id").map_err(query_err)?;
                let idempotency_key: String =
                    row.try_get("idempotency_key").map_err(query_err)?;
                let run_id: String = row.try_get("run_id").map_err(query_err)?;
                let created_at: String = row.try_get("created_at").map_err(query_err)?;
                Ok(Some(TriggerAdmission {
                    subscription_id: parse_uuid(&subscription_id)?,
                    idempotency_key,
                    run_id: parse_uuid(&run_id)?,
                    created_at: parse_datetime(&created_at)?,
                }))
            }
            None => Ok(None),
        }
    }

    async fn record_admission(&self, admission: &TriggerAdmission) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO trigger_admissions (subscription_id, idempotency_key, run_id, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(admission.subscription_id.to_string())
        .bind(&admission.idempotency_key)
        .bind(admission.run_id.to_string())
        .bind(format_datetime(&admission.created_at))
        .execute(&self.pool.writer)
        .await
        .map_err(|e| {
            if e.as_database_error().is_some_and(|d| d.is_unique_violation()) {
                RepositoryError::Conflict("admission already recorded".to_string())
            } else {
                query_err(e)
            }
        })?;

        Ok(())
    }

    async fn delete_admission(
        &self,
        subscription_id: &Uuid,
        idempotency_key: &str,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            "DELETE FROM trigger_admissions WHERE subscription_id = ? AND idempotency_key = ?",
        )
        .bind(subscription_id.to_string())
        .bind(idempotency_key)
        .execute(&self.pool.writer)
        .await
        .map_err(query_err)?;
        Ok(())
    }
}
