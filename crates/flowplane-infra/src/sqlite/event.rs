//! SQLite `EventRepository` implementation.
//!
//! `seq` is an AUTOINCREMENT rowid, so append order is assigned by the
//! database and replay order is a plain index scan. The unresolved-dispatch
//! query pushes the resolution scan into SQL with NOT EXISTS over
//! `json_extract(payload, '$.request_id')`.

use chrono::{DateTime, Utc};
use sqlx::Row;
use uuid::Uuid;

use flowplane_core::repository::EventRepository;
use flowplane_types::error::RepositoryError;
use flowplane_types::event::{EventLevel, EventPage, NewRunEvent, RunEvent, RunEventType};

use super::{SqliteStore, enum_str, format_datetime, parse_datetime, parse_enum, parse_json, parse_uuid, query_err};

struct EventRow {
    seq: i64,
    id: String,
    run_id: String,
    event_type: String,
    node_id: Option<String>,
    attempt_count: i64,
    level: String,
    message: String,
    payload: String,
    created_at: String,
}

impl EventRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            seq: row.try_get("seq")?,
            id: row.try_get("id")?,
            run_id: row.try_get("run_id")?,
            event_type: row.try_get("event_type")?,
            node_id: row.try_get("node_id")?,
            attempt_count: row.try_get("attempt_count")?,
            level: row.try_get("level")?,
            message: row.try_get("message")?,
            payload: row.try_get("payload")?,
            created_at: row.try_get("created_at")?,
        })
    }

    fn into_event(self) -> Result<RunEvent, RepositoryError> {
        let event_type: RunEventType = parse_enum(&self.event_type)?;
        let level: EventLevel = parse_enum(&self.level)?;
        Ok(RunEvent {
            id: parse_uuid(&self.id)?,
            seq: self.seq,
            run_id: parse_uuid(&self.run_id)?,
            event_type,
            node_id: self.node_id,
            attempt_count: self.attempt_count as u32,
            level,
            message: self.message,
            payload: parse_json(&self.payload)?,
            created_at: parse_datetime(&self.created_at)?,
        })
    }
}

fn rows_to_events(rows: &[sqlx::sqlite::SqliteRow]) -> Result<Vec<RunEvent>, RepositoryError> {
    let mut events = Vec::with_capacity(rows.len());
    for row in rows {
        let r = EventRow::from_row(row).map_err(query_err)?;
        events.push(r.into_event()?);
    }
    Ok(events)
}

impl EventRepository for SqliteStore {
    async fn append_event(&self, event: NewRunEvent) -> Result<RunEvent, RepositoryError> {
        let id = Uuid::now_v7();
        let created_at = Utc::now();
        let event_type = enum_str(&event.event_type)?;
        let level = enum_str(&event.level)?;
        let payload = serde_json::to_string(&event.payload)
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        let result = sqlx::query(
            r#"INSERT INTO run_events
               (id, run_id, event_type, node_id, attempt_count, level, message, payload, created_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(id.to_string())
        .bind(event.run_id.to_string())
        .bind(&event_type)
        .bind(&event.node_id)
        .bind(event.attempt_count as i64)
        .bind(&level)
        .bind(&event.message)
        .bind(&payload)
        .bind(format_datetime(&created_at))
        .execute(&self.pool.writer)
        .await
        .map_err(query_err)?;

        Ok(RunEvent {
            id,
            seq: result.last_insert_rowid(),
            run_id: event.run_id,
            event_type: event.event_type,
            node_id: event.node_id,
            attempt_count: event.attempt_count,
            level: event.level,
            message: event.message,
            payload: event.payload,
            created_at,
        })
    }

    async fn list_events(
        &self,
        run_id: &Uuid,
        limit: u32,
        after: Option<i64>,
    ) -> Result<EventPage, RepositoryError> {
        let rows = sqlx::query(
            "SELECT * FROM run_events WHERE run_id = ? AND seq > ? ORDER BY seq ASC LIMIT ?",
        )
        .bind(run_id.to_string())
        .bind(after.unwrap_or(0))
        .bind(limit as i64)
        .fetch_all(&self.pool.reader)
        .await
        .map_err(query_err)?;

        let events = rows_to_events(&rows)?;
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
        let rows = sqlx::query("SELECT * FROM run_events WHERE run_id = ? ORDER BY seq ASC")
            .bind(run_id.to_string())
            .fetch_all(&self.pool.reader)
            .await
            .map_err(query_err)?;
        rows_to_events(&rows)
    }

    async fn list_unresolved_dispatches(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<RunEvent>, RepositoryError> {
        let rows = sqlx::query(
            r#"SELECT d.* FROM run_events d
               WHERE d.event_type = 'node_dispatched'
                 AND d.created_at <= ?
                 AND NOT EXISTS (
                   SELECT 1 FROM run_events r
                   WHERE r.run_id = d.run_id
                     AND r.seq > d.seq
                     AND ((r.event_type = 'remote_result_received'
                           AND json_extract(r.payload, '$.request_id')
                               = json_extract(d.payload, '$.request_id'))
                          OR (r.node_id = d.node_id
                              AND r.event_type IN ('node_succeeded', 'node_failed')))
                 )
               ORDER BY d.seq ASC"#,
        )
        .bind(format_datetime(&cutoff))
        .fetch_all(&self.pool.reader)
        .await
        .map_err(query_err)?;
        rows_to_events(&rows)
    }
}
