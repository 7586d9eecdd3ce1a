//! SQLite-backed implementations of the flowplane-core repository ports.
//!
//! One `SqliteStore` implements every port, split across per-entity modules.
//! Conditional transitions (claim, block, resume, decide) are single UPDATE
//! statements whose WHERE clause carries the precondition; the affected row
//! count reports whether the transition happened.

pub mod approval;
pub mod definition;
pub mod event;
pub mod pool;
pub mod run;
pub mod trigger;

use chrono::{DateTime, Utc};
use flowplane_types::error::RepositoryError;
use uuid::Uuid;

pub use pool::{DatabasePool, default_database_url};

/// SQLite-backed store implementing all repository ports.
#[derive(Clone)]
pub struct SqliteStore {
    pool: DatabasePool,
}

impl SqliteStore {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DatabasePool {
        &self.pool
    }
}

// ---------------------------------------------------------------------------
// Shared row helpers
// ---------------------------------------------------------------------------

pub(crate) fn parse_uuid(s: &str) -> Result<Uuid, RepositoryError> {
    s.parse::<Uuid>()
        .map_err(|e| RepositoryError::Query(format!("invalid UUID: {e}")))
}

pub(crate) fn parse_datetime(s: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Query(format!("invalid datetime: {e}")))
}

pub(crate) fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

pub(crate) fn parse_json(s: &str) -> Result<serde_json::Value, RepositoryError> {
    serde_json::from_str(s).map_err(|e| RepositoryError::Query(format!("invalid JSON: {e}")))
}

pub(crate) fn query_err(e: sqlx::Error) -> RepositoryError {
    RepositoryError::Query(e.to_string())
}

/// Decode a snake_case status/kind string into a serde enum.
pub(crate) fn parse_enum<T: serde::de::DeserializeOwned>(s: &str) -> Result<T, RepositoryError> {
    serde_json::from_value(serde_json::Value::String(s.to_string()))
        .map_err(|_| RepositoryError::Query(format!("invalid enum value: {s}")))
}

/// Encode a serde enum as its snake_case string.
pub(crate) fn enum_str<T: serde::Serialize>(v: &T) -> Result<String, RepositoryError> {
    match serde_json::to_value(v).map_err(|e| RepositoryError::Query(e.to_string()))? {
        serde_json::Value::String(s) => Ok(s),
        other => Err(RepositoryError::Query(format!(
            "expected string enum, got {other}"
        ))),
    }
}

#[cfg(test)]
pub(crate) mod test_util {
    use super::*;

    /// Fresh store on a throwaway on-disk database. The tempdir is leaked so
    /// the file outlives the returned pool.
    pub async fn test_store() -> SqliteStore {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test.db");
        let url = format!("sqlite://{}?mode=rwc", db_path.display());
        std::mem::forget(dir);
        SqliteStore::new(DatabasePool::new(&url).await.unwrap())
    }
}
