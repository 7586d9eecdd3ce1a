//! SQLite `DefinitionRepository` implementation.
//!
//! The DSL is stored as a JSON blob; revision bookkeeping lives in columns so
//! publish/demote and max-revision queries stay in SQL.

use chrono::Utc;
use sqlx::Row;
use uuid::Uuid;

use flowplane_core::repository::DefinitionRepository;
use flowplane_types::error::RepositoryError;
use flowplane_types::workflow::{DefinitionStatus, WorkflowDefinition};

use super::{SqliteStore, enum_str, format_datetime, parse_datetime, parse_enum, parse_uuid, query_err};

struct DefinitionRow {
    workflow_id: String,
    organization_id: String,
    family_id: String,
    revision: i64,
    status: String,
    name: String,
    dsl: String,
    editor_state: Option<String>,
    created_at: String,
    updated_at: String,
}

impl DefinitionRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            workflow_id: row.try_get("workflow_id")?,
            organization_id: row.try_get("organization_id")?,
            family_id: row.try_get("family_id")?,
            revision: row.try_get("revision")?,
            status: row.try_get("status")?,
            name: row.try_get("name")?,
            dsl: row.try_get("dsl")?,
            editor_state: row.try_get("editor_state")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn into_definition(self) -> Result<WorkflowDefinition, RepositoryError> {
        let dsl = serde_json::from_str(&self.dsl)
            .map_err(|e| RepositoryError::Query(format!("invalid DSL JSON: {e}")))?;
        let editor_state = self
            .editor_state
            .as_deref()
            .map(|s| {
                serde_json::from_str(s)
                    .map_err(|e| RepositoryError::Query(format!("invalid editor_state: {e}")))
            })
            .transpose()?;
        let status: DefinitionStatus = parse_enum(&self.status)?;

        Ok(WorkflowDefinition {
            workflow_id: parse_uuid(&self.workflow_id)?,
            organization_id: parse_uuid(&self.organization_id)?,
            family_id: parse_uuid(&self.family_id)?,
            revision: self.revision,
            status,
            name: self.name,
            dsl,
            editor_state,
            created_at: parse_datetime(&self.created_at)?,
            updated_at: parse_datetime(&self.updated_at)?,
        })
    }
}

const SELECT_COLS: &str = "workflow_id, organization_id, family_id, revision, status, name, dsl, editor_state, created_at, updated_at";

impl DefinitionRepository for SqliteStore {
    async fn save_definition(&self, def: &WorkflowDefinition) -> Result<(), RepositoryError> {
        let dsl_json = serde_json::to_string(&def.dsl)
            .map_err(|e| RepositoryError::Query(format!("serialize DSL: {e}")))?;
        let editor_state = def
            .editor_state
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| RepositoryError::Query(e.to_string()))?;
        let status = enum_str(&def.status)?;

        // The conflict update is filtered to drafts, so overwriting a
        // published row affects zero rows and surfaces as Conflict.
        let result = sqlx::query(
            r#"INSERT INTO workflows
               (workflow_id, organization_id, family_id, revision, status, name, dsl, editor_state, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT(workflow_id) DO UPDATE SET
                 status = excluded.status,
                 name = excluded.name,
                 dsl = excluded.dsl,
                 editor_state = excluded.editor_state,
                 updated_at = excluded.updated_at
               WHERE workflows.status = 'draft'"#,
        )
        .bind(def.workflow_id.to_string())
        .bind(def.organization_id.to_string())
        .bind(def.family_id.to_string())
        .bind(def.revision)
        .bind(&status)
        .bind(&def.name)
        .bind(&dsl_json)
        .bind(&editor_state)
        .bind(format_datetime(&def.created_at))
        .bind(format_datetime(&def.updated_at))
        .execute(&self.pool.writer)
        .await
        .map_err(query_err)?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::Conflict(
                "published definition is immutable".to_string(),
            ));
        }
        Ok(())
    }

    async fn get_definition(
        &self,
        workflow_id: &Uuid,
    ) -> Result<Option<WorkflowDefinition>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {SELECT_COLS} FROM workflows WHERE workflow_id = ?"
        ))
        .bind(workflow_id.to_string())
        .fetch_optional(&self.pool.reader)
        .await
        .map_err(query_err)?;

        match row {
            Some(row) => {
                let r = DefinitionRow::from_row(&row).map_err(query_err)?;
                Ok(Some(r.into_definition()?))
            }
            None => Ok(None),
        }
    }

    async fn current_published(
        &self,
        family_id: &Uuid,
    ) -> Result<Option<WorkflowDefinition>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {SELECT_COLS} FROM workflows WHERE family_id = ? AND status = 'published' ORDER BY revision DESC LIMIT 1"
        ))
        .bind(family_id.to_string())
        .fetch_optional(&self.pool.reader)
        .await
        .map_err(query_err)?;

        match row {
            Some(row) => {
                let r = DefinitionRow::from_row(&row).map_err(query_err)?;
                Ok(Some(r.into_definition()?))
            }
            None => Ok(None),
        }
    }

    async fn publish(&self, workflow_id: &Uuid) -> Result<WorkflowDefinition, RepositoryError> {
        let now = format_datetime(&Utc::now());
        let mut tx = self.pool.writer.begin().await.map_err(query_err)?;

        let family_id: Option<(String,)> =
            sqlx::query_as("SELECT family_id FROM workflows WHERE workflow_id = ?")
                .bind(workflow_id.to_string())
                .fetch_optional(&mut *tx)
                .await
                .map_err(query_err)?;
        let Some((family_id,)) = family_id else {
            return Err(RepositoryError::NotFound);
        };

        sqlx::query(
            "UPDATE workflows SET status = 'draft', updated_at = ? WHERE family_id = ? AND status = 'published' AND workflow_id != ?",
        )
        .bind(&now)
        .bind(&family_id)
        .bind(workflow_id.to_string())
        .execute(&mut *tx)
        .await
        .map_err(query_err)?;

        sqlx::query("UPDATE workflows SET status = 'published', updated_at = ? WHERE workflow_id = ?")
            .bind(&now)
            .bind(workflow_id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(query_err)?;

        let row = sqlx::query(&format!(
            "SELECT {SELECT_COLS} FROM workflows WHERE workflow_id = ?"
        ))
        .bind(workflow_id.to_string())
        .fetch_one(&mut *tx)
        .await
        .map_err(query_err)?;

        tx.commit().await.map_err(query_err)?;

        DefinitionRow::from_row(&row)
            .map_err(query_err)?
            .into_definition()
    }

    async fn list_revisions(
        &self,
        family_id: &Uuid,
    ) -> Result<Vec<WorkflowDefinition>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {SELECT_COLS} FROM workflows WHERE family_id = ? ORDER BY revision ASC"
        ))
        .bind(family_id.to_string())
        .fetch_all(&self.pool.reader)
        .await
        .map_err(query_err)?;

        let mut defs = Vec::with_capacity(rows.len());
        for row in &rows {
            let r = DefinitionRow::from_row(row).map_err(query_err)?;
            defs.push(r.into_definition()?);
        }
        Ok(defs)
    }

    async fn max_revision(&self, family_id: &Uuid) -> Result<i64, RepositoryError> {
        let (max,): (i64,) =
            sqlx::query_as("SELECT COALESCE(MAX(revision), 0) FROM workflows WHERE family_id = ?")
                .bind(family_id.to_string())
                .fetch_one(&self.pool.reader)
                .await
                .map_err(query_err)?;
        Ok(max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sqlite::test_util::test_store;
    use chrono::Utc;
    use flowplane_types::dsl::{Dsl, TriggerSpec};
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
    async fn save_and_get_roundtrip() {
        let store = test_store().await;
        let def = sample_definition(DefinitionStatus::Draft);
        store.save_definition(&def).await.unwrap();

        let loaded = store.get_definition(&def.workflow_id).await.unwrap().unwrap();
        assert_eq!(loaded.name, "invoice-sync");
        assert_eq!(loaded.family_id, def.family_id);
        assert_eq!(loaded.status, DefinitionStatus::Draft);
    }

    #[tokio::test]
    async fn draft_update_in_place() {
        let store = test_store().await;
        let mut def = sample_definition(DefinitionStatus::Draft);
        store.save_definition(&def).await.unwrap();

        def.name = "invoice-sync-v2".to_string();
        store.save_definition(&def).await.unwrap();

        let loaded = store.get_definition(&def.workflow_id).await.unwrap().unwrap();
        assert_eq!(loaded.name, "invoice-sync-v2");
    }

    #[tokio::test]
    async fn published_definition_is_immutable() {
        let store = test_store().await;
        let def = sample_definition(DefinitionStatus::Published);
        store.save_definition(&def).await.unwrap();

        let err = store.save_definition(&def).await.unwrap_err();
        assert!(matches!(err, RepositoryError::Conflict(_)));
    }

    #[tokio::test]
    async fn publish_demotes_previous_revision() {
        let store = test_store().await;
        let v1 = sample_definition(DefinitionStatus::Draft);
        let family = v1.family_id;
        let mut v2 = sample_definition(DefinitionStatus::Draft);
        v2.family_id = family;
        v2.organization_id = v1.organization_id;
        v2.revision = 2;
        store.save_definition(&v1).await.unwrap();
        store.save_definition(&v2).await.unwrap();

        store.publish(&v1.workflow_id).await.unwrap();
        let published = store.publish(&v2.workflow_id).await.unwrap();
        assert_eq!(published.status, DefinitionStatus::Published);

        let current = store.current_published(&family).await.unwrap().unwrap();
        assert_eq!(current.workflow_id, v2.workflow_id);

        let revs = store.list_revisions(&family).await.unwrap();
        assert_eq!(revs.len(), 2);
        let published_count = revs
            .iter()
            .filter(|d| d.status == DefinitionStatus::Published)
            .count();
        assert_eq!(published_count, 1);
    }

    #[tokio::test]
    async fn publish_unknown_is_not_found() {
        let store = test_store().await;
        let err = store.publish(&Uuid::now_v7()).await.unwrap_err();
        assert!(matches!(err, RepositoryError::NotFound));
    }

    #[tokio::test]
    async fn max_revision_empty_family_is_zero() {
        let store = test_store().await;
        assert_eq!(store.max_revision(&Uuid::now_v7()).await.unwrap(), 0);

        let def = sample_definition(DefinitionStatus::Draft);
        store.save_definition(&def).await.unwrap();
        assert_eq!(store.max_revision(&def.family_id).await.unwrap(), 1);
    }
}
