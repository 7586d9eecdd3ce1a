//! Workflow definition handlers: draft save, publish, revision management.
//!
//! Drafts may be saved in any structural state; the validator report rides
//! along in the save response so the editor can surface problems without
//! blocking the save. Publish is the gate that requires a clean report.
//! Published revisions are immutable; editing one goes through the clone
//! endpoint, which opens a fresh draft revision in the same family.

use std::time::Instant;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use flowplane_core::dsl::{canonicalize, validate};
use flowplane_core::repository::DefinitionRepository;
use flowplane_types::dsl::DslDocument;
use flowplane_types::error::RepositoryError;
use flowplane_types::workflow::{DefinitionStatus, WorkflowDefinition};

use crate::http::error::AppError;
use crate::http::extractors::org::OrgContext;
use crate::http::response::ApiResponse;
use crate::state::AppState;

/// Body of PUT /workflows/{id}.
#[derive(Debug, Deserialize)]
pub struct SaveDefinitionRequest {
    pub name: String,
    /// v2 or v3 document; canonicalized before storage.
    pub dsl: DslDocument,
    /// Opaque editor layout blob, stored verbatim.
    #[serde(default)]
    pub editor_state: Option<serde_json::Value>,
    /// Revision family to create the definition in. Defaults to the
    /// definition id itself for a brand-new workflow.
    #[serde(default)]
    pub family_id: Option<Uuid>,
}

/// PUT /api/v1/workflows/{id} - Save a draft definition.
///
/// Violations are reported but do not fail the save.
pub async fn save_definition(
    State(state): State<AppState>,
    OrgContext(org): OrgContext,
    Path(id): Path<Uuid>,
    Json(body): Json<SaveDefinitionRequest>,
) -> Result<ApiResponse<serde_json::Value>, AppError> {
    let start = Instant::now();
    let request_id = Uuid::now_v7().to_string();

    let dsl = canonicalize(body.dsl);
    let violations = validate(&dsl);

    let now = Utc::now();
    let (family_id, revision, created_at) = match state.store.get_definition(&id).await? {
        Some(prior) => {
            if prior.organization_id != org {
                return Err(AppError::TenantMismatch);
            }
            (prior.family_id, prior.revision, prior.created_at)
        }
        None => {
            let family_id = body.family_id.unwrap_or(id);
            let revision = state.store.max_revision(&family_id).await? + 1;
            (family_id, revision, now)
        }
    };

    let definition = WorkflowDefinition {
        workflow_id: id,
        organization_id: org,
        family_id,
        revision,
        status: DefinitionStatus::Draft,
        name: body.name,
        dsl,
        editor_state: body.editor_state,
        created_at,
        updated_at: now,
    };

    state
        .store
        .save_definition(&definition)
        .await
        .map_err(|e| match e {
            RepositoryError::Conflict(_) => AppError::PublishedImmutable,
            other => AppError::Repository(other),
        })?;

    let elapsed = start.elapsed().as_millis() as u64;
    let data = json!({
        "definition": definition,
        "violations": violations,
    });
    Ok(ApiResponse::success(data, request_id, elapsed)
        .with_link("self", &format!("/api/v1/workflows/{id}"))
        .with_link("publish", &format!("/api/v1/workflows/{id}/publish")))
}

/// GET /api/v1/workflows/{id} - Fetch one definition revision.
pub async fn get_definition(
    State(state): State<AppState>,
    OrgContext(org): OrgContext,
    Path(id): Path<Uuid>,
) -> Result<ApiResponse<WorkflowDefinition>, AppError> {
    let start = Instant::now();
    let request_id = Uuid::now_v7().to_string();

    let definition = state
        .store
        .get_definition(&id)
        .await?
        .ok_or(AppError::NotFound("workflow"))?;
    if definition.organization_id != org {
        return Err(AppError::TenantMismatch);
    }

    let elapsed = start.elapsed().as_millis() as u64;
    Ok(ApiResponse::success(definition, request_id, elapsed)
        .with_link("self", &format!("/api/v1/workflows/{id}"))
        .with_link("runs", &format!("/api/v1/workflows/{id}/runs")))
}

/// POST /api/v1/workflows/{id}/publish - Promote a draft revision.
///
/// The full violation report is returned on failure; the family's previously
/// published revision is demoted atomically on success.
pub async fn publish_definition(
    State(state): State<AppState>,
    OrgContext(org): OrgContext,
    Path(id): Path<Uuid>,
) -> Result<ApiResponse<WorkflowDefinition>, AppError> {
    let start = Instant::now();
    let request_id = Uuid::now_v7().to_string();

    let definition = state
        .store
        .get_definition(&id)
        .await?
        .ok_or(AppError::NotFound("workflow"))?;
    if definition.organization_id != org {
        return Err(AppError::TenantMismatch);
    }

    let violations = validate(&definition.dsl);
    if !violations.is_empty() {
        return Err(AppError::ValidationFailed(violations));
    }

    let published = state.store.publish(&id).await?;

    let elapsed = start.elapsed().as_millis() as u64;
    Ok(ApiResponse::success(published, request_id, elapsed)
        .with_link("self", &format!("/api/v1/workflows/{id}"))
        .with_link("runs", &format!("/api/v1/workflows/{id}/runs")))
}

/// GET /api/v1/workflows/{id}/revisions - All revisions of the family.
pub async fn list_revisions(
    State(state): State<AppState>,
    OrgContext(org): OrgContext,
    Path(id): Path<Uuid>,
) -> Result<ApiResponse<Vec<WorkflowDefinition>>, AppError> {
    let start = Instant::now();
    let request_id = Uuid::now_v7().to_string();

    let definition = state
        .store
        .get_definition(&id)
        .await?
        .ok_or(AppError::NotFound("workflow"))?;
    if definition.organization_id != org {
        return Err(AppError::TenantMismatch);
    }

    let revisions = state.store.list_revisions(&definition.family_id).await?;

    let elapsed = start.elapsed().as_millis() as u64;
    Ok(ApiResponse::success(revisions, request_id, elapsed)
        .with_link("self", &format!("/api/v1/workflows/{id}/revisions")))
}

/// POST /api/v1/workflows/{id}/revisions - Clone into a new draft revision.
pub async fn clone_revision(
    State(state): State<AppState>,
    OrgContext(org): OrgContext,
    Path(id): Path<Uuid>,
) -> Result<(StatusCode, ApiResponse<WorkflowDefinition>), AppError> {
    let start = Instant::now();
    let request_id = Uuid::now_v7().to_string();

    let source = state
        .store
        .get_definition(&id)
        .await?
        .ok_or(AppError::NotFound("workflow"))?;
    if source.organization_id != org {
        return Err(AppError::TenantMismatch);
    }

    let now = Utc::now();
    let draft = WorkflowDefinition {
        workflow_id: Uuid::now_v7(),
        organization_id: org,
        family_id: source.family_id,
        revision: state.store.max_revision(&source.family_id).await? + 1,
        status: DefinitionStatus::Draft,
        name: source.name,
        dsl: source.dsl,
        editor_state: source.editor_state,
        created_at: now,
        updated_at: now,
    };
    state.store.save_definition(&draft).await?;

    let elapsed = start.elapsed().as_millis() as u64;
    let resp = ApiResponse::success(draft.clone(), request_id, elapsed)
        .with_link("self", &format!("/api/v1/workflows/{}", draft.workflow_id))
        .with_link("source", &format!("/api/v1/workflows/{id}"));
    Ok((StatusCode::CREATED, resp))
}
