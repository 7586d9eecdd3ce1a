//! Run handlers: manual start, inspection, and event log paging.

use std::time::Instant;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use flowplane_core::repository::{DefinitionRepository, EventRepository, RunRepository};
use flowplane_types::workflow::WorkflowRun;

use crate::http::error::AppError;
use crate::http::extractors::org::OrgContext;
use crate::http::response::ApiResponse;
use crate::state::AppState;

const MAX_PAGE: u32 = 200;

/// Body of POST /workflows/{id}/runs.
#[derive(Debug, Default, Deserialize)]
pub struct StartRunRequest {
    /// Trigger input exposed to nodes as the `/input` context pointer.
    #[serde(default)]
    pub input: serde_json::Value,
    #[serde(default)]
    pub requested_by_user_id: Option<Uuid>,
}

/// Query parameters for listing runs.
#[derive(Debug, Deserialize)]
pub struct ListRunsQuery {
    #[serde(default = "default_run_limit")]
    pub limit: u32,
}

fn default_run_limit() -> u32 {
    20
}

/// Query parameters for the event log cursor page.
#[derive(Debug, Deserialize)]
pub struct ListEventsQuery {
    #[serde(default = "default_event_limit")]
    pub limit: u32,
    /// Seq of the last event of the previous page.
    #[serde(default)]
    pub after: Option<i64>,
}

fn default_event_limit() -> u32 {
    50
}

/// POST /api/v1/workflows/{id}/runs - Start a manual run.
pub async fn start_run(
    State(state): State<AppState>,
    OrgContext(org): OrgContext,
    Path(id): Path<Uuid>,
    body: Option<Json<StartRunRequest>>,
) -> Result<(StatusCode, ApiResponse<WorkflowRun>), AppError> {
    let start = Instant::now();
    let request_id = Uuid::now_v7().to_string();
    let Json(body) = body.unwrap_or_default();

    let run = state
        .admission
        .start_manual(org, id, body.requested_by_user_id, body.input)
        .await?;

    let elapsed = start.elapsed().as_millis() as u64;
    let resp = ApiResponse::success(run.clone(), request_id, elapsed)
        .with_link(
            "self",
            &format!("/api/v1/workflows/{id}/runs/{}", run.run_id),
        )
        .with_link(
            "events",
            &format!("/api/v1/workflows/{id}/runs/{}/events", run.run_id),
        );
    Ok((StatusCode::CREATED, resp))
}

/// GET /api/v1/workflows/{id}/runs - Runs of a definition, newest first.
pub async fn list_runs(
    State(state): State<AppState>,
    OrgContext(org): OrgContext,
    Path(id): Path<Uuid>,
    Query(query): Query<ListRunsQuery>,
) -> Result<ApiResponse<Vec<WorkflowRun>>, AppError> {
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

    let limit = query.limit.clamp(1, MAX_PAGE);
    let runs = state.store.list_runs(&id, limit).await?;

    let elapsed = start.elapsed().as_millis() as u64;
    Ok(ApiResponse::success(runs, request_id, elapsed)
        .with_link("self", &format!("/api/v1/workflows/{id}/runs"))
        .with_link("workflow", &format!("/api/v1/workflows/{id}")))
}

/// GET /api/v1/workflows/{id}/runs/{run_id} - One run with its lease and
/// blocked state.
pub async fn get_run(
    State(state): State<AppState>,
    OrgContext(org): OrgContext,
    Path((id, run_id)): Path<(Uuid, Uuid)>,
) -> Result<ApiResponse<WorkflowRun>, AppError> {
    let start = Instant::now();
    let request_id = Uuid::now_v7().to_string();

    let run = fetch_scoped_run(&state, org, &id, &run_id).await?;

    let elapsed = start.elapsed().as_millis() as u64;
    Ok(ApiResponse::success(run, request_id, elapsed)
        .with_link("self", &format!("/api/v1/workflows/{id}/runs/{run_id}"))
        .with_link(
            "events",
            &format!("/api/v1/workflows/{id}/runs/{run_id}/events"),
        ))
}

/// GET /api/v1/workflows/{id}/runs/{run_id}/events - Cursor page of the
/// append-only event log, ordered by seq.
pub async fn list_events(
    State(state): State<AppState>,
    OrgContext(org): OrgContext,
    Path((id, run_id)): Path<(Uuid, Uuid)>,
    Query(query): Query<ListEventsQuery>,
) -> Result<ApiResponse<serde_json::Value>, AppError> {
    let start = Instant::now();
    let request_id = Uuid::now_v7().to_string();

    fetch_scoped_run(&state, org, &id, &run_id).await?;

    let limit = query.limit.clamp(1, MAX_PAGE);
    let page = state.store.list_events(&run_id, limit, query.after).await?;

    let elapsed = start.elapsed().as_millis() as u64;
    let data = json!({
        "events": page.events,
        "next_cursor": page.next_cursor,
    });
    let mut resp = ApiResponse::success(data, request_id, elapsed).with_link(
        "self",
        &format!("/api/v1/workflows/{id}/runs/{run_id}/events"),
    );
    if let Some(cursor) = page.next_cursor {
        resp = resp.with_link(
            "next",
            &format!("/api/v1/workflows/{id}/runs/{run_id}/events?limit={limit}&after={cursor}"),
        );
    }
    Ok(resp)
}

/// Load a run, enforcing both the workflow path scope and the tenant.
async fn fetch_scoped_run(
    state: &AppState,
    org: Uuid,
    workflow_id: &Uuid,
    run_id: &Uuid,
) -> Result<WorkflowRun, AppError> {
    let run = state
        .store
        .get_run(run_id)
        .await?
        .ok_or(AppError::NotFound("run"))?;
    if run.workflow_id != *workflow_id {
        return Err(AppError::NotFound("run"));
    }
    if run.organization_id != org {
        return Err(AppError::TenantMismatch);
    }
    Ok(run)
}
