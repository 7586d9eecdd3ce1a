//! Approval decision handlers.
//!
//! The gate enforces first-decision-wins; a second decision surfaces as 409
//! `ALREADY_DECIDED` regardless of direction.

use std::time::Instant;

use axum::extract::{Path, State};
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use flowplane_types::approval::ApprovalDecision;

use crate::http::error::AppError;
use crate::http::response::ApiResponse;
use crate::state::AppState;

/// Optional body of the decision endpoints.
#[derive(Debug, Default, Deserialize)]
pub struct DecisionRequest {
    #[serde(default)]
    pub decided_by_user_id: Option<Uuid>,
    #[serde(default)]
    pub note: Option<String>,
}

/// POST /api/v1/approvals/{id}/approve - Approve and resume the blocked run.
pub async fn approve(
    state: State<AppState>,
    id: Path<Uuid>,
    body: Option<Json<DecisionRequest>>,
) -> Result<ApiResponse<serde_json::Value>, AppError> {
    decide(state, id, body, ApprovalDecision::Approved).await
}

/// POST /api/v1/approvals/{id}/reject - Reject and fail the blocked run.
pub async fn reject(
    state: State<AppState>,
    id: Path<Uuid>,
    body: Option<Json<DecisionRequest>>,
) -> Result<ApiResponse<serde_json::Value>, AppError> {
    decide(state, id, body, ApprovalDecision::Rejected).await
}

async fn decide(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    body: Option<Json<DecisionRequest>>,
    decision: ApprovalDecision,
) -> Result<ApiResponse<serde_json::Value>, AppError> {
    let start = Instant::now();
    let request_id = Uuid::now_v7().to_string();
    let Json(body) = body.unwrap_or_default();

    let outcome = state
        .approvals
        .decide(id, decision, body.decided_by_user_id, body.note.as_deref())
        .await?;

    let elapsed = start.elapsed().as_millis() as u64;
    let data = json!({
        "approval": outcome.approval,
        "resumed": outcome.resumed,
    });
    Ok(ApiResponse::success(data, request_id, elapsed)
        .with_link("self", &format!("/api/v1/approvals/{id}")))
}
