//! Axum router configuration with middleware.
//!
//! All routes are under `/api/v1/` except `/health`.
//! Middleware: CORS, tracing.

use axum::routing::{get, post, put};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::http::handlers;
use crate::state::AppState;

/// Build the complete API router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        // Definitions
        .route(
            "/workflows/{id}",
            put(handlers::workflow::save_definition).get(handlers::workflow::get_definition),
        )
        .route(
            "/workflows/{id}/publish",
            post(handlers::workflow::publish_definition),
        )
        .route(
            "/workflows/{id}/revisions",
            get(handlers::workflow::list_revisions).post(handlers::workflow::clone_revision),
        )
        // Runs
        .route(
            "/workflows/{id}/runs",
            post(handlers::run::start_run).get(handlers::run::list_runs),
        )
        .route("/workflows/{id}/runs/{run_id}", get(handlers::run::get_run))
        .route(
            "/workflows/{id}/runs/{run_id}/events",
            get(handlers::run::list_events),
        )
        // Triggers
        .route(
            "/triggers/webhook/{token}",
            post(handlers::trigger::receive_webhook),
        )
        .route(
            "/internal/channels/trigger-run",
            post(handlers::trigger::trigger_channel_run),
        )
        // Approvals
        .route("/approvals/{id}/approve", post(handlers::approval::approve))
        .route("/approvals/{id}/reject", post(handlers::approval::reject));

    Router::new()
        .nest("/api/v1", api_routes)
        .route("/health", get(health_check))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// GET /health - Simple health check endpoint (no tenancy required).
async fn health_check() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
