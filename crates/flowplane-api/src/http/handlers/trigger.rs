//! Trigger delivery handlers: public webhook intake and the internal
//! channel-event route.
//!
//! Webhook deliveries are admitted at-least-once by upstream providers; the
//! `x-idempotency-key` header collapses redeliveries onto the original run.
//! When the subscription carries a secret, the raw body must be signed
//! GitHub-style: `x-signature-256: sha256=<hex hmac>`.

use std::time::Instant;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use serde_json::json;
use sha2::Sha256;
use uuid::Uuid;

use flowplane_core::engine::Admission;
use flowplane_core::repository::TriggerRepository;
use flowplane_types::trigger::RoutingConfig;

use crate::http::error::AppError;
use crate::http::extractors::service::ServiceAuth;
use crate::http::response::ApiResponse;
use crate::state::AppState;

/// POST /api/v1/triggers/webhook/{token} - Admit a webhook delivery.
pub async fn receive_webhook(
    State(state): State<AppState>,
    Path(token): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, ApiResponse<serde_json::Value>), AppError> {
    let start = Instant::now();
    let request_id = Uuid::now_v7().to_string();

    // Signature check needs the subscription secret before admission.
    if let Some(subscription) = state.store.find_by_webhook_token(&token).await?
        && let RoutingConfig::Webhook {
            secret: Some(secret),
            ..
        } = &subscription.routing
    {
        let header = headers
            .get("x-signature-256")
            .and_then(|v| v.to_str().ok());
        verify_signature(secret, &body, header)?;
    }

    let payload: serde_json::Value =
        serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null);
    let idempotency_key = headers
        .get("x-idempotency-key")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|k| !k.is_empty());

    let admission = state
        .admission
        .admit_webhook(&token, idempotency_key, payload)
        .await?;

    let elapsed = start.elapsed().as_millis() as u64;
    Ok((StatusCode::ACCEPTED, admitted(admission, request_id, elapsed)))
}

/// Body of POST /internal/channels/trigger-run.
#[derive(Debug, Deserialize)]
pub struct ChannelTriggerRequest {
    pub channel: String,
    pub event_type: String,
    #[serde(default)]
    pub idempotency_key: Option<String>,
    #[serde(default)]
    pub payload: serde_json::Value,
}

/// POST /api/v1/internal/channels/trigger-run - Admit a channel event.
///
/// Called by trusted channel adapters; guarded by the service token.
pub async fn trigger_channel_run(
    State(state): State<AppState>,
    _auth: ServiceAuth,
    Json(body): Json<ChannelTriggerRequest>,
) -> Result<(StatusCode, ApiResponse<serde_json::Value>), AppError> {
    let start = Instant::now();
    let request_id = Uuid::now_v7().to_string();

    let admission = state
        .admission
        .admit_channel(
            &body.channel,
            &body.event_type,
            body.idempotency_key.as_deref(),
            body.payload,
        )
        .await?;

    let elapsed = start.elapsed().as_millis() as u64;
    Ok((StatusCode::CREATED, admitted(admission, request_id, elapsed)))
}

fn admitted(
    admission: Admission,
    request_id: String,
    elapsed: u64,
) -> ApiResponse<serde_json::Value> {
    let data = json!({
        "run_id": admission.run.run_id,
        "duplicate": admission.duplicate,
    });
    ApiResponse::success(data, request_id, elapsed).with_link(
        "run",
        &format!(
            "/api/v1/workflows/{}/runs/{}",
            admission.run.workflow_id, admission.run.run_id
        ),
    )
}

/// Verify a GitHub-style HMAC-SHA256 body signature.
///
/// Decodes the hex digest and hands it to the `Mac` for a constant-time
/// comparison. The `sha256=` prefix is accepted but not required.
fn verify_signature(secret: &str, body: &[u8], header: Option<&str>) -> Result<(), AppError> {
    let Some(header) = header else {
        return Err(AppError::SignatureInvalid);
    };
    let provided = header.trim();
    let provided = provided.strip_prefix("sha256=").unwrap_or(provided);
    let Some(provided) = hex_decode(provided) else {
        return Err(AppError::SignatureInvalid);
    };

    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
        .map_err(|_| AppError::SignatureInvalid)?;
    mac.update(body);
    mac.verify_slice(&provided)
        .map_err(|_| AppError::SignatureInvalid)
}

fn hex_decode(hex: &str) -> Option<Vec<u8>> {
    if !hex.is_ascii() || hex.len() % 2 != 0 {
        return None;
    }
    (0..hex.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&hex[i..i + 2], 16).ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sign(secret: &str, body: &[u8]) -> String {
        let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(body);
        let hex: String = mac
            .finalize()
            .into_bytes()
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect();
        format!("sha256={hex}")
    }

    #[test]
    fn valid_signature_passes() {
        let body = br#"{"event": "push"}"#;
        let header = sign("s3cret", body);
        assert!(verify_signature("s3cret", body, Some(&header)).is_ok());
    }

    #[test]
    fn signature_is_case_insensitive_hex() {
        let body = b"payload";
        let header = sign("k", body).to_uppercase().replace("SHA256=", "sha256=");
        assert!(verify_signature("k", body, Some(&header)).is_ok());
    }

    #[test]
    fn wrong_secret_fails() {
        let body = b"payload";
        let header = sign("other", body);
        assert!(verify_signature("k", body, Some(&header)).is_err());
    }

    #[test]
    fn bare_hex_without_prefix_passes() {
        let body = b"payload";
        let header = sign("k", body).replace("sha256=", "");
        assert!(verify_signature("k", body, Some(&header)).is_ok());
    }

    #[test]
    fn missing_header_fails() {
        assert!(verify_signature("k", b"x", None).is_err());
    }

    #[test]
    fn malformed_digest_fails() {
        // Not hex, odd length, truncated, and non-ASCII all reject cleanly.
        assert!(verify_signature("k", b"x", Some("sha256=not-hex")).is_err());
        assert!(verify_signature("k", b"x", Some("sha256=abc")).is_err());
        let full = sign("k", b"x");
        assert!(verify_signature("k", b"x", Some(&full[..full.len() - 2])).is_err());
        assert!(verify_signature("k", b"x", Some("sha256=ééééééééééééééééééééééééééééééé")).is_err());
    }

    #[test]
    fn tampered_body_fails() {
        let header = sign("k", b"original");
        assert!(verify_signature("k", b"tampered", Some(&header)).is_err());
    }
}
