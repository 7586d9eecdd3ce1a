//! Service token guard for `/internal/*` routes.
//!
//! Internal routes are called by trusted channel adapters, not end users.
//! They require the shared token from `config.toml`; when no token is
//! configured the routes are disabled entirely.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use crate::http::error::AppError;
use crate::state::AppState;

/// Marker proving the request carried a valid service token.
pub struct ServiceAuth;

impl FromRequestParts<AppState> for ServiceAuth {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let Some(expected) = state.config.service_token.as_deref() else {
            return Err(AppError::ServiceTokenRequired);
        };

        let provided = parts
            .headers
            .get("x-service-token")
            .and_then(|v| v.to_str().ok())
            .map(str::trim);

        match provided {
            Some(token) if token == expected => Ok(ServiceAuth),
            _ => Err(AppError::ServiceTokenRequired),
        }
    }
}
