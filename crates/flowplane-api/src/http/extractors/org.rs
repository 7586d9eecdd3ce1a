//! Tenancy extractor.
//!
//! Every tenant-scoped route reads the calling organization from the
//! `x-organization-id` header. Authentication itself lives in front of this
//! service; the header is the already-verified tenant claim.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use uuid::Uuid;

use crate::http::error::AppError;

/// The organization a request acts on behalf of.
#[derive(Debug, Clone, Copy)]
pub struct OrgContext(pub Uuid);

impl<S: Send + Sync> FromRequestParts<S> for OrgContext {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get("x-organization-id")
            .ok_or_else(|| {
                AppError::OrganizationRequired("missing x-organization-id header".to_string())
            })?
            .to_str()
            .map_err(|_| {
                AppError::OrganizationRequired("invalid x-organization-id encoding".to_string())
            })?;

        let org = Uuid::parse_str(raw.trim()).map_err(|_| {
            AppError::OrganizationRequired(format!("'{raw}' is not a valid organization id"))
        })?;
        Ok(OrgContext(org))
    }
}
