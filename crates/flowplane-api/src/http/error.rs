//! Application error type mapping to HTTP status codes and envelope format.
//!
//! Every error carries a stable machine code. Structural validation failures
//! additionally carry the full violation report in `details`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use flowplane_types::dsl::DslViolation;
use flowplane_types::error::{AdmissionError, ApprovalError, RepositoryError};

/// Application-level error that maps to HTTP responses.
#[derive(Debug)]
pub enum AppError {
    /// Trigger/run admission failures.
    Admission(AdmissionError),
    /// Approval gate failures.
    Approval(ApprovalError),
    /// Raw repository failures from direct store access.
    Repository(RepositoryError),
    /// Attempted write to a published definition revision.
    PublishedImmutable,
    /// Publish blocked by structural violations.
    ValidationFailed(Vec<DslViolation>),
    /// Resource belongs to another organization.
    TenantMismatch,
    /// Resource does not exist.
    NotFound(&'static str),
    /// Missing or malformed `x-organization-id` header.
    OrganizationRequired(String),
    /// Missing or wrong `x-service-token` on an internal route.
    ServiceTokenRequired,
    /// Webhook HMAC signature missing or wrong.
    SignatureInvalid,
    /// Generic internal error.
    Internal(String),
}

impl From<AdmissionError> for AppError {
    fn from(e: AdmissionError) -> Self {
        AppError::Admission(e)
    }
}

impl From<ApprovalError> for AppError {
    fn from(e: ApprovalError) -> Self {
        AppError::Approval(e)
    }
}

impl From<RepositoryError> for AppError {
    fn from(e: RepositoryError) -> Self {
        AppError::Repository(e)
    }
}

fn repository_parts(e: &RepositoryError) -> (StatusCode, &'static str, String) {
    match e {
        RepositoryError::NotFound => (
            StatusCode::NOT_FOUND,
            "NOT_FOUND",
            "resource not found".to_string(),
        ),
        RepositoryError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg.clone()),
        other => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "INTERNAL_ERROR",
            other.to_string(),
        ),
    }
}

impl AppError {
    pub(crate) fn parts(&self) -> (StatusCode, &'static str, String, Option<serde_json::Value>) {
        match self {
            AppError::Admission(e) => {
                let (status, code, message) = match e {
                    AdmissionError::SubscriptionNotFound => (
                        StatusCode::NOT_FOUND,
                        "SUBSCRIPTION_NOT_FOUND",
                        e.to_string(),
                    ),
                    AdmissionError::NotPublished(_) => {
                        (StatusCode::CONFLICT, "NOT_PUBLISHED", e.to_string())
                    }
                    AdmissionError::WorkflowNotFound => {
                        (StatusCode::NOT_FOUND, "NOT_FOUND", e.to_string())
                    }
                    AdmissionError::TenantMismatch => {
                        (StatusCode::FORBIDDEN, "TENANT_MISMATCH", e.to_string())
                    }
                    AdmissionError::QueueUnavailable(_) => (
                        StatusCode::SERVICE_UNAVAILABLE,
                        "QUEUE_UNAVAILABLE",
                        e.to_string(),
                    ),
                    AdmissionError::Repository(inner) => repository_parts(inner),
                };
                (status, code, message, None)
            }
            AppError::Approval(e) => {
                let (status, code, message) = match e {
                    ApprovalError::NotFound => (StatusCode::NOT_FOUND, "NOT_FOUND", e.to_string()),
                    ApprovalError::AlreadyDecided(_) => {
                        (StatusCode::CONFLICT, "ALREADY_DECIDED", e.to_string())
                    }
                    ApprovalError::QueueUnavailable(_) => (
                        StatusCode::SERVICE_UNAVAILABLE,
                        "QUEUE_UNAVAILABLE",
                        e.to_string(),
                    ),
                    ApprovalError::Repository(inner) => repository_parts(inner),
                };
                (status, code, message, None)
            }
            AppError::Repository(e) => {
                let (status, code, message) = repository_parts(e);
                (status, code, message, None)
            }
            AppError::PublishedImmutable => (
                StatusCode::CONFLICT,
                "PUBLISHED_IMMUTABLE",
                "published definitions are immutable; clone a new revision".to_string(),
                None,
            ),
            AppError::ValidationFailed(violations) => (
                StatusCode::BAD_REQUEST,
                "VALIDATION_FAILED",
                "definition failed structural validation".to_string(),
                serde_json::to_value(violations).ok(),
            ),
            AppError::TenantMismatch => (
                StatusCode::FORBIDDEN,
                "TENANT_MISMATCH",
                "organization mismatch".to_string(),
                None,
            ),
            AppError::NotFound(what) => (
                StatusCode::NOT_FOUND,
                "NOT_FOUND",
                format!("{what} not found"),
                None,
            ),
            AppError::OrganizationRequired(msg) => (
                StatusCode::BAD_REQUEST,
                "ORGANIZATION_REQUIRED",
                msg.clone(),
                None,
            ),
            AppError::ServiceTokenRequired => (
                StatusCode::UNAUTHORIZED,
                "SERVICE_TOKEN_REQUIRED",
                "missing or invalid x-service-token header".to_string(),
                None,
            ),
            AppError::SignatureInvalid => (
                StatusCode::UNAUTHORIZED,
                "SIGNATURE_INVALID",
                "webhook signature missing or invalid".to_string(),
                None,
            ),
            AppError::Internal(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                msg.clone(),
                None,
            ),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message, details) = self.parts();

        let mut error = json!({
            "code": code,
            "message": message,
        });
        if let Some(details) = details {
            error["details"] = details;
        }

        let body = json!({
            "data": null,
            "meta": {
                "request_id": "",
                "timestamp": chrono::Utc::now().to_rfc3339(),
                "response_time_ms": 0
            },
            "errors": [error]
        });

        (
            status,
            [(axum::http::header::CONTENT_TYPE, "application/json")],
            body.to_string(),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowplane_types::dsl::{DslViolation, ViolationCode};
    use flowplane_types::error::QueueError;
    use uuid::Uuid;

    #[test]
    fn admission_errors_carry_stable_codes() {
        let (status, code, _, _) =
            AppError::Admission(AdmissionError::SubscriptionNotFound).parts();
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(code, "SUBSCRIPTION_NOT_FOUND");

        let (status, code, _, _) =
            AppError::Admission(AdmissionError::NotPublished(Uuid::now_v7())).parts();
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(code, "NOT_PUBLISHED");

        let (status, code, _, _) = AppError::Admission(AdmissionError::QueueUnavailable(
            QueueError::Unavailable("consumer dropped".to_string()),
        ))
        .parts();
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(code, "QUEUE_UNAVAILABLE");
    }

    #[test]
    fn approval_already_decided_is_conflict() {
        let (status, code, _, _) =
            AppError::Approval(ApprovalError::AlreadyDecided(Uuid::now_v7())).parts();
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(code, "ALREADY_DECIDED");
    }

    #[test]
    fn validation_failed_includes_violation_details() {
        let violations = vec![DslViolation::new(
            ViolationCode::CycleDetected,
            "cycle through 'a'",
        )];
        let (status, code, _, details) = AppError::ValidationFailed(violations).parts();
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(code, "VALIDATION_FAILED");
        let details = details.unwrap();
        assert_eq!(details[0]["code"], "CYCLE_DETECTED");
    }

    #[test]
    fn immutability_and_tenancy_codes() {
        let (status, code, _, _) = AppError::PublishedImmutable.parts();
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(code, "PUBLISHED_IMMUTABLE");

        let (status, code, _, _) = AppError::TenantMismatch.parts();
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(code, "TENANT_MISMATCH");

        let (status, code, _, _) = AppError::ServiceTokenRequired.parts();
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(code, "SERVICE_TOKEN_REQUIRED");
    }
}
