//! Domain error types shared across crates.
//!
//! Error taxonomy: structural failures (DSL validation) are reported
//! pre-publish and carry stable codes; admission failures reject before any
//! record exists; infrastructure failures are compensated and retryable;
//! execution failures live in the event log, never as thrown errors.

use thiserror::Error;
use uuid::Uuid;

/// Errors from repository operations (used by trait definitions in
/// flowplane-core).
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database connection error")]
    Connection,

    #[error("query error: {0}")]
    Query(String),

    #[error("entity not found")]
    NotFound,

    #[error("conflict: {0}")]
    Conflict(String),
}

/// Errors from the run queue producer.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("queue unavailable: {0}")]
    Unavailable(String),
}

/// Errors surfaced by trigger admission.
#[derive(Debug, Error)]
pub enum AdmissionError {
    /// Unknown or disabled subscription. Deliberately indistinguishable so
    /// inactive triggers do not leak their existence.
    #[error("trigger subscription not found")]
    SubscriptionNotFound,

    #[error("workflow {0} has no published revision")]
    NotPublished(Uuid),

    #[error("workflow not found")]
    WorkflowNotFound,

    #[error("organization mismatch")]
    TenantMismatch,

    /// Run creation was rolled back because the queue producer failed.
    #[error("queue unavailable")]
    QueueUnavailable(#[source] QueueError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// Errors from the approval gate.
#[derive(Debug, Error)]
pub enum ApprovalError {
    #[error("approval request not found")]
    NotFound,

    /// A decision was already recorded; the first decision wins.
    #[error("approval {0} already decided")]
    AlreadyDecided(Uuid),

    #[error("queue unavailable")]
    QueueUnavailable(#[source] QueueError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// Errors from the run engine and dispatcher.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("run {0} not found")]
    RunNotFound(Uuid),

    #[error("definition {0} not found")]
    DefinitionNotFound(Uuid),

    #[error("run {0} is claimed by another worker")]
    ClaimContended(Uuid),

    #[error("no paired executor available for capability '{capability}'")]
    NoExecutorAvailable { capability: String },

    #[error("node '{node_id}' references malformed context: {message}")]
    ContextError { node_id: String, message: String },

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error(transparent)]
    Queue(#[from] QueueError),
}
