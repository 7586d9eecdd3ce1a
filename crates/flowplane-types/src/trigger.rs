//! Trigger subscription and idempotency types.
//!
//! A `TriggerSubscription` routes an external delivery (webhook call, channel
//! event) to a workflow family. Disabling one makes its endpoint behave as
//! not-found. A `TriggerAdmission` records an admitted (subscription,
//! idempotency key) pair so at-least-once upstream delivery admits at most
//! one run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Which kind of external delivery this subscription accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionKind {
    Webhook,
    Channel,
}

impl SubscriptionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionKind::Webhook => "webhook",
            SubscriptionKind::Channel => "channel",
        }
    }
}

/// Provider-specific routing configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RoutingConfig {
    /// Inbound webhook addressed by an opaque URL token.
    Webhook {
        token: String,
        /// When present, deliveries must carry a valid HMAC-SHA256 signature.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        secret: Option<String>,
    },
    /// Inbound channel event matched on channel + event type.
    Channel {
        channel: String,
        event_filter: String,
    },
}

/// A trigger endpoint bound to a workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerSubscription {
    pub id: Uuid,
    pub organization_id: Uuid,
    /// Workflow family the trigger admits runs for (current published
    /// revision is resolved at admission time).
    pub workflow_id: Uuid,
    pub trigger_type: SubscriptionKind,
    pub enabled: bool,
    pub routing: RoutingConfig,
    pub created_at: DateTime<Utc>,
}

/// Idempotency record for one admitted external delivery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerAdmission {
    pub subscription_id: Uuid,
    pub idempotency_key: String,
    pub run_id: Uuid,
    pub created_at: DateTime<Utc>,
}
