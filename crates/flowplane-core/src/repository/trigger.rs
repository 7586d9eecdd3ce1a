//! Trigger subscription and idempotency storage port.

use flowplane_types::error::RepositoryError;
use flowplane_types::trigger::{TriggerAdmission, TriggerSubscription};
use uuid::Uuid;

/// Persistence contract for trigger subscriptions and admission records.
pub trait TriggerRepository: Send + Sync {
    fn create_subscription(
        &self,
        sub: &TriggerSubscription,
    ) -> impl Future<Output = Result<(), RepositoryError>> + Send;

    fn get_subscription(
        &self,
        id: &Uuid,
    ) -> impl Future<Output = Result<Option<TriggerSubscription>, RepositoryError>> + Send;

    /// Look up a webhook subscription by its URL token. Returns disabled
    /// subscriptions too -- the admission layer decides how to present them.
    fn find_by_webhook_token(
        &self,
        token: &str,
    ) -> impl Future<Output = Result<Option<TriggerSubscription>, RepositoryError>> + Send;

    /// Look up a channel subscription matching (channel, event type).
    fn find_by_channel(
        &self,
        channel: &str,
        event_type: &str,
    ) -> impl Future<Output = Result<Option<TriggerSubscription>, RepositoryError>> + Send;

    fn set_enabled(
        &self,
        id: &Uuid,
        enabled: bool,
    ) -> impl Future<Output = Result<bool, RepositoryError>> + Send;

    /// Prior admission for (subscription, idempotency key), if any.
    fn get_admission(
        &self,
        subscription_id: &Uuid,
        idempotency_key: &str,
    ) -> impl Future<Output = Result<Option<TriggerAdmission>, RepositoryError>> + Send;

    fn record_admission(
        &self,
        admission: &TriggerAdmission,
    ) -> impl Future<Output = Result<(), RepositoryError>> + Send;

    /// Remove an admission record (queue handoff compensation only).
    fn delete_admission(
        &self,
        subscription_id: &Uuid,
        idempotency_key: &str,
    ) -> impl Future<Output = Result<(), RepositoryError>> + Send;
}
