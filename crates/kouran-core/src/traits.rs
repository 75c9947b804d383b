//! Seams between the pipeline and its collaborators.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{DeliveryOutcome, Outage, Recipient};

/// Storage gateway consumed by change detection and dispatch.
///
/// Every write is scoped to one row, so overlapping runs cannot corrupt
/// unrelated outages or notifications.
#[async_trait]
pub trait OutageStore: Send + Sync {
    async fn outage_exists(&self, id: &str) -> Result<bool>;

    /// Insert a first-seen outage. An existing row with the same id is left untouched.
    async fn create_outage(&self, outage: &Outage) -> Result<()>;

    async fn touch_last_checked(&self, id: &str) -> Result<()>;

    async fn notification_exists(&self, chat_id: i64, outage_id: &str) -> Result<bool>;

    /// Record a confirmed delivery. Idempotent per (chat, outage) pair.
    async fn record_notification(&self, chat_id: i64, outage_id: &str) -> Result<()>;

    async fn active_subscribers_for_locality(&self, locality: &str) -> Result<Vec<Recipient>>;

    async fn deactivate_subscriber(&self, chat_id: i64) -> Result<()>;
}

/// Message delivery gateway.
///
/// Implementations own the provider-specific mapping from raw failures to
/// [`DeliveryOutcome::Transient`] or [`DeliveryOutcome::Permanent`].
#[async_trait]
pub trait MessageSender: Send + Sync {
    fn name(&self) -> &str;

    async fn send(&self, chat_id: i64, text: &str) -> DeliveryOutcome;
}
