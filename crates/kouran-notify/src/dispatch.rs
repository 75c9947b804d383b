//! Notification dispatch: at most one successful delivery per (subscriber, outage).
//!
//! The notification record is written only after the sender confirms
//! delivery. A crash between the two can cause one duplicate send on the next
//! run; it can never cause a missed one.

use kouran_core::{DeliveryOutcome, MessageSender, Outage, OutageStore, Recipient};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::watch;

use crate::limiter::SendLimiter;
use crate::templates::render_outage_alert;

/// Per-run dispatch counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DispatchReport {
    pub delivered: usize,
    pub already_sent: usize,
    pub transient: usize,
    pub permanent: usize,
    pub storage_errors: usize,
    /// The loop stopped early on shutdown.
    pub interrupted: bool,
}

impl DispatchReport {
    pub fn attempts(&self) -> usize {
        self.delivered + self.transient + self.permanent
    }
}

pub struct NotificationDispatcher {
    store: Arc<dyn OutageStore>,
    sender: Arc<dyn MessageSender>,
    limiter: Arc<SendLimiter>,
    default_language: String,
    shutdown: Option<watch::Receiver<bool>>,
}

impl NotificationDispatcher {
    pub fn new(
        store: Arc<dyn OutageStore>,
        sender: Arc<dyn MessageSender>,
        limiter: Arc<SendLimiter>,
        default_language: &str,
    ) -> Self {
        Self {
            store,
            sender,
            limiter,
            default_language: default_language.to_string(),
            shutdown: None,
        }
    }

    /// Stop between subscribers once the watched flag turns true.
    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    fn shutting_down(&self) -> bool {
        self.shutdown.as_ref().is_some_and(|rx| *rx.borrow())
    }

    /// Notify subscribers about each outage, in order.
    pub async fn dispatch(&self, outages: &[Outage]) -> DispatchReport {
        let mut report = DispatchReport::default();
        // Recipients found unreachable during this run, in case deactivation did not persist.
        let mut unreachable = HashSet::new();

        for outage in outages {
            if report.interrupted {
                break;
            }
            self.dispatch_outage(outage, &mut unreachable, &mut report).await;
        }

        if report.attempts() > 0 || report.storage_errors > 0 {
            tracing::info!(
                "📨 Dispatch via {}: {} delivered, {} already sent, {} transient, {} permanent, {} storage errors",
                self.sender.name(),
                report.delivered,
                report.already_sent,
                report.transient,
                report.permanent,
                report.storage_errors
            );
        }
        report
    }

    async fn dispatch_outage(
        &self,
        outage: &Outage,
        unreachable: &mut HashSet<i64>,
        report: &mut DispatchReport,
    ) {
        let recipients = match self.store.active_subscribers_for_locality(&outage.locality).await {
            Ok(r) => r,
            Err(e) => {
                tracing::error!("Failed to load subscribers for {}: {e}", outage.locality);
                report.storage_errors += 1;
                return;
            }
        };

        if recipients.is_empty() {
            return;
        }
        tracing::info!(
            "Sending notifications for {} to {} users",
            outage.locality,
            recipients.len()
        );

        for recipient in recipients {
            if self.shutting_down() {
                tracing::info!("🛑 Shutdown requested, stopping dispatch");
                report.interrupted = true;
                return;
            }
            if unreachable.contains(&recipient.chat_id) {
                continue;
            }
            self.notify_one(outage, &recipient, unreachable, report).await;
        }
    }

    async fn notify_one(
        &self,
        outage: &Outage,
        recipient: &Recipient,
        unreachable: &mut HashSet<i64>,
        report: &mut DispatchReport,
    ) {
        let chat_id = recipient.chat_id;
        match self.store.notification_exists(chat_id, &outage.id).await {
            Ok(true) => {
                report.already_sent += 1;
                return;
            }
            Ok(false) => {}
            Err(e) => {
                // Unknown state: skip rather than risk a duplicate.
                tracing::error!("Notification lookup failed for {chat_id}/{}: {e}", outage.id);
                report.storage_errors += 1;
                return;
            }
        }

        let text = render_outage_alert(outage, &recipient.language, &self.default_language);
        self.limiter.wait().await;

        match self.sender.send(chat_id, &text).await {
            DeliveryOutcome::Delivered => {
                report.delivered += 1;
                tracing::info!("✅ Sent notification to user {chat_id} for outage {}", outage.id);
                if let Err(e) = self.store.record_notification(chat_id, &outage.id).await {
                    tracing::error!("Delivered but failed to record {chat_id}/{}: {e}", outage.id);
                    report.storage_errors += 1;
                }
            }
            DeliveryOutcome::Permanent(reason) => {
                report.permanent += 1;
                unreachable.insert(chat_id);
                tracing::warn!("⚠️ User {chat_id} is unreachable ({reason}), deactivating");
                if let Err(e) = self.store.deactivate_subscriber(chat_id).await {
                    tracing::error!("Failed to deactivate user {chat_id}: {e}");
                    report.storage_errors += 1;
                }
            }
            DeliveryOutcome::Transient(reason) => {
                report.transient += 1;
                tracing::warn!("⚠️ Delivery to {chat_id} failed, will retry next run: {reason}");
            }
        }
    }
}
