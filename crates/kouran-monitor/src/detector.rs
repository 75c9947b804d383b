//! Change detection against the outage log.

use kouran_core::{Outage, OutageStore, Result};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

/// Outcome of classifying one snapshot.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Classification {
    /// Outages seen for the first time, in snapshot order.
    pub new: Vec<Outage>,
    pub known: usize,
    /// Records whose storage operations kept failing.
    pub failed: usize,
    /// Ids of the failed records; they may not be stored.
    pub failed_ids: HashSet<String>,
}

pub struct ChangeDetector {
    store: Arc<dyn OutageStore>,
    attempts: u32,
    backoff: Duration,
}

impl ChangeDetector {
    pub fn new(store: Arc<dyn OutageStore>, attempts: u32) -> Self {
        Self {
            store,
            attempts: attempts.max(1),
            backoff: Duration::from_millis(200),
        }
    }

    /// Base delay between attempts; attempt `n` waits `n * backoff`.
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    /// Persist first-seen outages and refresh `last_checked` on known ones.
    pub async fn classify(&self, records: &[Outage]) -> Classification {
        let mut result = Classification::default();
        let mut seen = HashSet::new();

        for outage in records {
            if !seen.insert(outage.id.as_str()) {
                continue;
            }
            match self.observe_with_retry(outage).await {
                Ok(true) => {
                    tracing::info!("🆕 New outage {} ({}, {})", outage.id, outage.locality, outage.district);
                    result.new.push(outage.clone());
                }
                Ok(false) => result.known += 1,
                Err(e) => {
                    tracing::error!("❌ Could not classify outage {}: {e}", outage.id);
                    result.failed += 1;
                    result.failed_ids.insert(outage.id.clone());
                }
            }
        }

        tracing::info!(
            "🔍 Detection: {} new, {} known, {} failed",
            result.new.len(),
            result.known,
            result.failed
        );
        result
    }

    async fn observe_with_retry(&self, outage: &Outage) -> Result<bool> {
        let mut attempt = 1;
        loop {
            match self.observe(outage).await {
                Ok(is_new) => return Ok(is_new),
                Err(e) if attempt < self.attempts => {
                    tracing::warn!(
                        "⚠️ Storage error for {} (attempt {attempt}/{}): {e}",
                        outage.id,
                        self.attempts
                    );
                    tokio::time::sleep(self.backoff * attempt).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Both branches are idempotent, so the whole step can be retried.
    async fn observe(&self, outage: &Outage) -> Result<bool> {
        if self.store.outage_exists(&outage.id).await? {
            self.store.touch_last_checked(&outage.id).await?;
            Ok(false)
        } else {
            self.store.create_outage(outage).await?;
            Ok(true)
        }
    }
}
