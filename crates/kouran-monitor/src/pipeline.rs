//! A single monitoring run: fetch, detect, notify.

use chrono::{DateTime, Utc};
use futures::future::join_all;
use kouran_core::{KouranError, Outage, Result};
use kouran_notify::{DispatchReport, NotificationDispatcher};
use kouran_sources::{OutageSource, categorize};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;

use crate::detector::ChangeDetector;

/// What one source contributed to a run.
#[derive(Debug, Clone, Serialize)]
pub struct SourceReport {
    pub name: String,
    pub outages: usize,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    pub started_at: DateTime<Utc>,
    pub sources: Vec<SourceReport>,
    /// Distinct outages after merging all sources.
    pub fetched: usize,
    pub today: usize,
    pub future: usize,
    pub new: usize,
    pub known: usize,
    pub failed: usize,
    /// Stored outages that have not ended yet, offered to the dispatcher.
    pub pending: usize,
    pub dispatch: DispatchReport,
}

impl RunReport {
    pub fn summary(&self) -> String {
        format!(
            "{} outages ({} today, {} future), {} new, {} known, {} failed, {} notifications sent",
            self.fetched,
            self.today,
            self.future,
            self.new,
            self.known,
            self.failed,
            self.dispatch.delivered
        )
    }
}

/// Stored outages of the snapshot that have not ended at `now`.
///
/// Known outages stay pending until they end, so a delivery that did not
/// complete on an earlier run is attempted again. The per-subscriber
/// notification record keeps each delivery at most once.
pub fn pending_outages(outages: &[Outage], failed_ids: &HashSet<String>, now: DateTime<Utc>) -> Vec<Outage> {
    outages
        .iter()
        .filter(|o| o.to > now && !failed_ids.contains(&o.id))
        .cloned()
        .collect()
}

/// Concatenate source snapshots, keeping the first occurrence of each fingerprint.
pub fn merge_snapshots(batches: Vec<Vec<Outage>>) -> Vec<Outage> {
    let mut seen = HashSet::new();
    batches
        .into_iter()
        .flatten()
        .filter(|o| seen.insert(o.id.clone()))
        .collect()
}

pub struct Monitor {
    sources: Vec<Arc<dyn OutageSource>>,
    detector: ChangeDetector,
    dispatcher: NotificationDispatcher,
}

impl Monitor {
    pub fn new(
        sources: Vec<Arc<dyn OutageSource>>,
        detector: ChangeDetector,
        dispatcher: NotificationDispatcher,
    ) -> Self {
        Self {
            sources,
            detector,
            dispatcher,
        }
    }

    /// Fetch every source concurrently. A failing source is reported, not fatal.
    pub async fn fetch_all(&self) -> (Vec<Outage>, Vec<SourceReport>) {
        let results = join_all(self.sources.iter().map(|s| s.fetch())).await;

        let mut batches = Vec::with_capacity(results.len());
        let mut reports = Vec::with_capacity(results.len());
        for (source, result) in self.sources.iter().zip(results) {
            match result {
                Ok(outages) => {
                    tracing::info!("📥 {}: {} outages", source.name(), outages.len());
                    reports.push(SourceReport {
                        name: source.name().to_string(),
                        outages: outages.len(),
                        error: None,
                    });
                    batches.push(outages);
                }
                Err(e) => {
                    tracing::warn!("⚠️ Source {} failed ({}): {e}", source.name(), e.kind());
                    reports.push(SourceReport {
                        name: source.name().to_string(),
                        outages: 0,
                        error: Some(e.to_string()),
                    });
                }
            }
        }
        (merge_snapshots(batches), reports)
    }

    /// Run the pipeline once. Fails only when no source produced a snapshot.
    pub async fn run_once(&self) -> Result<RunReport> {
        let started_at = Utc::now();
        tracing::info!("🔄 Checking for power outages...");

        let (outages, sources) = self.fetch_all().await;
        if !sources.is_empty() && sources.iter().all(|s| s.error.is_some()) {
            return Err(KouranError::Fetch("no outage source could be fetched".into()));
        }

        let buckets = categorize(&outages, started_at);
        tracing::info!(
            "📊 {} outages: {} today, {} future",
            outages.len(),
            buckets.today.len(),
            buckets.future.len()
        );

        let classification = self.detector.classify(&outages).await;
        let pending = pending_outages(&outages, &classification.failed_ids, started_at);
        let dispatch = if pending.is_empty() {
            DispatchReport::default()
        } else {
            self.dispatcher.dispatch(&pending).await
        };

        Ok(RunReport {
            started_at,
            sources,
            fetched: outages.len(),
            today: buckets.today.len(),
            future: buckets.future.len(),
            new: classification.new.len(),
            known: classification.known,
            failed: classification.failed,
            pending: pending.len(),
            dispatch,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{Duration, Timelike};
    use kouran_core::{DeliveryOutcome, MessageSender, OutageStore};
    use kouran_notify::SendLimiter;
    use kouran_sources::FeedSource;
    use kouran_store::SqliteStore;
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    struct StaticSource {
        name: &'static str,
        outages: Option<Vec<Outage>>,
    }

    #[async_trait]
    impl OutageSource for StaticSource {
        fn name(&self) -> &str {
            self.name
        }

        async fn fetch(&self) -> Result<Vec<Outage>> {
            self.outages
                .clone()
                .ok_or_else(|| KouranError::Fetch("503 Service Unavailable".into()))
        }
    }

    /// Records attempts; the first `transient_failures` attempts fail transiently.
    #[derive(Default)]
    struct RecordingSender {
        sent: Mutex<Vec<i64>>,
        transient_failures: Mutex<usize>,
    }

    impl RecordingSender {
        fn failing_first(n: usize) -> Self {
            Self {
                sent: Mutex::new(Vec::new()),
                transient_failures: Mutex::new(n),
            }
        }

        fn attempts(&self) -> usize {
            self.sent.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl MessageSender for RecordingSender {
        fn name(&self) -> &str {
            "recording"
        }

        async fn send(&self, chat_id: i64, _text: &str) -> DeliveryOutcome {
            self.sent.lock().unwrap().push(chat_id);
            let mut left = self.transient_failures.lock().unwrap();
            if *left > 0 {
                *left -= 1;
                return DeliveryOutcome::Transient("timeout".into());
            }
            DeliveryOutcome::Delivered
        }
    }

    fn outage(id: &str, locality: &str, streets: &str) -> Outage {
        let from = Utc::now() + Duration::days(2);
        Outage {
            id: id.into(),
            date: "d".into(),
            locality: locality.into(),
            streets: streets.into(),
            district: "blackriver".into(),
            from,
            to: from + Duration::hours(3),
        }
    }

    fn subscribed_store() -> Arc<SqliteStore> {
        let store = SqliteStore::open_in_memory().unwrap();
        let mut data = BTreeMap::new();
        data.insert("blackriver".to_string(), vec!["TAMARIN".to_string()]);
        store.seed_localities(&data).unwrap();
        store.upsert_user(7, Some("kouran"), Some("en")).unwrap();
        let id = store.locality_id("blackriver", "TAMARIN").unwrap().unwrap();
        store.add_subscription(7, id).unwrap();
        Arc::new(store)
    }

    fn dispatcher(store: Arc<dyn OutageStore>, sender: Arc<RecordingSender>) -> NotificationDispatcher {
        NotificationDispatcher::new(store, sender, Arc::new(SendLimiter::per_second(1000)), "en")
    }

    fn monitor(
        sources: Vec<Arc<dyn OutageSource>>,
        store: Arc<SqliteStore>,
        sender: Arc<RecordingSender>,
    ) -> Monitor {
        let store: Arc<dyn OutageStore> = store;
        Monitor::new(sources, ChangeDetector::new(store.clone(), 3), dispatcher(store, sender))
    }

    fn static_source(outages: Vec<Outage>) -> Arc<dyn OutageSource> {
        Arc::new(StaticSource {
            name: "static",
            outages: Some(outages),
        })
    }

    #[test]
    fn test_merge_first_source_wins() {
        let merged = merge_snapshots(vec![
            vec![outage("a", "TAMARIN", "first"), outage("b", "TAMARIN", "")],
            vec![outage("a", "TAMARIN", "second"), outage("c", "TAMARIN", "")],
        ]);
        let ids: Vec<&str> = merged.iter().map(|o| o.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert_eq!(merged[0].streets, "first");
    }

    #[tokio::test]
    async fn test_second_run_notifies_nobody() {
        let store = subscribed_store();
        let sender = Arc::new(RecordingSender::default());
        let source: Arc<dyn OutageSource> = Arc::new(StaticSource {
            name: "static",
            outages: Some(vec![outage("a", "TAMARIN", ""), outage("b", "CUREPIPE", "")]),
        });
        let m = monitor(vec![source], store.clone(), sender.clone());

        let first = m.run_once().await.unwrap();
        assert_eq!(first.new, 2);
        assert_eq!(first.dispatch.delivered, 1);
        assert_eq!(first.future, 2);

        let second = m.run_once().await.unwrap();
        assert_eq!(second.new, 0);
        assert_eq!(second.known, 2);
        assert_eq!(second.pending, 2);
        assert_eq!(second.dispatch.already_sent, 1);
        assert_eq!(second.dispatch.attempts(), 0);
        assert_eq!(*sender.sent.lock().unwrap(), vec![7]);
    }

    #[tokio::test]
    async fn test_transient_failure_delivered_on_next_run() {
        let store = subscribed_store();
        let sender = Arc::new(RecordingSender::failing_first(1));
        let m = monitor(vec![static_source(vec![outage("a", "TAMARIN", "")])], store.clone(), sender.clone());

        let first = m.run_once().await.unwrap();
        assert_eq!(first.dispatch.transient, 1);
        assert!(!store.notification_exists(7, "a").await.unwrap());

        // already known, still delivered
        let second = m.run_once().await.unwrap();
        assert_eq!(second.new, 0);
        assert_eq!(second.known, 1);
        assert_eq!(second.dispatch.delivered, 1);
        assert!(store.notification_exists(7, "a").await.unwrap());

        let third = m.run_once().await.unwrap();
        assert_eq!(third.dispatch.already_sent, 1);
        assert_eq!(sender.attempts(), 2);
    }

    #[tokio::test]
    async fn test_interrupted_dispatch_resumes_on_next_run() {
        let store = subscribed_store();
        let sender = Arc::new(RecordingSender::default());
        let snapshot = vec![outage("a", "TAMARIN", "")];

        let (_tx, stopped) = tokio::sync::watch::channel(true);
        let shared: Arc<dyn OutageStore> = store.clone();
        let stopping = Monitor::new(
            vec![static_source(snapshot.clone())],
            ChangeDetector::new(shared.clone(), 3),
            dispatcher(shared, sender.clone()).with_shutdown(stopped),
        );
        let first = stopping.run_once().await.unwrap();
        assert_eq!(first.new, 1);
        assert!(first.dispatch.interrupted);
        assert_eq!(sender.attempts(), 0);

        let restarted = monitor(vec![static_source(snapshot)], store.clone(), sender.clone());
        let second = restarted.run_once().await.unwrap();
        assert_eq!(second.new, 0);
        assert_eq!(second.dispatch.delivered, 1);
        assert!(store.notification_exists(7, "a").await.unwrap());
    }

    #[tokio::test]
    async fn test_ended_outage_is_stored_but_not_sent() {
        let store = subscribed_store();
        let sender = Arc::new(RecordingSender::default());
        let mut ended = outage("old", "TAMARIN", "");
        ended.from = Utc::now() - Duration::hours(5);
        ended.to = Utc::now() - Duration::hours(2);
        let m = monitor(vec![static_source(vec![ended])], store.clone(), sender.clone());

        let report = m.run_once().await.unwrap();
        assert_eq!(report.new, 1);
        assert_eq!(report.pending, 0);
        assert_eq!(sender.attempts(), 0);
        assert!(store.get_outage("old").unwrap().is_some());
    }

    #[test]
    fn test_pending_skips_ended_and_failed() {
        let now = Utc::now();
        let mut ended = outage("ended", "TAMARIN", "");
        ended.to = now - Duration::minutes(1);
        let snapshot = vec![outage("ok", "TAMARIN", ""), outage("broken", "TAMARIN", ""), ended];
        let failed: HashSet<String> = ["broken".to_string()].into_iter().collect();

        let pending = pending_outages(&snapshot, &failed, now);
        let ids: Vec<&str> = pending.iter().map(|o| o.id.as_str()).collect();
        assert_eq!(ids, vec!["ok"]);
    }

    #[tokio::test]
    async fn test_failing_source_does_not_block_other() {
        let store = subscribed_store();
        let sender = Arc::new(RecordingSender::default());
        let broken: Arc<dyn OutageSource> = Arc::new(StaticSource { name: "ceb", outages: None });
        let healthy: Arc<dyn OutageSource> = Arc::new(StaticSource {
            name: "feed",
            outages: Some(vec![outage("a", "TAMARIN", "")]),
        });
        let m = monitor(vec![broken, healthy], store, sender);

        let report = m.run_once().await.unwrap();
        assert_eq!(report.new, 1);
        assert!(report.sources[0].error.is_some());
        assert_eq!(report.sources[1].outages, 1);
    }

    #[tokio::test]
    async fn test_all_sources_failing_is_an_error() {
        let store = subscribed_store();
        let broken: Arc<dyn OutageSource> = Arc::new(StaticSource { name: "ceb", outages: None });
        let m = monitor(vec![broken], store.clone(), Arc::new(RecordingSender::default()));
        let err = m.run_once().await.unwrap_err();
        assert_eq!(err.kind(), "fetch");
        assert_eq!(store.count_outages().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_feed_end_to_end() {
        let mut server = mockito::Server::new_async().await;
        let from = Utc::now().with_nanosecond(0).unwrap() + Duration::days(1);
        let to = from + Duration::hours(4);
        let body = serde_json::json!({
            "today": [{
                "id": "feed-1",
                "date": "Le dimanche 13 mars 2022 de 09:30:00 à 13:00:00",
                "locality": "TAMARIN",
                "district": "blackriver",
                "streets": "AVE DES MARLINS",
                "from": from.to_rfc3339(),
                "to": to.to_rfc3339()
            }],
            "future": [{ "locality": "NO ID" }]
        });
        let _mock = server
            .mock("GET", "/feed.json")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(body.to_string())
            .create_async()
            .await;

        let store = subscribed_store();
        let sender = Arc::new(RecordingSender::default());
        let source: Arc<dyn OutageSource> = Arc::new(FeedSource::new(
            &format!("{}/feed.json", server.url()),
            std::time::Duration::from_secs(5),
        ));
        let m = monitor(vec![source], store.clone(), sender.clone());

        let report = m.run_once().await.unwrap();
        assert_eq!(report.fetched, 1);
        assert_eq!(report.new, 1);
        assert_eq!(report.dispatch.delivered, 1);

        let stored = store.get_outage("feed-1").unwrap().unwrap();
        assert_eq!(stored.outage.from, from);
        assert_eq!(stored.outage.to, to);
        assert!(store.notification_exists(7, "feed-1").await.unwrap());
    }
}
