//! Aggregated JSON feed (`{ "today": [...], "future": [...] }`).
//!
//! Items already carry their id and RFC 3339 instants; they are passed
//! through with minimal validation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use kouran_core::{KouranError, Outage, Result};
use serde::Deserialize;
use std::time::Duration;

use crate::OutageSource;
use crate::categorize::StartInstant;
use crate::http::get_text;

#[derive(Debug, Deserialize)]
struct FeedDocument {
    #[serde(default)]
    today: Vec<serde_json::Value>,
    #[serde(default)]
    future: Vec<serde_json::Value>,
}

/// A feed item as published; every field is optional on the wire.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FeedItem {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub locality: Option<String>,
    #[serde(default)]
    pub streets: Option<String>,
    #[serde(default)]
    pub district: Option<String>,
    #[serde(default)]
    pub from: Option<String>,
    #[serde(default)]
    pub to: Option<String>,
}

impl FeedItem {
    fn instant(raw: Option<&str>) -> Option<DateTime<Utc>> {
        raw.and_then(|s| DateTime::parse_from_rfc3339(s.trim()).ok())
            .map(|dt| dt.with_timezone(&Utc))
    }

    /// Normalize into an [`Outage`]; `RowParse` when the id or an instant is unusable.
    pub fn into_outage(self) -> Result<Outage> {
        let id = self
            .id
            .filter(|id| !id.trim().is_empty())
            .ok_or_else(|| KouranError::RowParse("feed item without id".into()))?;
        let from = Self::instant(self.from.as_deref())
            .ok_or_else(|| KouranError::RowParse(format!("feed item {id} has no valid 'from'")))?;
        let to = Self::instant(self.to.as_deref())
            .ok_or_else(|| KouranError::RowParse(format!("feed item {id} has no valid 'to'")))?;

        Ok(Outage {
            id,
            date: self.date.unwrap_or_default(),
            locality: self.locality.unwrap_or_default(),
            streets: self.streets.unwrap_or_default(),
            district: self.district.unwrap_or_default(),
            from,
            to,
        })
    }
}

impl StartInstant for FeedItem {
    fn start_instant(&self) -> Option<DateTime<Utc>> {
        Self::instant(self.from.as_deref())
    }
}

/// Source backed by the aggregated dataset feed.
pub struct FeedSource {
    client: reqwest::Client,
    url: String,
    timeout: Duration,
}

impl FeedSource {
    pub fn new(url: &str, timeout: Duration) -> Self {
        Self::with_client(reqwest::Client::new(), url, timeout)
    }

    pub fn with_client(client: reqwest::Client, url: &str, timeout: Duration) -> Self {
        Self {
            client,
            url: url.to_string(),
            timeout,
        }
    }
}

#[async_trait]
impl OutageSource for FeedSource {
    fn name(&self) -> &str {
        "feed"
    }

    async fn fetch(&self) -> Result<Vec<Outage>> {
        tracing::info!("🌐 Fetching outage feed from {}", self.url);
        let body = get_text(&self.client, &self.url, self.timeout).await?;
        parse_feed(&body)
    }
}

/// Raw items of a feed document, in `today` then `future` order.
///
/// Items that are not objects with string fields are dropped individually.
pub fn parse_feed_items(body: &str) -> Result<Vec<FeedItem>> {
    let doc: FeedDocument = serde_json::from_str(body)
        .map_err(|e| KouranError::SourceFormat(format!("feed is not a today/future document: {e}")))?;
    let items = doc
        .today
        .into_iter()
        .chain(doc.future)
        .filter_map(|value| match serde_json::from_value::<FeedItem>(value) {
            Ok(item) => Some(item),
            Err(e) => {
                tracing::warn!("⚠️ Malformed feed item: {e}");
                None
            }
        })
        .collect();
    Ok(items)
}

/// Parse a feed body; unusable items are logged and dropped.
pub fn parse_feed(body: &str) -> Result<Vec<Outage>> {
    let items = parse_feed_items(body)?;
    let total = items.len();
    let outages: Vec<Outage> = items
        .into_iter()
        .filter_map(|item| match item.into_outage() {
            Ok(outage) => Some(outage),
            Err(e) => {
                tracing::warn!("⚠️ Dropping feed item: {e}");
                None
            }
        })
        .collect();
    tracing::debug!("Feed: {} of {} items usable", outages.len(), total);
    Ok(outages)
}
