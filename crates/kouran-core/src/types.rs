//! Domain types shared by sources, storage and notification.

use chrono::{DateTime, FixedOffset, Offset, Utc};
use serde::{Deserialize, Serialize};

/// Mauritius local time is a fixed UTC+4 with no daylight saving.
pub const LOCAL_OFFSET_SECS: i32 = 4 * 3600;

/// The fixed local offset used for parsing source dates and rendering messages.
pub fn local_offset() -> FixedOffset {
    FixedOffset::east_opt(LOCAL_OFFSET_SECS).unwrap_or_else(|| Utc.fix())
}

/// A normalized scheduled outage.
///
/// Serializes in the same shape as the aggregated feed items, so a parsed
/// CEB page can be dumped and read back by [`FeedSource`]-style consumers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Outage {
    /// Fingerprint of the raw fields, see `kouran_sources::fingerprint`.
    pub id: String,
    /// Raw French date description, e.g. `Le dimanche 13 mars 2022 de 09:30:00 à 13:00:00`.
    pub date: String,
    pub locality: String,
    #[serde(default)]
    pub streets: String,
    pub district: String,
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

impl Outage {
    pub fn from_local(&self) -> DateTime<FixedOffset> {
        self.from.with_timezone(&local_offset())
    }

    pub fn to_local(&self) -> DateTime<FixedOffset> {
        self.to.with_timezone(&local_offset())
    }
}

/// An active subscriber resolved for a locality.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recipient {
    pub chat_id: i64,
    /// Two-letter language code as stored by the subscription subsystem.
    pub language: String,
}

/// Result of one delivery attempt, as classified by the sending provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered,
    /// Network trouble, throttling, provider outage. Try again next run.
    Transient(String),
    /// The recipient can no longer be reached (blocked the bot, deactivated).
    Permanent(String),
}
