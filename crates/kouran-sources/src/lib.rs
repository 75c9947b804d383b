//! # Kouran Sources
//! Fetch and normalize scheduled outages from the two upstream feeds.
//!
//! ```text
//! CebSource  (HTML page, `var arDistrictLocations = {...}`)  ─┐
//!                                                             ├─> Vec<Outage>
//! FeedSource (JSON `{ "today": [...], "future": [...] }`)   ─┘
//! ```
//!
//! Identity is assigned by [`fingerprint`] before any date resolution, so the
//! same raw row always maps to the same outage id.

pub mod categorize;
pub mod ceb;
pub mod date;
pub mod feed;
pub mod fingerprint;
mod http;

use async_trait::async_trait;
use kouran_core::{Outage, Result};

pub use categorize::{Categorized, StartInstant, categorize};
pub use ceb::CebSource;
pub use feed::FeedSource;
pub use fingerprint::{FingerprintFields, fingerprint};

/// An upstream publisher of scheduled outages.
#[async_trait]
pub trait OutageSource: Send + Sync {
    fn name(&self) -> &str;

    /// Fetch and parse the current snapshot.
    ///
    /// Fails with `Fetch` for transport problems and `SourceFormat` for a
    /// payload that cannot be interpreted. Individual bad rows are dropped.
    async fn fetch(&self) -> Result<Vec<Outage>>;
}
