//! # Kouran Core
//! Shared types, traits, errors and configuration for the outage monitor.
//!
//! Every other crate depends on this one; it has no knowledge of HTTP,
//! SQLite or Telegram.

pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use config::KouranConfig;
pub use error::{KouranError, Result};
pub use traits::{MessageSender, OutageStore};
pub use types::{DeliveryOutcome, Outage, Recipient};
