//! # Kouran Store
//! SQLite-backed implementation of the [`OutageStore`](kouran_core::OutageStore)
//! gateway, plus the locality seed helpers used at bootstrap.

pub mod seed;
pub mod sqlite;

pub use sqlite::{SqliteStore, StoredOutage};
