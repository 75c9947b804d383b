//! # Kouran Monitor
//! One polling run, and the loop that repeats it.
//!
//! ```text
//! scheduler tick ──> Monitor::run_once
//!                      ├── fetch all sources (concurrently) ─> merge by fingerprint
//!                      ├── categorize (today / future, logged)
//!                      ├── ChangeDetector::classify ─> new outages
//!                      └── NotificationDispatcher::dispatch(new)
//! ```

pub mod detector;
pub mod pipeline;
pub mod scheduler;

pub use detector::{ChangeDetector, Classification};
pub use pipeline::{Monitor, RunReport, SourceReport, merge_snapshots, pending_outages};
pub use scheduler::{SchedulerSettings, run_scheduler, spawn_scheduler};
