//! # Kouran Notify
//! Outage alert fan-out.
//!
//! ```text
//! new outage ──> active subscribers of its locality
//!                  ├── already notified? skip
//!                  ├── render (en / fr)
//!                  ├── SendLimiter (shared, ~20/s)
//!                  └── MessageSender::send
//!                        ├── Delivered  → record notification
//!                        ├── Permanent  → deactivate subscriber
//!                        └── Transient  → retry next run
//! ```

pub mod dispatch;
pub mod limiter;
pub mod telegram;
pub mod templates;

pub use dispatch::{DispatchReport, NotificationDispatcher};
pub use limiter::SendLimiter;
pub use telegram::TelegramSender;
