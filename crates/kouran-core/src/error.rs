//! Error taxonomy for the outage pipeline.
//!
//! Delivery failures are not errors: senders report them as
//! [`DeliveryOutcome`](crate::types::DeliveryOutcome) values.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, KouranError>;

#[derive(Debug, Error)]
pub enum KouranError {
    /// Network failure, timeout or non-2xx status. Retried on the next scheduled run.
    #[error("fetch error: {0}")]
    Fetch(String),

    /// The payload arrived but does not have the documented shape.
    #[error("source format error: {0}")]
    SourceFormat(String),

    /// A single row or date string could not be parsed.
    #[error("row parse error: {0}")]
    RowParse(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl KouranError {
    /// Short label used in log lines and run reports.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Fetch(_) => "fetch",
            Self::SourceFormat(_) => "source_format",
            Self::RowParse(_) => "row_parse",
            Self::Storage(_) => "storage",
            Self::Config(_) => "config",
            Self::Io(_) => "io",
        }
    }
}
