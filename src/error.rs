//! Error types for the freshness engine.
//!
//! Per-resource failures are [`TransportError`]s: they are absorbed by the
//! change detector and recorded as data on the resource. Only
//! [`FreshnessError`]s abort a run.

use thiserror::Error;

/// A network failure while checking one resource.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Connection, DNS, TLS, or protocol failure.
    #[error("request failed: {0}")]
    Request(String),

    /// Server answered with a non-success status.
    #[error("HTTP status {0}")]
    Status(u16),

    /// The per-resource timeout elapsed.
    #[error("timed out after {0}s")]
    Timeout(u64),

    /// Body exceeded the configured maximum size.
    #[error("content exceeds {0} bytes")]
    TooLarge(u64),

    /// The run-wide deadline elapsed before the resource was checked.
    #[error("run deadline exceeded")]
    Deadline,
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        if let Some(status) = e.status() {
            TransportError::Status(status.as_u16())
        } else {
            TransportError::Request(e.to_string())
        }
    }
}

/// Structural failure that aborts a run.
#[derive(Error, Debug)]
pub enum FreshnessError {
    /// The catalog could not be listed.
    #[error("Catalog error: {0}")]
    Catalog(String),

    /// The run store is unreachable or rejected a write.
    #[error("Persistence error: {0}")]
    Persistence(#[from] sqlx::Error),

    /// Configuration or policy is invalid.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl FreshnessError {
    pub fn catalog(msg: impl Into<String>) -> Self {
        Self::Catalog(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}
