//! HTTP access to resource URLs.
//!
//! The change detector talks to the network only through the [`Transport`]
//! trait, which offers the two probes it needs:
//!
//! - [`last_modified`](Transport::last_modified): a `HEAD` request returning
//!   the server's `Last-Modified` header, if any.
//! - [`digest`](Transport::digest): a streamed `GET` whose body is hashed
//!   with SHA-256 without ever being buffered whole.
//!
//! [`HttpTransport`] is the `reqwest` implementation. Every request is bounded
//! by the configured timeout; bodies larger than `max_content_bytes` are
//! abandoned with [`TransportError::TooLarge`]. There are no retries: one
//! attempt per probe, the detector's cascade decides what happens next.

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{CONTENT_LENGTH, LAST_MODIFIED};
use sha2::{Digest, Sha256};

use crate::config::HttpConfig;
use crate::error::TransportError;

/// Read-only network probes used by the change detector.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Server-reported modification time. `Ok(None)` when the server sends
    /// no usable `Last-Modified` header.
    async fn last_modified(&self, url: &str) -> Result<Option<DateTime<Utc>>, TransportError>;

    /// Hex-encoded SHA-256 of the resource content.
    async fn digest(&self, url: &str) -> Result<String, TransportError>;
}

/// `reqwest`-backed [`Transport`].
pub struct HttpTransport {
    client: reqwest::Client,
    timeout_secs: u64,
    max_content_bytes: u64,
}

impl HttpTransport {
    /// Build a client from the `[http]` config section.
    ///
    /// # Errors
    ///
    /// Returns an error if the TLS backend cannot be initialized.
    pub fn new(config: &HttpConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(config.user_agent.clone())
            .build()?;

        Ok(Self {
            client,
            timeout_secs: config.timeout_secs,
            max_content_bytes: config.max_content_bytes,
        })
    }

    fn map_err(&self, e: reqwest::Error) -> TransportError {
        if e.is_timeout() {
            TransportError::Timeout(self.timeout_secs)
        } else {
            TransportError::from(e)
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn last_modified(&self, url: &str) -> Result<Option<DateTime<Utc>>, TransportError> {
        let response = self
            .client
            .head(url)
            .send()
            .await
            .map_err(|e| self.map_err(e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status(status.as_u16()));
        }

        Ok(response
            .headers()
            .get(LAST_MODIFIED)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_http_date))
    }

    async fn digest(&self, url: &str) -> Result<String, TransportError> {
        let mut response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| self.map_err(e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status(status.as_u16()));
        }

        let declared_len = response
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok());
        if declared_len.is_some_and(|len| len > self.max_content_bytes) {
            return Err(TransportError::TooLarge(self.max_content_bytes));
        }

        let mut hasher = Sha256::new();
        let mut read: u64 = 0;
        while let Some(chunk) = response.chunk().await.map_err(|e| self.map_err(e))? {
            read += chunk.len() as u64;
            if read > self.max_content_bytes {
                return Err(TransportError::TooLarge(self.max_content_bytes));
            }
            hasher.update(&chunk);
        }

        Ok(hex::encode(hasher.finalize()))
    }
}

/// Parse an HTTP-date (`Sun, 06 Nov 1994 08:49:37 GMT`).
pub fn parse_http_date(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(value.trim())
        .ok()
        .map(|ts| ts.with_timezone(&Utc))
}
