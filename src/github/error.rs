//! Forge API error categorisation.
//!
//! Distinguishes transient failures (5xx, rate limits, network) from
//! permanent ones (most 4xx). The worker does not retry in place; the
//! distinction drives logging and makes redelivery behaviour legible, since
//! a failed request goes back to the queue either way.

use std::fmt;
use thiserror::Error;

/// The kind of forge error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForgeErrorKind {
    /// Safe to retry: 5xx, 429, 403 with rate-limit markers, network
    /// failures.
    Transient,

    /// Requires intervention: other 4xx, authentication failures, missing
    /// objects.
    Permanent,
}

impl ForgeErrorKind {
    pub fn is_retriable(&self) -> bool {
        matches!(self, ForgeErrorKind::Transient)
    }
}

/// A categorised forge API error.
#[derive(Debug, Error)]
pub struct ForgeError {
    pub kind: ForgeErrorKind,
    pub status_code: Option<u16>,
    pub message: String,
    #[source]
    pub source: Option<octocrab::Error>,
}

impl fmt::Display for ForgeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status_code {
            Some(code) => write!(f, "forge API error (HTTP {}): {}", code, self.message),
            None => write!(f, "forge API error: {}", self.message),
        }
    }
}

impl ForgeError {
    /// A permanent error with no underlying API failure, e.g. a malformed
    /// credential or an over-limit request built locally.
    pub fn invalid(message: impl Into<String>) -> Self {
        ForgeError {
            kind: ForgeErrorKind::Permanent,
            status_code: None,
            message: message.into(),
            source: None,
        }
    }

    /// Categorises an octocrab error by status code and message.
    pub fn from_octocrab(err: octocrab::Error) -> Self {
        let status_code = extract_status_code(&err);
        let message = err.to_string();

        let kind = match status_code {
            Some(429) => ForgeErrorKind::Transient,
            Some(403) if is_rate_limit_message(&message) => ForgeErrorKind::Transient,
            Some(code) if (500..600).contains(&code) => ForgeErrorKind::Transient,
            Some(_) => ForgeErrorKind::Permanent,
            None => {
                if is_network_message(&message) {
                    ForgeErrorKind::Transient
                } else {
                    ForgeErrorKind::Permanent
                }
            }
        };

        ForgeError {
            kind,
            status_code,
            message,
            source: Some(err),
        }
    }
}

impl From<octocrab::Error> for ForgeError {
    fn from(err: octocrab::Error) -> Self {
        ForgeError::from_octocrab(err)
    }
}

/// Pulls the HTTP status out of the error variants that carry one.
fn extract_status_code(err: &octocrab::Error) -> Option<u16> {
    match err {
        octocrab::Error::GitHub { source, .. } => Some(source.status_code.as_u16()),
        _ => None,
    }
}

/// Rate-limit rejections arrive as 403 with one of these markers.
fn is_rate_limit_message(message: &str) -> bool {
    let message = message.to_lowercase();
    message.contains("rate limit")
        || message.contains("api rate")
        || message.contains("secondary rate")
        || message.contains("abuse detection")
}

fn is_network_message(message: &str) -> bool {
    let message = message.to_lowercase();
    message.contains("timeout")
        || message.contains("timed out")
        || message.contains("connection")
        || message.contains("network")
        || message.contains("dns")
}
