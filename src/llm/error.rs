//! Error types for LLM backend calls.
//!
//! Every failure coming out of an [`LlmClient`](super::LlmClient) is an
//! [`LlmError`] carrying a coarse [`LlmErrorKind`] and, for HTTP failures,
//! the upstream status code. Retry classification lives in the retry module
//! and works off the status code and message; this module only describes
//! what went wrong.

use std::fmt;

/// Coarse classification of an LLM call failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmErrorKind {
    /// 429 from the upstream provider.
    RateLimited,
    /// 5xx from the upstream provider.
    ServerError,
    /// 4xx other than 429 (bad request, auth failure, ...).
    ClientError,
    /// Request never completed: connect failure, DNS, TLS, reset.
    Network,
    /// Request exceeded its deadline.
    Timeout,
    /// Response arrived but could not be decoded.
    Parse,
}

impl fmt::Display for LlmErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LlmErrorKind::RateLimited => "rate limited",
            LlmErrorKind::ServerError => "server error",
            LlmErrorKind::ClientError => "client error",
            LlmErrorKind::Network => "network error",
            LlmErrorKind::Timeout => "timeout",
            LlmErrorKind::Parse => "parse error",
        };
        f.write_str(s)
    }
}

/// An error from an LLM backend call.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct LlmError {
    pub kind: LlmErrorKind,
    /// HTTP status code, when the failure came from an HTTP response.
    pub status: Option<u16>,
    pub message: String,
}

impl LlmError {
    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self {
            kind: LlmErrorKind::RateLimited,
            status: Some(429),
            message: message.into(),
        }
    }

    pub fn server_error(status: u16, message: impl Into<String>) -> Self {
        Self {
            kind: LlmErrorKind::ServerError,
            status: Some(status),
            message: message.into(),
        }
    }

    pub fn client_error(status: u16, message: impl Into<String>) -> Self {
        Self {
            kind: LlmErrorKind::ClientError,
            status: Some(status),
            message: message.into(),
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self {
            kind: LlmErrorKind::Network,
            status: None,
            message: message.into(),
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self {
            kind: LlmErrorKind::Timeout,
            status: None,
            message: message.into(),
        }
    }

    pub fn parse(message: impl Into<String>) -> Self {
        Self {
            kind: LlmErrorKind::Parse,
            status: None,
            message: message.into(),
        }
    }

    /// Build an error from an HTTP response status and body.
    pub fn from_status(status: u16, body: &str) -> Self {
        match classify_http_status(status) {
            LlmErrorKind::RateLimited => Self::rate_limited(body),
            LlmErrorKind::ClientError => Self::client_error(status, body),
            _ => Self::server_error(status, body),
        }
    }
}

/// Map an HTTP status code to an error kind.
pub fn classify_http_status(status: u16) -> LlmErrorKind {
    match status {
        429 => LlmErrorKind::RateLimited,
        400..=499 => LlmErrorKind::ClientError,
        _ => LlmErrorKind::ServerError,
    }
}
