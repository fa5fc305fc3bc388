//! Provider call errors and HTTP status classification.

use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Broad category of a failed provider call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmErrorKind {
    /// 429 from the provider.
    RateLimited,
    /// 5xx from the provider.
    ServerError,
    /// 4xx other than 429: bad request, auth, unknown model.
    ClientError,
    /// Connection failure or transport error.
    NetworkError,
    /// The call did not finish within the request timeout.
    Timeout,
    /// The response body could not be understood.
    ParseError,
    /// The provider has no client configured (e.g. missing API key).
    NotConfigured,
}

impl fmt::Display for LlmErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::RateLimited => "rate_limited",
            Self::ServerError => "server_error",
            Self::ClientError => "client_error",
            Self::NetworkError => "network_error",
            Self::Timeout => "timeout",
            Self::ParseError => "parse_error",
            Self::NotConfigured => "not_configured",
        };
        f.write_str(s)
    }
}

/// Classify an HTTP status code returned by a provider.
pub fn classify_http_status(status: u16) -> LlmErrorKind {
    match status {
        429 => LlmErrorKind::RateLimited,
        500..=599 => LlmErrorKind::ServerError,
        400..=499 => LlmErrorKind::ClientError,
        _ => LlmErrorKind::ServerError,
    }
}

/// Error from a single provider call.
#[derive(Debug, Clone, Error)]
#[error("{kind}{}: {message}", http_suffix(.status))]
pub struct LlmError {
    pub kind: LlmErrorKind,
    pub message: String,
    pub status: Option<u16>,
    pub retry_after: Option<Duration>,
}

impl LlmError {
    fn new(kind: LlmErrorKind, message: String) -> Self {
        Self {
            kind,
            message,
            status: None,
            retry_after: None,
        }
    }

    pub fn rate_limited(message: String, retry_after: Option<Duration>) -> Self {
        Self {
            status: Some(429),
            retry_after,
            ..Self::new(LlmErrorKind::RateLimited, message)
        }
    }

    pub fn server_error(status: u16, message: String) -> Self {
        Self {
            status: Some(status),
            ..Self::new(LlmErrorKind::ServerError, message)
        }
    }

    pub fn client_error(status: u16, message: String) -> Self {
        Self {
            status: Some(status),
            ..Self::new(LlmErrorKind::ClientError, message)
        }
    }

    pub fn network_error(message: String) -> Self {
        Self::new(LlmErrorKind::NetworkError, message)
    }

    pub fn timeout(after: Duration) -> Self {
        Self::new(
            LlmErrorKind::Timeout,
            format!("Request timed out after {}s", after.as_secs_f64()),
        )
    }

    pub fn parse_error(message: String) -> Self {
        Self::new(LlmErrorKind::ParseError, message)
    }

    pub fn not_configured(message: String) -> Self {
        Self::new(LlmErrorKind::NotConfigured, message)
    }

    /// Build the error for a non-success HTTP response.
    pub fn from_status(status: u16, body: &str, retry_after: Option<Duration>) -> Self {
        match classify_http_status(status) {
            LlmErrorKind::RateLimited => Self::rate_limited(body.to_string(), retry_after),
            LlmErrorKind::ClientError => Self::client_error(status, body.to_string()),
            _ => Self::server_error(status, body.to_string()),
        }
    }

    /// Map a reqwest transport error.
    pub fn from_transport(e: &reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::network_error(format!("Request timeout: {}", e))
        } else if e.is_connect() {
            Self::network_error(format!("Connection failed: {}", e))
        } else {
            Self::network_error(format!("Request failed: {}", e))
        }
    }
}

fn http_suffix(status: &Option<u16>) -> String {
    status
        .map(|status| format!(" (HTTP {})", status))
        .unwrap_or_default()
}

/// Parse a `Retry-After` header given in seconds.
pub(crate) fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    headers
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_http_status() {
        assert_eq!(classify_http_status(429), LlmErrorKind::RateLimited);
        assert_eq!(classify_http_status(503), LlmErrorKind::ServerError);
        assert_eq!(classify_http_status(401), LlmErrorKind::ClientError);
        assert_eq!(classify_http_status(404), LlmErrorKind::ClientError);
    }

    #[test]
    fn test_from_status_keeps_retry_after() {
        let err = LlmError::from_status(429, "slow down", Some(Duration::from_secs(7)));
        assert_eq!(err.kind, LlmErrorKind::RateLimited);
        assert_eq!(err.retry_after, Some(Duration::from_secs(7)));
        assert_eq!(err.to_string(), "rate_limited (HTTP 429): slow down");
    }

    #[test]
    fn test_display_without_status() {
        let err = LlmError::network_error("Connection failed: refused".into());
        assert_eq!(err.to_string(), "network_error: Connection failed: refused");

        let err: Box<dyn std::error::Error> = Box::new(LlmError::server_error(502, "bad gateway".into()));
        assert_eq!(err.to_string(), "server_error (HTTP 502): bad gateway");
    }
}
