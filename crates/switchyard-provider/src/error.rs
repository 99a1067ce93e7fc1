//! Error types for the switchyard-provider crate.

use std::time::Duration;

/// Longest body excerpt kept in a `Request` error.
const BODY_EXCERPT_LEN: usize = 512;

/// Errors that can occur in provider operations.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// Required credential or setting is missing
    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    /// Backend answered with a non-2xx status
    #[error("HTTP {status}: {message}")]
    Request { status: u16, message: String },

    /// Deadline exceeded
    #[error("Request timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    /// Connection-level failure
    #[error("Network error: {0}")]
    Network(String),

    /// Response body could not be decoded
    #[error("Parse error: {0}")]
    Parse(String),

    /// A stream ended with an error chunk
    #[error("Stream error: {0}")]
    Stream(String),

    /// Caller sent something the adapter refuses to guess about
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// No adapter registered under this name
    #[error("Unknown provider: {0}")]
    UnknownProvider(String),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ProviderError {
    /// Build a `Request` error from a status and response body.
    pub fn request(status: u16, body: impl AsRef<str>) -> Self {
        let body = body.as_ref().trim();
        let message = if body.chars().count() > BODY_EXCERPT_LEN {
            let excerpt: String = body.chars().take(BODY_EXCERPT_LEN).collect();
            format!("{excerpt}...")
        } else if body.is_empty() {
            "empty response body".to_string()
        } else {
            body.to_string()
        };
        Self::Request { status, message }
    }

    /// HTTP status, when the error came from a response.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Request { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Whether another attempt against the same provider may succeed.
    ///
    /// Rate limits, 500/502/503, timeouts and network failures are retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout(_) | Self::Network(_) => true,
            Self::Request { status, message } => {
                matches!(status, 429 | 500 | 502 | 503) || is_retryable_message(message)
            }
            Self::Stream(message) => is_retryable_message(message),
            Self::NotConfigured(_)
            | Self::Parse(_)
            | Self::InvalidRequest(_)
            | Self::UnknownProvider(_)
            | Self::Serialization(_) => false,
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            return Self::request(status.as_u16(), err.to_string());
        }
        if err.is_decode() {
            return Self::Parse(err.to_string());
        }
        // Timeouts surface through the display chain as "operation timed out".
        Self::Network(error_chain(&err))
    }
}

/// Textual retry hints for errors that carry no structured status.
pub fn is_retryable_message(message: &str) -> bool {
    const PATTERNS: [&str; 9] = [
        "rate limit",
        "rate_limit",
        "connection refused",
        "connection reset",
        "timed out",
        "timeout",
        "dns error",
        "network unreachable",
        "network is unreachable",
    ];
    let lower = message.to_lowercase();
    PATTERNS.iter().any(|p| lower.contains(p))
}

fn error_chain(err: &dyn std::error::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(inner) = source {
        message.push_str(": ");
        message.push_str(&inner.to_string());
        source = inner.source();
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_statuses() {
        for status in [429, 500, 502, 503] {
            assert!(ProviderError::request(status, "x").is_retryable(), "{status}");
        }
        for status in [400, 401, 403, 404, 422] {
            assert!(!ProviderError::request(status, "x").is_retryable(), "{status}");
        }
    }

    #[test]
    fn test_retryable_text() {
        assert!(ProviderError::request(400, "Rate limit exceeded").is_retryable());
        assert!(ProviderError::Network("connection refused".to_string()).is_retryable());
        assert!(ProviderError::Timeout(Duration::from_secs(1)).is_retryable());
        assert!(!ProviderError::InvalidRequest("bad".to_string()).is_retryable());
        assert!(!ProviderError::Parse("bad json".to_string()).is_retryable());
    }

    #[test]
    fn test_body_excerpt_truncated() {
        let body = "x".repeat(2000);
        match ProviderError::request(500, &body) {
            ProviderError::Request { message, .. } => {
                assert!(message.len() < 600);
                assert!(message.ends_with("..."));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_display_includes_status() {
        let err = ProviderError::request(401, "invalid x-api-key");
        assert_eq!(err.to_string(), "HTTP 401: invalid x-api-key");
        assert_eq!(err.status(), Some(401));
    }
}
