//! Error types for the Azure Resource Manager client layer.

use std::time::Duration;
use thiserror::Error;

/// Result type for ARM client operations.
pub type AzureResult<T> = std::result::Result<T, AzureError>;

/// Errors raised while talking to Azure Resource Manager.
#[derive(Error, Debug)]
pub enum AzureError {
    /// ARM answered with a non-success status code.
    #[error("{status} {code}: {message}")]
    Http {
        /// HTTP status code
        status: u16,
        /// ARM error code (e.g. `ResourceGroupNotFound`)
        code: String,
        /// Error message from the service
        message: String,
        /// Value of the `Retry-After` header, if any
        retry_after: Option<Duration>,
    },

    /// Credentials could not be resolved or a token could not be obtained.
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Invalid client configuration.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A resource ID or URL template could not be parsed.
    #[error("Invalid resource id '{0}'")]
    InvalidResourceId(String),

    /// A long-running operation ended in a non-success terminal state.
    #[error("Operation {status}: {message}")]
    OperationFailed {
        /// Terminal status reported by ARM (`Failed`, `Canceled`)
        status: String,
        /// Error message from the operation body
        message: String,
    },

    /// Waiting for an operation exceeded its deadline.
    #[error("Timed out: {0}")]
    Timeout(String),

    /// Network error.
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// JSON parsing error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error (credential files, CLI invocation).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl AzureError {
    /// Create an HTTP error without a `Retry-After` hint.
    pub fn http(status: u16, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Http {
            status,
            code: code.into(),
            message: message.into(),
            retry_after: None,
        }
    }

    /// HTTP status code, when the error came from a response.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Whether the service reported that the resource does not exist.
    pub fn is_not_found(&self) -> bool {
        self.status_code() == Some(404)
    }

    /// Whether the request may succeed if sent again.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http { status, .. } => matches!(status, 408 | 429 | 500 | 502 | 503 | 504),
            Self::Network(e) => e.is_timeout() || e.is_connect(),
            _ => false,
        }
    }

    /// Server-provided delay hint.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Http { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found() {
        assert!(AzureError::http(404, "ResourceNotFound", "gone").is_not_found());
        assert!(!AzureError::http(409, "Conflict", "busy").is_not_found());
        assert!(!AzureError::Authentication("no creds".into()).is_not_found());
    }

    #[test]
    fn test_retryable() {
        assert!(AzureError::http(429, "TooManyRequests", "slow down").is_retryable());
        assert!(AzureError::http(503, "ServiceUnavailable", "").is_retryable());
        assert!(!AzureError::http(400, "InvalidParameter", "").is_retryable());
        assert!(!AzureError::Timeout("poll".into()).is_retryable());
    }

    #[test]
    fn test_display() {
        let err = AzureError::http(403, "AuthorizationFailed", "no access");
        assert_eq!(err.to_string(), "403 AuthorizationFailed: no access");
    }
}
