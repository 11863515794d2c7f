//! Error types for Marquee Core

use thiserror::Error;

/// Result type alias for Marquee operations
pub type Result<T> = std::result::Result<T, Error>;

/// Marquee error types
#[derive(Error, Debug, Clone)]
pub enum Error {
    // Fetch errors
    #[error("Network unreachable: {0}")]
    NetworkUnreachable(String),

    #[error("Request timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Authentication failed for {url}")]
    AuthenticationFailed { url: String },

    #[error("Response exceeded maximum size: {received} > {limit} bytes")]
    SizeExceeded { received: u64, limit: u64 },

    #[error("HTTP {status} from {url}")]
    HttpStatus { status: u16, url: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Operation cancelled")]
    Cancelled,

    // Playlist errors
    #[error("Failed to parse playlist: {0}")]
    ParseFailed(String),

    // Playback errors
    #[error("Media session error: {0}")]
    SessionError(String),

    // Lifecycle errors
    #[error("Invalid state transition: {from} -> {to}")]
    InvalidStateTransition { from: String, to: String },

    // Configuration errors
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("JSON error: {0}")]
    Json(String),
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_connect() {
            Error::NetworkUnreachable(e.to_string())
        } else if e.is_decode() || e.is_body() {
            Error::Network(format!("failed to decode response body: {e}"))
        } else {
            Error::Network(e.to_string())
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Json(e.to_string())
    }
}

impl From<url::ParseError> for Error {
    fn from(e: url::ParseError) -> Self {
        Error::InvalidUrl(e.to_string())
    }
}

impl Error {
    /// Create a parse error
    pub fn parse(msg: impl Into<String>) -> Self {
        Error::ParseFailed(msg.into())
    }

    /// Create a media session error
    pub fn session(msg: impl Into<String>) -> Self {
        Error::SessionError(msg.into())
    }

    /// Returns true if this error is recoverable
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::NetworkUnreachable(_)
                | Error::Timeout { .. }
                | Error::Network(_)
                | Error::HttpStatus { status: 500..=599, .. }
        )
    }

    /// Returns the error code for logs and CLI output
    pub fn error_code(&self) -> &'static str {
        match self {
            Error::NetworkUnreachable(_) => "NETWORK_UNREACHABLE",
            Error::Timeout { .. } => "TIMEOUT",
            Error::AuthenticationFailed { .. } => "AUTH_FAILED",
            Error::SizeExceeded { .. } => "SIZE_EXCEEDED",
            Error::HttpStatus { .. } => "HTTP_STATUS",
            Error::Network(_) => "NETWORK",
            Error::InvalidUrl(_) => "INVALID_URL",
            Error::Cancelled => "CANCELLED",
            Error::ParseFailed(_) => "PARSE_FAILED",
            Error::SessionError(_) => "SESSION_ERROR",
            Error::InvalidStateTransition { .. } => "INVALID_STATE",
            Error::InvalidConfig(_) => "INVALID_CONFIG",
            Error::Internal(_) => "INTERNAL",
            Error::Io(_) => "IO",
            Error::Json(_) => "JSON",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverable_classification() {
        assert!(Error::Timeout { timeout_ms: 100 }.is_recoverable());
        assert!(Error::HttpStatus { status: 503, url: "http://x".into() }.is_recoverable());
        assert!(!Error::HttpStatus { status: 404, url: "http://x".into() }.is_recoverable());
        assert!(!Error::parse("bad").is_recoverable());
        assert!(!Error::AuthenticationFailed { url: "http://x".into() }.is_recoverable());
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(Error::SizeExceeded { received: 2, limit: 1 }.error_code(), "SIZE_EXCEEDED");
        assert_eq!(Error::session("gone").error_code(), "SESSION_ERROR");
    }
}
