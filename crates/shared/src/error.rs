//! Error types shared between the session core and its callers.

use thiserror::Error;

/// API error type for client-side REST use.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    Network(String),
    Http { status: u16, body: String },
    Deserialize(String),
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ApiError::Network(msg) => write!(f, "Network error: {}", msg),
            ApiError::Http { status, body } => write!(f, "HTTP {}: {}", status, body),
            ApiError::Deserialize(msg) => write!(f, "Deserialization error: {}", msg),
        }
    }
}

impl std::error::Error for ApiError {}

/// Failure taxonomy of the chat session core.
///
/// `AuthMissing` and a reconnect ceiling in `Failed` state are terminal until
/// external intervention (re-login or manual retry); the rest are recoverable
/// and surfaced to the caller with state left consistent.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ChatError {
    /// No session credential at connect time. The connect attempt performs no
    /// network action and is not retried by the reconnection controller.
    #[error("no session credential, connect requires login")]
    AuthMissing,

    /// Publish attempted before the transport reported opened. Frames are not
    /// queued by the adapter; buffering is caller policy.
    #[error("realtime transport is not connected")]
    NotConnected,

    /// Socket-level failure. Triggers the reconnection controller.
    #[error("transport error: {0}")]
    Transport(String),

    /// REST failure during room or message load. State is left unchanged.
    #[error("fetch failed: {0}")]
    Fetch(ApiError),

    /// Fallback send failure. The message never entered the log.
    #[error("send failed: {0}")]
    SendFailed(ApiError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_error_display() {
        let err = ApiError::Http { status: 503, body: "unavailable".to_string() };
        assert_eq!(err.to_string(), "HTTP 503: unavailable");
    }

    #[test]
    fn chat_error_wraps_api_error() {
        let err = ChatError::SendFailed(ApiError::Network("refused".to_string()));
        assert!(err.to_string().contains("refused"));
    }
}
