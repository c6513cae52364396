//! Error types for Parley Core

use std::time::Duration;

use thiserror::Error;

/// Result type alias using Parley Error
pub type Result<T> = std::result::Result<T, Error>;

/// Parley error types
#[derive(Error, Debug)]
pub enum Error {
    #[error("Tool already registered: {0}")]
    DuplicateTool(String),

    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Tool call {0} was already dispatched")]
    AlreadyDispatched(String),

    #[error("Tool loop exceeded {limit} rounds without a final answer")]
    ToolLoopExceeded { limit: usize },

    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error("Corrupt session: {0}")]
    CorruptSession(String),

    #[error("Message rejected: {0}")]
    InvalidHistory(String),

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Operation timed out after {0} seconds")]
    Timeout(u64),

    #[error("Operation cancelled")]
    Cancelled,
}

impl Error {
    /// Whether the conversation can simply continue with the next user input
    pub fn is_turn_fatal(&self) -> bool {
        matches!(
            self,
            Error::ToolLoopExceeded { .. }
                | Error::Gateway(_)
                | Error::Timeout(_)
                | Error::Cancelled
        )
    }
}

/// Tool provider errors
///
/// These never abort a turn: the registry turns them into an error
/// tool_result that the model gets to see.
#[derive(Error, Debug)]
pub enum ToolError {
    #[error("Invalid parameters: {0}")]
    InvalidParams(String),

    #[error("{0}")]
    ExecutionFailed(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failures reported by a model gateway
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Rate limited by the model API")]
    RateLimit {
        /// Server-suggested wait, from the `retry-after` header
        retry_after: Option<Duration>,
    },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Model API server error ({status}): {message}")]
    Server { status: u16, message: String },
}

impl GatewayError {
    /// Map an HTTP status and error body to a typed failure
    pub fn from_status(status: u16, message: impl Into<String>, retry_after: Option<Duration>) -> Self {
        let message = message.into();
        match status {
            401 | 403 => GatewayError::Auth(message),
            429 => GatewayError::RateLimit { retry_after },
            400..=499 => GatewayError::InvalidRequest(message),
            _ => GatewayError::Server { status, message },
        }
    }

    pub fn is_rate_limit(&self) -> bool {
        matches!(self, GatewayError::RateLimit { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert!(matches!(GatewayError::from_status(401, "bad key", None), GatewayError::Auth(_)));
        assert!(matches!(GatewayError::from_status(403, "forbidden", None), GatewayError::Auth(_)));
        assert!(GatewayError::from_status(429, "slow down", None).is_rate_limit());
        assert!(matches!(
            GatewayError::from_status(400, "bad", None),
            GatewayError::InvalidRequest(_)
        ));
        assert!(matches!(
            GatewayError::from_status(529, "overloaded", None),
            GatewayError::Server { status: 529, .. }
        ));
        assert!(matches!(
            GatewayError::from_status(500, "boom", None),
            GatewayError::Server { status: 500, .. }
        ));
    }

    #[test]
    fn test_turn_fatal() {
        assert!(Error::ToolLoopExceeded { limit: 10 }.is_turn_fatal());
        assert!(Error::Gateway(GatewayError::Network("reset".into())).is_turn_fatal());
        assert!(!Error::DuplicateTool("x".into()).is_turn_fatal());
        assert!(!Error::CorruptSession("x".into()).is_turn_fatal());
    }
}
