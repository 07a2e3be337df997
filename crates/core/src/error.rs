//! Error types for the devloop domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error variant.

use thiserror::Error;

use crate::event::EventId;

/// The top-level error type for all devloop operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Provider errors ---
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    // --- Storage errors ---
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    // --- Event stream errors ---
    #[error("Event stream error: {0}")]
    Stream(#[from] StreamError),

    // --- Agent errors ---
    #[error("Agent error: {0}")]
    Agent(#[from] AgentError),

    // --- Runtime errors ---
    #[error("Runtime error: {0}")]
    Runtime(#[from] RuntimeError),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

/// Errors raised at the LLM boundary.
///
/// The first five kinds are transient and retried by the LLM client;
/// everything else propagates immediately.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("Malformed or empty response: {0}")]
    MalformedResponse(String),

    #[error("Rate limited by provider")]
    RateLimited { retry_after_secs: Option<u64> },

    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),
}

impl ProviderError {
    /// Whether the LLM client should retry the call that produced this error.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::MalformedResponse(_)
                | Self::RateLimited { .. }
                | Self::Connection(_)
                | Self::ServiceUnavailable(_)
                | Self::Timeout(_)
        )
    }
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("I/O error on {path}: {reason}")]
    Io { path: String, reason: String },
}

#[derive(Debug, Error)]
pub enum StreamError {
    #[error("Event {0} not found")]
    NotFound(EventId),

    #[error("Event already published with id {0}")]
    AlreadyPublished(EventId),

    #[error("Failed to decode event {id}: {reason}")]
    Corrupt { id: EventId, reason: String },

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors surfaced while stepping an agent.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("Malformed action: {0}")]
    MalformedAction(String),

    #[error("No action produced: {0}")]
    NoAction(String),

    #[error("LLM response error: {0}")]
    LlmResponse(String),

    #[error("LLM call failed: {0}")]
    Llm(#[from] ProviderError),

    #[error("Unknown agent: {0}")]
    UnknownAgent(String),

    #[error("Task error: {0}")]
    Task(String),

    #[error("Controller task failed: {0}")]
    Controller(String),

    #[error(transparent)]
    Stream(#[from] StreamError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl AgentError {
    /// Model-side mistakes: reported back to the LLM, the loop keeps going.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::MalformedAction(_)
                | Self::NoAction(_)
                | Self::LlmResponse(_)
                | Self::Task(_)
                | Self::Llm(ProviderError::MalformedResponse(_))
        )
    }
}

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("Unsupported action type: {0}")]
    Unsupported(String),

    #[error("Command timed out after {timeout_secs}s: {command}")]
    Timeout { command: String, timeout_secs: u64 },

    #[error("Path escapes workspace: {0}")]
    PathOutsideWorkspace(String),

    #[error("I/O error: {0}")]
    Io(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_error_displays_correctly() {
        let err = Error::Provider(ProviderError::ApiError {
            status_code: 500,
            message: "upstream exploded".into(),
        });
        assert!(err.to_string().contains("500"));
        assert!(err.to_string().contains("upstream exploded"));
    }

    #[test]
    fn transient_provider_errors_are_retryable() {
        assert!(ProviderError::RateLimited { retry_after_secs: None }.is_retryable());
        assert!(ProviderError::Connection("reset".into()).is_retryable());
        assert!(ProviderError::ServiceUnavailable("503".into()).is_retryable());
        assert!(ProviderError::MalformedResponse("no choices".into()).is_retryable());
        assert!(!ProviderError::AuthenticationFailed("bad key".into()).is_retryable());
        assert!(!ProviderError::ApiError { status_code: 400, message: "bad".into() }.is_retryable());
    }

    #[test]
    fn agent_error_recoverability() {
        assert!(AgentError::MalformedAction("x".into()).is_recoverable());
        assert!(AgentError::NoAction("x".into()).is_recoverable());
        assert!(AgentError::LlmResponse("x".into()).is_recoverable());
        assert!(!AgentError::Llm(ProviderError::Connection("down".into())).is_recoverable());
        assert!(!AgentError::UnknownAgent("ghost".into()).is_recoverable());
        assert!(!AgentError::Stream(StreamError::NotFound(3)).is_recoverable());
    }
}
