//! Error types for the chatloop domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error type.

use std::time::Duration;

use thiserror::Error;

// --- Bounded context errors ---

/// Faults raised while talking to the model endpoint or consuming its stream.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError {
        status_code: u16,
        message: String,
    },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Stream interrupted: {0}")]
    StreamInterrupted(String),

    #[error("Malformed stream frame: {0}")]
    MalformedFrame(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Request cancelled")]
    Cancelled,

    #[error("Network error: {0}")]
    Network(String),
}

/// Faults raised by a tool handler. The dispatcher turns every one of these
/// into a `FAILED` tool response.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Tool execution failed: {tool_name} — {reason}")]
    ExecutionFailed { tool_name: String, reason: String },

    #[error("Tool cancelled: {0}")]
    Cancelled(String),

    #[error("Permission denied: {tool_name} — {reason}")]
    PermissionDenied { tool_name: String, reason: String },

    #[error("Missing required argument '{0}'")]
    MissingArgument(String),

    #[error("Invalid tool arguments: {0}")]
    InvalidArguments(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_error_displays_correctly() {
        let err = ProviderError::ApiError {
            status_code: 503,
            message: "model loading".into(),
        };
        assert!(err.to_string().contains("503"));
        assert!(err.to_string().contains("model loading"));
    }

    #[test]
    fn tool_error_displays_correctly() {
        let err = ToolError::PermissionDenied {
            tool_name: "tool_run_command".into(),
            reason: "command not in allowlist".into(),
        };
        assert!(err.to_string().contains("tool_run_command"));
        assert!(err.to_string().contains("allowlist"));
    }

    #[test]
    fn timeout_keeps_sub_second_precision() {
        let err = ProviderError::Timeout(Duration::from_millis(250));
        assert_eq!(err.to_string(), "Request timed out after 250ms");
        let err = ProviderError::Timeout(Duration::from_secs(300));
        assert_eq!(err.to_string(), "Request timed out after 300s");
    }

    #[test]
    fn missing_argument_names_the_parameter() {
        let err = ToolError::MissingArgument("location".into());
        assert_eq!(err.to_string(), "Missing required argument 'location'");
    }
}
