//! Error hierarchy for Conduit.

use thiserror::Error;

/// Top-level error type for Conduit operations.
#[derive(Debug, Error)]
pub enum ConduitError {
    #[error("API error: {0}")]
    Api(#[from] ApiError),

    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

/// Errors from the chat-completion endpoint.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Authentication failed: {message}")]
    Auth { message: String },

    #[error("Bad request: {message}")]
    BadRequest { message: String },

    #[error("Rate limited (retry after {retry_after_ms:?}ms)")]
    RateLimited { retry_after_ms: Option<u64> },

    #[error("Server overloaded")]
    Overloaded,

    #[error("Server error: {status} {message}")]
    Server { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Stream parse error: {0}")]
    StreamParse(String),

    #[error("Request timeout")]
    Timeout,
}

impl ApiError {
    /// Whether the request that produced this error is worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. }
                | Self::Overloaded
                | Self::Server { .. }
                | Self::Network(_)
                | Self::Timeout
        )
    }
}

/// Errors from routing or executing a tool call.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Tool {name} not found in selected servers")]
    NotFound { name: String },

    #[error("Invalid arguments for tool '{tool}': {message}")]
    InvalidArguments { tool: String, message: String },

    #[error("{0}")]
    ExecutionFailed(String),
}

/// Errors from configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Config file parse error at {path}: {message}")]
    Parse { path: String, message: String },

    #[error("Missing required configuration: {key}")]
    MissingKey { key: String },

    #[error("Invalid configuration value for '{key}': {message}")]
    InvalidValue { key: String, message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_errors() {
        assert!(ApiError::RateLimited { retry_after_ms: None }.is_transient());
        assert!(ApiError::Overloaded.is_transient());
        assert!(ApiError::Timeout.is_transient());
        assert!(ApiError::Network("reset".into()).is_transient());
        assert!(
            ApiError::Server {
                status: 502,
                message: "bad gateway".into()
            }
            .is_transient()
        );
    }

    #[test]
    fn permanent_errors() {
        assert!(!ApiError::Auth { message: "no".into() }.is_transient());
        assert!(!ApiError::BadRequest { message: "no".into() }.is_transient());
        assert!(!ApiError::StreamParse("eof".into()).is_transient());
    }

    #[test]
    fn tool_not_found_display() {
        let err = ToolError::NotFound {
            name: "fs__list_dir".into(),
        };
        assert_eq!(err.to_string(), "Tool fs__list_dir not found in selected servers");
    }

    #[test]
    fn execution_failed_is_bare_message() {
        let err = ToolError::ExecutionFailed("disk full".into());
        assert_eq!(err.to_string(), "disk full");
    }
}
