//! Error types for the DeepReact domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error enum; provider and tool errors
//! additionally carry a [`FailureClass`] so the retry controller can tell a
//! transient failure from a terminal one.

use std::time::Duration;
use thiserror::Error;

/// The top-level error type for all DeepReact operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Provider errors ---
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    // --- Tool errors ---
    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    // --- Protocol errors ---
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolParseError),

    // --- Task construction ---
    #[error("Invalid task: {0}")]
    Task(#[from] TaskError),

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

/// How the retry controller should treat a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Timeout, connection failure, 5xx or 429. Worth another attempt.
    Retryable,
    /// Client error or malformed request. Retrying cannot help.
    Terminal,
}

/// Errors the retry controller knows how to classify.
pub trait RetryableError: std::fmt::Display + Sized {
    fn failure_class(&self) -> FailureClass;

    /// The value produced when a single attempt exceeds its timeout.
    fn timed_out(operation: &str, after: Duration) -> Self;

    fn is_retryable(&self) -> bool {
        self.failure_class() == FailureClass::Retryable
    }

    /// A minimum wait the upstream asked for, if any.
    fn retry_after(&self) -> Option<Duration> {
        None
    }
}

// --- Bounded context errors ---

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

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Malformed provider response: {0}")]
    MalformedResponse(String),

    #[error("Provider returned an empty completion")]
    EmptyResponse,

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),
}

impl RetryableError for ProviderError {
    fn failure_class(&self) -> FailureClass {
        match self {
            Self::ApiError { status_code, .. } if *status_code >= 500 => FailureClass::Retryable,
            Self::ApiError { status_code: 429, .. } => FailureClass::Retryable,
            Self::RateLimited { .. }
            | Self::MalformedResponse(_)
            | Self::EmptyResponse
            | Self::Timeout(_)
            | Self::Network(_) => FailureClass::Retryable,
            Self::ApiError { .. }
            | Self::AuthenticationFailed(_)
            | Self::ModelNotFound(_)
            | Self::InvalidRequest(_)
            | Self::NotConfigured(_) => FailureClass::Terminal,
        }
    }

    fn timed_out(operation: &str, after: Duration) -> Self {
        Self::Timeout(format!("{operation} exceeded {}s", after.as_secs_f64()))
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after_secs } => Some(Duration::from_secs(*retry_after_secs)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    NotFound(String),

    #[error("Tool execution failed: {tool_name}: {reason}")]
    ExecutionFailed { tool_name: String, reason: String },

    #[error("Tool timed out: {tool_name} after {timeout:?}")]
    Timeout { tool_name: String, timeout: Duration },

    #[error("Network error in {tool_name}: {reason}")]
    Network { tool_name: String, reason: String },

    #[error("Upstream service for {tool_name} answered with status {status_code}")]
    Upstream { tool_name: String, status_code: u16 },

    #[error("Invalid tool arguments: {0}")]
    InvalidArguments(String),

    #[error("Tool not configured: {0}")]
    NotConfigured(String),
}

impl RetryableError for ToolError {
    fn failure_class(&self) -> FailureClass {
        match self {
            Self::Timeout { .. } | Self::Network { .. } => FailureClass::Retryable,
            Self::Upstream { status_code, .. } if *status_code >= 500 || *status_code == 429 => {
                FailureClass::Retryable
            }
            _ => FailureClass::Terminal,
        }
    }

    fn timed_out(operation: &str, after: Duration) -> Self {
        Self::Timeout {
            tool_name: operation.to_string(),
            timeout: after,
        }
    }
}

/// A `<tool_call>` span in model output that could not be turned into a call.
///
/// Recovered locally: the span is dropped and the round continues.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolParseError {
    #[error("Tool call is not valid JSON ({reason}): {fragment}")]
    InvalidJson { reason: String, fragment: String },

    #[error("Tool call has no \"name\" field: {fragment}")]
    MissingName { fragment: String },

    #[error("Tool call \"arguments\" must be a JSON object: {fragment}")]
    InvalidArguments { fragment: String },

    #[error("Tool call is missing its closing </tool_call> tag: {fragment}")]
    Unterminated { fragment: String },
}

impl ProtocolParseError {
    /// The raw text of the offending span.
    pub fn fragment(&self) -> &str {
        match self {
            Self::InvalidJson { fragment, .. }
            | Self::MissingName { fragment }
            | Self::InvalidArguments { fragment }
            | Self::Unterminated { fragment } => fragment,
        }
    }
}

/// Constraint violations caught when a rollout task or run is constructed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaskError {
    #[error("Query must not be empty")]
    EmptyQuery,

    #[error("Rollout count must be at least 1")]
    ZeroRollouts,

    #[error("Worker count must be at least 1")]
    ZeroWorkers,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_error_displays_correctly() {
        let err = Error::Provider(ProviderError::ApiError {
            status_code: 429,
            message: "Too many requests".into(),
        });
        assert!(err.to_string().contains("429"));
        assert!(err.to_string().contains("Too many requests"));
    }

    #[test]
    fn tool_error_displays_correctly() {
        let err = Error::Tool(ToolError::ExecutionFailed {
            tool_name: "PythonInterpreter".into(),
            reason: "interpreter missing".into(),
        });
        assert!(err.to_string().contains("PythonInterpreter"));
        assert!(err.to_string().contains("interpreter missing"));
    }

    #[test]
    fn server_errors_and_rate_limits_are_retryable() {
        let server = ProviderError::ApiError { status_code: 503, message: "busy".into() };
        let limited = ProviderError::ApiError { status_code: 429, message: "slow down".into() };
        assert!(server.is_retryable());
        assert!(limited.is_retryable());
        assert!(ProviderError::RateLimited { retry_after_secs: 3 }.is_retryable());
        assert!(ProviderError::Network("reset".into()).is_retryable());
        assert!(ProviderError::EmptyResponse.is_retryable());
    }

    #[test]
    fn client_errors_are_terminal() {
        let bad = ProviderError::ApiError { status_code: 400, message: "bad".into() };
        assert_eq!(bad.failure_class(), FailureClass::Terminal);
        assert!(!ProviderError::AuthenticationFailed("no key".into()).is_retryable());
        assert!(!ProviderError::InvalidRequest("schema".into()).is_retryable());
    }

    #[test]
    fn tool_error_classification() {
        let upstream = |code| ToolError::Upstream { tool_name: "fetch_url".into(), status_code: code };
        assert!(upstream(502).is_retryable());
        assert!(upstream(429).is_retryable());
        assert!(!upstream(404).is_retryable());
        assert!(!ToolError::InvalidArguments("missing url".into()).is_retryable());
        assert!(ToolError::timed_out("search", Duration::from_secs(5)).is_retryable());
    }

    #[test]
    fn timeout_is_constructed_per_error_type() {
        let err = ProviderError::timed_out("completion", Duration::from_millis(1500));
        assert!(matches!(err, ProviderError::Timeout(_)));
        assert!(err.to_string().contains("1.5"));
    }

    #[test]
    fn sub_second_tool_timeout_keeps_its_precision() {
        let err = ToolError::timed_out("fetch_url", Duration::from_millis(250));
        assert_eq!(err.to_string(), "Tool timed out: fetch_url after 250ms");
    }

    #[test]
    fn parse_error_exposes_fragment() {
        let err = ProtocolParseError::MissingName { fragment: "{\"arguments\":{}}".into() };
        assert_eq!(err.fragment(), "{\"arguments\":{}}");
        assert!(Error::from(err).to_string().contains("name"));
    }
}
