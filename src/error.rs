//! Crate-wide error taxonomy.
//!
//! Every fallible operation in the core contracts, provider transport, tool
//! layer, agent loops, and memory manager returns [`AgentError`]. The variant
//! set is deliberately narrow — it mirrors the error kinds callers actually
//! need to branch on, not the internal plumbing that produced them.

use std::fmt;

/// The single error type returned by agentflow's public APIs.
///
/// # Example
///
/// ```
/// use agentflow::error::AgentError;
///
/// let err = AgentError::NotFound("tool `search` is not registered".to_string());
/// assert_eq!(
///     err.to_string(),
///     "not-found: tool `search` is not registered"
/// );
/// ```
#[derive(Debug, Clone)]
pub enum AgentError {
    /// Bad user input, bad config, or a schema mismatch at a call boundary.
    InvalidArgument(String),
    /// A named entity (tool, path) does not exist.
    NotFound(String),
    /// A duplicate registration was attempted.
    AlreadyExists(String),
    /// An operation requires a capability that is disabled (e.g. writes off).
    PermissionDenied(String),
    /// The caller's context was cancelled before the operation completed.
    Cancelled,
    /// The caller's deadline elapsed before the operation completed.
    DeadlineExceeded,
    /// The upstream provider returned a non-2xx response after retries.
    ProviderError {
        /// HTTP status code, if one was received.
        status: Option<u16>,
        /// Upstream error message or body excerpt.
        message: String,
    },
    /// A connection-level transport failure (reset, timeout, DNS) with no
    /// HTTP response to carry a status code. Always retryable.
    Transport(String),
    /// An agent loop exhausted its iteration bound without terminating.
    IterationLimitExceeded {
        /// The configured bound that was reached.
        max_iterations: usize,
    },
    /// A stream or grammar failed to decode.
    ParseError(String),
    /// Tool arguments did not match their declared schema.
    ValidationError(String),
}

impl fmt::Display for AgentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AgentError::InvalidArgument(msg) => write!(f, "invalid-argument: {}", msg),
            AgentError::NotFound(msg) => write!(f, "not-found: {}", msg),
            AgentError::AlreadyExists(msg) => write!(f, "already-exists: {}", msg),
            AgentError::PermissionDenied(msg) => write!(f, "permission-denied: {}", msg),
            AgentError::Cancelled => write!(f, "cancelled"),
            AgentError::DeadlineExceeded => write!(f, "deadline-exceeded"),
            AgentError::ProviderError { status, message } => match status {
                Some(code) => write!(f, "provider-error ({}): {}", code, message),
                None => write!(f, "provider-error: {}", message),
            },
            AgentError::Transport(msg) => write!(f, "transport-error: {}", msg),
            AgentError::IterationLimitExceeded { max_iterations } => write!(
                f,
                "iteration-limit-exceeded: reached {} iterations",
                max_iterations
            ),
            AgentError::ParseError(msg) => write!(f, "parse-error: {}", msg),
            AgentError::ValidationError(msg) => write!(f, "validation-error: {}", msg),
        }
    }
}

impl std::error::Error for AgentError {}

impl AgentError {
    /// True for errors a retry with a fresh context/request is expected to fix.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AgentError::Transport(_))
            || matches!(
                self,
                AgentError::ProviderError { status: Some(s), .. } if *s >= 500 || *s == 429
            )
    }
}

impl From<Box<dyn std::error::Error + Send + Sync>> for AgentError {
    fn from(err: Box<dyn std::error::Error + Send + Sync>) -> Self {
        AgentError::ProviderError {
            status: None,
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_names_subsystem_and_status() {
        let err = AgentError::ProviderError {
            status: Some(503),
            message: "service unavailable".to_string(),
        };
        assert_eq!(err.to_string(), "provider-error (503): service unavailable");
    }

    #[test]
    fn retryable_only_for_5xx_and_429() {
        assert!(AgentError::ProviderError {
            status: Some(500),
            message: String::new()
        }
        .is_retryable());
        assert!(AgentError::ProviderError {
            status: Some(429),
            message: String::new()
        }
        .is_retryable());
        assert!(!AgentError::ProviderError {
            status: Some(404),
            message: String::new()
        }
        .is_retryable());
        assert!(!AgentError::NotFound("x".to_string()).is_retryable());
    }

    #[test]
    fn transport_errors_are_always_retryable() {
        assert!(AgentError::Transport("connection reset".to_string()).is_retryable());
    }
}
