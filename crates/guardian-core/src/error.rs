//! Error types shared across the Guardian control plane.
//!
//! Variants map directly onto the error kinds in the design's error
//! handling section: each carries enough context to render the right
//! response (proxy status code, Request-server denial, API error) without
//! ever including credential material in the rendered message.

use thiserror::Error;

/// Errors surfaced by Guardian components.
#[derive(Debug, Error)]
pub enum GuardianError {
    /// Missing or invalid proxy/API/Request authentication.
    #[error("authentication failed")]
    Auth,

    /// Explicit deny, invalid host, or no matching pattern.
    #[error("policy denied: {reason}")]
    PolicyDenied {
        /// Human-readable reason surfaced to the caller.
        reason: String,
    },

    /// An approval request was not resolved before its deadline.
    #[error("approval timed out")]
    ApprovalTimeout,

    /// A retryable I/O failure (executor unreachable, disk write failed).
    #[error("transient I/O error: {0}")]
    TransientIo(String),

    /// Static or decisions configuration was malformed or unreadable.
    ///
    /// Callers treat this as "empty" wherever that is safe; it only
    /// aborts startup when a listener cannot bind.
    #[error("configuration error: {0}")]
    FatalConfig(String),

    /// The server is shutting down; the waiter was unblocked with a
    /// synthetic terminal denial rather than a real decision.
    #[error("server shutting down")]
    ShutdownSignalled,

    /// Malformed request body or an invariant violation in caller input.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Requested entity (token, pending request, project) does not exist.
    #[error("not found: {0}")]
    NotFound(String),
}

impl From<std::io::Error> for GuardianError {
    fn from(e: std::io::Error) -> Self {
        Self::TransientIo(e.to_string())
    }
}

impl From<serde_yaml::Error> for GuardianError {
    fn from(e: serde_yaml::Error) -> Self {
        Self::FatalConfig(e.to_string())
    }
}

/// Convenience alias used throughout the Guardian crates.
pub type GuardianResult<T> = Result<T, GuardianError>;
