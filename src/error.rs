//! Error types for the pedestal control plane.
//!
//! Every failure maps onto one [`ErrorCategory`], which is what callers use to
//! decide whether an operation may be retried or routed through the
//! hypervisor CLI fallback.

use std::path::PathBuf;
use std::time::Duration;

/// Result type alias for control plane operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Broad classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Malformed input text, rejected before any I/O.
    Format,
    /// The daemon socket is missing, refused the connection, or timed out.
    Connectivity,
    /// The daemon replied without either sentinel.
    Protocol,
    /// The daemon explicitly reported failure.
    Operation,
    /// Invalid identifier or state transition request.
    Validation,
    /// Host tooling or local bookkeeping failures.
    Host,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Format => write!(f, "format"),
            Self::Connectivity => write!(f, "connectivity"),
            Self::Protocol => write!(f, "protocol"),
            Self::Operation => write!(f, "operation"),
            Self::Validation => write!(f, "validation"),
            Self::Host => write!(f, "host"),
        }
    }
}

/// Errors that can occur in the control plane.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    // =========================================================================
    // Format Errors
    // =========================================================================
    /// CPU-set text could not be parsed.
    #[error("invalid cpu set '{input}': {reason}")]
    InvalidCpuSet { input: String, reason: String },

    /// Status reply could not be parsed.
    #[error("invalid status '{text}': {reason}")]
    InvalidStatus { text: String, reason: String },

    /// Status reply was empty.
    #[error("empty response from daemon")]
    EmptyResponse,

    /// Status reply carried the failure sentinel.
    #[error("error response from daemon: {0}")]
    ErrorResponse(String),

    // =========================================================================
    // Connectivity Errors
    // =========================================================================
    /// Socket file missing or not a socket.
    #[error("daemon socket unavailable at {path}: {reason}")]
    DaemonDown { path: PathBuf, reason: String },

    /// Connecting to an existing socket failed.
    #[error("failed to connect to {path}: {source}")]
    ConnectFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Operation timed out.
    #[error("operation timed out after {duration:?}: {operation}")]
    Timeout {
        operation: String,
        duration: Duration,
    },

    /// Generic I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // =========================================================================
    // Protocol Errors
    // =========================================================================
    /// Reply ended without a sentinel.
    #[error("unexpected response format for '{command}': {reply:?}")]
    Protocol { command: String, reply: String },

    // =========================================================================
    // Operation Errors
    // =========================================================================
    /// Daemon reported failure.
    #[error("daemon rejected '{command}': {message}")]
    OperationRejected { command: String, message: String },

    // =========================================================================
    // Validation Errors
    // =========================================================================
    /// Workload identifier rejected.
    #[error("invalid workload ID '{id}': {reason}")]
    InvalidWorkloadId { id: String, reason: &'static str },

    /// Transition not permitted by the lifecycle graph.
    #[error("invalid state transition from '{from}' to '{to}'")]
    InvalidTransition { from: String, to: String },

    /// Optimistic precondition failed.
    #[error("{kind} is in state '{state}', expected '{expected}'")]
    InvalidState {
        kind: &'static str,
        state: String,
        expected: String,
    },

    /// Workload already registered.
    #[error("workload already exists: {0}")]
    WorkloadAlreadyExists(String),

    /// Workload not registered, or absent from a status listing.
    #[error("workload not found: {0}")]
    WorkloadNotFound(String),

    // =========================================================================
    // Host Errors
    // =========================================================================
    /// Daemon is not running after the single auto-start attempt.
    #[error("control daemon not running: {0}")]
    DaemonNotRunning(String),

    /// External CLI invocation failed.
    #[error("command '{command}' failed: {reason}")]
    CommandFailed { command: String, reason: String },

    /// Pedestal cannot perform the requested operation.
    #[error("operation not supported: {0}")]
    Unsupported(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Internal error (should not happen).
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Returns the category of this error.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::InvalidCpuSet { .. }
            | Self::InvalidStatus { .. }
            | Self::EmptyResponse
            | Self::ErrorResponse(_) => ErrorCategory::Format,
            Self::DaemonDown { .. }
            | Self::ConnectFailed { .. }
            | Self::Timeout { .. }
            | Self::Io(_) => ErrorCategory::Connectivity,
            Self::Protocol { .. } => ErrorCategory::Protocol,
            Self::OperationRejected { .. } => ErrorCategory::Operation,
            Self::InvalidWorkloadId { .. }
            | Self::InvalidTransition { .. }
            | Self::InvalidState { .. }
            | Self::WorkloadAlreadyExists(_)
            | Self::WorkloadNotFound(_) => ErrorCategory::Validation,
            Self::DaemonNotRunning(_)
            | Self::CommandFailed { .. }
            | Self::Unsupported(_)
            | Self::Serialization(_)
            | Self::Internal(_) => ErrorCategory::Host,
        }
    }

    /// Returns true for errors raised when the daemon could not be reached.
    #[must_use]
    pub fn is_daemon_unreachable(&self) -> bool {
        matches!(
            self,
            Self::DaemonDown { .. } | Self::ConnectFailed { .. } | Self::DaemonNotRunning(_)
        )
    }

    /// Returns true if the request timed out.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}
