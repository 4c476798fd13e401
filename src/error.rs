//! Error taxonomy shared by the remote client and the lifecycle layer.
//!
//! Typed errors travel inside `anyhow::Error` through most of the crate;
//! [`classify`] walks an error chain and recovers the [`ErrorKind`] so callers
//! can decide between retrying, waiting for the next tick, or failing loudly.

use crate::lifecycle::component::ComponentState;
use std::time::Duration;
use thiserror::Error;

/// Failures produced while talking to the remote listing API.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RemoteError {
    /// Connection, DNS, or I/O failure before a status was received.
    #[error("network error: {0}")]
    Network(String),

    /// The service asked us to slow down.
    #[error("rate limited by remote API (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    /// 5xx-class response.
    #[error("remote server error: HTTP {status}")]
    ServerError { status: u16 },

    /// Credential rejected or insufficient permissions.
    #[error("authentication failed (HTTP {status}): {message}")]
    AuthFailure { status: u16, message: String },

    /// Request rejected as malformed.
    #[error("invalid request: {0}")]
    InvalidInput(String),

    /// The continuation cursor is no longer valid and a full listing is required.
    #[error("sync cursor was reset by the remote API")]
    CursorReset,

    /// The circuit breaker is shedding load.
    #[error("remote circuit breaker is open")]
    CircuitOpen,

    /// Any other status the client does not know how to classify.
    #[error("unexpected response (HTTP {status}): {message}")]
    Unexpected { status: u16, message: String },

    /// A single request exceeded its timeout.
    #[error("remote call {operation} timed out")]
    Timeout { operation: &'static str },

    #[error("remote call cancelled")]
    Cancelled,
}

impl RemoteError {
    /// Returns true for transient failures the executor retries locally.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RemoteError::Network(_)
                | RemoteError::RateLimited { .. }
                | RemoteError::ServerError { .. }
                | RemoteError::Timeout { .. }
        )
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            RemoteError::Network(_) => ErrorKind::Network,
            RemoteError::RateLimited { .. } => ErrorKind::RateLimited,
            RemoteError::ServerError { .. } => ErrorKind::ServerError,
            RemoteError::AuthFailure { .. } => ErrorKind::AuthFailure,
            RemoteError::InvalidInput(_) | RemoteError::CursorReset => ErrorKind::InvalidInput,
            RemoteError::CircuitOpen => ErrorKind::CircuitOpen,
            RemoteError::Unexpected { .. } => ErrorKind::Unexpected,
            RemoteError::Timeout { .. } => ErrorKind::Timeout,
            RemoteError::Cancelled => ErrorKind::Cancelled,
        }
    }
}

/// Lifecycle misuse and bounded-wait failures.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LifecycleError {
    #[error("component {component} cannot {operation} while {state:?}")]
    InvalidState {
        component: String,
        operation: &'static str,
        state: ComponentState,
    },

    #[error("component {component} did not finish {operation} within {after:?}")]
    Timeout {
        component: String,
        operation: &'static str,
        after: Duration,
    },

    #[error("{operation} of component {component} was cancelled")]
    Cancelled {
        component: String,
        operation: &'static str,
    },

    #[error("component {component} is unhealthy: {reason}")]
    Unhealthy { component: String, reason: String },
}

impl LifecycleError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LifecycleError::InvalidState { .. } => ErrorKind::InvalidState,
            LifecycleError::Timeout { .. } => ErrorKind::Timeout,
            LifecycleError::Cancelled { .. } => ErrorKind::Cancelled,
            LifecycleError::Unhealthy { .. } => ErrorKind::Unexpected,
        }
    }
}

/// Flat classification used for propagation decisions and log fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Network,
    RateLimited,
    ServerError,
    AuthFailure,
    InvalidInput,
    CircuitOpen,
    InvalidState,
    Timeout,
    Cancelled,
    Unexpected,
}

impl ErrorKind {
    /// Permanent failures that no amount of waiting will fix.
    pub fn is_permanent(self) -> bool {
        matches!(self, ErrorKind::AuthFailure | ErrorKind::InvalidInput)
    }
}

/// Finds the outermost typed error in the chain and returns its kind.
///
/// Lifecycle errors win over remote ones, so a startup timeout caused by a
/// failing remote probe still classifies as a timeout.
pub fn classify(err: &anyhow::Error) -> Option<ErrorKind> {
    if let Some(lifecycle) = err.downcast_ref::<LifecycleError>() {
        return Some(lifecycle.kind());
    }
    if let Some(remote) = err.downcast_ref::<RemoteError>() {
        return Some(remote.kind());
    }
    // Typed errors nested as `source()` of another error are invisible to downcasting.
    err.chain().find_map(|cause| {
        if let Some(remote) = cause.downcast_ref::<RemoteError>() {
            return Some(remote.kind());
        }
        cause
            .downcast_ref::<LifecycleError>()
            .map(LifecycleError::kind)
    })
}
