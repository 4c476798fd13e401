//! Shared retry context, logging helpers, and canned message templates used by
//! the executor to keep instrumentation consistent across remote operations.

use crate::error::RemoteError;
use crate::remote::circuit_breaker::CircuitState;
use std::time::Duration;

macro_rules! log_with_retry_ctx {
    ($level:ident, $ctx:expr, $($rest:tt)*) => {{
        if let Some(page) = $ctx.page {
            tracing::$level!(
                operation = $ctx.messages.operation,
                page,
                $($rest)*
            );
        } else {
            tracing::$level!(operation = $ctx.messages.operation, $($rest)*);
        }
    }};
}

/// Logging labels that describe how a particular remote operation should
/// report circuit-breaker state, retry attempts, and exhaustion.
#[derive(Clone, Copy)]
pub(crate) struct RetryMessages {
    pub(crate) operation: &'static str,
    pub(crate) permit: &'static str,
    pub(crate) circuit_open: &'static str,
    pub(crate) retry: &'static str,
    pub(crate) exhausted: &'static str,
    pub(crate) permanent: &'static str,
}

/// Context passed into the executor so callers can attach the page number of a
/// paginated listing and reuse consistent log messaging.
#[derive(Clone, Copy)]
pub(crate) struct RetryContext<'a> {
    page: Option<usize>,
    messages: &'a RetryMessages,
}

impl<'a> RetryContext<'a> {
    pub(crate) fn new(messages: &'a RetryMessages) -> Self {
        Self {
            page: None,
            messages,
        }
    }

    pub(crate) fn with_page(messages: &'a RetryMessages, page: usize) -> Self {
        Self {
            page: Some(page),
            messages,
        }
    }

    pub(crate) fn operation(&self) -> &'static str {
        self.messages.operation
    }

    pub(crate) fn log_permit(&self, attempt: usize, state: CircuitState) {
        log_with_retry_ctx!(
            trace,
            self,
            attempt,
            breaker_state = ?state,
            "{}",
            self.messages.permit
        );
    }

    pub(crate) fn log_circuit_open(&self, attempt: usize) {
        log_with_retry_ctx!(warn, self, attempt, "{}", self.messages.circuit_open);
    }

    pub(crate) fn log_retry(&self, attempt: usize, backoff: Duration, err: &RemoteError) {
        log_with_retry_ctx!(
            warn,
            self,
            attempt,
            backoff_ms = duration_to_millis(backoff),
            error = %err,
            "{}",
            self.messages.retry
        );
    }

    pub(crate) fn log_exhausted(&self, attempt: usize, err: &RemoteError) {
        log_with_retry_ctx!(error, self, attempt, error = %err, "{}", self.messages.exhausted);
    }

    pub(crate) fn log_permanent(&self, attempt: usize, err: &RemoteError) {
        if matches!(err, RemoteError::AuthFailure { .. }) {
            log_with_retry_ctx!(
                error,
                self,
                attempt,
                error = %err,
                "remote API rejected credentials; not retrying"
            );
        } else {
            log_with_retry_ctx!(warn, self, attempt, error = %err, "{}", self.messages.permanent);
        }
    }

    pub(crate) fn log_cancelled(&self, attempt: usize) {
        log_with_retry_ctx!(debug, self, attempt, "remote call cancelled; abandoning retries");
    }
}

fn duration_to_millis(backoff: Duration) -> u64 {
    backoff.as_millis().min(u128::from(u64::MAX)) as u64
}

pub(crate) const LIST_FOLDER_RETRY: RetryMessages = RetryMessages {
    operation: "list_folder",
    permit: "circuit breaker permit acquired for list_folder",
    circuit_open: "remote circuit breaker open; rejecting list_folder",
    retry: "list_folder failed; retrying",
    exhausted: "list_folder exhausted retries",
    permanent: "list_folder failed with a non-retryable error",
};

pub(crate) const LIST_CONTINUE_RETRY: RetryMessages = RetryMessages {
    operation: "list_folder_continue",
    permit: "circuit breaker permit acquired for list_folder_continue",
    circuit_open: "remote circuit breaker open; rejecting list_folder_continue",
    retry: "list_folder_continue failed; retrying",
    exhausted: "list_folder_continue exhausted retries",
    permanent: "list_folder_continue failed with a non-retryable error",
};

pub(crate) const CHECK_RETRY: RetryMessages = RetryMessages {
    operation: "check",
    permit: "circuit breaker permit acquired for health probe",
    circuit_open: "remote circuit breaker open; health probe rejected",
    retry: "health probe failed; retrying",
    exhausted: "health probe exhausted retries",
    permanent: "health probe failed with a non-retryable error",
};
