//! Breaker-gated retry loop wrapping every outbound remote call.

use crate::error::RemoteError;
use crate::remote::circuit_breaker::CircuitBreaker;
use crate::remote::metrics::{RemoteMetrics, RemoteMetricsSnapshot};
use crate::remote::options::RemoteClientOptions;
use crate::remote::retry::{RetryContext, RetryMessages};
use crate::runtime::backoff::{sleep_with_cancellation, Backoff};
use anyhow::Result;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

const REMOTE_CALL_RETRY: RetryMessages = RetryMessages {
    operation: "remote_call",
    permit: "circuit breaker permit acquired",
    circuit_open: "remote circuit breaker open; rejecting call",
    retry: "remote call failed; retrying",
    exhausted: "remote call exhausted retries",
    permanent: "remote call failed with a non-retryable error",
};

/// Wraps single remote calls with circuit-breaker gating, bounded exponential
/// backoff, metrics, and consistent logging.
#[derive(Debug, Clone)]
pub struct ResilientExecutor {
    breaker: Arc<CircuitBreaker>,
    metrics: Arc<RemoteMetrics>,
    options: RemoteClientOptions,
}

impl ResilientExecutor {
    pub fn new(options: RemoteClientOptions, breaker: Arc<CircuitBreaker>) -> Result<Self> {
        options.validate()?;
        Ok(Self {
            breaker,
            metrics: Arc::new(RemoteMetrics::default()),
            options,
        })
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    pub fn options(&self) -> &RemoteClientOptions {
        &self.options
    }

    pub fn metrics(&self) -> RemoteMetricsSnapshot {
        self.metrics.snapshot(self.breaker.state())
    }

    /// Waits the executor would observe between consecutive attempts when every
    /// attempt fails with a retryable error and no rate-limit hint is given.
    pub fn backoff_schedule(&self) -> Vec<Duration> {
        let mut backoff = self.new_backoff();
        (0..self.options.max_retries)
            .map(|_| backoff.next_delay())
            .collect()
    }

    /// Runs `attempt` until it succeeds, fails permanently, exhausts
    /// `max_retries`, or `cancel` fires.
    pub async fn execute<T, F, Fut>(
        &self,
        cancel: &CancellationToken,
        attempt: F,
    ) -> Result<T, RemoteError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, RemoteError>>,
    {
        self.execute_with_context(
            RetryContext::new(&REMOTE_CALL_RETRY),
            self.options.max_retries,
            cancel,
            attempt,
        )
        .await
    }

    pub(crate) async fn execute_with_context<T, F, Fut>(
        &self,
        context: RetryContext<'_>,
        max_retries: usize,
        cancel: &CancellationToken,
        mut operation: F,
    ) -> Result<T, RemoteError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, RemoteError>>,
    {
        let mut backoff = self.new_backoff();
        let mut attempt = 0;
        let mut last_error: Option<RemoteError> = None;

        loop {
            if cancel.is_cancelled() {
                context.log_cancelled(attempt);
                return Err(RemoteError::Cancelled);
            }

            if !self.breaker.allow() {
                self.metrics.record_rejected();
                context.log_circuit_open(attempt + 1);
                // A retry refused mid-loop surfaces the failure that opened the circuit.
                return Err(last_error.unwrap_or(RemoteError::CircuitOpen));
            }
            context.log_permit(attempt + 1, self.breaker.state());

            attempt += 1;
            let start = Instant::now();

            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                result = operation() => Some(result),
            };

            let Some(result) = outcome else {
                self.breaker.abandon();
                context.log_cancelled(attempt);
                return Err(RemoteError::Cancelled);
            };

            let err = match result {
                Ok(value) => {
                    self.metrics.record_attempt(Ok(()), start.elapsed());
                    self.breaker.record_success();
                    tracing::debug!(
                        operation = context.operation(),
                        attempt,
                        "remote call completed successfully"
                    );
                    return Ok(value);
                }
                Err(err) => err,
            };

            self.metrics.record_attempt(Err(&err), start.elapsed());
            match &err {
                // The service answered definitively, so the path itself is healthy.
                RemoteError::CursorReset => {
                    self.breaker.record_success();
                    return Err(err);
                }
                RemoteError::RateLimited { retry_after } => {
                    self.breaker.record_failure();
                    if let Some(hint) = retry_after {
                        backoff.raise_to(*hint);
                    }
                }
                _ => self.breaker.record_failure(),
            }

            if !err.is_retryable() {
                context.log_permanent(attempt, &err);
                return Err(err);
            }

            if attempt > max_retries {
                context.log_exhausted(attempt, &err);
                return Err(err);
            }

            let delay = backoff.next_delay();
            context.log_retry(attempt, delay, &err);
            if sleep_with_cancellation(delay, cancel).await.is_err() {
                context.log_cancelled(attempt);
                return Err(RemoteError::Cancelled);
            }
            last_error = Some(err);
        }
    }

    fn new_backoff(&self) -> Backoff {
        Backoff::new(
            self.options.initial_backoff,
            self.options.max_backoff,
            self.options.backoff_multiplier,
        )
    }
}
