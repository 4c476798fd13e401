use std::time::Duration;
use tokio::task::yield_now;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

/// Multiplicative backoff with a ceiling. Delays never decrease.
#[derive(Debug, Clone)]
pub(crate) struct Backoff {
    current: Duration,
    max_delay: Duration,
    multiplier: f64,
}

impl Backoff {
    pub(crate) fn new(initial_delay: Duration, max_delay: Duration, multiplier: f64) -> Self {
        Self {
            current: initial_delay.min(max_delay),
            max_delay,
            multiplier: multiplier.max(1.0),
        }
    }

    /// Returns the delay to wait now and advances the schedule.
    pub(crate) fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = next_backoff(self.current, self.max_delay, self.multiplier);
        delay
    }

    /// Lifts the schedule to at least `floor` (still capped), e.g. for a
    /// server-provided retry hint.
    pub(crate) fn raise_to(&mut self, floor: Duration) {
        if floor > self.current {
            self.current = floor.min(self.max_delay);
        }
    }
}

/// The wait was interrupted by its cancellation token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Interrupted;

pub(crate) async fn sleep_with_cancellation(
    delay: Duration,
    cancellation: &CancellationToken,
) -> Result<(), Interrupted> {
    if cancellation.is_cancelled() {
        return Err(Interrupted);
    }

    if delay.is_zero() {
        yield_now().await;
        return Ok(());
    }

    tokio::select! {
        _ = cancellation.cancelled() => Err(Interrupted),
        _ = sleep(delay) => Ok(()),
    }
}

fn next_backoff(current: Duration, max_backoff: Duration, multiplier: f64) -> Duration {
    if current.is_zero() {
        return max_backoff.min(Duration::from_millis(1));
    }

    let scaled = (current.as_nanos() as f64 * multiplier).round();
    let next = if scaled >= u64::MAX as f64 {
        Duration::MAX
    } else {
        Duration::from_nanos(scaled as u64)
    };
    if next > max_backoff {
        max_backoff
    } else {
        next
    }
}
