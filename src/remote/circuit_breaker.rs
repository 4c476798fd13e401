use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Represents the current state of the remote circuit breaker.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// Snapshot of breaker internals for observability.
#[derive(Debug, Copy, Clone)]
pub struct CircuitBreakerSnapshot {
    pub state: CircuitState,
    pub consecutive_failures: usize,
    pub last_failure_at: Option<Instant>,
    pub half_open_trials: usize,
}

#[derive(Debug)]
struct FailureCounter {
    consecutive_failures: usize,
    last_failure_at: Option<Instant>,
    half_open_trials: usize,
}

impl FailureCounter {
    fn reset(&mut self) {
        self.consecutive_failures = 0;
        self.half_open_trials = 0;
    }
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    counter: FailureCounter,
}

/// Closed/Open/Half-Open breaker guarding one remote call path.
///
/// All reads and writes go through a single mutex, so concurrent callers never
/// observe a torn state. Share it behind an `Arc`.
#[derive(Debug)]
pub struct CircuitBreaker {
    state: Mutex<BreakerState>,
    max_failures: usize,
    reset_timeout: Duration,
    half_open_max_tries: usize,
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(5, Duration::from_secs(60), 1)
    }
}

impl CircuitBreaker {
    pub fn new(max_failures: usize, reset_timeout: Duration, half_open_max_tries: usize) -> Self {
        let reset_timeout = if reset_timeout.is_zero() {
            Duration::from_millis(1)
        } else {
            reset_timeout
        };

        Self {
            state: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                counter: FailureCounter {
                    consecutive_failures: 0,
                    last_failure_at: None,
                    half_open_trials: 0,
                },
            }),
            max_failures: max_failures.max(1),
            reset_timeout,
            half_open_max_tries: half_open_max_tries.max(1),
        }
    }

    pub fn snapshot(&self) -> CircuitBreakerSnapshot {
        let guard = self.state.lock().expect("circuit breaker mutex poisoned");
        CircuitBreakerSnapshot {
            state: guard.state,
            consecutive_failures: guard.counter.consecutive_failures,
            last_failure_at: guard.counter.last_failure_at,
            half_open_trials: guard.counter.half_open_trials,
        }
    }

    pub fn state(&self) -> CircuitState {
        self.snapshot().state
    }

    /// Decides whether a call may go out. In Half-Open each `true` consumes a
    /// trial slot until the circuit resolves.
    pub fn allow(&self) -> bool {
        let mut state = self.state.lock().expect("circuit breaker mutex poisoned");

        match state.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let cooled_down = state
                    .counter
                    .last_failure_at
                    .map(|at| at.elapsed() > self.reset_timeout)
                    .unwrap_or(true);
                if !cooled_down {
                    return false;
                }
                state.counter.reset();
                self.transition(&mut state, CircuitState::HalfOpen);
                state.counter.half_open_trials = 1;
                true
            }
            CircuitState::HalfOpen => {
                if state.counter.half_open_trials >= self.half_open_max_tries {
                    return false;
                }
                state.counter.half_open_trials += 1;
                true
            }
        }
    }

    /// Records a successful call; a Half-Open trial success closes the circuit.
    pub fn record_success(&self) {
        let mut state = self.state.lock().expect("circuit breaker mutex poisoned");

        match state.state {
            CircuitState::Closed => state.counter.reset(),
            CircuitState::HalfOpen => {
                state.counter.reset();
                self.transition(&mut state, CircuitState::Closed);
            }
            // A straggler that was let through before the circuit opened does
            // not prove recovery; only a Half-Open trial may close it.
            CircuitState::Open => {}
        }
    }

    /// Records a failed call, potentially opening the circuit.
    pub fn record_failure(&self) {
        let mut state = self.state.lock().expect("circuit breaker mutex poisoned");
        state.counter.consecutive_failures = state.counter.consecutive_failures.saturating_add(1);
        state.counter.last_failure_at = Some(Instant::now());

        match state.state {
            CircuitState::HalfOpen => {
                state.counter.half_open_trials = 0;
                self.transition(&mut state, CircuitState::Open);
            }
            CircuitState::Closed if state.counter.consecutive_failures >= self.max_failures => {
                self.transition(&mut state, CircuitState::Open);
            }
            _ => {}
        }
    }

    /// Gives back a Half-Open trial slot for a call that was cancelled before
    /// it produced an outcome.
    pub fn abandon(&self) {
        let mut state = self.state.lock().expect("circuit breaker mutex poisoned");
        if state.state == CircuitState::HalfOpen && state.counter.half_open_trials > 0 {
            state.counter.half_open_trials -= 1;
        }
    }

    fn transition(&self, state: &mut BreakerState, next: CircuitState) {
        if state.state != next {
            tracing::warn!(
                previous = ?state.state,
                next = ?next,
                consecutive_failures = state.counter.consecutive_failures,
                "remote circuit breaker state changed"
            );
            state.state = next;
        }
    }
}
