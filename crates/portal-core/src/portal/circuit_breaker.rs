use parking_lot::Mutex;
use std::time::{Duration, Instant};

/// Mutable breaker state, updated as one unit per outcome.
#[derive(Debug)]
struct CircuitBreakerInternalState {
    /// Consecutive failures observed while `Closed`.
    failure_count: u32,
    /// Deadline after which an `Open` breaker admits a trial call.
    open_until: Option<Instant>,
    state: CircuitBreakerState,
}

impl CircuitBreakerInternalState {
    fn new() -> Self {
        Self { failure_count: 0, open_until: None, state: CircuitBreakerState::Closed }
    }
}

/// Circuit breaker state machine.
///
/// - `Closed` -> `Open`: failure count reaches the threshold
/// - `Open` -> `HalfOpen`: the reset period has elapsed and a call asks to go through
/// - `HalfOpen` -> `Open`: the trial call failed; the failure count restarts at zero
/// - `HalfOpen` -> `Closed`: any other outcome; the failure count restarts at zero
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitBreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitBreakerState {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

/// Outcome of one outbound call, as the breaker sees it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallOutcome {
    /// The portal answered with a status below 500.
    Success,
    /// A 5xx answer, a transport failure, or a timeout.
    Failure,
}

impl CallOutcome {
    /// Classifies an HTTP status. Status `0` stands for a transport failure or timeout.
    #[must_use]
    pub fn from_status(status: u16) -> Self {
        if status == 0 || status >= 500 {
            Self::Failure
        } else {
            Self::Success
        }
    }
}

/// Per-host failure gate for portal calls.
///
/// A threshold of zero disables the breaker: every call is admitted and outcomes are ignored.
/// The `*_at` variants take the current instant explicitly so transitions are deterministic
/// under test.
#[derive(Debug)]
pub struct CircuitBreaker {
    inner: Mutex<CircuitBreakerInternalState>,
    threshold: u32,
    reset: Duration,
}

impl CircuitBreaker {
    #[must_use]
    pub fn new(threshold: u32, reset: Duration) -> Self {
        Self { inner: Mutex::new(CircuitBreakerInternalState::new()), threshold, reset }
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.threshold > 0
    }

    /// Determines whether a call may go out now.
    #[must_use]
    pub fn can_execute(&self) -> bool {
        self.can_execute_at(Instant::now())
    }

    #[must_use]
    pub fn can_execute_at(&self, now: Instant) -> bool {
        if !self.is_enabled() {
            return true;
        }

        let mut inner = self.inner.lock();
        match inner.state {
            CircuitBreakerState::Closed | CircuitBreakerState::HalfOpen => true,
            CircuitBreakerState::Open => match inner.open_until {
                Some(deadline) if now >= deadline => {
                    inner.state = CircuitBreakerState::HalfOpen;
                    inner.open_until = None;
                    tracing::warn!("circuit breaker transitioning to half-open state");
                    true
                }
                _ => false,
            },
        }
    }

    pub fn record(&self, outcome: CallOutcome) {
        self.record_at(outcome, Instant::now());
    }

    /// Applies one call outcome.
    pub fn record_at(&self, outcome: CallOutcome, now: Instant) {
        if !self.is_enabled() {
            return;
        }

        let mut inner = self.inner.lock();
        match (inner.state, outcome) {
            (CircuitBreakerState::HalfOpen, CallOutcome::Failure) => {
                inner.state = CircuitBreakerState::Open;
                inner.open_until = Some(now + self.reset);
                inner.failure_count = 0;
                crate::metrics::record_circuit_open();
                tracing::warn!(
                    reset_ms = self.reset.as_millis() as u64,
                    "circuit breaker reopened after failed trial call"
                );
            }
            (CircuitBreakerState::HalfOpen, CallOutcome::Success) => {
                inner.state = CircuitBreakerState::Closed;
                inner.failure_count = 0;
                tracing::info!("circuit breaker closed after successful trial call");
            }
            (CircuitBreakerState::Closed, CallOutcome::Failure) => {
                inner.failure_count += 1;
                if inner.failure_count >= self.threshold {
                    inner.state = CircuitBreakerState::Open;
                    inner.open_until = Some(now + self.reset);
                    crate::metrics::record_circuit_open();
                    tracing::warn!(
                        threshold = self.threshold,
                        "circuit breaker opened after reaching failure threshold"
                    );
                }
            }
            (CircuitBreakerState::Closed, CallOutcome::Success) => {
                inner.failure_count = 0;
            }
            // Calls admitted before the breaker opened may still report back.
            (CircuitBreakerState::Open, _) => {}
        }
    }

    #[must_use]
    pub fn get_state(&self) -> CircuitBreakerState {
        self.inner.lock().state
    }

    #[must_use]
    pub fn get_failure_count(&self) -> u32 {
        self.inner.lock().failure_count
    }
}
