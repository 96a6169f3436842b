use crate::rpc::options::RpcClientOptions;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Represents the current state of the RPC circuit breaker.
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
    pub times_opened: u64,
    pub opened_at: Option<Instant>,
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    consecutive_failures: usize,
    times_opened: u64,
    opened_at: Option<Instant>,
    probe_in_flight: bool,
}

/// Error returned when the breaker refuses to allow an RPC attempt.
#[derive(Debug)]
pub enum CircuitBreakerError {
    CircuitOpen,
}

impl std::fmt::Display for CircuitBreakerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitBreakerError::CircuitOpen => write!(f, "RPC circuit breaker is open"),
        }
    }
}

impl std::error::Error for CircuitBreakerError {}

/// Closed/Open/Half-Open breaker shared by every request of one gateway.
///
/// While Half-Open a single probe request is let through; its result decides
/// whether the breaker closes or reopens.
#[derive(Debug, Clone)]
pub struct RpcCircuitBreaker {
    state: Arc<Mutex<BreakerState>>,
    failure_threshold: usize,
    cooldown: Duration,
}

impl Default for RpcCircuitBreaker {
    fn default() -> Self {
        Self::new(5, Duration::from_secs(30))
    }
}

impl RpcCircuitBreaker {
    pub fn new(failure_threshold: usize, cooldown: Duration) -> Self {
        let cooldown = if cooldown.is_zero() {
            Duration::from_secs(1)
        } else {
            cooldown
        };

        Self {
            state: Arc::new(Mutex::new(BreakerState {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                times_opened: 0,
                opened_at: None,
                probe_in_flight: false,
            })),
            failure_threshold: failure_threshold.max(1),
            cooldown,
        }
    }

    pub fn from_options(options: &RpcClientOptions) -> Self {
        Self::new(options.breaker_threshold, options.breaker_cooldown)
    }

    pub fn snapshot(&self) -> CircuitBreakerSnapshot {
        let guard = self.state.lock().expect("circuit breaker mutex poisoned");
        CircuitBreakerSnapshot {
            state: guard.state,
            consecutive_failures: guard.consecutive_failures,
            times_opened: guard.times_opened,
            opened_at: guard.opened_at,
        }
    }

    /// Checks whether a new RPC attempt is allowed. Moves an expired Open
    /// breaker to Half-Open and reserves its probe slot.
    pub fn before_request(&self) -> Result<CircuitState, CircuitBreakerError> {
        let mut state = self.state.lock().expect("circuit breaker mutex poisoned");

        if state.state == CircuitState::Open {
            let expired = state
                .opened_at
                .map(|opened_at| opened_at.elapsed() >= self.cooldown)
                .unwrap_or(false);
            if !expired {
                return Err(CircuitBreakerError::CircuitOpen);
            }
            self.transition(&mut state, CircuitState::HalfOpen);
            state.probe_in_flight = false;
        }

        if state.state == CircuitState::HalfOpen {
            if state.probe_in_flight {
                return Err(CircuitBreakerError::CircuitOpen);
            }
            state.probe_in_flight = true;
        }

        Ok(state.state)
    }

    pub fn record_success(&self) {
        let mut state = self.state.lock().expect("circuit breaker mutex poisoned");
        state.probe_in_flight = false;
        state.consecutive_failures = 0;

        if state.state == CircuitState::HalfOpen {
            state.opened_at = None;
            self.transition(&mut state, CircuitState::Closed);
        }
    }

    /// Records a failed RPC call, opening the circuit once the threshold is
    /// reached or immediately when the Half-Open probe fails.
    pub fn record_failure(&self) {
        let mut state = self.state.lock().expect("circuit breaker mutex poisoned");
        state.probe_in_flight = false;
        state.consecutive_failures = state.consecutive_failures.saturating_add(1);

        let should_open = match state.state {
            CircuitState::HalfOpen => true,
            CircuitState::Closed => state.consecutive_failures >= self.failure_threshold,
            CircuitState::Open => false,
        };

        if should_open {
            state.opened_at = Some(Instant::now());
            state.times_opened = state.times_opened.saturating_add(1);
            self.transition(&mut state, CircuitState::Open);
        }
    }

    fn transition(&self, state: &mut BreakerState, next: CircuitState) {
        if state.state != next {
            tracing::warn!(
                previous = ?state.state,
                next = ?next,
                consecutive_failures = state.consecutive_failures,
                "rpc circuit breaker state changed"
            );
            state.state = next;
        }
    }
}
