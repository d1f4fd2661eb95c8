use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::error::{DrouterError, DrouterResult};

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitBreakerState {
    /// Circuit is closed, requests flow normally
    Closed,
    /// Circuit is open, requests are blocked
    Open,
    /// Circuit is half-open, one probe request is admitted
    HalfOpen,
}

impl std::fmt::Display for CircuitBreakerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitBreakerState::Closed => write!(f, "CLOSED"),
            CircuitBreakerState::Open => write!(f, "OPEN"),
            CircuitBreakerState::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

/// Configuration for circuit breakers
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before the circuit opens
    pub failure_threshold: u64,
    /// Cooldown before an open circuit admits a probe
    pub cooldown: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown: Duration::from_secs(60),
        }
    }
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitBreakerState,
    consecutive_failures: u64,
    opened_at: Option<Instant>,
    probe_in_flight: bool,
}

/// Circuit breaker shielding one backend URL.
///
/// Closed counts consecutive failures and opens at the threshold; an open
/// circuit rejects calls until the cooldown passes, then admits exactly one
/// probe. A successful probe closes the circuit, a failed one reopens it.
/// State transitions are linearizable per backend; nothing is promised
/// across backends.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(name: String, config: CircuitBreakerConfig) -> Self {
        Self {
            name,
            config,
            inner: Mutex::new(BreakerInner {
                state: CircuitBreakerState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                probe_in_flight: false,
            }),
        }
    }

    pub fn with_defaults(name: String) -> Self {
        Self::new(name, CircuitBreakerConfig::default())
    }

    /// Ask the breaker whether a call may proceed. `Ok(true)` marks the
    /// admitted call as the half-open probe; the caller must report the
    /// outcome through [`record_success`](Self::record_success) or
    /// [`record_failure`](Self::record_failure).
    pub fn try_acquire(&self) -> DrouterResult<bool> {
        let mut inner = self.inner.lock().expect("breaker lock poisoned");
        match inner.state {
            CircuitBreakerState::Closed => Ok(false),
            CircuitBreakerState::Open => {
                let elapsed = inner
                    .opened_at
                    .map(|at| at.elapsed())
                    .unwrap_or(Duration::ZERO);
                if elapsed >= self.config.cooldown {
                    inner.state = CircuitBreakerState::HalfOpen;
                    inner.probe_in_flight = true;
                    info!(
                        circuit_breaker = %self.name,
                        "circuit breaker transitioned to HALF_OPEN"
                    );
                    Ok(true)
                } else {
                    Err(DrouterError::circuit_open(&self.name))
                }
            }
            CircuitBreakerState::HalfOpen => {
                if inner.probe_in_flight {
                    Err(DrouterError::circuit_open(&self.name))
                } else {
                    inner.probe_in_flight = true;
                    Ok(true)
                }
            }
        }
    }

    /// Record a successful call.
    pub fn record_success(&self) {
        let mut inner = self.inner.lock().expect("breaker lock poisoned");
        match inner.state {
            CircuitBreakerState::HalfOpen => {
                inner.state = CircuitBreakerState::Closed;
                inner.consecutive_failures = 0;
                inner.opened_at = None;
                inner.probe_in_flight = false;
                info!(
                    circuit_breaker = %self.name,
                    "circuit breaker closed after successful probe"
                );
            }
            CircuitBreakerState::Closed => {
                inner.consecutive_failures = 0;
            }
            CircuitBreakerState::Open => {}
        }
    }

    /// Record a failed call, returning the resulting state.
    pub fn record_failure(&self) -> CircuitBreakerState {
        let mut inner = self.inner.lock().expect("breaker lock poisoned");
        match inner.state {
            CircuitBreakerState::Closed => {
                inner.consecutive_failures += 1;
                debug!(
                    circuit_breaker = %self.name,
                    failures = inner.consecutive_failures,
                    threshold = self.config.failure_threshold,
                    "circuit breaker recorded failure"
                );
                if inner.consecutive_failures >= self.config.failure_threshold {
                    inner.state = CircuitBreakerState::Open;
                    inner.opened_at = Some(Instant::now());
                    warn!(
                        circuit_breaker = %self.name,
                        failures = inner.consecutive_failures,
                        "circuit breaker opened due to failures"
                    );
                    metrics::counter!("drouter_breaker_opened_total").increment(1);
                }
            }
            CircuitBreakerState::HalfOpen => {
                inner.state = CircuitBreakerState::Open;
                inner.opened_at = Some(Instant::now());
                inner.probe_in_flight = false;
                warn!(
                    circuit_breaker = %self.name,
                    "circuit breaker reopened after failed probe"
                );
            }
            CircuitBreakerState::Open => {}
        }
        inner.state
    }

    pub fn state(&self) -> CircuitBreakerState {
        self.inner.lock().expect("breaker lock poisoned").state
    }
}

/// Registry mapping backend URLs to their breakers.
///
/// Breakers are created lazily on the first proxied call to a backend and
/// evicted when the forwarding pipeline decides the backend is unhealthy,
/// so a backend that gets re-registered starts from a clean state.
#[derive(Debug, Default)]
pub struct BreakerRegistry {
    config: CircuitBreakerConfig,
    breakers: Mutex<HashMap<String, Arc<CircuitBreaker>>>,
}

impl BreakerRegistry {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            breakers: Mutex::new(HashMap::new()),
        }
    }

    pub fn get_or_create(&self, target: &str) -> Arc<CircuitBreaker> {
        let mut breakers = self.breakers.lock().expect("breaker registry poisoned");
        Arc::clone(breakers.entry(target.to_string()).or_insert_with(|| {
            Arc::new(CircuitBreaker::new(
                target.to_string(),
                self.config.clone(),
            ))
        }))
    }

    pub fn evict(&self, target: &str) {
        let removed = self
            .breakers
            .lock()
            .expect("breaker registry poisoned")
            .remove(target);
        if removed.is_some() {
            debug!(target, "circuit breaker evicted from registry");
        }
    }

    pub fn contains(&self, target: &str) -> bool {
        self.breakers
            .lock()
            .expect("breaker registry poisoned")
            .contains_key(target)
    }

    pub fn len(&self) -> usize {
        self.breakers
            .lock()
            .expect("breaker registry poisoned")
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
