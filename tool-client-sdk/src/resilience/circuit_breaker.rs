//! Circuit breaker guarding calls to a failing tool server
//!
//! State machine: Closed allows everything and counts consecutive
//! failures; once the threshold is crossed the breaker opens and rejects
//! fast. After the reset timeout the next check moves it to HalfOpen,
//! which admits test requests until enough successes close it again or a
//! single failure reopens it.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::error::{ClientError, Result};

/// Circuit breaker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before the circuit opens
    pub failure_threshold: usize,

    /// Cool-down in milliseconds before half-open test requests
    pub reset_timeout_ms: u64,

    /// Successful test requests needed to close the circuit again
    pub success_threshold: usize,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout_ms: 30_000,
            success_threshold: 2,
        }
    }
}

impl CircuitBreakerConfig {
    fn reset_timeout(&self) -> Duration {
        Duration::from_millis(self.reset_timeout_ms)
    }
}

/// Circuit state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Allowing requests
    Closed,
    /// Rejecting requests until the reset timeout elapses
    Open,
    /// Admitting test requests
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "Closed"),
            Self::Open => write!(f, "Open"),
            Self::HalfOpen => write!(f, "HalfOpen"),
        }
    }
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    opened_at: Option<Instant>,
    consecutive_failures: usize,
    half_open_successes: usize,
    total_failures: u64,
    total_successes: u64,
}

/// A thread-safe circuit breaker
pub struct CircuitBreaker {
    inner: Mutex<BreakerInner>,
    config: CircuitBreakerConfig,
}

impl CircuitBreaker {
    /// Create a closed breaker with the specified configuration
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                opened_at: None,
                consecutive_failures: 0,
                half_open_successes: 0,
                total_failures: 0,
                total_successes: 0,
            }),
            config,
        }
    }

    /// Check whether a request may proceed.
    ///
    /// An open breaker whose reset timeout has elapsed transitions to
    /// half-open and admits the request as a test.
    pub fn check(&self) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        match inner.state {
            CircuitState::Closed | CircuitState::HalfOpen => Ok(()),
            CircuitState::Open => {
                let elapsed = inner.opened_at.map(|t| t.elapsed()).unwrap_or_default();
                if elapsed >= self.config.reset_timeout() {
                    log::info!("circuit breaker transitioning to HalfOpen");
                    inner.state = CircuitState::HalfOpen;
                    inner.half_open_successes = 0;
                    Ok(())
                } else {
                    let remaining = self.config.reset_timeout() - elapsed;
                    Err(ClientError::circuit_open(format!(
                        "rejecting requests for {} more seconds",
                        remaining.as_secs().max(1)
                    )))
                }
            }
        }
    }

    /// Record a successful request
    pub fn record_success(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.total_successes += 1;
        match inner.state {
            CircuitState::Closed => inner.consecutive_failures = 0,
            CircuitState::HalfOpen => {
                inner.half_open_successes += 1;
                if inner.half_open_successes >= self.config.success_threshold {
                    log::info!("circuit breaker transitioning to Closed");
                    inner.state = CircuitState::Closed;
                    inner.opened_at = None;
                    inner.consecutive_failures = 0;
                    inner.half_open_successes = 0;
                }
            }
            CircuitState::Open => {}
        }
    }

    /// Record a failed request
    pub fn record_failure(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.total_failures += 1;
        match inner.state {
            CircuitState::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.config.failure_threshold {
                    Self::open(&mut inner);
                }
            }
            // Any failure during the probe phase reopens the circuit.
            CircuitState::HalfOpen => Self::open(&mut inner),
            CircuitState::Open => {}
        }
    }

    /// Force the breaker back to closed
    pub fn reset(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.state = CircuitState::Closed;
        inner.opened_at = None;
        inner.consecutive_failures = 0;
        inner.half_open_successes = 0;
    }

    /// Current circuit state
    pub fn state(&self) -> CircuitState {
        self.inner.lock().unwrap().state
    }

    /// Snapshot of counters and state
    pub fn metrics(&self) -> CircuitBreakerMetrics {
        let inner = self.inner.lock().unwrap();
        CircuitBreakerMetrics {
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            total_failures: inner.total_failures,
            total_successes: inner.total_successes,
            open_for: inner.opened_at.map(|t| t.elapsed()),
        }
    }

    fn open(inner: &mut BreakerInner) {
        log::warn!("circuit breaker transitioning to Open");
        inner.state = CircuitState::Open;
        inner.opened_at = Some(Instant::now());
        inner.half_open_successes = 0;
    }
}

/// Point-in-time view of a breaker
#[derive(Debug)]
pub struct CircuitBreakerMetrics {
    pub state: CircuitState,
    pub consecutive_failures: usize,
    pub total_failures: u64,
    pub total_successes: u64,
    pub open_for: Option<Duration>,
}

/// One circuit breaker per server id, created lazily
pub struct BreakerRegistry {
    breakers: Mutex<HashMap<String, Arc<CircuitBreaker>>>,
    config: CircuitBreakerConfig,
}

impl BreakerRegistry {
    /// Create an empty registry; every breaker it hands out uses `config`
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            breakers: Mutex::new(HashMap::new()),
            config,
        }
    }

    /// The breaker for a server, creating it on first use
    pub fn for_server(&self, server_id: &str) -> Arc<CircuitBreaker> {
        let mut breakers = self.breakers.lock().unwrap();
        Arc::clone(
            breakers
                .entry(server_id.to_string())
                .or_insert_with(|| Arc::new(CircuitBreaker::new(self.config.clone()))),
        )
    }

    /// Drop the breaker for a server (used on unregister)
    pub fn remove(&self, server_id: &str) {
        self.breakers.lock().unwrap().remove(server_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_closed() {
        let cb = CircuitBreaker::new(CircuitBreakerConfig::default());
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.check().is_ok());
    }

    #[test]
    fn opens_after_consecutive_failures() {
        let cb = CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: 3,
            ..CircuitBreakerConfig::default()
        });

        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Closed);

        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(matches!(cb.check(), Err(ClientError::CircuitOpen(_))));
    }

    #[test]
    fn success_resets_the_failure_streak() {
        let cb = CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: 2,
            ..CircuitBreakerConfig::default()
        });
        cb.record_failure();
        cb.record_success();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn half_opens_after_reset_timeout_then_closes() {
        let cb = CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: 1,
            reset_timeout_ms: 20,
            success_threshold: 2,
        });

        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(cb.check().is_ok());
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        cb.record_success();
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        cb.record_success();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn failure_in_half_open_reopens() {
        let cb = CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: 1,
            reset_timeout_ms: 10,
            success_threshold: 1,
        });
        cb.record_failure();
        tokio::time::sleep(Duration::from_millis(25)).await;
        assert!(cb.check().is_ok());
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[test]
    fn reset_closes_the_circuit() {
        let cb = CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: 1,
            ..CircuitBreakerConfig::default()
        });
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        cb.reset();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.metrics().consecutive_failures, 0);
    }

    #[test]
    fn registry_reuses_breakers_per_server() {
        let registry = BreakerRegistry::new(CircuitBreakerConfig::default());
        let a1 = registry.for_server("a");
        let a2 = registry.for_server("a");
        let b = registry.for_server("b");
        assert!(Arc::ptr_eq(&a1, &a2));
        assert!(!Arc::ptr_eq(&a1, &b));
    }
}
