//! Resilience patterns for tool invocation
//!
//! This module provides the two optional policies the client manager can
//! layer around acquire/invoke:
//! - Retry with exponential backoff for retryable failures
//! - Per-server circuit breakers that reject fast while a server is
//!   failing
//!
//! Both are policies over the pool's own timeouts, not replacements for
//! them.

mod circuit_breaker;
mod retry;

pub use circuit_breaker::{
    BreakerRegistry, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerMetrics, CircuitState,
};
pub use retry::{RetryConfig, RetryExecutor};
