//! Configuration for the pool and client manager
//!
//! Config structs are plain serde-deserializable data with sensible
//! defaults. Every field can also be overridden from the environment
//! (`TOOL_CLIENT_*` variables), which is how deployments tune pools
//! without a config file.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::resilience::{CircuitBreakerConfig, RetryConfig};

/// Pool sizing and timing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Maximum live connections per server
    pub max_connections: usize,

    /// Connections the idle sweep never drops below, per server
    pub min_connections: usize,

    /// Idle time in milliseconds before a connection is swept
    pub idle_timeout_ms: u64,

    /// How long an acquire waits in the queue before failing
    pub acquire_timeout_ms: u64,

    /// Interval between idle sweeps
    pub sweep_interval_ms: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 5,
            min_connections: 0,
            idle_timeout_ms: 60_000,
            acquire_timeout_ms: 30_000,
            sweep_interval_ms: 10_000,
        }
    }
}

impl PoolConfig {
    /// Defaults overlaid with any `TOOL_CLIENT_POOL_*` environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();
        overlay(&mut config.max_connections, "TOOL_CLIENT_POOL_MAX_CONNECTIONS");
        overlay(&mut config.min_connections, "TOOL_CLIENT_POOL_MIN_CONNECTIONS");
        overlay(&mut config.idle_timeout_ms, "TOOL_CLIENT_POOL_IDLE_TIMEOUT_MS");
        overlay(
            &mut config.acquire_timeout_ms,
            "TOOL_CLIENT_POOL_ACQUIRE_TIMEOUT_MS",
        );
        overlay(
            &mut config.sweep_interval_ms,
            "TOOL_CLIENT_POOL_SWEEP_INTERVAL_MS",
        );
        config
    }

    /// Idle timeout as a `Duration`
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    /// Acquire timeout as a `Duration`
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }

    /// Sweep interval as a `Duration`
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }
}

/// Client manager configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// Default per-call deadline in milliseconds
    pub default_timeout_ms: u64,

    /// Wrap calls with per-server circuit breakers
    pub enable_circuit_breaker: bool,

    /// Wrap calls with bounded exponential-backoff retry
    pub enable_retry: bool,

    /// Retry policy, used when `enable_retry` is set
    pub retry: RetryConfig,

    /// Breaker policy, used when `enable_circuit_breaker` is set
    pub circuit_breaker: CircuitBreakerConfig,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: 30_000,
            enable_circuit_breaker: false,
            enable_retry: false,
            retry: RetryConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
        }
    }
}

impl ManagerConfig {
    /// Defaults overlaid with any `TOOL_CLIENT_MANAGER_*` environment
    /// variables
    pub fn from_env() -> Self {
        let mut config = Self::default();
        overlay(
            &mut config.default_timeout_ms,
            "TOOL_CLIENT_MANAGER_DEFAULT_TIMEOUT_MS",
        );
        overlay(
            &mut config.enable_circuit_breaker,
            "TOOL_CLIENT_MANAGER_ENABLE_CIRCUIT_BREAKER",
        );
        overlay(&mut config.enable_retry, "TOOL_CLIENT_MANAGER_ENABLE_RETRY");
        config
    }

    /// Per-call deadline as a `Duration`; zero disables the deadline
    pub fn default_timeout(&self) -> Option<Duration> {
        (self.default_timeout_ms > 0).then(|| Duration::from_millis(self.default_timeout_ms))
    }
}

/// Overwrite `target` when the environment variable parses cleanly
fn overlay<T: FromStr>(target: &mut T, key: &str) {
    if let Ok(raw) = env::var(key) {
        match raw.parse::<T>() {
            Ok(value) => *target = value,
            Err(_) => log::warn!("ignoring unparseable value for {}: {}", key, raw),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_defaults() {
        let config = PoolConfig::default();
        assert_eq!(config.max_connections, 5);
        assert_eq!(config.idle_timeout(), Duration::from_secs(60));
    }

    #[test]
    fn manager_zero_timeout_means_no_deadline() {
        let config = ManagerConfig {
            default_timeout_ms: 0,
            ..ManagerConfig::default()
        };
        assert_eq!(config.default_timeout(), None);
        assert_eq!(
            ManagerConfig::default().default_timeout(),
            Some(Duration::from_secs(30))
        );
    }

    #[test]
    fn env_overlay_ignores_garbage() {
        std::env::set_var("TOOL_CLIENT_POOL_MAX_CONNECTIONS", "not-a-number");
        let config = PoolConfig::from_env();
        assert_eq!(config.max_connections, 5);
        std::env::remove_var("TOOL_CLIENT_POOL_MAX_CONNECTIONS");
    }

    #[test]
    fn config_round_trips_through_serde() {
        let config: PoolConfig = serde_json::from_str(r#"{"max_connections": 2}"#).unwrap();
        assert_eq!(config.max_connections, 2);
        assert_eq!(config.min_connections, 0);
    }
}
