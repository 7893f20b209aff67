//! Retry with exponential backoff for retryable client errors

use std::future::Future;
use std::time::Duration;

use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Retry policy configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (0 means no retries)
    pub max_retries: u32,

    /// Initial backoff interval in milliseconds
    pub initial_interval_ms: u64,

    /// Maximum backoff interval in milliseconds
    pub max_interval_ms: u64,

    /// Multiplier applied between attempts
    pub multiplier: f64,

    /// Randomization factor applied to each interval
    pub randomization_factor: f64,

    /// Cap on total time spent retrying, in milliseconds
    pub max_elapsed_time_ms: Option<u64>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_interval_ms: 100,
            max_interval_ms: 10_000,
            multiplier: 2.0,
            randomization_factor: 0.2,
            max_elapsed_time_ms: Some(30_000),
        }
    }
}

/// Executes fallible operations with bounded exponential backoff.
///
/// Only errors whose [`crate::error::ClientError::is_retryable`] is true are retried;
/// everything else propagates after the first attempt.
#[derive(Debug, Clone)]
pub struct RetryExecutor {
    config: RetryConfig,
}

impl RetryExecutor {
    /// Create a new retry executor with the specified configuration
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Get the current retry configuration
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Run `operation`, retrying retryable failures up to the configured
    /// attempt and elapsed-time bounds. Returns the last error when the
    /// budget is exhausted.
    pub async fn execute<F, Fut, T>(&self, operation: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut backoff = ExponentialBackoff {
            initial_interval: Duration::from_millis(self.config.initial_interval_ms),
            max_interval: Duration::from_millis(self.config.max_interval_ms),
            multiplier: self.config.multiplier,
            randomization_factor: self.config.randomization_factor,
            max_elapsed_time: self.config.max_elapsed_time_ms.map(Duration::from_millis),
            ..ExponentialBackoff::default()
        };

        let mut attempts = 0u32;
        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && attempts < self.config.max_retries => {
                    match backoff.next_backoff() {
                        Some(delay) => {
                            attempts += 1;
                            log::warn!(
                                "retryable failure, attempt {}/{}, backing off {:?}: {}",
                                attempts,
                                self.config.max_retries,
                                delay,
                                err
                            );
                            tokio::time::sleep(delay).await;
                        }
                        // Elapsed-time budget exhausted.
                        None => return Err(err),
                    }
                }
                Err(err) => return Err(err),
            }
        }
    }
}
