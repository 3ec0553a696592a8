//! Exponential backoff for enrichment calls

use crate::Result;
use backoff::{backoff::Backoff, ExponentialBackoff};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 200,
            max_delay_ms: 5_000,
            multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryConfig {
    pub fn new(max_attempts: u32, initial_delay_ms: u64, max_delay_ms: u64) -> Self {
        Self {
            max_attempts,
            initial_delay_ms,
            max_delay_ms,
            ..Default::default()
        }
    }

    /// Single attempt, used by tests
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_delay_ms: 0,
            max_delay_ms: 0,
            multiplier: 1.0,
            jitter: false,
        }
    }

    fn to_exponential_backoff(&self) -> ExponentialBackoff {
        let mut backoff = ExponentialBackoff {
            initial_interval: Duration::from_millis(self.initial_delay_ms),
            max_interval: Duration::from_millis(self.max_delay_ms),
            multiplier: self.multiplier,
            max_elapsed_time: None,
            ..Default::default()
        };
        if !self.jitter {
            backoff.randomization_factor = 0.0;
        }
        backoff
    }
}

/// Run `operation` until it succeeds, fails with a non-retryable error, or
/// the attempt budget is spent
pub async fn retry_with_backoff<F, Fut, T>(
    config: &RetryConfig,
    label: &str,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut backoff = config.to_exponential_backoff();
    let mut attempt = 1;

    loop {
        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    debug!("{} succeeded after {} attempts", label, attempt);
                }
                return Ok(result);
            }
            Err(error) => {
                if attempt >= config.max_attempts || !error.is_retryable() {
                    return Err(error);
                }
                let Some(delay) = backoff.next_backoff() else {
                    return Err(error);
                };
                warn!(
                    "{} failed (attempt {}/{}), retrying in {:?}: {}",
                    label, attempt, config.max_attempts, delay, error
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
