//! Retry logic with exponential backoff for remote calls

use std::future::Future;
use std::time::Duration;

use backoff::{ExponentialBackoff, ExponentialBackoffBuilder, backoff::Backoff};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Retry policy for throttled calls
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first one
    #[serde(default = "default_max_attempts")]
    pub max_attempts: usize,

    /// Initial backoff duration in milliseconds
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    /// Maximum backoff duration in milliseconds
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    /// Backoff multiplier
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Jitter applied to each delay (0.0 - 1.0)
    #[serde(default = "default_randomization_factor")]
    pub randomization_factor: f64,
}

const fn default_max_attempts() -> usize {
    5
}

const fn default_initial_backoff_ms() -> u64 {
    500
}

const fn default_max_backoff_ms() -> u64 {
    8_000
}

const fn default_backoff_multiplier() -> f64 {
    2.0
}

const fn default_randomization_factor() -> f64 {
    0.5
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            randomization_factor: default_randomization_factor(),
        }
    }
}

impl RetryConfig {
    /// Policy with near-zero delays, for tests
    #[must_use]
    pub fn immediate(max_attempts: usize) -> Self {
        Self {
            max_attempts,
            initial_backoff_ms: 1,
            max_backoff_ms: 1,
            backoff_multiplier: 1.0,
            randomization_factor: 0.0,
        }
    }
}

/// Failure of a retried operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryError<E> {
    /// Error from the final attempt
    pub last_error: E,
    /// Attempts made
    pub attempts: usize,
}

/// Retry a fallible async operation with exponential backoff.
///
/// `should_retry` decides per error whether another attempt is made. The
/// attempt budget bounds the loop; the last error is returned on exhaustion.
pub async fn retry_with_backoff<F, Fut, T, E, R>(
    config: &RetryConfig,
    operation_name: &str,
    should_retry: R,
    mut f: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    R: Fn(&E) -> bool,
    E: std::fmt::Display,
{
    let mut backoff = create_backoff(config);
    let max_attempts = config.max_attempts.max(1);
    let mut attempts = 0;

    loop {
        attempts += 1;

        match f().await {
            Ok(result) => {
                if attempts > 1 {
                    debug!(
                        operation = operation_name,
                        attempts = attempts,
                        "Operation succeeded after retry"
                    );
                }
                return Ok(result);
            }
            Err(err) => {
                if !should_retry(&err) {
                    debug!(
                        operation = operation_name,
                        error = %err,
                        "Error is not retryable, failing immediately"
                    );
                    return Err(RetryError {
                        last_error: err,
                        attempts,
                    });
                }

                if attempts >= max_attempts {
                    warn!(
                        operation = operation_name,
                        attempts = attempts,
                        error = %err,
                        "Operation failed after maximum retries"
                    );
                    return Err(RetryError {
                        last_error: err,
                        attempts,
                    });
                }

                let Some(duration) = backoff.next_backoff() else {
                    return Err(RetryError {
                        last_error: err,
                        attempts,
                    });
                };
                warn!(
                    operation = operation_name,
                    attempts = attempts,
                    error = %err,
                    retry_in_ms = duration.as_millis(),
                    "Operation throttled, retrying"
                );
                tokio::time::sleep(duration).await;
            }
        }
    }
}

fn create_backoff(config: &RetryConfig) -> ExponentialBackoff {
    ExponentialBackoffBuilder::new()
        .with_initial_interval(Duration::from_millis(config.initial_backoff_ms))
        .with_max_interval(Duration::from_millis(config.max_backoff_ms))
        .with_multiplier(config.backoff_multiplier)
        .with_randomization_factor(config.randomization_factor)
        .with_max_elapsed_time(None) // bounded by max_attempts instead
        .build()
}
