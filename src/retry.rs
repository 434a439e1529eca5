use crate::BookingConfig;
use std::fmt::Display;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{warn, error, info};

/// Retry configuration
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryConfig {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Default::default()
        }
    }

    pub fn with_delays(max_attempts: u32, initial_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            initial_delay,
            max_delay,
            ..Default::default()
        }
    }

    /// Backoff for reservation round trips, from the `booking.retry.*` keys.
    pub fn reservation(config: &BookingConfig) -> Self {
        Self::with_delays(
            config.retry_max_attempts.max(1),
            Duration::from_millis(config.retry_initial_delay_ms),
            Duration::from_millis(config.retry_max_delay_ms),
        )
    }
}

/// Retry a future with exponential backoff while `should_retry` accepts the
/// error. The last error is returned unchanged.
pub async fn retry_with_backoff<F, Fut, T, E, P>(
    config: &RetryConfig,
    operation_name: &str,
    mut operation: F,
    should_retry: P,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: Display,
    P: Fn(&E) -> bool,
{
    let mut attempt = 1;
    let mut delay = config.initial_delay;

    loop {
        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    info!("Operation '{}' succeeded on attempt {}", operation_name, attempt);
                }
                return Ok(result);
            }
            Err(e) => {
                if !should_retry(&e) {
                    return Err(e);
                }

                if attempt >= config.max_attempts {
                    error!(
                        "Operation '{}' failed after {} attempts. Final error: {}",
                        operation_name, config.max_attempts, e
                    );
                    return Err(e);
                }

                let pause = jittered(config, delay);
                warn!(
                    "Operation '{}' failed on attempt {} ({}). Retrying in {:?}...",
                    operation_name, attempt, e, pause
                );

                sleep(pause).await;

                // Calculate next delay with exponential backoff
                delay = Duration::from_millis(
                    ((delay.as_millis() as f64) * config.backoff_multiplier) as u64
                ).min(config.max_delay);

                attempt += 1;
            }
        }
    }
}

/// Jitter is drawn fresh for each pause and never carried into the next
/// base delay; the result stays within `max_delay`.
fn jittered(config: &RetryConfig, delay: Duration) -> Duration {
    if !config.jitter {
        return delay.min(config.max_delay);
    }
    let jitter_ms = (delay.as_millis() as f64 * 0.1 * rand::random::<f64>()) as u64;
    (delay + Duration::from_millis(jitter_ms)).min(config.max_delay)
}
