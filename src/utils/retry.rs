//! Bounded exponential backoff for transient gateway errors
//!
//! Only [`GatewayError::Transient`] is ever retried; authorization and
//! validation-class rejections propagate on the first failure.

use crate::config::RetryConfig;
use crate::gateways::GatewayError;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Backoff schedule for retrying transient gateway errors
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts, first try included
    pub max_attempts: u32,
    /// Delay before the first retry
    pub base_delay: Duration,
    /// Ceiling on any single delay
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// Schedule with `max_attempts` total attempts and the given delays
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
        }
    }

    /// Delay before the retry following `attempt` (1-based), doubling each
    /// time up to the ceiling
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay
            .saturating_mul(factor)
            .min(self.max_delay)
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self::new(
            config.max_attempts,
            Duration::from_millis(config.base_delay_ms),
            Duration::from_millis(config.max_delay_ms),
        )
    }
}

/// Run a gateway call, retrying transient failures per the policy.
///
/// `action` names the call for the log line (e.g. `"place_market_order"`).
pub async fn retry_transient<T, F, Fut>(
    policy: &RetryPolicy,
    action: &str,
    mut call: F,
) -> Result<T, GatewayError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, GatewayError>>,
{
    let mut attempt = 1;
    loop {
        match call().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt < policy.max_attempts => {
                let delay = policy.delay_for(attempt);
                warn!(
                    action,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "transient gateway error, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}
