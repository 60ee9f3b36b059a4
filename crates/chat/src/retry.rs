//! Fixed-delay retry with per-attempt timeouts.
//!
//! Every embedding and LLM call goes through a [`RetryPolicy`]: one initial
//! attempt plus `max_retries` retries, `delay` apart. An attempt that
//! exceeds `timeout` counts as a failed attempt.

use inkwell_config::LlmConfig;
use inkwell_core::error::ProviderError;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub delay: Duration,
    pub timeout: Duration,
}

/// All attempts failed.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{operation} failed after {attempts} attempt(s): {last_error}")]
pub struct RetryExhausted {
    pub operation: String,
    pub attempts: u32,
    pub last_error: ProviderError,
}

impl RetryPolicy {
    pub fn from_config(config: &LlmConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            delay: config.retry_delay(),
            timeout: config.request_timeout(),
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Run `call` until it succeeds or attempts are exhausted.
    pub async fn run<T, F, Fut>(&self, operation: &str, mut call: F) -> Result<T, RetryExhausted>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let max_attempts = self.max_attempts();
        let mut attempt = 0;

        loop {
            attempt += 1;
            debug!(operation, attempt, max_attempts, "Attempting call");

            let error = match tokio::time::timeout(self.timeout, call()).await {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(e)) => e,
                Err(_) => ProviderError::Timeout(format!(
                    "{operation} timed out after {}s",
                    self.timeout.as_secs_f64()
                )),
            };

            if attempt >= max_attempts {
                warn!(operation, attempts = attempt, error = %error, "Retries exhausted");
                return Err(RetryExhausted {
                    operation: operation.to_string(),
                    attempts: attempt,
                    last_error: error,
                });
            }

            warn!(
                operation,
                attempt,
                max_attempts,
                error = %error,
                "Call failed, retrying"
            );
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&LlmConfig::default())
    }
}
