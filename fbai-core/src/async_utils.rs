//! Async utilities and patterns
//!
//! Provides retry delay policies and timeouts for remote calls

use crate::error::{ErrorContext, FbaiError, FbaiResult};
use serde::{Deserialize, Serialize};
use tokio::time::{timeout, Duration};
use tracing::debug;

/// How the delay grows between attempts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "kind")]
pub enum BackoffStrategy {
    /// `initial * attempt`
    Linear,
    /// `initial * multiplier^(attempt - 1)`
    Exponential { multiplier: f64 },
}

/// Retry configuration
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first one
    pub max_attempts: usize,
    /// Delay after the first failed attempt in milliseconds
    pub initial_delay_ms: u64,
    /// Maximum delay between retries in milliseconds
    pub max_delay_ms: u64,
    /// Growth policy
    pub strategy: BackoffStrategy,
    /// Whether to add jitter to delays
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 1000,
            max_delay_ms: 8000,
            strategy: BackoffStrategy::Linear,
            jitter: false,
        }
    }
}

impl RetryConfig {
    /// Delay to wait after `attempt` (1-based) failed, before the next one
    pub fn delay_for_attempt(&self, attempt: usize) -> Duration {
        let attempt = attempt.max(1);
        let base = match &self.strategy {
            BackoffStrategy::Linear => self.initial_delay_ms.saturating_mul(attempt as u64),
            BackoffStrategy::Exponential { multiplier } => {
                let factor = multiplier.powi((attempt - 1) as i32);
                ((self.initial_delay_ms as f64) * factor) as u64
            }
        };
        let capped = base.min(self.max_delay_ms);

        let actual = if self.jitter {
            let jitter_factor = 0.1;
            let jitter = (fastrand::f64() - 0.5) * 2.0 * jitter_factor;
            ((capped as f64) * (1.0 + jitter)) as u64
        } else {
            capped
        };

        debug!(attempt = attempt, delay_ms = actual, "Computed retry delay");
        Duration::from_millis(actual)
    }
}

/// Timeout wrapper for async operations
pub async fn with_timeout<F, T>(future: F, timeout_ms: u64, operation_name: &str) -> FbaiResult<T>
where
    F: std::future::Future<Output = T>,
{
    match timeout(Duration::from_millis(timeout_ms), future).await {
        Ok(result) => Ok(result),
        Err(_) => Err(FbaiError::Timeout {
            operation: operation_name.to_string(),
            duration_ms: timeout_ms,
            context: ErrorContext::new("async_utils")
                .with_operation("timeout")
                .with_metadata("timeout_ms", &timeout_ms.to_string())
                .with_suggestion("Increase the request timeout")
                .with_suggestion("Check network connectivity"),
        }),
    }
}
