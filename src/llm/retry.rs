// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Retry with exponential backoff for upstream calls

use crate::config::settings::ResilienceConfig;
use crate::error::{ApiError, Result, TxingError};
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

/// Backoff parameters for one retried operation
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Base delay in milliseconds (doubled per attempt)
    pub base_delay_ms: u64,
    /// Maximum delay in milliseconds
    pub max_delay_ms: u64,
    /// Jitter fraction (0.0 to 1.0)
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::from(&ResilienceConfig::default())
    }
}

impl From<&ResilienceConfig> for RetryConfig {
    fn from(config: &ResilienceConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay_ms: config.base_delay_ms,
            max_delay_ms: config.max_delay_ms,
            jitter: config.jitter,
        }
    }
}

impl RetryConfig {
    /// Same backoff shape with a different attempt budget
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Calculate delay for a given attempt number
    fn calculate_delay(&self, attempt: u32) -> Duration {
        // Exponential backoff: base * 2^attempt
        let exponential_ms = self
            .base_delay_ms
            .saturating_mul(2u64.saturating_pow(attempt));
        let capped_ms = exponential_ms.min(self.max_delay_ms);

        // Add jitter
        let jitter_range = (capped_ms as f64 * self.jitter) as i64;
        let mut rng = rand::rng();
        let jitter_ms = rng.random_range(-jitter_range..=jitter_range);

        let final_ms = (capped_ms as i64 + jitter_ms).max(0) as u64;
        Duration::from_millis(final_ms)
    }
}

/// Determine if an error is retryable
pub fn is_retryable(error: &TxingError) -> bool {
    match error {
        TxingError::Api(api_error) => match api_error {
            // Retry on transient failures
            ApiError::Network(_) => true,
            ApiError::RateLimited(_) => true,
            ApiError::Timeout => true,
            ApiError::ServerError { status, .. } => {
                // Retry on 5xx errors
                *status >= 500 && *status < 600
            }
            ApiError::StreamError(_) => true,

            // Don't retry on client errors
            ApiError::AuthenticationFailed => false,
            ApiError::ModelNotFound(_) => false,
            ApiError::ContextTooLong { .. } => false,
            ApiError::InvalidResponse(_) => false,
        },
        TxingError::Http(err) => err.is_timeout() || err.is_connect(),
        _ => false,
    }
}

/// Retry a function with exponential backoff
///
/// # Arguments
/// * `operation` - The async operation to retry
/// * `config` - Retry configuration (uses default if None)
/// * `operation_name` - Name of the operation for logging
///
/// # Returns
/// Result of the operation after retries
pub async fn with_retry<F, Fut, T>(
    operation: F,
    config: Option<RetryConfig>,
    operation_name: &str,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    with_retry_if(operation, config, operation_name, is_retryable).await
}

/// Like [`with_retry`], with the caller deciding which errors are retried.
pub async fn with_retry_if<F, Fut, T, P>(
    mut operation: F,
    config: Option<RetryConfig>,
    operation_name: &str,
    should_retry: P,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
    P: Fn(&TxingError) -> bool,
{
    let config = config.unwrap_or_default();
    let mut attempt = 0;

    loop {
        match operation().await {
            Ok(result) => {
                if attempt > 0 {
                    tracing::info!(
                        target: "txing.llm.retry",
                        operation = operation_name,
                        attempts = attempt + 1,
                        "succeeded after retry"
                    );
                }
                return Ok(result);
            }
            Err(error) => {
                if !should_retry(&error) {
                    tracing::debug!(
                        target: "txing.llm.retry",
                        operation = operation_name,
                        %error,
                        "not retrying"
                    );
                    return Err(error);
                }

                if attempt >= config.max_retries {
                    tracing::warn!(
                        target: "txing.llm.retry",
                        operation = operation_name,
                        max_retries = config.max_retries,
                        %error,
                        "retries exhausted"
                    );
                    return Err(error);
                }

                let delay = config.calculate_delay(attempt);
                tracing::warn!(
                    target: "txing.llm.retry",
                    operation = operation_name,
                    attempt = attempt + 1,
                    max_retries = config.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    %error,
                    "attempt failed, backing off"
                );

                sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
