//! Retry with classification-based exponential backoff.
//!
//! Wraps one unit of work (an LLM call) in a retry loop. Failures are
//! classified against the configured HTTP status codes and message
//! keywords; anything else surfaces immediately. The async and blocking
//! forms share the same classification and delay computation, so their
//! behavior only differs in how the sleep happens.

use rand::Rng;
use std::collections::HashSet;
use std::future::Future;
use std::time::Duration;

use crate::llm::LlmError;
use crate::progress::ProgressSink;

/// Configuration for the retry loop.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Maximum retries after the initial attempt.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Ceiling on the computed backoff delay (jitter excluded).
    pub max_delay: Duration,
    /// Multiplier applied per attempt.
    pub backoff_multiplier: f64,
    /// Whether to add random jitter to each delay.
    pub jitter: bool,
    /// Upper bound of the uniform jitter added when enabled.
    pub jitter_range: Duration,
    /// HTTP status codes treated as transient.
    pub retryable_status_codes: HashSet<u16>,
    /// Lowercase substrings of error messages treated as transient.
    pub retryable_keywords: Vec<String>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs_f64(1.0),
            max_delay: Duration::from_secs_f64(30.0),
            backoff_multiplier: 2.0,
            jitter: true,
            jitter_range: Duration::from_secs_f64(0.1),
            retryable_status_codes: [429, 500, 502, 503, 504].into_iter().collect(),
            retryable_keywords: ["timeout", "connection", "network", "dns", "ssl"]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }
}

/// Outcome of a retry loop that never produced a success.
#[derive(Debug, thiserror::Error)]
pub enum RetryError {
    /// Every attempt failed with a transient error.
    #[error("gave up after {attempts} attempts: {last_error}")]
    Exhausted { attempts: u32, last_error: LlmError },
    /// The first classified-permanent failure; no backoff was performed.
    #[error("not retryable: {0}")]
    NotRetryable(LlmError),
}

/// Classification-based retry executor.
///
/// Holds its configuration by value; use [`RetryManager::with_config`] to
/// derive a manager with different settings.
#[derive(Debug, Clone, Default)]
pub struct RetryManager {
    config: RetryConfig,
}

impl RetryManager {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Derive a manager with a replacement configuration.
    pub fn with_config(&self, config: RetryConfig) -> Self {
        Self { config }
    }

    /// Whether an error should be retried: its status code is in the
    /// configured set, or its message contains a configured keyword.
    pub fn is_retryable(&self, error: &LlmError) -> bool {
        if let Some(status) = error.status {
            if self.config.retryable_status_codes.contains(&status) {
                return true;
            }
        }
        let message = error.message.to_lowercase();
        self.config
            .retryable_keywords
            .iter()
            .any(|kw| message.contains(kw.as_str()))
    }

    /// Backoff delay before the (n+1)-th try, n zero-indexed.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.config.base_delay.as_secs_f64()
            * self.config.backoff_multiplier.powi(attempt as i32);
        let capped = base.min(self.config.max_delay.as_secs_f64());
        let jitter = if self.config.jitter {
            rand::thread_rng().gen_range(0.0..=self.config.jitter_range.as_secs_f64())
        } else {
            0.0
        };
        Duration::from_secs_f64(capped + jitter)
    }

    /// Run an async unit of work under the retry policy.
    pub async fn retry<T, F, Fut>(
        &self,
        task_name: &str,
        progress: &dyn ProgressSink,
        mut op: F,
    ) -> Result<T, RetryError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, LlmError>>,
    {
        let mut attempt = 0u32;
        loop {
            match op().await {
                Ok(value) => {
                    if attempt > 0 {
                        tracing::info!("[{}] succeeded after {} retries", task_name, attempt);
                    }
                    return Ok(value);
                }
                Err(error) => {
                    let delay = self.next_step(task_name, attempt, error, progress)?;
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Run a blocking unit of work under the same retry policy.
    pub fn retry_sync<T, F>(
        &self,
        task_name: &str,
        progress: &dyn ProgressSink,
        mut op: F,
    ) -> Result<T, RetryError>
    where
        F: FnMut() -> Result<T, LlmError>,
    {
        let mut attempt = 0u32;
        loop {
            match op() {
                Ok(value) => {
                    if attempt > 0 {
                        tracing::info!("[{}] succeeded after {} retries", task_name, attempt);
                    }
                    return Ok(value);
                }
                Err(error) => {
                    let delay = self.next_step(task_name, attempt, error, progress)?;
                    std::thread::sleep(delay);
                    attempt += 1;
                }
            }
        }
    }

    /// Shared decision point: classify the failure, either compute the
    /// delay before the next attempt or terminate the loop.
    fn next_step(
        &self,
        task_name: &str,
        attempt: u32,
        error: LlmError,
        progress: &dyn ProgressSink,
    ) -> Result<Duration, RetryError> {
        if !self.is_retryable(&error) {
            tracing::error!("[{}] non-retryable error: {}", task_name, error);
            return Err(RetryError::NotRetryable(error));
        }
        if attempt >= self.config.max_retries {
            tracing::error!(
                "[{}] still failing after {} attempts: {}",
                task_name,
                attempt + 1,
                error
            );
            return Err(RetryError::Exhausted {
                attempts: attempt + 1,
                last_error: error,
            });
        }
        let delay = self.delay_for_attempt(attempt);
        let message = format!(
            "[{}] attempt {} failed ({}), retrying in {:.1}s",
            task_name,
            attempt + 1,
            error,
            delay.as_secs_f64()
        );
        tracing::warn!("{}", message);
        progress.notify(&message);
        Ok(delay)
    }
}
