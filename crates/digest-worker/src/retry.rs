//! Retry policy with exponential backoff and jitter.
//!
//! External CLIs only report failures as text, so classification is done on
//! the error message. Structured [`WorkerError`] variants short-circuit the
//! text rules where the variant alone settles the question.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, warn};

use crate::error::{WorkerError, WorkerResult};

/// Markers of failures that can never succeed on retry.
const NON_RECOVERABLE_MARKERS: &[&str] = &["context_length_exceeded", "context window", "input exceeds"];

/// HTTP statuses worth another attempt.
const RETRYABLE_STATUS_CODES: &[&str] = &["429", "500", "502", "503", "504"];

const TRANSIENT_KEYWORDS: &[&str] = &["timeout", "connection", "rate", "limit", "throttl"];

/// Fraction of the delay added as uniform jitter.
const JITTER_RATIO: f64 = 0.1;

/// Called with the message when a non-recoverable marker is seen.
pub type NonRecoverableObserver = Arc<dyn Fn(&str) + Send + Sync>;

/// Outcome of classifying one failed attempt.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryDecision {
    pub should_retry: bool,
    pub delay: Duration,
}

impl RetryDecision {
    fn stop() -> Self {
        Self {
            should_retry: false,
            delay: Duration::ZERO,
        }
    }
}

#[derive(Clone)]
pub struct RetryPolicy {
    /// Retries allowed after the first attempt
    pub max_retries: u32,
    /// Delay before the first retry; doubles each attempt
    pub base_delay: Duration,
    /// Cap on the un-jittered delay
    pub max_delay: Duration,
    /// Operation name for logging
    pub operation_name: String,
    observer: Option<NonRecoverableObserver>,
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_retries", &self.max_retries)
            .field("base_delay", &self.base_delay)
            .field("max_delay", &self.max_delay)
            .field("operation_name", &self.operation_name)
            .field("observer", &self.observer.is_some())
            .finish()
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(10),
            max_delay: Duration::from_secs(120),
            operation_name: "operation".to_string(),
            observer: None,
        }
    }
}

impl RetryPolicy {
    pub fn new(operation_name: impl Into<String>) -> Self {
        Self {
            operation_name: operation_name.into(),
            ..Default::default()
        }
    }

    /// Defaults overridden by `LLM_MAX_RETRIES`, `LLM_RETRY_BASE_DELAY` and
    /// `LLM_RETRY_MAX_DELAY` (seconds, fractional allowed).
    pub fn from_env(operation_name: impl Into<String>) -> Self {
        let defaults = Self::new(operation_name);
        let secs = |key: &str, fallback: Duration| {
            std::env::var(key)
                .ok()
                .and_then(|s| s.parse::<f64>().ok())
                .filter(|v| v.is_finite() && *v >= 0.0)
                .map(Duration::from_secs_f64)
                .unwrap_or(fallback)
        };
        Self {
            max_retries: std::env::var("LLM_MAX_RETRIES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_retries),
            base_delay: secs("LLM_RETRY_BASE_DELAY", defaults.base_delay),
            max_delay: secs("LLM_RETRY_MAX_DELAY", defaults.max_delay),
            ..defaults
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    pub fn with_operation_name(mut self, operation_name: impl Into<String>) -> Self {
        self.operation_name = operation_name.into();
        self
    }

    pub fn with_observer(mut self, observer: NonRecoverableObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    /// `min(base * 2^attempt, max)` before jitter.
    pub fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 2f64.powi(attempt.min(62) as i32);
        let secs = (self.base_delay.as_secs_f64() * factor).min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(secs)
    }

    /// Backoff plus uniform jitter in `[0, 0.1 * backoff]`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let backoff = self.backoff_for_attempt(attempt);
        let jitter = rand::rng().random_range(0.0..=backoff.as_secs_f64() * JITTER_RATIO);
        backoff + Duration::from_secs_f64(jitter)
    }

    /// Decide from the error text alone.
    pub fn classify(&self, message: &str, attempt: u32) -> RetryDecision {
        if attempt >= self.max_retries {
            return RetryDecision::stop();
        }

        let lower = message.to_lowercase();
        if NON_RECOVERABLE_MARKERS.iter().any(|m| lower.contains(m)) {
            let snippet: String = message.chars().take(200).collect();
            warn!(
                operation = %self.operation_name,
                "Non-retryable error detected (context length exceeded): {}", snippet
            );
            if let Some(observer) = &self.observer {
                observer(message);
            }
            return RetryDecision::stop();
        }

        let retryable = RETRYABLE_STATUS_CODES.iter().any(|code| message.contains(code))
            || TRANSIENT_KEYWORDS.iter().any(|kw| lower.contains(kw));

        if retryable {
            RetryDecision {
                should_retry: true,
                delay: self.delay_for_attempt(attempt),
            }
        } else {
            RetryDecision::stop()
        }
    }

    /// Decide from a structured error, falling back to its text.
    pub fn classify_error(&self, error: &WorkerError, attempt: u32) -> RetryDecision {
        if error.is_permanent_failure() {
            return RetryDecision::stop();
        }
        self.classify(&error.to_string(), attempt)
    }
}

/// Run `operation` until it succeeds or the policy says stop.
///
/// Returns the last error when giving up.
pub async fn retry_async<F, Fut, T>(policy: &RetryPolicy, mut operation: F) -> WorkerResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = WorkerResult<T>>,
{
    let mut attempt = 0u32;

    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                let decision = policy.classify_error(&e, attempt);
                if !decision.should_retry {
                    debug!(
                        operation = %policy.operation_name,
                        attempts = attempt + 1,
                        "Giving up: {}", e
                    );
                    return Err(e);
                }
                warn!(
                    operation = %policy.operation_name,
                    attempt = attempt + 1,
                    max_retries = policy.max_retries,
                    delay_secs = decision.delay.as_secs_f64(),
                    "Retrying after error: {}", e
                );
                tokio::time::sleep(decision.delay).await;
                attempt += 1;
            }
        }
    }
}
