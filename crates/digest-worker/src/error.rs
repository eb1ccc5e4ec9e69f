//! Worker error types.

use std::path::PathBuf;

use thiserror::Error;

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Command not found: {0}")]
    CommandNotFound(String),

    #[error("Process timeout ({reason}) after {elapsed_secs}s: {stderr_tail}")]
    ProcessTimedOut {
        reason: &'static str,
        elapsed_secs: u64,
        stderr_tail: String,
    },

    #[error("Process exited with code {exit_code}: {stderr_tail}")]
    ProcessFailed { exit_code: i32, stderr_tail: String },

    #[error("Report schema violation in {path}: {message}")]
    SchemaViolation { path: PathBuf, message: String },

    #[error("Summary quality validation failed: {0}")]
    QualityValidation(String),

    #[error("Rate limited or out of capacity: {0}")]
    RateLimited(String),

    #[error("Missing input: {0}")]
    MissingInput(String),

    #[error("Non-retryable error: {0}")]
    NonRetryable(String),

    #[error("Git operation failed: {0}")]
    GitFailed(String),

    #[error("Collector failed: {0}")]
    CollectorFailed(String),

    #[error("Media error: {0}")]
    Media(#[from] digest_media::MediaError),

    #[error("Store error: {0}")]
    Store(#[from] digest_store::StoreError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Regex error: {0}")]
    Regex(#[from] regex::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WorkerError {
    pub fn missing_input(msg: impl Into<String>) -> Self {
        Self::MissingInput(msg.into())
    }

    pub fn non_retryable(msg: impl Into<String>) -> Self {
        Self::NonRetryable(msg.into())
    }

    pub fn git_failed(msg: impl Into<String>) -> Self {
        Self::GitFailed(msg.into())
    }

    pub fn collector_failed(msg: impl Into<String>) -> Self {
        Self::CollectorFailed(msg.into())
    }

    pub fn schema_violation(path: impl Into<PathBuf>, msg: impl Into<String>) -> Self {
        Self::SchemaViolation {
            path: path.into(),
            message: msg.into(),
        }
    }

    /// Errors no amount of retrying will fix.
    ///
    /// Missing binaries and inputs, malformed artifacts and an oversize video
    /// after both compression targets all need an operator.
    pub fn is_permanent_failure(&self) -> bool {
        match self {
            WorkerError::CommandNotFound(_)
            | WorkerError::SchemaViolation { .. }
            | WorkerError::MissingInput(_)
            | WorkerError::NonRetryable(_) => true,
            WorkerError::Media(e) => {
                e.is_missing_tool() || matches!(e, digest_media::MediaError::SizeExceeded { .. })
            }
            _ => false,
        }
    }

    /// Whether the provider pushed back, by variant or by message.
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, WorkerError::RateLimited(_)) || contains_rate_limit_marker(&self.to_string())
    }
}

/// Provider throttling and capacity markers in CLI output.
pub fn contains_rate_limit_marker(text: &str) -> bool {
    let lower = text.to_lowercase();
    text.contains("429")
        || lower.contains("rate limit")
        || lower.contains("quota")
        || text.contains("MODEL_CAPACITY_EXHAUSTED")
        || text.contains("No capacity available")
        || text.contains("RESOURCE_EXHAUSTED")
}
