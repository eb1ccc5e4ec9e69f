//! Error types for media operations.

use std::path::PathBuf;
use thiserror::Error;

/// Result type for media operations.
pub type MediaResult<T> = Result<T, MediaError>;

/// Errors that can occur while downloading or transcoding video.
#[derive(Debug, Error)]
pub enum MediaError {
    #[error("FFmpeg not found in PATH")]
    FfmpegNotFound,

    #[error("FFprobe not found in PATH")]
    FfprobeNotFound,

    #[error("yt-dlp not found in PATH")]
    YtDlpNotFound,

    #[error("FFmpeg command failed: {message}")]
    FfmpegFailed {
        message: String,
        stderr: Option<String>,
        exit_code: Option<i32>,
    },

    #[error("FFprobe command failed: {message}")]
    FfprobeFailed {
        message: String,
        stderr: Option<String>,
    },

    #[error("Download failed: {message}")]
    DownloadFailed { message: String, rate_limited: bool },

    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Operation timed out after {0} seconds")]
    Timeout(u64),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("Invalid video file: {0}")]
    InvalidVideo(String),

    #[error("Transcoding backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error(
        "Video exceeds size limit even after compression: {:.2} MB > {:.2} MB",
        as_mb(.size_bytes),
        as_mb(.ceiling_bytes)
    )]
    SizeExceeded { size_bytes: u64, ceiling_bytes: u64 },

    #[error("Internal error: {0}")]
    Internal(String),
}

fn as_mb(bytes: &u64) -> f64 {
    *bytes as f64 / (1024.0 * 1024.0)
}

impl MediaError {
    /// Create an FFmpeg failure error.
    pub fn ffmpeg_failed(
        message: impl Into<String>,
        stderr: Option<String>,
        exit_code: Option<i32>,
    ) -> Self {
        Self::FfmpegFailed {
            message: message.into(),
            stderr,
            exit_code,
        }
    }

    /// Create a download failure error.
    pub fn download_failed(message: impl Into<String>) -> Self {
        Self::DownloadFailed {
            message: message.into(),
            rate_limited: false,
        }
    }

    /// Create a download failure caused by provider throttling.
    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::DownloadFailed {
            message: message.into(),
            rate_limited: true,
        }
    }

    pub fn backend_unavailable(name: impl Into<String>) -> Self {
        Self::BackendUnavailable(name.into())
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Whether the failure is a missing tool rather than a bad input.
    pub fn is_missing_tool(&self) -> bool {
        matches!(
            self,
            MediaError::FfmpegNotFound | MediaError::FfprobeNotFound | MediaError::YtDlpNotFound
        )
    }
}
