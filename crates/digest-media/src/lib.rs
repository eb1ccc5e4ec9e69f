//! Media handling for the digest pipeline.
//!
//! This crate wraps the external media tools the video summary step needs:
//! - yt-dlp downloads at descending quality levels
//! - FFprobe metadata extraction
//! - FFmpeg command building and execution
//! - Compression planning from a size budget
//! - Fit-to-size orchestration over interchangeable transcoding backends

pub mod backend;
pub mod command;
pub mod download;
pub mod error;
pub mod fit;
pub mod fs_utils;
pub mod plan;
pub mod probe;

pub use backend::{default_fallback, FfmpegCliBackend, TranscodeBackend};
pub use command::{check_ffmpeg, check_ffprobe, check_ytdlp, FfmpegCommand, FfmpegRunner};
pub use download::{DownloadRequest, YtDlpDownloader};
pub use error::{MediaError, MediaResult};
pub use fit::{FitConfig, FitToSize, ToolchainSource, VideoSource};
pub use plan::{total_bitrate_kbps, CompressionPlan, SourceGeometry};
pub use probe::{probe_video, VideoInfo};
