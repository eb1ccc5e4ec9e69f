//! Video summary sub-pipeline.
//!
//! Resolves a channel, picks its newest distinct videos, fits each one under
//! the summarizer's upload ceiling, summarizes it and writes one report per
//! video plus a merged `report.md`. A failure on one video is recorded in its
//! report and never stops the others.

pub mod feed;
pub mod reports;
pub mod summarizer;

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use digest_media::{
    default_fallback, DownloadRequest, FfmpegCliBackend, FitConfig, FitToSize, ToolchainSource,
    YtDlpDownloader,
};
use tracing::{info, warn};

use crate::config::WorkerConfig;
use crate::error::{WorkerError, WorkerResult};
use crate::logging::StepLogger;

pub use feed::{select_videos, ChannelFeedClient};
pub use reports::{ChannelInfo, VideoResult};
pub use summarizer::{GeminiCli, Summarizer};

/// Gets a local video file small enough to summarize.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait VideoPreparer: Send + Sync {
    async fn prepare(&self, request: &DownloadRequest) -> WorkerResult<PathBuf>;
}

#[async_trait]
impl VideoPreparer for FitToSize {
    async fn prepare(&self, request: &DownloadRequest) -> WorkerResult<PathBuf> {
        let asset = self.ensure_under_limit(request).await?;
        Ok(asset.local_path)
    }
}

/// Stand-in when downloads are switched off.
struct ListingOnly;

#[async_trait]
impl VideoPreparer for ListingOnly {
    async fn prepare(&self, request: &DownloadRequest) -> WorkerResult<PathBuf> {
        Err(WorkerError::non_retryable(format!("downloads are disabled: {}", request.url)))
    }
}

#[derive(Debug, Clone)]
pub struct VideoReportOptions {
    pub channel_url: String,
    pub output_dir: PathBuf,
    pub top_n: usize,
    /// Pause between videos
    pub pacing: Duration,
    pub keep_mp4: bool,
    /// Only list the videos; no download, no summary
    pub no_download: bool,
    /// Used in the timeout failure message
    pub summary_timeout: Duration,
}

impl VideoReportOptions {
    /// Options for the daily run.
    pub fn from_config(config: &WorkerConfig) -> Self {
        Self {
            channel_url: config.youtube_channel_url.clone(),
            output_dir: config.repo_path(&config.video_output_dir),
            top_n: config.video_top_n,
            pacing: config.video_pacing,
            keep_mp4: config.keep_mp4,
            no_download: false,
            summary_timeout: config.gemini_timeout,
        }
    }

    pub fn mp4_dir(&self) -> PathBuf {
        self.output_dir.join("mp4")
    }
}

pub struct VideoReportPipeline {
    feed: ChannelFeedClient,
    preparer: Box<dyn VideoPreparer>,
    summarizer: Box<dyn Summarizer>,
    options: VideoReportOptions,
}

impl VideoReportPipeline {
    pub fn new(
        feed: ChannelFeedClient,
        preparer: Box<dyn VideoPreparer>,
        summarizer: Box<dyn Summarizer>,
        options: VideoReportOptions,
    ) -> Self {
        Self {
            feed,
            preparer,
            summarizer,
            options,
        }
    }

    /// Wire the real toolchain: yt-dlp and ffmpeg for the video, the Gemini
    /// CLI for the summary.
    pub fn from_config(
        config: &WorkerConfig,
        options: VideoReportOptions,
        model: Option<String>,
        extra_prompt: Option<String>,
    ) -> WorkerResult<Self> {
        let preparer: Box<dyn VideoPreparer> = if options.no_download {
            Box::new(ListingOnly)
        } else {
            let source = ToolchainSource::new(YtDlpDownloader::detect()?);
            Box::new(FitToSize::new(
                Box::new(source),
                Box::new(FfmpegCliBackend::primary()),
                default_fallback(),
                FitConfig::default(),
            ))
        };
        let summarizer = GeminiCli::new(
            &config.gemini_command,
            model.unwrap_or_else(|| config.gemini_model.clone()),
            config.gemini_timeout,
        )
        .with_extra_prompt(extra_prompt);

        Ok(Self::new(
            ChannelFeedClient::new()?,
            preparer,
            Box::new(summarizer),
            options,
        ))
    }

    pub fn options(&self) -> &VideoReportOptions {
        &self.options
    }

    /// Run the whole step and return the merged report path.
    pub async fn run(&self, now: DateTime<Utc>) -> WorkerResult<PathBuf> {
        let logger = StepLogger::new(&now.format("%Y-%m-%d").to_string(), "video_report");
        logger.log_start(&self.options.channel_url);

        let channel_id = self.feed.resolve_channel_id(&self.options.channel_url).await?;
        let channel = ChannelInfo {
            url: self.options.channel_url.clone(),
            rss: self.feed.feed_url(&channel_id),
            id: channel_id,
        };

        let entries = self.feed.fetch_entries(&channel.id).await?;
        let picked = select_videos(&entries, self.options.top_n);
        if picked.is_empty() {
            return Err(WorkerError::non_retryable(format!(
                "channel feed {} has no entries",
                channel.rss
            )));
        }

        let generated_at = reports::now_jst(now);
        tokio::fs::create_dir_all(&self.options.output_dir).await?;

        let mut results = Vec::with_capacity(picked.len());
        for (idx, entry) in picked.iter().enumerate() {
            if idx > 0 && !self.options.no_download && !self.options.pacing.is_zero() {
                info!(secs = self.options.pacing.as_secs(), "Pausing before next video");
                tokio::time::sleep(self.options.pacing).await;
            }

            let rank = idx + 1;
            let video_id = entry
                .video_id
                .clone()
                .unwrap_or_else(|| format!("unknown_{rank}"));
            let mut result = VideoResult {
                rank,
                video_id,
                title: entry.title.clone(),
                published: entry.published.clone(),
                link: entry.link.clone(),
                video_file: None,
                summary: None,
            };
            logger.log_progress(&format!("#{} {}", rank, result.title));

            if !self.options.no_download {
                self.process_video(&mut result).await;
            }

            reports::write_individual(&self.options.output_dir, &channel, &result, &generated_at)
                .await?;
            results.push(result);
        }

        let path = reports::write_merged(
            &self.options.output_dir,
            &channel,
            &results,
            self.options.top_n,
            &generated_at,
        )
        .await?;
        logger.log_completion(&path.display().to_string());
        Ok(path)
    }

    async fn process_video(&self, result: &mut VideoResult) {
        let stem = reports::file_stem(result.rank, &result.video_id, &result.title);
        let request = DownloadRequest::new(&result.link, self.options.mp4_dir(), stem);

        let path = match self.preparer.prepare(&request).await {
            Ok(path) => path,
            Err(e) => {
                warn!(rank = result.rank, url = %result.link, error = %e, "Could not prepare video");
                result.summary = Some(reports::failure_summary(&e, self.options.summary_timeout));
                // An oversized download survives a failed compression.
                if !self.options.keep_mp4 {
                    remove_leftover(&request.mp4_path()).await;
                }
                return;
            }
        };
        result.video_file = path.file_name().map(|n| n.to_string_lossy().to_string());

        result.summary = Some(match self.summarizer.summarize(&path).await {
            Ok(summary) => summary,
            Err(e) => {
                warn!(rank = result.rank, error = %e, "Summary failed");
                reports::failure_summary(&e, self.options.summary_timeout)
            }
        });

        if !self.options.keep_mp4 {
            remove_video(&path).await;
        }
    }
}

async fn remove_video(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        warn!(path = %path.display(), error = %e, "Failed to remove video");
    }
}

async fn remove_leftover(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => info!(path = %path.display(), "Removed leftover video"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove video"),
    }
}
