//! Fit-to-size: get a video under an upload ceiling.
//!
//! Quality levels are tried best-first and the first download under the
//! ceiling wins. If even the lowest level is too large the file is
//! re-encoded, first at the primary backend and then at the fallback, once
//! per size target. Running out of targets is a hard stop.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use digest_models::{QualityLevel, VideoAsset};
use tracing::{info, warn};

use crate::backend::TranscodeBackend;
use crate::download::{DownloadRequest, YtDlpDownloader};
use crate::error::{MediaError, MediaResult};
use crate::fs_utils::{file_size, remove_if_exists, replace_file};
use crate::plan::SourceGeometry;
use crate::probe::{probe_video, VideoInfo, DEFAULT_DURATION_SECS};

/// Upload limit of the summarization CLI.
pub const DEFAULT_CEILING_BYTES: u64 = 20 * 1024 * 1024;

/// Where videos come from and how their metadata is read.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait VideoSource: Send + Sync {
    async fn fetch(&self, request: &DownloadRequest, quality: QualityLevel) -> MediaResult<PathBuf>;

    async fn probe(&self, path: &Path) -> MediaResult<VideoInfo>;
}

/// yt-dlp for fetching, ffprobe for metadata.
pub struct ToolchainSource {
    downloader: YtDlpDownloader,
}

impl ToolchainSource {
    pub fn new(downloader: YtDlpDownloader) -> Self {
        Self { downloader }
    }
}

#[async_trait]
impl VideoSource for ToolchainSource {
    async fn fetch(&self, request: &DownloadRequest, quality: QualityLevel) -> MediaResult<PathBuf> {
        self.downloader.download(request, quality).await
    }

    async fn probe(&self, path: &Path) -> MediaResult<VideoInfo> {
        probe_video(path).await
    }
}

#[derive(Debug, Clone)]
pub struct FitConfig {
    pub ceiling_bytes: u64,
    /// Transcode targets in MB, tried in order
    pub targets_mb: Vec<f64>,
}

impl Default for FitConfig {
    fn default() -> Self {
        Self {
            ceiling_bytes: DEFAULT_CEILING_BYTES,
            // 2 MB of headroom, then a stricter retry
            targets_mb: vec![18.0, 15.0],
        }
    }
}

pub struct FitToSize {
    source: Box<dyn VideoSource>,
    primary: Box<dyn TranscodeBackend>,
    fallback: Box<dyn TranscodeBackend>,
    config: FitConfig,
}

impl FitToSize {
    pub fn new(
        source: Box<dyn VideoSource>,
        primary: Box<dyn TranscodeBackend>,
        fallback: Box<dyn TranscodeBackend>,
        config: FitConfig,
    ) -> Self {
        Self {
            source,
            primary,
            fallback,
            config,
        }
    }

    pub fn ceiling_bytes(&self) -> u64 {
        self.config.ceiling_bytes
    }

    /// Download `request` and return an asset no larger than the ceiling.
    pub async fn ensure_under_limit(&self, request: &DownloadRequest) -> MediaResult<VideoAsset> {
        let ceiling = self.config.ceiling_bytes;
        let mut last_error = None;
        let mut oversized = None;

        for quality in QualityLevel::DESCENDING {
            let path = match self.source.fetch(request, quality).await {
                Ok(path) => path,
                Err(e) if e.is_missing_tool() => return Err(e),
                Err(e) => {
                    warn!(quality = %quality, error = %e, "Download attempt failed");
                    last_error = Some(e);
                    continue;
                }
            };

            let size = file_size(&path).await?;
            if size <= ceiling {
                info!(quality = %quality, size_bytes = size, "Download within size limit");
                return self.asset(&request.url, path).await;
            }

            warn!(
                quality = %quality,
                size_mb = size as f64 / (1024.0 * 1024.0),
                limit_mb = ceiling as f64 / (1024.0 * 1024.0),
                "Download exceeds size limit"
            );
            if quality == QualityLevel::Low {
                oversized = Some(path);
            } else {
                remove_if_exists(&path).await;
            }
        }

        match oversized {
            Some(path) => self.compress_to_fit(&request.url, &path).await,
            None => Err(last_error
                .unwrap_or_else(|| MediaError::download_failed("no quality level produced a file"))),
        }
    }

    /// Re-encode an existing file until it fits, replacing it in place.
    ///
    /// The result always lands at `<stem>.mp4` next to the input.
    pub async fn compress_to_fit(&self, source_url: &str, path: &Path) -> MediaResult<VideoAsset> {
        let ceiling = self.config.ceiling_bytes;
        let size_bytes = file_size(path).await?;
        let geometry = match self.source.probe(path).await {
            Ok(info) => SourceGeometry {
                size_bytes,
                ..SourceGeometry::from(&info)
            },
            Err(e) => {
                warn!(error = %e, "Probe failed; assuming default duration");
                SourceGeometry {
                    width: 0,
                    height: 0,
                    fps: 0.0,
                    duration_seconds: DEFAULT_DURATION_SECS,
                    size_bytes,
                }
            }
        };

        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "video".to_string());
        let compressed = path.with_file_name(format!("{stem}_compressed.mp4"));
        let final_path = path.with_file_name(format!("{stem}.mp4"));

        let mut last_size = size_bytes;
        for &target_mb in &self.config.targets_mb {
            let size = self.transcode_once(path, &compressed, target_mb, &geometry).await?;
            last_size = size;

            if size <= ceiling {
                if final_path != path {
                    remove_if_exists(path).await;
                }
                replace_file(&compressed, &final_path).await?;
                info!(
                    target_mb,
                    size_mb = size as f64 / (1024.0 * 1024.0),
                    "Compressed video within size limit"
                );
                return self.asset(source_url, final_path).await;
            }

            warn!(
                target_mb,
                size_mb = size as f64 / (1024.0 * 1024.0),
                "Compressed video still exceeds size limit"
            );
            remove_if_exists(&compressed).await;
        }

        Err(MediaError::SizeExceeded {
            size_bytes: last_size,
            ceiling_bytes: ceiling,
        })
    }

    /// One encode at `target_mb`: primary first, fallback on failure.
    async fn transcode_once(
        &self,
        input: &Path,
        output: &Path,
        target_mb: f64,
        geometry: &SourceGeometry,
    ) -> MediaResult<u64> {
        let mut last_error = None;

        for backend in [&self.primary, &self.fallback] {
            if !backend.is_available() {
                warn!(backend = backend.name(), "Transcoding backend unavailable");
                continue;
            }
            let plan = backend.plan(target_mb, geometry);
            match backend.transcode(input, output, &plan, geometry).await {
                Ok(()) => return file_size(output).await,
                Err(e) => {
                    warn!(backend = backend.name(), error = %e, "Transcoding failed");
                    remove_if_exists(output).await;
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            MediaError::backend_unavailable(format!(
                "{} and {}",
                self.primary.name(),
                self.fallback.name()
            ))
        }))
    }

    async fn asset(&self, source_url: &str, path: PathBuf) -> MediaResult<VideoAsset> {
        let size_bytes = file_size(&path).await?;
        let info = match self.source.probe(&path).await {
            Ok(info) => Some(info),
            Err(e) => {
                warn!(error = %e, "Probe failed; asset metadata left empty");
                None
            }
        };
        Ok(VideoAsset {
            source_url: source_url.to_string(),
            local_path: path,
            size_bytes,
            duration_seconds: info.as_ref().map(|i| i.duration).unwrap_or(0.0),
            width: info.as_ref().map(|i| i.width).unwrap_or(0),
            height: info.as_ref().map(|i| i.height).unwrap_or(0),
            frame_rate: info.as_ref().map(|i| i.fps).unwrap_or(0.0),
        })
    }
}
