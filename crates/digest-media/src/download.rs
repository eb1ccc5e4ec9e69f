//! Video download using yt-dlp.
//!
//! Each attempt forces a fresh fetch: stale outputs and partial files from a
//! previous quality level are removed first, and yt-dlp is told not to
//! resume.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use digest_models::QualityLevel;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::command::{check_ffmpeg, check_ytdlp};
use crate::error::{MediaError, MediaResult};
use crate::fs_utils::{files_with_stem, remove_if_exists};

/// What to fetch and where to put it.
#[derive(Debug, Clone)]
pub struct DownloadRequest {
    pub url: String,
    pub out_dir: PathBuf,
    /// File stem; the final file is `<out_dir>/<stem>.mp4` when merging works
    pub stem: String,
}

impl DownloadRequest {
    pub fn new(url: impl Into<String>, out_dir: impl Into<PathBuf>, stem: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            out_dir: out_dir.into(),
            stem: stem.into(),
        }
    }

    pub fn mp4_path(&self) -> PathBuf {
        self.out_dir.join(format!("{}.mp4", self.stem))
    }

    fn template(&self) -> String {
        self.out_dir
            .join(format!("{}.%(ext)s", self.stem))
            .to_string_lossy()
            .to_string()
    }
}

/// yt-dlp front end.
#[derive(Debug, Clone)]
pub struct YtDlpDownloader {
    binary: PathBuf,
    can_merge: bool,
    js_runtime: Option<String>,
    timeout: Duration,
}

impl YtDlpDownloader {
    /// Locate yt-dlp and detect whether FFmpeg can merge streams.
    pub fn detect() -> MediaResult<Self> {
        let binary = check_ytdlp()?;
        let can_merge = check_ffmpeg().is_ok();
        if !can_merge {
            warn!("FFmpeg not found; downloads limited to single pre-muxed formats");
        }
        Ok(Self {
            binary,
            can_merge,
            js_runtime: Some("deno".to_string()),
            timeout: Duration::from_secs(900),
        })
    }

    pub fn with_js_runtime(mut self, runtime: Option<String>) -> Self {
        self.js_runtime = runtime;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn can_merge(&self) -> bool {
        self.can_merge
    }

    /// Build the yt-dlp argument vector for one attempt.
    pub fn build_args(&self, request: &DownloadRequest, quality: QualityLevel) -> Vec<String> {
        let mut args = vec![
            "-f".to_string(),
            quality.format_selector(self.can_merge).to_string(),
            "-o".to_string(),
            request.template(),
            request.url.clone(),
        ];
        if self.can_merge {
            args.push("--merge-output-format".to_string());
            args.push("mp4".to_string());
        }
        if let Some(runtime) = &self.js_runtime {
            args.push("--js-runtimes".to_string());
            args.push(runtime.clone());
        }
        args.push("--no-part".to_string());
        args.push("--no-continue".to_string());
        args
    }

    /// Download one quality level and return the produced file.
    pub async fn download(
        &self,
        request: &DownloadRequest,
        quality: QualityLevel,
    ) -> MediaResult<PathBuf> {
        tokio::fs::create_dir_all(&request.out_dir).await?;
        clear_stale_outputs(request).await;

        info!(url = %request.url, quality = %quality, "Downloading video");

        let args = self.build_args(request, quality);
        let child = Command::new(&self.binary)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        let output = tokio::time::timeout(self.timeout, child)
            .await
            .map_err(|_| MediaError::Timeout(self.timeout.as_secs()))??;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            debug!("yt-dlp stderr: {}", stderr);
            let last = stderr.lines().last().unwrap_or("Unknown error");
            let message = format!("yt-dlp failed at {quality} quality: {last}");
            return Err(if is_rate_limited(&stderr) {
                warn!(url = %request.url, "YouTube rate limit detected");
                MediaError::rate_limited(message)
            } else {
                MediaError::download_failed(message)
            });
        }

        let path = locate_output(request).await?;
        let size = tokio::fs::metadata(&path).await?.len();
        info!(
            output = %path.display(),
            size_mb = size as f64 / (1024.0 * 1024.0),
            quality = %quality,
            "Downloaded video"
        );
        Ok(path)
    }
}

/// Remove the previous attempt's mp4 and any partial files.
async fn clear_stale_outputs(request: &DownloadRequest) {
    if remove_if_exists(request.mp4_path()).await {
        debug!(stem = %request.stem, "Removed previous download");
    }
    if let Ok(files) = files_with_stem(&request.out_dir, &request.stem).await {
        for (path, _) in files {
            if path.extension().is_some_and(|e| e == "part") {
                remove_if_exists(&path).await;
            }
        }
    }
}

/// The merged mp4 if present, otherwise the largest file with the stem.
async fn locate_output(request: &DownloadRequest) -> MediaResult<PathBuf> {
    let mp4 = request.mp4_path();
    if mp4.exists() {
        return Ok(mp4);
    }
    let candidates = files_with_stem(&request.out_dir, &request.stem).await?;
    candidates
        .into_iter()
        .map(|(path, _)| path)
        .find(|p| !has_extension(p, "part"))
        .ok_or(MediaError::FileNotFound(mp4))
}

fn has_extension(path: &Path, ext: &str) -> bool {
    path.extension().is_some_and(|e| e.eq_ignore_ascii_case(ext))
}

fn is_rate_limited(stderr: &str) -> bool {
    stderr.contains("429")
        || stderr.contains("Too Many Requests")
        || stderr.contains("rate limit")
        || stderr.contains("Sign in to confirm")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn downloader(can_merge: bool) -> YtDlpDownloader {
        YtDlpDownloader {
            binary: PathBuf::from("yt-dlp"),
            can_merge,
            js_runtime: Some("deno".to_string()),
            timeout: Duration::from_secs(5),
        }
    }

    #[test]
    fn test_args_with_merger() {
        let req = DownloadRequest::new("https://youtu.be/x", "/tmp/out", "01_abc");
        let args = downloader(true).build_args(&req, QualityLevel::Medium);
        assert_eq!(args[1], QualityLevel::Medium.format_selector(true));
        assert!(args.contains(&"--merge-output-format".to_string()));
        assert!(args.contains(&"--no-continue".to_string()));
        assert!(args[3].ends_with("01_abc.%(ext)s"));
    }

    #[test]
    fn test_args_without_merger() {
        let req = DownloadRequest::new("https://youtu.be/x", "/tmp/out", "01_abc");
        let args = downloader(false)
            .with_js_runtime(None)
            .build_args(&req, QualityLevel::Best);
        assert!(!args.contains(&"--merge-output-format".to_string()));
        assert!(!args.contains(&"--js-runtimes".to_string()));
    }

    #[tokio::test]
    async fn test_stale_outputs_cleared() {
        let dir = TempDir::new().unwrap();
        let req = DownloadRequest::new("u", dir.path(), "clip");
        tokio::fs::write(req.mp4_path(), b"old").await.unwrap();
        tokio::fs::write(dir.path().join("clip.mp4.part"), b"p").await.unwrap();
        tokio::fs::write(dir.path().join("keep.mp4"), b"k").await.unwrap();

        clear_stale_outputs(&req).await;

        assert!(!req.mp4_path().exists());
        assert!(!dir.path().join("clip.mp4.part").exists());
        assert!(dir.path().join("keep.mp4").exists());
    }

    #[tokio::test]
    async fn test_locate_output_prefers_largest_non_mp4() {
        let dir = TempDir::new().unwrap();
        let req = DownloadRequest::new("u", dir.path(), "clip");
        tokio::fs::write(dir.path().join("clip.webm"), vec![0u8; 50]).await.unwrap();
        tokio::fs::write(dir.path().join("clip.m4a"), vec![0u8; 5]).await.unwrap();

        let found = locate_output(&req).await.unwrap();
        assert!(found.ends_with("clip.webm"));
    }

    #[test]
    fn test_rate_limit_detection() {
        assert!(is_rate_limited("ERROR: HTTP Error 429: Too Many Requests"));
        assert!(is_rate_limited("Sign in to confirm you're not a bot"));
        assert!(!is_rate_limited("ERROR: Video unavailable"));
    }
}
