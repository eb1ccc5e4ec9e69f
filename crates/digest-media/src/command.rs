//! FFmpeg command builder and runner.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::{MediaError, MediaResult};

/// Number of stderr lines kept for error reports.
const STDERR_TAIL_LINES: usize = 40;

/// Builder for FFmpeg invocations.
#[derive(Debug, Clone)]
pub struct FfmpegCommand {
    input: PathBuf,
    output: PathBuf,
    output_args: Vec<String>,
    filters: Vec<String>,
    log_level: String,
}

impl FfmpegCommand {
    pub fn new(input: impl AsRef<Path>, output: impl AsRef<Path>) -> Self {
        Self {
            input: input.as_ref().to_path_buf(),
            output: output.as_ref().to_path_buf(),
            output_args: Vec::new(),
            filters: Vec::new(),
            log_level: "error".to_string(),
        }
    }

    /// Add an argument placed after `-i`.
    pub fn output_arg(mut self, arg: impl Into<String>) -> Self {
        self.output_args.push(arg.into());
        self
    }

    fn output_pair(self, flag: &str, value: impl Into<String>) -> Self {
        self.output_arg(flag).output_arg(value)
    }

    pub fn video_codec(self, codec: impl Into<String>) -> Self {
        self.output_pair("-c:v", codec)
    }

    pub fn audio_codec(self, codec: impl Into<String>) -> Self {
        self.output_pair("-c:a", codec)
    }

    pub fn preset(self, preset: impl Into<String>) -> Self {
        self.output_pair("-preset", preset)
    }

    /// Constrain video to an average bitrate with a matching VBV ceiling.
    ///
    /// The buffer is twice the rate so short peaks do not stall the encoder.
    pub fn video_bitrate_kbps(self, kbps: u32) -> Self {
        self.output_pair("-b:v", format!("{kbps}k"))
            .output_pair("-maxrate", format!("{kbps}k"))
            .output_pair("-bufsize", format!("{}k", kbps * 2))
    }

    pub fn audio_bitrate_kbps(self, kbps: u32) -> Self {
        self.output_pair("-b:a", format!("{kbps}k"))
    }

    pub fn audio_channels(self, channels: u8) -> Self {
        self.output_pair("-ac", channels.to_string())
    }

    /// Move the moov atom to the front so the file streams.
    pub fn faststart(self) -> Self {
        self.output_pair("-movflags", "+faststart")
    }

    /// Scale to an exact frame size.
    pub fn scale(mut self, width: u32, height: u32) -> Self {
        self.filters.push(format!("scale={width}:{height}"));
        self
    }

    /// Drop frames down to a constant rate.
    pub fn frame_rate(mut self, fps: f64) -> Self {
        self.filters.push(format!("fps={fps}"));
        self
    }

    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }

    /// Build the argument vector (without the program name).
    pub fn build_args(&self) -> Vec<String> {
        let mut args = vec![
            "-y".to_string(),
            "-v".to_string(),
            self.log_level.clone(),
            "-progress".to_string(),
            "pipe:2".to_string(),
        ];
        args.push("-i".to_string());
        args.push(self.input.to_string_lossy().to_string());
        if !self.filters.is_empty() {
            args.push("-vf".to_string());
            args.push(self.filters.join(","));
        }
        args.extend(self.output_args.iter().cloned());
        args.push(self.output.to_string_lossy().to_string());
        args
    }
}

/// Executes [`FfmpegCommand`]s with an optional wall-clock limit.
#[derive(Debug, Clone, Default)]
pub struct FfmpegRunner {
    timeout: Option<Duration>,
}

impl FfmpegRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Run the command, keeping the tail of stderr for diagnostics.
    pub async fn run(&self, cmd: &FfmpegCommand) -> MediaResult<()> {
        let ffmpeg = check_ffmpeg()?;
        let args = cmd.build_args();
        debug!("Running FFmpeg: ffmpeg {}", args.join(" "));

        let mut child = Command::new(ffmpeg)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| MediaError::internal("FFmpeg stderr was not captured"))?;

        let reader = tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            let mut tail = VecDeque::with_capacity(STDERR_TAIL_LINES);
            while let Ok(Some(line)) = lines.next_line().await {
                if let Some(ms) = parse_out_time_ms(&line) {
                    debug!(out_time_ms = ms, "FFmpeg progress");
                    continue;
                }
                if is_progress_key(&line) {
                    continue;
                }
                if tail.len() == STDERR_TAIL_LINES {
                    tail.pop_front();
                }
                tail.push_back(line);
            }
            tail.into_iter().collect::<Vec<_>>().join("\n")
        });

        let status = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, child.wait()).await {
                Ok(status) => status?,
                Err(_) => {
                    warn!("FFmpeg timed out after {:?}, killing process", limit);
                    let _ = child.kill().await;
                    return Err(MediaError::Timeout(limit.as_secs()));
                }
            },
            None => child.wait().await?,
        };

        let stderr_tail = reader.await.unwrap_or_default();

        if status.success() {
            Ok(())
        } else {
            Err(MediaError::ffmpeg_failed(
                "FFmpeg exited with non-zero status",
                (!stderr_tail.is_empty()).then_some(stderr_tail),
                status.code(),
            ))
        }
    }
}

/// Extract `out_time_ms`/`out_time_us` from a `-progress` line, in milliseconds.
fn parse_out_time_ms(line: &str) -> Option<i64> {
    let (key, value) = line.trim().split_once('=')?;
    let raw: i64 = value.parse().ok()?;
    match key {
        // FFmpeg reports microseconds under both keys
        "out_time_ms" | "out_time_us" => Some(raw / 1000),
        _ => None,
    }
}

fn is_progress_key(line: &str) -> bool {
    const KEYS: [&str; 12] = [
        "frame", "fps", "stream_0_0_q", "bitrate", "total_size", "out_time", "dup_frames",
        "drop_frames", "speed", "progress", "out_time_ms", "out_time_us",
    ];
    line.split_once('=')
        .map(|(k, _)| KEYS.contains(&k.trim()))
        .unwrap_or(false)
}

/// Check if FFmpeg is available.
pub fn check_ffmpeg() -> MediaResult<PathBuf> {
    which::which("ffmpeg").map_err(|_| MediaError::FfmpegNotFound)
}

/// Check if FFprobe is available.
pub fn check_ffprobe() -> MediaResult<PathBuf> {
    which::which("ffprobe").map_err(|_| MediaError::FfprobeNotFound)
}

/// Check if yt-dlp is available.
pub fn check_ytdlp() -> MediaResult<PathBuf> {
    which::which("yt-dlp").map_err(|_| MediaError::YtDlpNotFound)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bitrate_arguments() {
        let args = FfmpegCommand::new("in.mp4", "out.mp4")
            .video_codec("libx264")
            .video_bitrate_kbps(1100)
            .faststart()
            .build_args();

        let pos = args.iter().position(|a| a == "-bufsize").unwrap();
        assert_eq!(args[pos + 1], "2200k");
        assert!(args.windows(2).any(|w| w[0] == "-b:v" && w[1] == "1100k"));
        assert!(args.windows(2).any(|w| w[0] == "-maxrate" && w[1] == "1100k"));
        assert_eq!(args.last().unwrap(), "out.mp4");
    }

    #[test]
    fn test_filters_joined_before_output_args() {
        let args = FfmpegCommand::new("in.mp4", "out.mp4")
            .scale(640, 360)
            .frame_rate(15.0)
            .preset("fast")
            .build_args();

        let vf = args.iter().position(|a| a == "-vf").unwrap();
        assert_eq!(args[vf + 1], "scale=640:360,fps=15");
        let preset = args.iter().position(|a| a == "-preset").unwrap();
        assert!(vf < preset);
    }

    #[test]
    fn test_progress_parsing() {
        assert_eq!(parse_out_time_ms("out_time_ms=5000000"), Some(5000));
        assert_eq!(parse_out_time_ms("out_time_us=2500000"), Some(2500));
        assert_eq!(parse_out_time_ms("frame=10"), None);
        assert!(is_progress_key("speed=1.5x"));
        assert!(!is_progress_key("Error while opening encoder"));
    }
}
