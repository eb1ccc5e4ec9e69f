use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use tracing::info;

use super::TranscodeBackend;
use crate::command::{check_ffmpeg, FfmpegCommand, FfmpegRunner};
use crate::error::MediaResult;
use crate::plan::{CompressionPlan, SourceGeometry};

const ENCODE_TIMEOUT: Duration = Duration::from_secs(1800);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Strategy {
    BitrateOnly,
    Ladder,
}

/// H.264/AAC re-encode through the `ffmpeg` binary.
#[derive(Debug, Clone)]
pub struct FfmpegCliBackend {
    strategy: Strategy,
    runner: FfmpegRunner,
}

impl FfmpegCliBackend {
    /// Keep geometry, hit a bitrate.
    pub fn primary() -> Self {
        Self {
            strategy: Strategy::BitrateOnly,
            runner: FfmpegRunner::new().with_timeout(ENCODE_TIMEOUT),
        }
    }

    /// Descend the resolution/fps ladder as well.
    pub fn ladder() -> Self {
        Self {
            strategy: Strategy::Ladder,
            runner: FfmpegRunner::new().with_timeout(ENCODE_TIMEOUT),
        }
    }

    pub fn build_command(
        &self,
        input: &Path,
        output: &Path,
        plan: &CompressionPlan,
        source: &SourceGeometry,
    ) -> FfmpegCommand {
        let mut cmd = FfmpegCommand::new(input, output);
        if plan.changes_geometry(source) {
            cmd = cmd.scale(plan.target_width, plan.target_height);
        }
        if plan.reduces_fps(source) {
            cmd = cmd.frame_rate(plan.target_fps);
        }
        cmd.video_codec("libx264")
            .video_bitrate_kbps(plan.video_kbps())
            .audio_codec("aac")
            .audio_bitrate_kbps(plan.audio_bitrate_kbps)
            .audio_channels(2)
            .preset(plan.encoder_preset)
            .faststart()
    }
}

#[async_trait]
impl TranscodeBackend for FfmpegCliBackend {
    fn name(&self) -> &'static str {
        match self.strategy {
            Strategy::BitrateOnly => "ffmpeg-cli",
            Strategy::Ladder => "ffmpeg-cli-ladder",
        }
    }

    fn is_available(&self) -> bool {
        check_ffmpeg().is_ok()
    }

    fn plan(&self, target_size_mb: f64, source: &SourceGeometry) -> CompressionPlan {
        match self.strategy {
            Strategy::BitrateOnly => CompressionPlan::for_encoder(target_size_mb, source),
            Strategy::Ladder => CompressionPlan::with_ladder(target_size_mb, source),
        }
    }

    async fn transcode(
        &self,
        input: &Path,
        output: &Path,
        plan: &CompressionPlan,
        source: &SourceGeometry,
    ) -> MediaResult<()> {
        info!(
            backend = self.name(),
            width = plan.target_width,
            height = plan.target_height,
            fps = plan.target_fps,
            video_kbps = plan.video_kbps(),
            preset = plan.encoder_preset,
            "Compressing video"
        );
        let cmd = self.build_command(input, output, plan, source);
        self.runner.run(&cmd).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source() -> SourceGeometry {
        SourceGeometry {
            width: 1920,
            height: 1080,
            fps: 30.0,
            duration_seconds: 120.0,
            size_bytes: 60 * 1024 * 1024,
        }
    }

    #[test]
    fn test_primary_keeps_geometry() {
        let backend = FfmpegCliBackend::primary();
        let plan = backend.plan(18.0, &source());
        let args = backend
            .build_command(Path::new("in.mp4"), Path::new("out.mp4"), &plan, &source())
            .build_args();
        assert!(!args.contains(&"-vf".to_string()));
        assert!(args.windows(2).any(|w| w[0] == "-b:v" && w[1] == "1100k"));
        assert!(args.windows(2).any(|w| w[0] == "-b:a" && w[1] == "128k"));
        assert!(args.windows(2).any(|w| w[0] == "-preset" && w[1] == "fast"));
    }

    #[test]
    fn test_ladder_adds_filters_when_shrinking() {
        let backend = FfmpegCliBackend::ladder();
        let mut src = source();
        src.duration_seconds = 1800.0;
        let plan = backend.plan(18.0, &src);
        let args = backend
            .build_command(Path::new("in.mp4"), Path::new("out.mp4"), &plan, &src)
            .build_args();
        let vf = args.iter().position(|a| a == "-vf").unwrap();
        assert!(args[vf + 1].starts_with("scale="));
        assert!(args.windows(2).any(|w| w[0] == "-b:a" && w[1] == "64k"));
    }
}
