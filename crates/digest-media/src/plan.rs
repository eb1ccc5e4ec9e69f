//! Compression planning.
//!
//! Bitrate math treats 1 MB as 1024 KB: `kbps = MB * 8 * 1024 / seconds`.
//! Plans are pure values; backends decide how to realize them.

use serde::Serialize;

use crate::probe::{VideoInfo, DEFAULT_DURATION_SECS};

/// Audio reserved by the primary encoder.
pub const PRIMARY_AUDIO_KBPS: u32 = 128;
/// Lowest video bitrate the primary encoder will target.
pub const PRIMARY_MIN_VIDEO_KBPS: f64 = 200.0;
/// Audio used by the ladder-descending fallback.
pub const FALLBACK_AUDIO_KBPS: u32 = 64;
/// Absolute floor for the fallback's video bitrate.
pub const FALLBACK_MIN_VIDEO_KBPS: f64 = 20.0;
/// Bits per pixel per frame below which a rung is considered unwatchable.
const MIN_BITS_PER_PIXEL: f64 = 0.02;
/// Size ratio above which the fallback trades quality for encode speed.
const AGGRESSIVE_RATIO: f64 = 2.0;

const RESOLUTION_LADDER: [(u32, u32); 6] = [
    (1920, 1080),
    (1280, 720),
    (854, 480),
    (640, 360),
    (568, 320),
    (426, 240),
];

const FPS_LADDER: [f64; 5] = [30.0, 24.0, 15.0, 12.0, 10.0];

/// Properties of the source that planning depends on.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SourceGeometry {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    pub duration_seconds: f64,
    pub size_bytes: u64,
}

impl From<&VideoInfo> for SourceGeometry {
    fn from(info: &VideoInfo) -> Self {
        Self {
            width: info.width,
            height: info.height,
            fps: info.fps,
            duration_seconds: info.effective_duration(),
            size_bytes: info.size,
        }
    }
}

impl SourceGeometry {
    fn duration(&self) -> f64 {
        if self.duration_seconds.is_finite() && self.duration_seconds > 0.0 {
            self.duration_seconds
        } else {
            DEFAULT_DURATION_SECS
        }
    }

    fn size_mb(&self) -> f64 {
        self.size_bytes as f64 / (1024.0 * 1024.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompressionPlan {
    pub target_width: u32,
    pub target_height: u32,
    pub target_fps: f64,
    pub target_video_bitrate_kbps: f64,
    pub audio_bitrate_kbps: u32,
    pub encoder_preset: &'static str,
}

/// Total bitrate that lands `target_size_mb` over `duration_seconds`.
pub fn total_bitrate_kbps(target_size_mb: f64, duration_seconds: f64) -> f64 {
    (target_size_mb * 8.0 * 1024.0) / duration_seconds
}

impl CompressionPlan {
    /// Bitrate-only plan for the external encoder: source geometry is kept.
    pub fn for_encoder(target_size_mb: f64, source: &SourceGeometry) -> Self {
        let total = total_bitrate_kbps(target_size_mb, source.duration());
        let video = (total - PRIMARY_AUDIO_KBPS as f64).max(PRIMARY_MIN_VIDEO_KBPS);
        Self {
            target_width: source.width,
            target_height: source.height,
            target_fps: source.fps,
            target_video_bitrate_kbps: video,
            audio_bitrate_kbps: PRIMARY_AUDIO_KBPS,
            encoder_preset: "fast",
        }
    }

    /// Plan that also steps resolution and frame rate down a fixed ladder.
    ///
    /// Rungs larger than the source, or faster than its frame rate, are
    /// skipped. The first rung whose bitrate clears its own sanity floor
    /// wins; otherwise the smallest rung is used.
    pub fn with_ladder(target_size_mb: f64, source: &SourceGeometry) -> Self {
        let total = total_bitrate_kbps(target_size_mb, source.duration());
        let video = (total - FALLBACK_AUDIO_KBPS as f64).max(FALLBACK_MIN_VIDEO_KBPS);

        let ratio = source.size_mb() / target_size_mb;
        let preset = if ratio > AGGRESSIVE_RATIO { "ultrafast" } else { "fast" };

        let (width, height, fps) = choose_rung(video, source).unwrap_or_else(|| {
            let (w, h) = fit_aspect(RESOLUTION_LADDER[5], source);
            let fps = FPS_LADDER[FPS_LADDER.len() - 1];
            (w, h, if source.fps > 0.0 { fps.min(source.fps) } else { fps })
        });

        Self {
            target_width: width,
            target_height: height,
            target_fps: fps,
            target_video_bitrate_kbps: video,
            audio_bitrate_kbps: FALLBACK_AUDIO_KBPS,
            encoder_preset: preset,
        }
    }

    /// Video bitrate rounded down to whole kbps, as encoders expect.
    pub fn video_kbps(&self) -> u32 {
        self.target_video_bitrate_kbps.floor() as u32
    }

    pub fn changes_geometry(&self, source: &SourceGeometry) -> bool {
        self.target_width != source.width || self.target_height != source.height
    }

    pub fn reduces_fps(&self, source: &SourceGeometry) -> bool {
        self.target_fps + 0.01 < source.fps
    }
}

fn choose_rung(video_kbps: f64, source: &SourceGeometry) -> Option<(u32, u32, f64)> {
    for rung in RESOLUTION_LADDER {
        let (w, h) = fit_aspect(rung, source);
        if w > source.width || h > source.height || w == 0 || h == 0 {
            continue;
        }
        for fps in FPS_LADDER {
            if fps > source.fps {
                continue;
            }
            let floor = (w as f64 * h as f64 * fps * MIN_BITS_PER_PIXEL / 1000.0)
                .max(FALLBACK_MIN_VIDEO_KBPS);
            if video_kbps >= floor {
                return Some((w, h, fps));
            }
        }
    }
    None
}

/// Fit a ladder rung to the source aspect ratio with even dimensions.
fn fit_aspect((rung_w, rung_h): (u32, u32), source: &SourceGeometry) -> (u32, u32) {
    if source.width == 0 || source.height == 0 {
        return (rung_w, rung_h);
    }
    let aspect = source.width as f64 / source.height as f64;
    let (w, h) = if aspect > rung_w as f64 / rung_h as f64 {
        (rung_w, (rung_w as f64 / aspect) as u32)
    } else {
        ((rung_h as f64 * aspect) as u32, rung_h)
    };
    (w - w % 2, h - h % 2)
}
