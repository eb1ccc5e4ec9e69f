//! Video download tiers and the local asset handed to the summarizer.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Download format tier, tried best-first until the size ceiling is met.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityLevel {
    Best,
    Medium,
    Low,
}

impl QualityLevel {
    /// All tiers in the order they are attempted.
    pub const DESCENDING: [QualityLevel; 3] =
        [QualityLevel::Best, QualityLevel::Medium, QualityLevel::Low];

    pub fn as_str(&self) -> &'static str {
        match self {
            QualityLevel::Best => "best",
            QualityLevel::Medium => "medium",
            QualityLevel::Low => "low",
        }
    }

    /// yt-dlp format selector for this tier.
    ///
    /// With a merger available separate video and audio streams can be
    /// combined; without one only pre-muxed mp4 formats are usable.
    pub fn format_selector(&self, can_merge: bool) -> &'static str {
        match (self, can_merge) {
            (QualityLevel::Best, true) => "bv*+ba/b",
            (QualityLevel::Medium, true) => {
                "bestvideo[height<=720]+bestaudio/best[height<=720]/bestvideo[height<=480]+bestaudio/best[height<=480]"
            }
            (QualityLevel::Low, true) => "worstvideo[height<=480]+worstaudio/worst[height<=480]/worst",
            (QualityLevel::Best, false) => "best[ext=mp4][vcodec*=avc1]/best[ext=mp4]/best",
            (QualityLevel::Medium, false) => {
                "best[height<=720][ext=mp4][vcodec*=avc1]/best[height<=720][ext=mp4]/best[height<=720]/best[height<=480]"
            }
            (QualityLevel::Low, false) => "worst[height<=480][ext=mp4]/worst[height<=480]/worst",
        }
    }
}

impl fmt::Display for QualityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QualityLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "best" => Ok(QualityLevel::Best),
            "medium" => Ok(QualityLevel::Medium),
            "low" => Ok(QualityLevel::Low),
            other => Err(format!("unknown quality level: {other}")),
        }
    }
}

/// A downloaded video on local disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoAsset {
    pub source_url: String,
    pub local_path: PathBuf,
    pub size_bytes: u64,
    pub duration_seconds: f64,
    pub width: u32,
    pub height: u32,
    pub frame_rate: f64,
}

impl VideoAsset {
    pub fn size_mb(&self) -> f64 {
        self.size_bytes as f64 / (1024.0 * 1024.0)
    }

    pub fn fits(&self, ceiling_bytes: u64) -> bool {
        self.size_bytes <= ceiling_bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quality_order() {
        assert!(QualityLevel::Best < QualityLevel::Medium);
        assert!(QualityLevel::Medium < QualityLevel::Low);
        assert_eq!(QualityLevel::DESCENDING[0], QualityLevel::Best);
    }

    #[test]
    fn test_selectors_without_merger_are_single_stream() {
        for level in QualityLevel::DESCENDING {
            assert!(!level.format_selector(false).contains('+'));
        }
        assert!(QualityLevel::Best.format_selector(true).contains('+'));
    }

    #[test]
    fn test_parse_quality() {
        assert_eq!("MEDIUM".parse::<QualityLevel>().unwrap(), QualityLevel::Medium);
        assert!("ultra".parse::<QualityLevel>().is_err());
    }
}
