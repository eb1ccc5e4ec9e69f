//! Shared data models for the daily digest pipeline.
//!
//! This crate provides Serde-serializable types for:
//! - News report artifacts written by the coding agent
//! - Channel feed entries and video assets
//! - Download quality levels
//! - YouTube URL and filename helpers

pub mod feed;
pub mod report;
pub mod utils;
pub mod video;

pub use feed::{dedupe_entries, FeedEntry};
pub use report::{Article, KeyFinding, Report, SchemaError};
pub use utils::{
    channel_id_from_url, extract_youtube_id, normalize_title, safe_filename, video_id_from_link,
    YoutubeIdError, YoutubeIdResult,
};
pub use video::{QualityLevel, VideoAsset};
