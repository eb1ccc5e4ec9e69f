//! Interchangeable transcoding backends.
//!
//! The primary backend drives the FFmpeg CLI at a target bitrate. The
//! fallback additionally steps resolution and frame rate down; it runs
//! in-process over libav when the `libav` feature is enabled, and through
//! the CLI with scale/fps filters otherwise.

mod cli;
#[cfg(feature = "libav")]
mod libav;

use std::path::Path;

use async_trait::async_trait;

use crate::error::MediaResult;
use crate::plan::{CompressionPlan, SourceGeometry};

pub use cli::FfmpegCliBackend;
#[cfg(feature = "libav")]
pub use libav::LibavBackend;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TranscodeBackend: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether the backend's toolchain is present on this host.
    fn is_available(&self) -> bool;

    fn plan(&self, target_size_mb: f64, source: &SourceGeometry) -> CompressionPlan;

    async fn transcode(
        &self,
        input: &Path,
        output: &Path,
        plan: &CompressionPlan,
        source: &SourceGeometry,
    ) -> MediaResult<()>;
}

/// The fallback backend for this build.
pub fn default_fallback() -> Box<dyn TranscodeBackend> {
    #[cfg(feature = "libav")]
    {
        Box::new(LibavBackend::new())
    }
    #[cfg(not(feature = "libav"))]
    {
        Box::new(FfmpegCliBackend::ladder())
    }
}
