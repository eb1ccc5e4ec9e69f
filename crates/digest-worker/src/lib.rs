//! Daily digest worker.
//!
//! This crate provides:
//! - Retry classification with exponential backoff
//! - A managed runner for long-lived AI CLIs with idle detection
//! - The daily report pipeline and Markdown rendering
//! - The video summary sub-pipeline
//! - Reddit, GitHub Trending and RSS collectors
//! - Git publishing

pub mod collect;
pub mod config;
pub mod daily;
pub mod error;
pub mod logging;
pub mod markdown;
pub mod publish;
pub mod retry;
pub mod runner;
pub mod text;
pub mod video_report;

pub use config::WorkerConfig;
pub use daily::{DailyPipeline, DailySummary, RunContext};
pub use error::{WorkerError, WorkerResult};
pub use logging::{init_tracing, StepLogger};
pub use publish::{GitPublisher, PublishOutcome};
pub use retry::{retry_async, RetryDecision, RetryPolicy};
pub use runner::{ManagedRunner, ProcessRun, ProcessSpec, RunnerConfig, SideEffectExpectation, Termination};
pub use video_report::{GeminiCli, VideoReportOptions, VideoReportPipeline};
