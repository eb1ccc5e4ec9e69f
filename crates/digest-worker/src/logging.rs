//! Structured step logging and subscriber setup.

use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Install the global subscriber.
///
/// JSON lines when `LOG_FORMAT=json`, coloured text otherwise. `RUST_LOG`
/// overrides the default filter.
pub fn init_tracing() {
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,digest_worker=debug,digest_media=info"));

    let result = if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .try_init()
    };
    if let Err(e) = result {
        eprintln!("tracing already initialised: {e}");
    }
}

/// Logger for one step of a pipeline run.
///
/// Every line carries the run date and the step name so a day's log can be
/// filtered per step.
#[derive(Debug, Clone)]
pub struct StepLogger {
    run_date: String,
    step: String,
}

impl StepLogger {
    pub fn new(run_date: &str, step: &str) -> Self {
        Self {
            run_date: run_date.to_string(),
            step: step.to_string(),
        }
    }

    pub fn log_start(&self, message: &str) {
        info!(run_date = %self.run_date, step = %self.step, "Step started: {}", message);
    }

    pub fn log_progress(&self, message: &str) {
        info!(run_date = %self.run_date, step = %self.step, "Step progress: {}", message);
    }

    pub fn log_warning(&self, message: &str) {
        warn!(run_date = %self.run_date, step = %self.step, "Step warning: {}", message);
    }

    pub fn log_error(&self, message: &str) {
        error!(run_date = %self.run_date, step = %self.step, "Step error: {}", message);
    }

    pub fn log_completion(&self, message: &str) {
        info!(run_date = %self.run_date, step = %self.step, "Step completed: {}", message);
    }

    pub fn step(&self) -> &str {
        &self.step
    }

    pub fn run_date(&self) -> &str {
        &self.run_date
    }
}
