//! Daily report pipeline.
//!
//! Runs the coding agent once per prompt document, normalizes each JSON
//! artifact it leaves behind, renders Markdown, then runs the video summary
//! step, archives to the store and publishes the day's directory with git.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use digest_models::Report;
use digest_store::{ReportRow, TursoClient};
use serde_json::Value;
use tracing::{error, info, warn};

use crate::config::WorkerConfig;
use crate::error::{WorkerError, WorkerResult};
use crate::logging::StepLogger;
use crate::markdown::{render_digest, render_failure, render_report};
use crate::publish::{GitPublisher, PublishOutcome};
use crate::retry::retry_async;
use crate::runner::{diagnostic_file_name, resolve_command, ManagedRunner, ProcessSpec, SideEffectExpectation};
use crate::video_report::reports::render_error_report;
use crate::video_report::VideoReportPipeline;

/// File the agent is asked to write; renamed to `report_N.json` afterwards.
pub const ARTIFACT_FILE: &str = "report.json";
pub const ARTIFACT_ENV: &str = "DIGEST_ARTIFACT_PATH";
pub const DIGEST_FILE: &str = "digest.md";
pub const VIDEO_REPORT_FILE: &str = "gemini_youtube_report.md";
const TIMESTAMP_PLACEHOLDER: &str = "{utc_timestamp}";

const TRANSIENT_FILES: &[&str] = &[
    "temp_tasklist.md",
    "report.json",
    "report_1.json",
    "report_2.json",
    "report_3.json",
];
const TRANSIENT_PATTERNS: &[(&str, &str)] = &[("codex_raw_output_", ".txt"), ("codex_prompt_", ".md")];

/// Everything one run needs, built once and passed down.
pub struct RunContext {
    pub config: WorkerConfig,
    pub now: DateTime<Utc>,
    /// `YYYY-MM-DD`
    pub date: String,
    pub date_dir: PathBuf,
    pub store: Option<TursoClient>,
    pub runner: ManagedRunner,
}

impl RunContext {
    pub fn new(config: WorkerConfig, now: DateTime<Utc>, store: Option<TursoClient>) -> Self {
        let date = now.format("%Y-%m-%d").to_string();
        let date_dir = config.reports_dir.join(&date);
        Self {
            config,
            now,
            date,
            date_dir,
            store,
            runner: ManagedRunner::default(),
        }
    }

    pub fn with_runner(mut self, runner: ManagedRunner) -> Self {
        self.runner = runner;
        self
    }

    /// `YYYY-MM-DDTHH:MM:SSZ`
    pub fn utc_timestamp(&self) -> String {
        self.now.format("%Y-%m-%dT%H:%M:%SZ").to_string()
    }

    pub fn diagnostic_path(&self) -> PathBuf {
        self.config.reports_dir.join(diagnostic_file_name(self.now))
    }

    pub fn artifact_path(&self) -> PathBuf {
        self.date_dir.join(ARTIFACT_FILE)
    }
}

/// One prompt document that produced a valid report.
#[derive(Debug, Clone)]
pub struct DocumentOutcome {
    /// 1-based position in the prompt list
    pub index: usize,
    pub prompt: String,
    pub json_path: PathBuf,
    pub markdown_path: PathBuf,
    pub markdown: String,
    pub report: Value,
}

#[derive(Debug, Default)]
pub struct DailySummary {
    pub documents: Vec<DocumentOutcome>,
    /// `(prompt document, error)` for documents that produced nothing
    pub failures: Vec<(String, String)>,
    pub digest_path: Option<PathBuf>,
    pub video_report_path: Option<PathBuf>,
    pub archived: usize,
    pub publish: Option<PublishOutcome>,
}

pub fn substitute_timestamp(template: &str, timestamp: &str) -> String {
    template.replace(TIMESTAMP_PLACEHOLDER, timestamp)
}

fn is_transient(name: &str) -> bool {
    TRANSIENT_FILES.contains(&name)
        || TRANSIENT_PATTERNS
            .iter()
            .any(|(prefix, suffix)| name.starts_with(prefix) && name.ends_with(suffix))
}

/// Remove leftovers of earlier runs from `dir`. Returns how many went.
pub async fn cleanup_temp_files(dir: &Path) -> WorkerResult<usize> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e.into()),
    };

    let mut removed = 0;
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name().to_string_lossy().to_string();
        if !is_transient(&name) || !entry.file_type().await?.is_file() {
            continue;
        }
        match tokio::fs::remove_file(entry.path()).await {
            Ok(()) => removed += 1,
            Err(e) => warn!(file = %name, error = %e, "Could not remove transient file"),
        }
    }
    if removed > 0 {
        info!(dir = %dir.display(), removed, "Removed transient files");
    }
    Ok(removed)
}

/// `HOME`/`USERPROFILE` when the environment lacks them, plus `CODEX_HOME`.
pub fn agent_env_overlay() -> Vec<(String, String)> {
    let home = std::env::var("HOME")
        .ok()
        .or_else(|| std::env::var("USERPROFILE").ok())
        .filter(|h| !h.is_empty());
    let mut env = Vec::new();
    if let Some(home) = home {
        for key in ["HOME", "USERPROFILE"] {
            if std::env::var_os(key).is_none() {
                env.push((key.to_string(), home.clone()));
            }
        }
        env.push((
            "CODEX_HOME".to_string(),
            Path::new(&home).join(".codex").to_string_lossy().to_string(),
        ));
    }
    env
}

/// How the video summary step takes part in a run.
pub enum VideoStep {
    Disabled,
    Ready(VideoReportPipeline),
    /// The toolchain could not be set up; an error report is written instead
    Unavailable(WorkerError),
}

pub struct DailyPipeline {
    ctx: RunContext,
    video: VideoStep,
    publisher: Option<GitPublisher>,
}

impl DailyPipeline {
    pub fn new(ctx: RunContext) -> Self {
        Self {
            ctx,
            video: VideoStep::Disabled,
            publisher: None,
        }
    }

    pub fn with_video(mut self, video: VideoStep) -> Self {
        self.video = video;
        self
    }

    pub fn with_publisher(mut self, publisher: GitPublisher) -> Self {
        self.publisher = Some(publisher);
        self
    }

    pub fn context(&self) -> &RunContext {
        &self.ctx
    }

    fn prompt_paths(&self) -> WorkerResult<Vec<(String, PathBuf)>> {
        self.ctx
            .config
            .prompt_files
            .iter()
            .map(|name| {
                let path = self.ctx.config.repo_path(name);
                if path.is_file() {
                    Ok((name.clone(), path))
                } else {
                    Err(WorkerError::missing_input(format!("prompt document {}", path.display())))
                }
            })
            .collect()
    }

    /// Run every step. Fails only when a prompt document or the agent binary
    /// is missing; everything else is recorded in the summary.
    pub async fn run(&self) -> WorkerResult<DailySummary> {
        let ctx = &self.ctx;
        let logger = StepLogger::new(&ctx.date, "daily");
        logger.log_start(&format!("{} prompt documents", ctx.config.prompt_files.len()));

        let prompts = self.prompt_paths()?;
        resolve_command(&ctx.config.codex_command)?;

        tokio::fs::create_dir_all(&ctx.date_dir).await?;
        cleanup_temp_files(&ctx.config.reports_dir).await?;

        let mut summary = DailySummary::default();
        for (idx, (name, path)) in prompts.iter().enumerate() {
            let index = idx + 1;
            match self.process_prompt(index, name, path).await {
                Ok(outcome) => summary.documents.push(outcome),
                Err(e) if matches!(e, WorkerError::CommandNotFound(_) | WorkerError::MissingInput(_)) => {
                    logger.log_error(&format!("{name}: {e}"));
                    return Err(e);
                }
                Err(e) => {
                    logger.log_error(&format!("{name}: {e}"));
                    self.write_failure(index, name, &e).await?;
                    summary.failures.push((name.clone(), e.to_string()));
                }
            }
        }

        if !summary.documents.is_empty() {
            let markdowns: Vec<String> = summary.documents.iter().map(|d| d.markdown.clone()).collect();
            let path = ctx.date_dir.join(DIGEST_FILE);
            tokio::fs::write(&path, render_digest(&ctx.date, &markdowns)).await?;
            info!(path = %path.display(), reports = markdowns.len(), "Wrote digest");
            summary.digest_path = Some(path);
        }

        match &self.video {
            VideoStep::Disabled => {}
            VideoStep::Ready(video) => {
                summary.video_report_path = Some(self.run_video_step(video).await?);
            }
            VideoStep::Unavailable(e) => {
                summary.video_report_path = Some(self.write_video_error(e).await?);
            }
        }

        summary.archived = self.archive(&summary.documents).await;

        if let Some(publisher) = &self.publisher {
            match publisher.publish(&[ctx.date_dir.clone()], &ctx.date).await {
                Ok(outcome) => summary.publish = Some(outcome),
                Err(e) => logger.log_error(&format!("publish: {e}")),
            }
        }

        logger.log_completion(&format!(
            "{} reports, {} failed",
            summary.documents.len(),
            summary.failures.len()
        ));
        Ok(summary)
    }

    fn agent_spec(&self, prompt: &str, artifact: &Path) -> ProcessSpec {
        let config = &self.ctx.config;
        let mut spec = ProcessSpec::new(&config.codex_command)
            .args([
                "exec".to_string(),
                "--yolo".to_string(),
                "-m".to_string(),
                config.codex_model.clone(),
                "-c".to_string(),
                format!("model_reasoning_effort={}", config.codex_reasoning_effort),
                "-c".to_string(),
                "text.verbosity=\"medium\"".to_string(),
            ])
            .current_dir(&config.repo_root)
            .stdin(prompt)
            .env(ARTIFACT_ENV, artifact.to_string_lossy())
            .expect(SideEffectExpectation::new(artifact).with_fresh_after(SystemTime::now()))
            .idle_timeout(config.codex_idle_timeout)
            .overall_timeout(config.codex_max_silence)
            .diagnostic_file(self.ctx.diagnostic_path())
            .reap_auxiliary(true);
        for (key, value) in agent_env_overlay() {
            spec = spec.env(key, value);
        }
        spec
    }

    async fn process_prompt(&self, index: usize, name: &str, path: &Path) -> WorkerResult<DocumentOutcome> {
        let ctx = &self.ctx;
        let logger = StepLogger::new(&ctx.date, &format!("report_{index}"));
        logger.log_start(name);

        let template = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| WorkerError::missing_input(format!("{}: {e}", path.display())))?;
        let prompt = substitute_timestamp(&template, &ctx.utc_timestamp());

        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| format!("prompt_{index}"));
        let copy = ctx
            .config
            .reports_dir
            .join(format!("codex_prompt_{stem}_{}.md", ctx.date));
        tokio::fs::write(&copy, &prompt).await?;

        let artifact = ctx.artifact_path();
        remove_stale(&artifact).await;

        let policy = ctx.config.retry.clone().with_operation_name(format!("codex:{name}"));
        let result = retry_async(&policy, || {
            let spec = self.agent_spec(&prompt, &artifact);
            let runner = &ctx.runner;
            async move { runner.run(spec).await }
        })
        .await;

        if let Err(e) = result {
            if SideEffectExpectation::new(&artifact).is_satisfied().await {
                logger.log_warning(&format!("agent reported failure but left its report: {e}"));
            } else {
                return Err(e);
            }
        }

        let outcome = self.normalize_artifact(index, name, &artifact).await;
        remove_stale(&artifact).await;
        let outcome = outcome?;
        logger.log_completion(&outcome.json_path.display().to_string());
        Ok(outcome)
    }

    async fn normalize_artifact(&self, index: usize, name: &str, artifact: &Path) -> WorkerResult<DocumentOutcome> {
        let ctx = &self.ctx;
        let raw = tokio::fs::read_to_string(artifact).await?;
        let (report, value) = Report::from_json_str(&raw)
            .map_err(|e| WorkerError::schema_violation(artifact, e.to_string()))?;

        let json_path = ctx.date_dir.join(format!("report_{index}.json"));
        tokio::fs::write(&json_path, serde_json::to_string_pretty(&value)?).await?;

        let markdown = render_report(&report);
        let markdown_path = ctx.date_dir.join(format!("report_{index}.md"));
        tokio::fs::write(&markdown_path, &markdown).await?;
        info!(
            json = %json_path.display(),
            articles = report.article_count(),
            "Normalized report"
        );

        Ok(DocumentOutcome {
            index,
            prompt: name.to_string(),
            json_path,
            markdown_path,
            markdown,
            report: value,
        })
    }

    /// Leave the failure next to the reports that do get published.
    async fn write_failure(&self, index: usize, name: &str, error: &WorkerError) -> WorkerResult<PathBuf> {
        let path = self.ctx.date_dir.join(format!("report_{index}.md"));
        let body = render_failure(name, &self.ctx.utc_timestamp(), &error.to_string());
        tokio::fs::write(&path, body).await?;
        Ok(path)
    }

    /// Video summary step; a final failure becomes an error report.
    async fn run_video_step(&self, video: &VideoReportPipeline) -> WorkerResult<PathBuf> {
        let ctx = &self.ctx;
        let target = ctx.date_dir.join(VIDEO_REPORT_FILE);
        let policy = ctx.config.retry.clone().with_operation_name("video_report");

        match retry_async(&policy, || video.run(ctx.now)).await {
            Ok(report) => {
                tokio::fs::copy(&report, &target).await?;
                info!(path = %target.display(), "Copied video summary report");
                Ok(target)
            }
            Err(e) => self.write_video_error(&e).await,
        }
    }

    async fn write_video_error(&self, e: &WorkerError) -> WorkerResult<PathBuf> {
        error!(error = %e, "Video summary step failed");
        let target = self.ctx.date_dir.join(VIDEO_REPORT_FILE);
        let detail = format!("{e:?}");
        let body = render_error_report(&e.to_string(), Some(&detail), self.ctx.now);
        tokio::fs::write(&target, body).await?;
        Ok(target)
    }

    /// Push reports to the store when configured. Returns how many landed.
    async fn archive(&self, documents: &[DocumentOutcome]) -> usize {
        let Some(store) = &self.ctx.store else {
            return 0;
        };
        let policy = self.ctx.config.retry.clone().with_operation_name("turso");
        let mut archived = 0;
        for doc in documents {
            let row = match ReportRow::from_report(&doc.report, Some(&doc.markdown), &self.ctx.date, Utc::now()) {
                Ok(row) => row,
                Err(e) => {
                    warn!(report = doc.index, error = %e, "Could not build store row");
                    continue;
                }
            };
            let pushed = retry_async(&policy, || async {
                store.push_daily_report(&row).await.map_err(WorkerError::from)
            })
            .await;
            match pushed {
                Ok(id) => {
                    info!(report_id = %id, "Archived report");
                    archived += 1;
                }
                Err(e) => warn!(report = doc.index, error = %e, "Archiving failed"),
            }
        }
        archived
    }
}

async fn remove_stale(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "Could not remove stale artifact"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_substitute_timestamp() {
        assert_eq!(
            substitute_timestamp("now: {utc_timestamp}, again {utc_timestamp}", "2026-03-01T00:00:00Z"),
            "now: 2026-03-01T00:00:00Z, again 2026-03-01T00:00:00Z"
        );
    }

    #[test]
    fn test_transient_names() {
        for name in [
            "temp_tasklist.md",
            "report.json",
            "report_2.json",
            "codex_raw_output_20260301.txt",
            "codex_prompt_AGENTS_1_2026-03-01.md",
        ] {
            assert!(is_transient(name), "{name}");
        }
        for name in ["report_4.json", "digest.md", "codex_prompt_x.txt"] {
            assert!(!is_transient(name), "{name}");
        }
    }

    #[tokio::test]
    async fn test_cleanup_keeps_dated_dirs() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("report.json"), "{}").unwrap();
        std::fs::write(dir.path().join("codex_raw_output_20260301.txt"), "x").unwrap();
        std::fs::write(dir.path().join("notes.md"), "keep").unwrap();
        std::fs::create_dir(dir.path().join("2026-03-01")).unwrap();

        assert_eq!(cleanup_temp_files(dir.path()).await.unwrap(), 2);
        assert!(dir.path().join("notes.md").exists());
        assert!(dir.path().join("2026-03-01").is_dir());
        assert_eq!(cleanup_temp_files(&dir.path().join("missing")).await.unwrap(), 0);
    }

    #[test]
    fn test_context_paths() {
        let config = WorkerConfig {
            reports_dir: PathBuf::from("/srv/news/reports"),
            ..Default::default()
        };
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 6, 5, 4).unwrap();
        let ctx = RunContext::new(config, now, None);
        assert_eq!(ctx.date, "2026-03-01");
        assert_eq!(ctx.date_dir, PathBuf::from("/srv/news/reports/2026-03-01"));
        assert_eq!(ctx.utc_timestamp(), "2026-03-01T06:05:04Z");
        assert_eq!(
            ctx.diagnostic_path(),
            PathBuf::from("/srv/news/reports/codex_raw_output_20260301.txt")
        );
    }

    #[tokio::test]
    async fn test_missing_prompt_aborts() {
        let dir = tempfile::tempdir().unwrap();
        let config = WorkerConfig {
            repo_root: dir.path().to_path_buf(),
            reports_dir: dir.path().join("reports"),
            prompt_files: vec!["AGENTS_1.md".into()],
            ..Default::default()
        };
        let pipeline = DailyPipeline::new(RunContext::new(config, Utc::now(), None));
        let err = pipeline.run().await.unwrap_err();
        assert!(matches!(err, WorkerError::MissingInput(_)));
    }
}
