//! Full daily run against a fake agent CLI.

#![cfg(unix)]

use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use digest_worker::daily::{VideoStep, DIGEST_FILE, VIDEO_REPORT_FILE};
use digest_worker::{
    DailyPipeline, ManagedRunner, RetryPolicy, RunContext, RunnerConfig, WorkerConfig, WorkerError,
};

/// Writes a one-article report to the artifact path, then exits non-zero
/// the way the agent does when its sandbox tears down badly.
const FAKE_AGENT: &str = r#"#!/bin/sh
cat > /dev/null
cat > "$DIGEST_ARTIFACT_PATH" <<'EOF'
{
  "generated_at": "2026-03-01T06:00:00Z",
  "site": "news.example",
  "articles": [
    {
      "title": "Model release",
      "date": "2026-02-28",
      "executive_summary": ["A new model shipped.", "It is open weights."],
      "key_findings": [],
      "references": []
    }
  ]
}
EOF
exit 1
"#;

fn write_script(path: &Path, body: &str) {
    std::fs::write(path, body).unwrap();
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).unwrap();
}

fn context(config: WorkerConfig, now: chrono::DateTime<Utc>) -> RunContext {
    let runner = ManagedRunner::new(RunnerConfig {
        poll_interval: Duration::from_millis(50),
        artifact_grace: Duration::from_millis(200),
        artifact_poll: Duration::from_millis(50),
        ..Default::default()
    });
    RunContext::new(config, now, None).with_runner(runner)
}

fn config(root: &Path, agent: &Path) -> WorkerConfig {
    WorkerConfig {
        repo_root: root.to_path_buf(),
        reports_dir: root.join("reports"),
        data_dir: root.join("data"),
        codex_command: agent.to_string_lossy().to_string(),
        codex_idle_timeout: None,
        codex_max_silence: Duration::from_secs(30),
        video_step: false,
        git_push: false,
        retry: RetryPolicy::new("test")
            .with_max_retries(0)
            .with_base_delay(Duration::from_millis(1)),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_daily_run_uses_artifact_left_by_failing_agent() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    let agent = root.join("fake-codex");
    write_script(&agent, FAKE_AGENT);
    for n in 1..=3 {
        std::fs::write(root.join(format!("AGENTS_{n}.md")), "Collect news at {utc_timestamp}\n").unwrap();
    }

    let now = Utc.with_ymd_and_hms(2026, 3, 1, 6, 0, 0).unwrap();
    let ctx = context(config(root, &agent), now);
    let pipeline = DailyPipeline::new(ctx).with_video(VideoStep::Disabled);
    let summary = pipeline.run().await.unwrap();

    assert_eq!(summary.documents.len(), 3);
    assert!(summary.failures.is_empty());
    assert_eq!(summary.archived, 0);
    assert!(summary.publish.is_none());
    assert!(summary.video_report_path.is_none());

    let date_dir = root.join("reports/2026-03-01");
    for n in 1..=3 {
        assert!(date_dir.join(format!("report_{n}.json")).is_file());
        assert!(date_dir.join(format!("report_{n}.md")).is_file());
    }
    assert!(!date_dir.join("report.json").exists());

    let prompt_copy = root.join("reports/codex_prompt_AGENTS_1_2026-03-01.md");
    assert_eq!(
        std::fs::read_to_string(prompt_copy).unwrap(),
        "Collect news at 2026-03-01T06:00:00Z\n"
    );

    let digest = std::fs::read_to_string(date_dir.join(DIGEST_FILE)).unwrap();
    let sections: Vec<&str> = digest.split("\n## ").skip(1).collect();
    assert_eq!(sections.len(), 3);
    for section in sections {
        assert!(section.starts_with("Model release"));
        let summary = section.split("### Executive Summary\n").nth(1).unwrap();
        let bullets = summary.lines().take_while(|l| l.starts_with("- ")).count();
        assert_eq!(bullets, 2);
    }
    assert!(!digest.contains("### Key Findings"));
}

#[tokio::test]
async fn test_daily_run_writes_error_report_when_video_toolchain_missing() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    let agent = root.join("fake-codex");
    write_script(&agent, FAKE_AGENT);

    let mut config = config(root, &agent);
    config.prompt_files = vec!["AGENTS_1.md".into()];
    std::fs::write(root.join("AGENTS_1.md"), "Collect news\n").unwrap();

    let now = Utc.with_ymd_and_hms(2026, 3, 1, 6, 0, 0).unwrap();
    let pipeline = DailyPipeline::new(context(config, now)).with_video(VideoStep::Unavailable(
        WorkerError::CommandNotFound("yt-dlp".into()),
    ));
    let summary = pipeline.run().await.unwrap();

    let video = summary.video_report_path.unwrap();
    assert_eq!(video, root.join("reports/2026-03-01").join(VIDEO_REPORT_FILE));
    let body = std::fs::read_to_string(video).unwrap();
    assert!(body.contains("yt-dlp"));
}

#[tokio::test]
async fn test_daily_run_aborts_when_agent_missing() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    std::fs::write(root.join("AGENTS_1.md"), "x").unwrap();

    let mut config = config(root, Path::new("definitely-not-a-real-agent-cli"));
    config.prompt_files = vec!["AGENTS_1.md".into()];
    let err = DailyPipeline::new(RunContext::new(config, Utc::now(), None))
        .run()
        .await
        .unwrap_err();
    assert!(matches!(err, WorkerError::CommandNotFound(_)));
}

/// Writes a malformed report for prompts mentioning "broken" and a valid
/// one otherwise.
const PICKY_AGENT: &str = r#"#!/bin/sh
prompt=$(cat)
case "$prompt" in
  *broken*)
    echo '{"articles": {}}' > "$DIGEST_ARTIFACT_PATH"
    ;;
  *)
    echo '{"site": "news.example", "articles": [{"title": "Chip news", "executive_summary": ["One.", "Two."]}]}' > "$DIGEST_ARTIFACT_PATH"
    ;;
esac
exit 0
"#;

#[tokio::test]
async fn test_schema_violation_only_fails_its_document() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    let agent = root.join("fake-codex");
    write_script(&agent, PICKY_AGENT);
    std::fs::write(root.join("AGENTS_1.md"), "broken prompt\n").unwrap();
    std::fs::write(root.join("AGENTS_2.md"), "good prompt\n").unwrap();

    let mut config = config(root, &agent);
    config.prompt_files = vec!["AGENTS_1.md".into(), "AGENTS_2.md".into()];
    let now = Utc.with_ymd_and_hms(2026, 3, 1, 6, 0, 0).unwrap();
    let summary = DailyPipeline::new(context(config, now))
        .run()
        .await
        .unwrap();

    assert_eq!(summary.documents.len(), 1);
    assert_eq!(summary.documents[0].index, 2);
    assert_eq!(summary.failures.len(), 1);
    assert_eq!(summary.failures[0].0, "AGENTS_1.md");
    assert!(summary.failures[0].1.contains("schema violation"));

    let date_dir = root.join("reports/2026-03-01");
    assert!(!date_dir.join("report_1.json").exists());
    assert!(date_dir.join("report_2.json").is_file());
    let second = std::fs::read_to_string(date_dir.join("report_2.md")).unwrap();
    assert!(second.contains("## Chip news"));

    let first = std::fs::read_to_string(date_dir.join("report_1.md")).unwrap();
    assert!(first.starts_with("# AI News Report (Error)"));
    assert!(first.contains("schema violation"));

    let digest = std::fs::read_to_string(date_dir.join(DIGEST_FILE)).unwrap();
    assert!(digest.contains("- Reports: 1"));
}

#[tokio::test]
async fn test_failed_document_leaves_error_report_in_date_dir() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    let agent = root.join("fake-codex");
    write_script(
        &agent,
        "#!/bin/sh\ncat > /dev/null\necho 'permission denied by sandbox' >&2\nexit 2\n",
    );
    std::fs::write(root.join("AGENTS_1.md"), "Collect news\n").unwrap();

    let mut config = config(root, &agent);
    config.prompt_files = vec!["AGENTS_1.md".into()];
    let now = Utc.with_ymd_and_hms(2026, 3, 1, 6, 0, 0).unwrap();
    let summary = DailyPipeline::new(context(config, now))
        .run()
        .await
        .unwrap();

    assert!(summary.documents.is_empty());
    assert_eq!(summary.failures.len(), 1);

    let error_report = std::fs::read_to_string(root.join("reports/2026-03-01/report_1.md")).unwrap();
    assert!(error_report.contains("- Prompt: AGENTS_1.md"));
    assert!(error_report.contains("Process exited with code 2"));
    assert!(error_report.contains("permission denied by sandbox"));
}
