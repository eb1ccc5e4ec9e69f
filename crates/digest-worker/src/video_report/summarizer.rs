//! Video summarization through the Gemini CLI.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::error::{contains_rate_limit_marker, WorkerError, WorkerResult};
use crate::runner::{ManagedRunner, ProcessSpec};

/// Stderr line the CLI prints when an attachment is over its upload limit.
pub const FILE_TOO_LARGE_MARKER: &str = "File size exceeds the 20MB limit";

const REQUIRED_SECTIONS: &[&str] = &["## 要約", "## 要点", "## 主張", "## 推奨"];

const ANALYSIS_FAILURE_MARKERS: &[&str] = &[
    "動画を解析できませんでした",
    "動画を視聴していない",
    "動画ファイルの内容のみに基づいて",
    "解析できませんでした",
    "could not parse",
    "failed to parse",
    "unable to process video",
];

const MIN_SUMMARY_CHARS: usize = 50;
const MAX_ENGLISH_LINE_RATIO: f64 = 0.3;

/// Turns a local video file into a Japanese summary.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, video: &Path) -> WorkerResult<String>;
}

/// Prompt asking for the four-section summary of the attached video.
pub fn build_prompt(video: &Path, extra_prompt: Option<&str>) -> String {
    let mut lines = vec![
        format!("@{}", video.display()),
        String::new(),
        "### タスク".to_string(),
        String::new(),
        "1.上記の動画ファイルを視聴する 2.その内容を日本語で要約する 3.要約のみ出力し、要約以外の関係ないコメントや説明は一切含めないでください。".to_string(),
        "出力は3番のみください。".to_string(),
        String::new(),
        "### 出力形式".to_string(),
        String::new(),
        "## 要約（100〜180字）".to_string(),
        "動画の内容を簡潔に説明".to_string(),
        String::new(),
        "## 要点（3〜5個）".to_string(),
        "- ポイント1".to_string(),
        "- ポイント2".to_string(),
        "- ポイント3".to_string(),
        String::new(),
        "## 主張・結論".to_string(),
        "動画の核心メッセージを1〜2文で".to_string(),
        String::new(),
        "## 推奨アクション".to_string(),
        "視聴者への具体的なアクション1つ".to_string(),
    ];
    if let Some(extra) = extra_prompt.map(str::trim).filter(|s| !s.is_empty()) {
        lines.push(String::new());
        lines.push("## 追加指示".to_string());
        lines.push(extra.to_string());
    }
    lines.join("\n")
}

/// Drop any preamble before the first `## ` heading.
///
/// Falls back to the raw output when almost nothing would remain.
pub fn clean_output(raw: &str) -> String {
    let lines: Vec<&str> = raw.lines().collect();
    let cleaned = match lines.iter().position(|l| l.starts_with("## ")) {
        Some(start) => lines[start..].join("\n").trim().to_string(),
        None => raw.trim().to_string(),
    };
    if cleaned.chars().count() < 10 {
        raw.trim().to_string()
    } else {
        cleaned
    }
}

/// Reject summaries that are empty, admit failure, lack sections or are
/// mostly English.
pub fn validate_summary(summary: &str) -> WorkerResult<()> {
    let trimmed = summary.trim();
    if trimmed.chars().count() < MIN_SUMMARY_CHARS {
        return Err(WorkerError::QualityValidation("要約が短すぎるか空です".to_string()));
    }

    let lower = trimmed.to_lowercase();
    if ANALYSIS_FAILURE_MARKERS.iter().any(|m| lower.contains(m)) {
        return Err(WorkerError::QualityValidation(
            "Gemini CLIが動画を解析できませんでした。動画ファイルが正しく読み込まれていない可能性があります".to_string(),
        ));
    }

    let missing: Vec<&str> = REQUIRED_SECTIONS
        .iter()
        .copied()
        .filter(|s| !trimmed.contains(s))
        .collect();
    if !missing.is_empty() {
        return Err(WorkerError::QualityValidation(format!(
            "必須セクションが不足: {}",
            missing.join(", ")
        )));
    }

    let content: Vec<&str> = trimmed
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .collect();
    if !content.is_empty() {
        let english = content.iter().filter(|l| is_mostly_ascii_letters(l)).count();
        if english as f64 / content.len() as f64 > MAX_ENGLISH_LINE_RATIO {
            return Err(WorkerError::QualityValidation(
                "英語テキストが多すぎます（日本語出力が期待されます）".to_string(),
            ));
        }
    }
    Ok(())
}

fn is_mostly_ascii_letters(line: &str) -> bool {
    let total = line.chars().count();
    let letters = line.chars().filter(|c| c.is_ascii_alphabetic()).count();
    letters as f64 > total as f64 * 0.5
}

/// Node heap size in MB for a machine with `memory_gb` of RAM.
pub fn node_heap_size_mb(memory_gb: f64) -> u64 {
    let mb = memory_gb * 1024.0;
    if memory_gb < 8.0 {
        2560
    } else if memory_gb < 16.0 {
        (mb * 0.25) as u64
    } else if memory_gb < 32.0 {
        (mb * 0.20) as u64
    } else if memory_gb < 64.0 {
        (mb * 0.15) as u64
    } else {
        12288
    }
}

/// Total physical memory in GB, or 8 when it cannot be read.
pub async fn system_memory_gb() -> f64 {
    if let Ok(meminfo) = tokio::fs::read_to_string("/proc/meminfo").await {
        let kb = meminfo
            .lines()
            .find(|l| l.starts_with("MemTotal:"))
            .and_then(|l| l.split_whitespace().nth(1))
            .and_then(|v| v.parse::<f64>().ok());
        if let Some(kb) = kb {
            return kb / (1024.0 * 1024.0);
        }
    }

    let sysctl = tokio::process::Command::new("sysctl")
        .args(["-n", "hw.memsize"])
        .output()
        .await;
    if let Ok(output) = sysctl {
        if let Ok(bytes) = String::from_utf8_lossy(&output.stdout).trim().parse::<f64>() {
            return bytes / (1024.0 * 1024.0 * 1024.0);
        }
    }
    8.0
}

/// `NODE_OPTIONS` with a heap ceiling appended unless one is already set.
pub fn node_options(existing: Option<&str>, heap_mb: u64) -> String {
    let existing = existing.unwrap_or("").trim();
    if existing.contains("--max-old-space-size") {
        existing.to_string()
    } else if existing.is_empty() {
        format!("--max-old-space-size={heap_mb}")
    } else {
        format!("{existing} --max-old-space-size={heap_mb}")
    }
}

/// Gemini CLI driven by the managed runner.
#[derive(Debug, Clone)]
pub struct GeminiCli {
    runner: ManagedRunner,
    command: String,
    model: String,
    timeout: Duration,
    extra_prompt: Option<String>,
    max_attempts: u32,
    rate_limit_wait: Duration,
    retry_wait: Duration,
}

impl GeminiCli {
    pub fn new(command: impl Into<String>, model: impl Into<String>, timeout: Duration) -> Self {
        Self {
            runner: ManagedRunner::default(),
            command: command.into(),
            model: model.into(),
            timeout,
            extra_prompt: None,
            max_attempts: 3,
            rate_limit_wait: Duration::from_secs(60),
            retry_wait: Duration::from_secs(5),
        }
    }

    pub fn with_extra_prompt(mut self, extra: Option<String>) -> Self {
        self.extra_prompt = extra;
        self
    }

    pub fn with_runner(mut self, runner: ManagedRunner) -> Self {
        self.runner = runner;
        self
    }

    /// Rate-limit waits grow linearly with the attempt number.
    pub fn with_waits(mut self, rate_limit_wait: Duration, retry_wait: Duration) -> Self {
        self.rate_limit_wait = rate_limit_wait;
        self.retry_wait = retry_wait;
        self
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn attempt(&self, video: &Path, node_opts: &str) -> WorkerResult<String> {
        let prompt = build_prompt(video, self.extra_prompt.as_deref());
        let mut spec = ProcessSpec::new(&self.command)
            .args(["-m", self.model.as_str()])
            .stdin(prompt)
            .env("NODE_OPTIONS", node_opts)
            .idle_timeout(None)
            .overall_timeout(self.timeout);
        if let Some(dir) = video.parent().filter(|d| !d.as_os_str().is_empty()) {
            spec = spec.current_dir(dir);
        }

        let run = match self.runner.run(spec).await {
            Ok(run) => run,
            Err(WorkerError::ProcessFailed { stderr_tail, .. })
                if contains_rate_limit_marker(&stderr_tail) =>
            {
                return Err(WorkerError::RateLimited(stderr_tail));
            }
            Err(e) => return Err(e),
        };

        let stderr = run.stderr();
        if stderr.contains(FILE_TOO_LARGE_MARKER) {
            return Err(WorkerError::non_retryable(FILE_TOO_LARGE_MARKER));
        }

        let summary = clean_output(&run.stdout());
        if let Err(e) = validate_summary(&summary) {
            if contains_rate_limit_marker(&stderr) {
                return Err(WorkerError::RateLimited(stderr));
            }
            return Err(e);
        }
        Ok(summary)
    }
}

#[async_trait]
impl Summarizer for GeminiCli {
    async fn summarize(&self, video: &Path) -> WorkerResult<String> {
        let video = tokio::fs::canonicalize(video).await?;
        let heap_mb = node_heap_size_mb(system_memory_gb().await);
        let node_opts = node_options(std::env::var("NODE_OPTIONS").ok().as_deref(), heap_mb);

        let mut attempt = 1;
        loop {
            info!(video = %video.display(), attempt, model = %self.model, "Summarizing video");
            let error = match self.attempt(&video, &node_opts).await {
                Ok(summary) => {
                    info!(video = %video.display(), chars = summary.chars().count(), "Summary accepted");
                    return Ok(summary);
                }
                Err(e) => e,
            };

            if error.is_permanent_failure() || attempt >= self.max_attempts {
                return Err(error);
            }

            let wait = if error.is_rate_limited() {
                self.rate_limit_wait * attempt
            } else {
                self.retry_wait
            };
            warn!(
                attempt,
                wait_secs = wait.as_secs(),
                error = %error,
                "Summary attempt failed, retrying"
            );
            tokio::time::sleep(wait).await;
            attempt += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) const GOOD_SUMMARY: &str = "## 要約（100〜180字）\n\
この動画では新しい言語モデルの推論性能と、その評価方法について詳しく解説しています。開発者向けの活用例も紹介されています。\n\n\
## 要点（3〜5個）\n- 推論速度が大幅に向上した\n- 評価指標が刷新された\n- 開発者向けツールが公開された\n\n\
## 主張・結論\n新モデルは実務での利用に十分な性能に達している。\n\n\
## 推奨アクション\n公開されたツールを試して自分の業務に適用してみる。";

    #[test]
    fn test_prompt_layout() {
        let prompt = build_prompt(Path::new("/tmp/v/01_abc.mp4"), None);
        assert!(prompt.starts_with("@/tmp/v/01_abc.mp4\n\n### タスク"));
        assert!(prompt.contains("## 推奨アクション"));
        assert!(!prompt.contains("## 追加指示"));

        let prompt = build_prompt(Path::new("/tmp/v.mp4"), Some("専門用語を避ける"));
        assert!(prompt.ends_with("## 追加指示\n専門用語を避ける"));
    }

    #[test]
    fn test_clean_output_drops_preamble() {
        let raw = "Loaded cached credentials.\nSure!\n## 要約\n本文です。これは十分な長さの本文です。";
        assert!(clean_output(raw).starts_with("## 要約"));
        assert_eq!(clean_output("no headings here"), "no headings here");
        assert_eq!(clean_output("intro text\n## a"), "intro text\n## a");
    }

    #[test]
    fn test_validate_accepts_good_summary() {
        assert!(validate_summary(GOOD_SUMMARY).is_ok());
    }

    #[test]
    fn test_validate_rejections() {
        let short = validate_summary("## 要約\n短い").unwrap_err();
        assert!(short.to_string().contains("短すぎる"));

        let failed = format!("{GOOD_SUMMARY}\n動画を解析できませんでした");
        assert!(validate_summary(&failed).unwrap_err().to_string().contains("解析できません"));

        let missing = GOOD_SUMMARY.replace("## 推奨アクション", "## その他");
        assert!(validate_summary(&missing).unwrap_err().to_string().contains("## 推奨"));

        let english = "## 要約\nThis video explains a new model in great detail.\n\
## 要点\n- Faster inference on common benchmarks\n- New evaluation metrics\n\
## 主張\nThe model is ready for production.\n## 推奨\nTry it today.";
        assert!(validate_summary(english).unwrap_err().to_string().contains("英語"));
    }

    #[test]
    fn test_heap_sizing() {
        assert_eq!(node_heap_size_mb(4.0), 2560);
        assert_eq!(node_heap_size_mb(8.0), 2048);
        assert_eq!(node_heap_size_mb(16.0), 3276);
        assert_eq!(node_heap_size_mb(32.0), 4915);
        assert_eq!(node_heap_size_mb(128.0), 12288);
    }

    #[test]
    fn test_node_options_merge() {
        assert_eq!(node_options(None, 2560), "--max-old-space-size=2560");
        assert_eq!(
            node_options(Some("--trace-warnings"), 4096),
            "--trace-warnings --max-old-space-size=4096"
        );
        assert_eq!(
            node_options(Some("--max-old-space-size=1024"), 4096),
            "--max-old-space-size=1024"
        );
    }

    #[cfg(unix)]
    mod cli {
        use super::*;
        use std::os::unix::fs::PermissionsExt;

        fn script(dir: &Path, name: &str, body: &str) -> String {
            let path = dir.join(name);
            std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
            path.display().to_string()
        }

        fn fast_runner() -> ManagedRunner {
            ManagedRunner::new(crate::runner::RunnerConfig {
                poll_interval: Duration::from_millis(50),
                artifact_grace: Duration::from_millis(100),
                ..Default::default()
            })
        }

        fn video(dir: &Path) -> std::path::PathBuf {
            let path = dir.join("01_abc.mp4");
            std::fs::write(&path, b"fake").unwrap();
            path
        }

        #[tokio::test]
        async fn test_summarize_reads_stdout() {
            let dir = tempfile::tempdir().unwrap();
            let summary_file = dir.path().join("summary.txt");
            std::fs::write(&summary_file, format!("preamble\n{GOOD_SUMMARY}")).unwrap();
            let cmd = script(
                dir.path(),
                "gemini",
                &format!("cat > /dev/null\ncat '{}'", summary_file.display()),
            );

            let cli = GeminiCli::new(cmd, "gemini-2.5-pro", Duration::from_secs(30));
            let summary = cli.summarize(&video(dir.path())).await.unwrap();
            assert!(summary.starts_with("## 要約"));
        }

        #[tokio::test]
        async fn test_summarize_retries_then_gives_up() {
            let dir = tempfile::tempdir().unwrap();
            let counter = dir.path().join("count");
            let cmd = script(
                dir.path(),
                "gemini",
                &format!(
                    "cat > /dev/null\necho x >> '{}'\necho 'Error: 429 quota exceeded' >&2\nexit 1",
                    counter.display()
                ),
            );

            let cli = GeminiCli::new(cmd, "m", Duration::from_secs(30))
                .with_runner(fast_runner())
                .with_waits(Duration::from_millis(10), Duration::from_millis(10))
                .with_max_attempts(2);
            let err = cli.summarize(&video(dir.path())).await.unwrap_err();
            assert!(matches!(err, WorkerError::RateLimited(_)));
            let calls = std::fs::read_to_string(&counter).unwrap();
            assert_eq!(calls.lines().count(), 2);
        }

        #[tokio::test]
        async fn test_oversize_attachment_is_not_retried() {
            let dir = tempfile::tempdir().unwrap();
            let counter = dir.path().join("count");
            let cmd = script(
                dir.path(),
                "gemini",
                &format!(
                    "cat > /dev/null\necho x >> '{}'\necho '{}' >&2",
                    counter.display(),
                    FILE_TOO_LARGE_MARKER
                ),
            );

            let cli = GeminiCli::new(cmd, "m", Duration::from_secs(30))
                .with_runner(fast_runner())
                .with_waits(Duration::from_millis(10), Duration::from_millis(10));
            let err = cli.summarize(&video(dir.path())).await.unwrap_err();
            assert!(err.is_permanent_failure());
            let calls = std::fs::read_to_string(&counter).unwrap();
            assert_eq!(calls.lines().count(), 1);
        }
    }
}
