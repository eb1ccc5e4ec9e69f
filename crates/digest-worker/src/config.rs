//! Worker configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::retry::RetryPolicy;

const DEFAULT_CHANNEL_URL: &str = "https://www.youtube.com/channel/UCUWtuyVjeMQygQiy3adHb1g";

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Repository the reports are committed to; also the agent's working directory
    pub repo_root: PathBuf,
    /// Root of the dated report directories
    pub reports_dir: PathBuf,
    /// Collector output directory
    pub data_dir: PathBuf,
    /// Prompt documents processed in order, relative to `repo_root`
    pub prompt_files: Vec<String>,

    /// Coding agent binary
    pub codex_command: String,
    pub codex_model: String,
    pub codex_reasoning_effort: String,
    /// Silence after output that counts as completion; `None` disables
    pub codex_idle_timeout: Option<Duration>,
    /// Silence ceiling for any managed process
    pub codex_max_silence: Duration,

    /// Summarization CLI binary
    pub gemini_command: String,
    pub gemini_model: String,
    pub gemini_timeout: Duration,

    pub youtube_channel_url: String,
    /// Output directory of the video summary step, relative to `repo_root`
    pub video_output_dir: PathBuf,
    pub video_top_n: usize,
    /// Delay between videos
    pub video_pacing: Duration,
    pub keep_mp4: bool,
    /// Run the video summary step as part of the daily run
    pub video_step: bool,

    pub git_push: bool,
    pub git_remote: String,
    pub git_branch: String,

    /// `category -> [feed url]` table for the RSS collector
    pub rss_feeds_file: PathBuf,
    /// `general`/`specific` language lists for GitHub Trending; optional
    pub github_languages_file: PathBuf,
    /// Posts per Reddit group
    pub reddit_limit: u32,

    /// Base retry policy for the AI CLIs
    pub retry: RetryPolicy,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        let repo_root = PathBuf::from(".");
        Self {
            reports_dir: repo_root.join("reports"),
            data_dir: repo_root.join("data"),
            prompt_files: vec![
                "AGENTS_1.md".to_string(),
                "AGENTS_2.md".to_string(),
                "AGENTS_3.md".to_string(),
            ],
            codex_command: "codex".to_string(),
            codex_model: "gpt-5.2-codex".to_string(),
            codex_reasoning_effort: "medium".to_string(),
            codex_idle_timeout: Some(Duration::from_secs(60)),
            codex_max_silence: Duration::from_secs(600),
            gemini_command: "gemini".to_string(),
            gemini_model: "gemini-2.5-pro".to_string(),
            gemini_timeout: Duration::from_secs(500),
            youtube_channel_url: DEFAULT_CHANNEL_URL.to_string(),
            video_output_dir: PathBuf::from("Gemini_YouTube_Summary_Report"),
            video_top_n: 5,
            video_pacing: Duration::from_secs(70),
            keep_mp4: false,
            video_step: true,
            git_push: true,
            git_remote: "origin".to_string(),
            git_branch: "main".to_string(),
            rss_feeds_file: repo_root.join("rss_feeds.toml"),
            github_languages_file: repo_root.join("languages.toml"),
            reddit_limit: 2,
            retry: RetryPolicy::default(),
            repo_root,
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.trim().parse().ok())
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|s| !s.trim().is_empty())
}

fn env_bool(key: &str) -> Option<bool> {
    env_string(key).map(|v| matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let repo_root = env_string("DIGEST_REPO_ROOT")
            .map(PathBuf::from)
            .unwrap_or(defaults.repo_root);

        Self {
            reports_dir: env_string("DIGEST_REPORTS_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| repo_root.join("reports")),
            data_dir: env_string("DIGEST_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| repo_root.join("data")),
            prompt_files: env_string("DIGEST_PROMPT_FILES")
                .map(|s| {
                    s.split(',')
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or(defaults.prompt_files),
            codex_command: env_string("CODEX_COMMAND").unwrap_or(defaults.codex_command),
            codex_model: env_string("CODEX_MODEL").unwrap_or(defaults.codex_model),
            codex_reasoning_effort: env_string("CODEX_REASONING_EFFORT")
                .unwrap_or(defaults.codex_reasoning_effort),
            // 0 turns idle detection off
            codex_idle_timeout: match env_parse::<u64>("CODEX_IDLE_TIMEOUT_SEC") {
                Some(0) => None,
                Some(secs) => Some(Duration::from_secs(secs)),
                None => defaults.codex_idle_timeout,
            },
            codex_max_silence: Duration::from_secs(env_parse("CODEX_MAX_SILENCE_SEC").unwrap_or(600)),
            gemini_command: env_string("GEMINI_COMMAND").unwrap_or(defaults.gemini_command),
            gemini_model: env_string("GEMINI_MODEL").unwrap_or(defaults.gemini_model),
            gemini_timeout: Duration::from_secs(env_parse("GEMINI_TIMEOUT_SEC").unwrap_or(500)),
            youtube_channel_url: env_string("YOUTUBE_CHANNEL_URL").unwrap_or(defaults.youtube_channel_url),
            video_output_dir: env_string("VIDEO_OUTPUT_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.video_output_dir),
            video_top_n: env_parse("VIDEO_TOP_N").unwrap_or(defaults.video_top_n),
            video_pacing: Duration::from_secs(env_parse("VIDEO_PACING_SEC").unwrap_or(70)),
            keep_mp4: env_bool("VIDEO_KEEP_MP4").unwrap_or(false),
            video_step: env_bool("DIGEST_VIDEO_STEP").unwrap_or(true),
            git_push: env_bool("GIT_PUSH").unwrap_or(true),
            git_remote: env_string("GIT_REMOTE").unwrap_or(defaults.git_remote),
            git_branch: env_string("GIT_BRANCH").unwrap_or(defaults.git_branch),
            rss_feeds_file: env_string("RSS_FEEDS_FILE")
                .map(PathBuf::from)
                .unwrap_or_else(|| repo_root.join("rss_feeds.toml")),
            github_languages_file: env_string("GITHUB_LANGUAGES_FILE")
                .map(PathBuf::from)
                .unwrap_or_else(|| repo_root.join("languages.toml")),
            reddit_limit: env_parse("REDDIT_LIMIT").unwrap_or(defaults.reddit_limit),
            retry: RetryPolicy::from_env("llm"),
            repo_root,
        }
    }

    /// Path relative to the repository root, or as given when absolute.
    pub fn repo_path(&self, path: impl AsRef<Path>) -> PathBuf {
        self.repo_root.join(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const KEYS: &[&str] = &[
        "DIGEST_REPO_ROOT",
        "DIGEST_REPORTS_DIR",
        "DIGEST_PROMPT_FILES",
        "CODEX_IDLE_TIMEOUT_SEC",
        "VIDEO_TOP_N",
        "GIT_PUSH",
    ];

    fn clear() {
        for key in KEYS {
            std::env::remove_var(key);
        }
    }

    #[test]
    #[serial]
    fn test_defaults() {
        clear();
        let config = WorkerConfig::from_env();
        assert_eq!(config.reports_dir, PathBuf::from("./reports"));
        assert_eq!(config.prompt_files.len(), 3);
        assert_eq!(config.codex_idle_timeout, Some(Duration::from_secs(60)));
        assert_eq!(config.codex_max_silence, Duration::from_secs(600));
        assert!(config.git_push);
    }

    #[test]
    #[serial]
    fn test_env_overrides() {
        clear();
        std::env::set_var("DIGEST_REPO_ROOT", "/srv/news");
        std::env::set_var("DIGEST_PROMPT_FILES", "a.md, b.md,,");
        std::env::set_var("CODEX_IDLE_TIMEOUT_SEC", "0");
        std::env::set_var("VIDEO_TOP_N", "3");
        std::env::set_var("GIT_PUSH", "false");
        let config = WorkerConfig::from_env();
        clear();

        assert_eq!(config.reports_dir, PathBuf::from("/srv/news/reports"));
        assert_eq!(config.prompt_files, vec!["a.md", "b.md"]);
        assert_eq!(config.codex_idle_timeout, None);
        assert_eq!(config.video_top_n, 3);
        assert!(!config.git_push);
    }

    #[test]
    fn test_repo_path_keeps_absolute() {
        let config = WorkerConfig {
            repo_root: PathBuf::from("/srv/news"),
            ..Default::default()
        };
        assert_eq!(config.repo_path("AGENTS_1.md"), PathBuf::from("/srv/news/AGENTS_1.md"));
        assert_eq!(config.repo_path("/tmp/x"), PathBuf::from("/tmp/x"));
    }
}
