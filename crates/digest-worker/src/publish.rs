//! Commit and push the day's artifacts.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::info;

use crate::error::{WorkerError, WorkerResult};
use crate::runner::{ManagedRunner, ProcessSpec};

const GIT_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    NothingToCommit,
    Committed,
    Pushed,
}

pub fn commit_message(date: &str) -> String {
    format!("Auto: AI News report {date} (JSON)")
}

#[derive(Debug, Clone)]
pub struct GitPublisher {
    runner: ManagedRunner,
    repo_root: PathBuf,
    remote: String,
    branch: String,
    push: bool,
}

impl GitPublisher {
    pub fn new(repo_root: impl Into<PathBuf>, remote: impl Into<String>, branch: impl Into<String>) -> Self {
        Self {
            runner: ManagedRunner::default(),
            repo_root: repo_root.into(),
            remote: remote.into(),
            branch: branch.into(),
            push: true,
        }
    }

    pub fn with_push(mut self, push: bool) -> Self {
        self.push = push;
        self
    }

    /// `path` relative to the repository root when it lies inside it.
    pub fn relative(&self, path: &Path) -> String {
        path.strip_prefix(&self.repo_root)
            .unwrap_or(path)
            .to_string_lossy()
            .to_string()
    }

    async fn git(&self, args: &[&str]) -> WorkerResult<String> {
        let spec = ProcessSpec::new("git")
            .args(args.iter().copied())
            .current_dir(&self.repo_root)
            .idle_timeout(None)
            .overall_timeout(GIT_TIMEOUT);
        match self.runner.run(spec).await {
            Ok(run) => Ok(run.stdout()),
            Err(WorkerError::ProcessFailed { exit_code, stderr_tail }) => Err(WorkerError::git_failed(format!(
                "git {} exited with {exit_code}: {}",
                args.first().copied().unwrap_or_default(),
                stderr_tail.trim()
            ))),
            Err(e) => Err(e),
        }
    }

    /// Stage `paths`, commit them if anything changed, then push.
    pub async fn publish(&self, paths: &[PathBuf], date: &str) -> WorkerResult<PublishOutcome> {
        let rel: Vec<String> = paths.iter().map(|p| self.relative(p)).collect();

        let mut add = vec!["add", "--"];
        add.extend(rel.iter().map(String::as_str));
        self.git(&add).await?;

        let mut diff = vec!["diff", "--name-only", "--cached", "--"];
        diff.extend(rel.iter().map(String::as_str));
        let staged = self.git(&diff).await?;
        if staged.trim().is_empty() {
            info!(paths = ?rel, "No changes to commit");
            return Ok(PublishOutcome::NothingToCommit);
        }

        let message = commit_message(date);
        self.git(&["commit", "-m", &message]).await?;
        info!(message = %message, "Committed report");

        if !self.push {
            return Ok(PublishOutcome::Committed);
        }
        self.git(&["push", &self.remote, &self.branch]).await?;
        info!(remote = %self.remote, branch = %self.branch, "Pushed report");
        Ok(PublishOutcome::Pushed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_commit_message() {
        assert_eq!(commit_message("2026-03-01"), "Auto: AI News report 2026-03-01 (JSON)");
    }

    #[test]
    fn test_relative_paths() {
        let publisher = GitPublisher::new("/srv/news", "origin", "main");
        assert_eq!(
            publisher.relative(Path::new("/srv/news/reports/2026-03-01/report.json")),
            "reports/2026-03-01/report.json"
        );
        assert_eq!(publisher.relative(Path::new("/elsewhere/x")), "/elsewhere/x");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_commit_in_scratch_repo() {
        if which::which("git").is_err() {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        for args in [
            vec!["init", "-q"],
            vec!["config", "user.email", "digest@example.com"],
            vec!["config", "user.name", "Digest"],
        ] {
            let status = std::process::Command::new("git")
                .args(&args)
                .current_dir(root)
                .status()
                .unwrap();
            assert!(status.success());
        }

        let report = root.join("reports/2026-03-01/report.json");
        std::fs::create_dir_all(report.parent().unwrap()).unwrap();
        std::fs::write(&report, "{}").unwrap();

        let publisher = GitPublisher::new(root, "origin", "main").with_push(false);
        let outcome = publisher.publish(&[report.clone()], "2026-03-01").await.unwrap();
        assert_eq!(outcome, PublishOutcome::Committed);

        let again = publisher.publish(&[report], "2026-03-01").await.unwrap();
        assert_eq!(again, PublishOutcome::NothingToCommit);

        let log = std::process::Command::new("git")
            .args(["log", "--format=%s"])
            .current_dir(root)
            .output()
            .unwrap();
        assert_eq!(
            String::from_utf8_lossy(&log.stdout).trim(),
            "Auto: AI News report 2026-03-01 (JSON)"
        );
    }
}
