//! Managed execution of external CLIs.
//!
//! The AI CLIs this pipeline drives do not exit cleanly: some keep running
//! after they have finished, some exit non-zero after writing their result.
//! A run therefore ends in one of three ways (exit, overall silence ceiling,
//! idle after output) and is then reconciled against the file the child was
//! expected to produce. A present artifact is success regardless of how the
//! process ended.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use chrono::Utc;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{WorkerError, WorkerResult};

/// Coarse filesystems round modification times down.
const FRESHNESS_SLACK: Duration = Duration::from_secs(1);

/// Marker in codex stderr when its stored credentials are stale.
const REUSED_TOKEN_MARKER: &str = "refresh token was already used";

/// Helper processes left behind by browser-driving agents.
///
/// A command line matches a rule when it contains every fragment of it.
pub const AUXILIARY_PROCESS_RULES: &[&[&str]] = &[&["chrome", "--headless"], &["chrome-devtools-mcp"]];

/// How a run stopped, before reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// The process exited on its own; `None` when killed by a signal
    Exited(Option<i32>),
    /// No output for longer than the overall ceiling
    OverallTimeout,
    /// Output went quiet after the child had printed something
    IdleTimeout,
}

impl Termination {
    pub fn as_str(&self) -> &'static str {
        match self {
            Termination::Exited(_) => "exited",
            Termination::OverallTimeout => "overall",
            Termination::IdleTimeout => "idle",
        }
    }
}

/// A file the child is expected to populate.
#[derive(Debug, Clone, PartialEq)]
pub struct SideEffectExpectation {
    pub path: PathBuf,
    /// When set, the file must have been modified at or after this instant
    pub fresh_after: Option<SystemTime>,
}

impl SideEffectExpectation {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            fresh_after: None,
        }
    }

    pub fn with_fresh_after(mut self, instant: SystemTime) -> Self {
        self.fresh_after = Some(instant);
        self
    }

    /// Present, non-empty and (when required) fresh.
    pub async fn is_satisfied(&self) -> bool {
        let Ok(meta) = tokio::fs::metadata(&self.path).await else {
            return false;
        };
        if !meta.is_file() || meta.len() == 0 {
            return false;
        }
        match (self.fresh_after, meta.modified()) {
            (Some(after), Ok(modified)) => modified + FRESHNESS_SLACK >= after,
            _ => true,
        }
    }

    async fn wait_until_satisfied(&self, grace: Duration, step: Duration) -> bool {
        let deadline = Instant::now() + grace;
        loop {
            if self.is_satisfied().await {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(step).await;
        }
    }
}

/// One command to run.
#[derive(Debug, Clone, Default)]
pub struct ProcessSpec {
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
    /// Variables added to the inherited environment
    pub env: Vec<(String, String)>,
    /// Written to stdin, which is then closed; `None` gives the child no stdin
    pub stdin: Option<String>,
    pub expectation: Option<SideEffectExpectation>,
    /// Silence after the first stdout line that counts as completion; `None` disables
    pub idle_timeout: Option<Duration>,
    /// Overrides the runner's silence ceiling
    pub overall_timeout: Option<Duration>,
    /// Where to dump stdout/stderr/return code when the run fails
    pub diagnostic_file: Option<PathBuf>,
    /// Reap stray browser helpers before and after the run
    pub reap_auxiliary: bool,
}

impl ProcessSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Default::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn stdin(mut self, payload: impl Into<String>) -> Self {
        self.stdin = Some(payload.into());
        self
    }

    pub fn expect(mut self, expectation: SideEffectExpectation) -> Self {
        self.expectation = Some(expectation);
        self
    }

    pub fn idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.idle_timeout = timeout;
        self
    }

    pub fn overall_timeout(mut self, timeout: Duration) -> Self {
        self.overall_timeout = Some(timeout);
        self
    }

    pub fn diagnostic_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.diagnostic_file = Some(path.into());
        self
    }

    pub fn reap_auxiliary(mut self, enabled: bool) -> Self {
        self.reap_auxiliary = enabled;
        self
    }

    /// Human-readable command line for logs.
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// A concluded run.
#[derive(Debug, Clone)]
pub struct ProcessRun {
    pub command: String,
    pub working_directory: Option<PathBuf>,
    pub env_overlay: Vec<(String, String)>,
    pub started_at: SystemTime,
    pub last_output_at: Option<SystemTime>,
    pub exit_code: Option<i32>,
    pub stdout_lines: Vec<String>,
    pub stderr_lines: Vec<String>,
    pub termination: Termination,
    /// The expected side effect was present when the run concluded
    pub artifact_found: bool,
}

impl ProcessRun {
    pub fn stdout(&self) -> String {
        self.stdout_lines.join("\n")
    }

    pub fn stderr(&self) -> String {
        self.stderr_lines.join("\n")
    }
}

#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub poll_interval: Duration,
    /// Silence ceiling measured from the last output line
    pub overall_timeout: Duration,
    /// SIGTERM to SIGKILL delay on idle termination
    pub kill_grace: Duration,
    /// Bound on joining the reader tasks
    pub drain_timeout: Duration,
    /// Artifact re-check window after an idle termination
    pub artifact_grace_after_idle: Duration,
    /// Artifact re-check window otherwise
    pub artifact_grace: Duration,
    pub artifact_poll: Duration,
    /// Characters of stderr kept in failure errors
    pub stderr_tail_chars: usize,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            overall_timeout: Duration::from_secs(600),
            kill_grace: Duration::from_secs(2),
            drain_timeout: Duration::from_secs(5),
            artifact_grace_after_idle: Duration::from_secs(2),
            artifact_grace: Duration::from_secs(3),
            artifact_poll: Duration::from_millis(500),
            stderr_tail_chars: 2000,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ManagedRunner {
    config: RunnerConfig,
}

impl ManagedRunner {
    pub fn new(config: RunnerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// Run `spec` to a reconciled outcome.
    pub async fn run(&self, spec: ProcessSpec) -> WorkerResult<ProcessRun> {
        let program = resolve_command(&spec.program)?;
        if spec.reap_auxiliary {
            reap_auxiliary_processes(AUXILIARY_PROCESS_RULES);
        }

        let result = self.run_resolved(&program, &spec).await;

        if spec.reap_auxiliary {
            reap_auxiliary_processes(AUXILIARY_PROCESS_RULES);
        }
        result
    }

    async fn run_resolved(&self, program: &Path, spec: &ProcessSpec) -> WorkerResult<ProcessRun> {
        let overall_timeout = spec.overall_timeout.unwrap_or(self.config.overall_timeout);
        info!(
            command = %spec.display(),
            program = %program.display(),
            idle_timeout_secs = spec.idle_timeout.map(|d| d.as_secs()),
            overall_timeout_secs = overall_timeout.as_secs(),
            "Launching managed process"
        );

        let mut cmd = Command::new(program);
        cmd.args(&spec.args)
            .stdin(if spec.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &spec.working_dir {
            cmd.current_dir(dir);
        }
        for (key, value) in &spec.env {
            cmd.env(key, value);
        }
        #[cfg(unix)]
        cmd.process_group(0);

        let started_at = SystemTime::now();
        let started = Instant::now();
        let mut child = cmd.spawn().map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => WorkerError::CommandNotFound(program.display().to_string()),
            _ => WorkerError::Io(e),
        })?;

        if let (Some(mut stdin), Some(payload)) = (child.stdin.take(), spec.stdin.clone()) {
            tokio::spawn(async move {
                if let Err(e) = stdin.write_all(payload.as_bytes()).await {
                    debug!(error = %e, "Child closed stdin early");
                }
                let _ = stdin.shutdown().await;
            });
        }

        let clock = Arc::new(AtomicU64::new(0));
        let (out_tx, mut out_rx) = mpsc::unbounded_channel();
        let (err_tx, mut err_rx) = mpsc::unbounded_channel();
        let mut readers = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            readers.push(spawn_reader(stdout, "stdout", out_tx, clock.clone(), started));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(spawn_reader(stderr, "stderr", err_tx, clock.clone(), started));
        }

        let mut stdout_lines = Vec::new();
        let mut stderr_lines = Vec::new();

        let termination = loop {
            drain_available(&mut out_rx, &mut stdout_lines);
            drain_available(&mut err_rx, &mut stderr_lines);

            if let Some(status) = child.try_wait()? {
                break Termination::Exited(status.code());
            }

            let last_activity = Duration::from_millis(clock.load(Ordering::Relaxed));
            let silent_for = started.elapsed().saturating_sub(last_activity);

            if silent_for > overall_timeout {
                warn!(silent_secs = silent_for.as_secs(), "No output within the overall ceiling, killing");
                force_kill(&mut child).await;
                break Termination::OverallTimeout;
            }

            if let Some(idle) = spec.idle_timeout {
                if silent_for > idle && !stdout_lines.is_empty() {
                    info!(idle_secs = idle.as_secs(), "No output since last line, assuming completion");
                    terminate_gracefully(&mut child, self.config.kill_grace).await;
                    break Termination::IdleTimeout;
                }
            }

            tokio::time::sleep(self.config.poll_interval).await;
        };

        for mut reader in readers {
            if tokio::time::timeout(self.config.drain_timeout, &mut reader).await.is_err() {
                debug!("Reader did not finish in time, aborting");
                reader.abort();
            }
        }
        drain_available(&mut out_rx, &mut stdout_lines);
        drain_available(&mut err_rx, &mut stderr_lines);

        let exit_code = match termination {
            Termination::Exited(code) => code,
            _ => child.try_wait().ok().flatten().and_then(|s| s.code()),
        };
        let last_output_at = match clock.load(Ordering::Relaxed) {
            0 if stdout_lines.is_empty() && stderr_lines.is_empty() => None,
            ms => Some(started_at + Duration::from_millis(ms)),
        };

        let mut run = ProcessRun {
            command: spec.display(),
            working_directory: spec.working_dir.clone(),
            env_overlay: spec.env.clone(),
            started_at,
            last_output_at,
            exit_code,
            stdout_lines,
            stderr_lines,
            termination,
            artifact_found: false,
        };

        self.reconcile(spec, &mut run, started.elapsed()).await
    }

    async fn reconcile(
        &self,
        spec: &ProcessSpec,
        run: &mut ProcessRun,
        elapsed: Duration,
    ) -> WorkerResult<ProcessRun> {
        if let Some(expectation) = &spec.expectation {
            run.artifact_found = expectation.is_satisfied().await;
        }
        if run.artifact_found {
            info!(termination = run.termination.as_str(), "Expected output present, treating as success");
            return Ok(run.clone());
        }
        if run.termination == Termination::Exited(Some(0)) {
            return Ok(run.clone());
        }

        if let Some(expectation) = &spec.expectation {
            let grace = match run.termination {
                Termination::IdleTimeout => self.config.artifact_grace_after_idle,
                _ => self.config.artifact_grace,
            };
            if expectation
                .wait_until_satisfied(grace, self.config.artifact_poll)
                .await
            {
                run.artifact_found = true;
                info!(
                    termination = run.termination.as_str(),
                    path = %expectation.path.display(),
                    "Expected output appeared after termination, treating as success"
                );
                return Ok(run.clone());
            }
        }

        let stderr = run.stderr();
        if stderr.contains(REUSED_TOKEN_MARKER) {
            warn!("CLI credentials have expired; run `codex login` in a terminal to sign in again");
        }
        if let Some(path) = &spec.diagnostic_file {
            write_diagnostics(path, run).await;
        }

        let stderr_tail = tail_chars(&stderr, self.config.stderr_tail_chars);
        Err(match run.termination {
            Termination::Exited(code) => WorkerError::ProcessFailed {
                exit_code: code.unwrap_or(-1),
                stderr_tail,
            },
            other => WorkerError::ProcessTimedOut {
                reason: other.as_str(),
                elapsed_secs: elapsed.as_secs(),
                stderr_tail,
            },
        })
    }
}

fn spawn_reader<R>(
    stream: R,
    tag: &'static str,
    tx: mpsc::UnboundedSender<String>,
    clock: Arc<AtomicU64>,
    started: Instant,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(stream);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => break,
                Ok(_) => {
                    clock.store(started.elapsed().as_millis() as u64, Ordering::Relaxed);
                    let line = String::from_utf8_lossy(&buf)
                        .trim_end_matches(&['\r', '\n'][..])
                        .to_string();
                    debug!(stream = tag, "{}", line);
                    if tx.send(line).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    debug!(stream = tag, error = %e, "Stream read failed");
                    break;
                }
            }
        }
    })
}

fn drain_available(rx: &mut mpsc::UnboundedReceiver<String>, into: &mut Vec<String>) {
    while let Ok(line) = rx.try_recv() {
        into.push(line);
    }
}

#[cfg(unix)]
fn signal_group(child: &Child, signal: nix::sys::signal::Signal) {
    use nix::sys::signal::killpg;
    use nix::unistd::Pid;

    if let Some(pid) = child.id() {
        if let Err(e) = killpg(Pid::from_raw(pid as i32), signal) {
            debug!(pid, error = %e, "Signalling process group failed");
        }
    }
}

async fn force_kill(child: &mut Child) {
    #[cfg(unix)]
    signal_group(child, nix::sys::signal::Signal::SIGKILL);
    let _ = child.start_kill();
    let _ = child.wait().await;
}

async fn terminate_gracefully(child: &mut Child, grace: Duration) {
    #[cfg(unix)]
    signal_group(child, nix::sys::signal::Signal::SIGTERM);
    #[cfg(not(unix))]
    let _ = child.start_kill();

    if tokio::time::timeout(grace, child.wait()).await.is_err() {
        force_kill(child).await;
    }
}

async fn write_diagnostics(path: &Path, run: &ProcessRun) {
    let code = run
        .exit_code
        .map(|c| c.to_string())
        .unwrap_or_else(|| format!("none ({})", run.termination.as_str()));
    let content = format!(
        "STDOUT:\n{}\n\nSTDERR:\n{}\n\nReturn code: {}",
        run.stdout(),
        run.stderr(),
        code
    );
    if let Some(parent) = path.parent() {
        let _ = tokio::fs::create_dir_all(parent).await;
    }
    match tokio::fs::write(path, content).await {
        Ok(()) => info!(path = %path.display(), "Saved raw output for diagnosis"),
        Err(e) => warn!(path = %path.display(), error = %e, "Failed to save raw output"),
    }
}

/// Last `max` characters of `text`.
pub fn tail_chars(text: &str, max: usize) -> String {
    let count = text.chars().count();
    if count <= max {
        return text.to_string();
    }
    text.chars().skip(count - max).collect()
}

/// Diagnostic file name for a UTC day.
pub fn diagnostic_file_name(now: chrono::DateTime<Utc>) -> String {
    format!("codex_raw_output_{}.txt", now.format("%Y%m%d"))
}

/// Find an executable on PATH, then in well-known install locations.
pub fn resolve_command(name: &str) -> WorkerResult<PathBuf> {
    if let Ok(path) = which::which(name) {
        return Ok(path);
    }

    let direct = Path::new(name);
    if direct.components().count() > 1 && direct.is_file() {
        return Ok(direct.to_path_buf());
    }

    let candidates = install_locations(name);
    candidates
        .into_iter()
        .find(|p| p.is_file())
        .ok_or_else(|| WorkerError::CommandNotFound(name.to_string()))
}

fn install_locations(name: &str) -> Vec<PathBuf> {
    let home = std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .map(PathBuf::from);

    let mut out = Vec::new();
    if let Some(home) = &home {
        out.push(home.join(".local/bin").join(name));
        out.push(home.join(".npm-global/bin").join(name));
    }
    out.push(PathBuf::from("/usr/local/bin").join(name));
    out.push(PathBuf::from("/opt/homebrew/bin").join(name));
    if let Some(home) = &home {
        out.push(home.join("AppData/Roaming/npm").join(format!("{name}.cmd")));
    }
    out
}

/// Whether a command line matches any auxiliary process rule.
pub fn cmdline_matches(cmdline: &str, rules: &[&[&str]]) -> bool {
    rules
        .iter()
        .any(|fragments| !fragments.is_empty() && fragments.iter().all(|f| cmdline.contains(f)))
}

/// Best-effort kill of stray helper processes. Returns how many were signalled.
#[cfg(unix)]
pub fn reap_auxiliary_processes(rules: &[&[&str]]) -> usize {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let Ok(entries) = std::fs::read_dir("/proc") else {
        return 0;
    };
    let own_pid = std::process::id();
    let mut reaped = 0;

    for entry in entries.flatten() {
        let Some(pid) = entry.file_name().to_str().and_then(|s| s.parse::<u32>().ok()) else {
            continue;
        };
        if pid == own_pid {
            continue;
        }
        let Ok(raw) = std::fs::read(entry.path().join("cmdline")) else {
            continue;
        };
        let cmdline = String::from_utf8_lossy(&raw).replace('\0', " ");
        if cmdline_matches(&cmdline, rules) && kill(Pid::from_raw(pid as i32), Signal::SIGKILL).is_ok() {
            debug!(pid, "Reaped auxiliary process");
            reaped += 1;
        }
    }

    if reaped > 0 {
        info!(count = reaped, "Cleaned up headless browser helpers");
    }
    reaped
}

#[cfg(not(unix))]
pub fn reap_auxiliary_processes(_rules: &[&[&str]]) -> usize {
    0
}
