use std::path::Path;

use digest_worker::runner::resolve_command;
use digest_worker::WorkerConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = WorkerConfig::from_env();

    println!(
        "worker-selfcheck: starting with repo_root={} reports_dir={}",
        config.repo_root.display(),
        config.reports_dir.display()
    );
    ensure_dir(&config.reports_dir).await?;
    ensure_dir(&config.data_dir).await?;
    ensure_prompts(&config)?;

    ensure_command(&config.codex_command)?;
    if config.video_step {
        ensure_command(&config.gemini_command)?;
        digest_media::check_ytdlp().map_err(|e| anyhow::anyhow!("yt-dlp not available: {}", e))?;
        digest_media::check_ffmpeg().map_err(|e| anyhow::anyhow!("ffmpeg not available: {}", e))?;
        digest_media::check_ffprobe().map_err(|e| anyhow::anyhow!("ffprobe not available: {}", e))?;
    }
    if config.git_push {
        ensure_command("git")?;
    }
    warn_env_missing(&["TURSO_DATABASE_URL", "TURSO_AUTH_TOKEN"]);

    println!("worker-selfcheck: ok");
    Ok(())
}

async fn ensure_dir<P: AsRef<Path>>(path: P) -> anyhow::Result<()> {
    tokio::fs::create_dir_all(path.as_ref()).await?;
    Ok(())
}

fn ensure_prompts(config: &WorkerConfig) -> anyhow::Result<()> {
    for name in &config.prompt_files {
        let path = config.repo_path(name);
        if !path.is_file() {
            return Err(anyhow::anyhow!("missing prompt document {}", path.display()));
        }
    }
    Ok(())
}

fn ensure_command(name: &str) -> anyhow::Result<()> {
    let path = resolve_command(name).map_err(|e| anyhow::anyhow!("{} not available: {}", name, e))?;
    println!("worker-selfcheck: {} -> {}", name, path.display());
    Ok(())
}

fn warn_env_missing(vars: &[&str]) {
    for var in vars {
        if std::env::var(var).is_err() {
            println!("worker-selfcheck: {} not set; archiving disabled", var);
        }
    }
}
