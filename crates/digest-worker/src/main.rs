//! Daily digest worker binary.

use std::path::PathBuf;

use chrono::Utc;
use clap::{Parser, Subcommand};
use digest_models::Report;
use digest_store::TursoClient;
use tracing::{error, info, warn};

use digest_worker::collect::{self, GithubTrendingCollector, RedditCollector, RssCollector, TrendingLanguages};
use digest_worker::daily::VideoStep;
use digest_worker::{
    init_tracing, DailyPipeline, GitPublisher, RunContext, VideoReportOptions, VideoReportPipeline,
    WorkerConfig, WorkerError, WorkerResult,
};

#[derive(Debug, Parser)]
#[command(name = "digest-worker", version, about = "Daily AI news digest pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run every prompt document, the video step, archiving and publishing
    Daily {
        /// Skip the video summary step
        #[arg(long)]
        no_video: bool,
        /// Do not commit or push
        #[arg(long)]
        no_push: bool,
    },
    /// Summarize the newest videos of a channel
    VideoReport {
        channel_url: String,
        #[arg(short, long, default_value = "Gemini_YouTube_Summary_Report")]
        output_dir: PathBuf,
        #[arg(short = 'n', long, default_value_t = 5)]
        top_n: usize,
        #[arg(short, long, env = "GEMINI_MODEL")]
        model: Option<String>,
        #[arg(long)]
        keep_mp4: bool,
        /// Only list the videos
        #[arg(long)]
        no_download: bool,
        #[arg(long)]
        extra_prompt: Option<String>,
    },
    /// Fetch one supporting data source into the data directory
    Collect {
        #[command(subcommand)]
        source: Source,
    },
    /// Print the JSON schema of the report artifact
    Schema,
}

#[derive(Debug, Subcommand)]
enum Source {
    Reddit,
    Github {
        #[arg(long)]
        languages: Option<PathBuf>,
    },
    Rss {
        #[arg(long)]
        feeds: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() {
    if rustls::crypto::ring::default_provider().install_default().is_err() {
        eprintln!("rustls crypto provider was already installed");
    }

    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    let config = WorkerConfig::from_env();

    if let Err(e) = run(cli.command, config).await {
        error!("digest-worker failed: {}", e);
        std::process::exit(1);
    }
}

async fn run(command: Command, config: WorkerConfig) -> WorkerResult<()> {
    match command {
        Command::Daily { no_video, no_push } => daily(config, no_video, no_push).await,
        Command::VideoReport {
            channel_url,
            output_dir,
            top_n,
            model,
            keep_mp4,
            no_download,
            extra_prompt,
        } => {
            let options = VideoReportOptions {
                channel_url,
                output_dir,
                top_n,
                pacing: config.video_pacing,
                keep_mp4,
                no_download,
                summary_timeout: config.gemini_timeout,
            };
            let pipeline = VideoReportPipeline::from_config(&config, options, model, extra_prompt)?;
            let report = pipeline.run(Utc::now()).await?;
            info!(path = %report.display(), "Video report written");
            Ok(())
        }
        Command::Collect { source } => collect_source(source, &config).await,
        Command::Schema => {
            let schema = schemars::schema_for!(Report);
            println!("{}", serde_json::to_string_pretty(&schema)?);
            Ok(())
        }
    }
}

async fn daily(config: WorkerConfig, no_video: bool, no_push: bool) -> WorkerResult<()> {
    let store = match TursoClient::from_env() {
        Ok(store) => store,
        Err(e) => {
            warn!(error = %e, "Turso store misconfigured; archiving disabled");
            None
        }
    };

    let video = if no_video || !config.video_step {
        VideoStep::Disabled
    } else {
        let options = VideoReportOptions::from_config(&config);
        match VideoReportPipeline::from_config(&config, options, None, None) {
            Ok(pipeline) => VideoStep::Ready(pipeline),
            Err(e) => VideoStep::Unavailable(e),
        }
    };

    let publisher = (config.git_push && !no_push).then(|| {
        GitPublisher::new(&config.repo_root, &config.git_remote, &config.git_branch)
    });

    let ctx = RunContext::new(config, Utc::now(), store);
    let mut pipeline = DailyPipeline::new(ctx).with_video(video);
    if let Some(publisher) = publisher {
        pipeline = pipeline.with_publisher(publisher);
    }

    let summary = pipeline.run().await?;
    info!(
        reports = summary.documents.len(),
        failed = summary.failures.len(),
        archived = summary.archived,
        publish = ?summary.publish,
        "Daily run finished"
    );
    if summary.documents.is_empty() {
        return Err(WorkerError::non_retryable("no prompt document produced a report"));
    }
    Ok(())
}

async fn collect_source(source: Source, config: &WorkerConfig) -> WorkerResult<()> {
    let now = Utc::now();
    let path = match source {
        Source::Reddit => {
            let digest = RedditCollector::new(config.reddit_limit)?.collect(now).await?;
            collect::write_json(&config.data_dir, "reddit.json", &digest).await?
        }
        Source::Github { languages } => {
            let file = languages.unwrap_or_else(|| config.github_languages_file.clone());
            let langs = if file.is_file() {
                TrendingLanguages::load(&file).await?
            } else {
                TrendingLanguages::default()
            };
            let report = GithubTrendingCollector::new()?.collect(&langs, now).await?;
            collect::write_json(&config.data_dir, "github_trending.json", &report).await?
        }
        Source::Rss { feeds } => {
            let file = feeds.unwrap_or_else(|| config.rss_feeds_file.clone());
            let table = collect::rss::load_feed_config(&file)
                .await
                .map_err(|e| WorkerError::missing_input(format!("{}: {e}", file.display())))?;
            let sources = RssCollector::new()?.collect(&table, now).await?;
            collect::write_json(&config.data_dir, "rss_sources.json", &sources).await?
        }
    };
    info!(path = %path.display(), "Collector finished");
    Ok(())
}
