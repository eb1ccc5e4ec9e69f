//! Markdown for the per-video and merged summary reports.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use digest_models::safe_filename;
use tracing::info;

use crate::error::{WorkerError, WorkerResult};

const NO_SUMMARY: &str = "（要約なし）";
const SUMMARY_FAILED_NOTE: &str =
    "**注意**: 動画ファイルはダウンロードされましたが、要約の生成に失敗しました。";

pub const INDIVIDUAL_DIR: &str = "individual_reports";
pub const MERGED_REPORT: &str = "report.md";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelInfo {
    pub url: String,
    pub id: String,
    pub rss: String,
}

/// Outcome for one selected video.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoResult {
    pub rank: usize,
    pub video_id: String,
    pub title: String,
    pub published: String,
    pub link: String,
    /// File handed to the summarizer, by name
    pub video_file: Option<String>,
    pub summary: Option<String>,
}

/// `YYYY-MM-DD HH:MM:SS JST` for `now`.
pub fn now_jst(now: DateTime<Utc>) -> String {
    let jst = now.naive_utc() + chrono::Duration::hours(9);
    format!("{} JST", jst.format("%Y-%m-%d %H:%M:%S"))
}

/// `{rank:02}_{video id}_{title}.md`, with the title made filesystem-safe.
pub fn individual_file_name(rank: usize, video_id: &str, title: &str) -> String {
    format!("{}.md", file_stem(rank, video_id, title))
}

/// Stem shared by the downloaded video and its individual report.
pub fn file_stem(rank: usize, video_id: &str, title: &str) -> String {
    let label = if title.trim().is_empty() { video_id } else { title };
    format!("{:02}_{}_{}", rank, video_id, safe_filename(label))
}

fn channel_lines(channel: &ChannelInfo, generated_at: &str) -> Vec<String> {
    vec![
        format!("- 生成日時: {generated_at}"),
        format!("- チャンネルURL: {}", channel.url),
        format!("- チャンネルID: {}", channel.id),
        format!("- RSS: {}", channel.rss),
        String::new(),
    ]
}

fn summary_lines(result: &VideoResult) -> Vec<String> {
    match result.summary.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        Some(summary) => vec![summary.to_string()],
        None if result.video_file.is_some() => vec![
            NO_SUMMARY.to_string(),
            String::new(),
            SUMMARY_FAILED_NOTE.to_string(),
        ],
        None => vec![NO_SUMMARY.to_string()],
    }
}

pub fn render_individual(channel: &ChannelInfo, result: &VideoResult, generated_at: &str) -> String {
    let mut lines = vec![format!("# 動画要約レポート #{}", result.rank), String::new()];
    lines.extend(channel_lines(channel, generated_at));
    lines.extend([
        "## 動画情報".to_string(),
        String::new(),
        format!("- 順位: #{}", result.rank),
        format!("- タイトル: {}", result.title),
        format!("- 公開日時: {}", result.published),
        format!("- URL: {}", result.link),
    ]);
    if let Some(file) = &result.video_file {
        lines.push(format!("- 解析に使ったファイル: `{file}`"));
    }
    lines.extend([String::new(), "## 要約".to_string(), String::new()]);
    lines.extend(summary_lines(result));
    lines.push(String::new());
    lines.join("\n")
}

fn table_cell(text: &str) -> String {
    text.replace('|', " ")
}

pub fn render_merged(
    channel: &ChannelInfo,
    results: &[VideoResult],
    top_n: usize,
    generated_at: &str,
) -> String {
    let mut lines = vec![format!("# YouTube 最新Top{top_n} 要約レポート"), String::new()];
    lines.extend(channel_lines(channel, generated_at));
    lines.extend([
        "## 一覧".to_string(),
        String::new(),
        "|順位|公開日時|タイトル|URL|".to_string(),
        "|---:|---|---|---|".to_string(),
    ]);
    for r in results {
        lines.push(format!(
            "|{}|{}|{}|{}|",
            r.rank,
            table_cell(&r.published),
            table_cell(&r.title),
            table_cell(&r.link)
        ));
    }
    lines.extend([String::new(), "## 各動画の要約".to_string(), String::new()]);

    for r in results {
        lines.push(format!("### #{} {}", r.rank, r.title));
        lines.push(String::new());
        lines.push(format!("- 公開日時: {}", r.published));
        lines.push(format!("- URL: {}", r.link));
        if let Some(file) = &r.video_file {
            lines.push(format!("- 解析に使ったファイル: `{file}`"));
        }
        lines.push(String::new());
        lines.extend(summary_lines(r));
        lines.push(String::new());
    }
    lines.join("\n")
}

/// Write one individual report; returns its path.
pub async fn write_individual(
    out_dir: &Path,
    channel: &ChannelInfo,
    result: &VideoResult,
    generated_at: &str,
) -> WorkerResult<PathBuf> {
    let dir = out_dir.join(INDIVIDUAL_DIR);
    tokio::fs::create_dir_all(&dir).await?;
    let path = dir.join(individual_file_name(result.rank, &result.video_id, &result.title));
    tokio::fs::write(&path, render_individual(channel, result, generated_at)).await?;
    info!(path = %path.display(), rank = result.rank, "Wrote individual report");
    Ok(path)
}

/// Write `report.md` for all results; returns its path.
pub async fn write_merged(
    out_dir: &Path,
    channel: &ChannelInfo,
    results: &[VideoResult],
    top_n: usize,
    generated_at: &str,
) -> WorkerResult<PathBuf> {
    tokio::fs::create_dir_all(out_dir).await?;
    let path = out_dir.join(MERGED_REPORT);
    tokio::fs::write(&path, render_merged(channel, results, top_n, generated_at)).await?;
    info!(path = %path.display(), videos = results.len(), "Wrote merged report");
    Ok(path)
}

/// Inline summary text explaining why a video could not be summarized.
pub fn failure_summary(error: &WorkerError, timeout: Duration) -> String {
    match error {
        WorkerError::CommandNotFound(_) => format!(
            "要約に失敗しました（ファイル/コマンドが見つかりません）。\n\nエラー: {error}\n\n\
             解決方法: Gemini CLIがインストールされているか、PATHに追加されているか確認してください。"
        ),
        WorkerError::Io(e) if e.kind() == std::io::ErrorKind::NotFound => format!(
            "要約に失敗しました（ファイル/コマンドが見つかりません）。\n\nエラー: {error}\n\n\
             解決方法: Gemini CLIがインストールされているか、PATHに追加されているか確認してください。"
        ),
        WorkerError::ProcessFailed { .. } | WorkerError::RateLimited(_) => {
            format!("要約に失敗しました（コマンド実行エラー）。\n\nエラー: {error}")
        }
        WorkerError::Media(_) => {
            format!("要約に失敗しました（動画の取得/圧縮エラー）。\n\nエラー: {error}")
        }
        WorkerError::ProcessTimedOut { .. } => format!(
            "要約に失敗しました（タイムアウト）。\n\n動画の処理に時間がかかりすぎました（{}秒超過）。\n\n\
             解決方法: 動画が長すぎる可能性があります。タイムアウトを延長して再実行してください。",
            timeout.as_secs()
        ),
        _ => format!("要約に失敗しました（実行時エラー）。\n\nエラー: {error}"),
    }
}

/// Report written in place of the summary report when the step fails.
pub fn render_error_report(message: &str, detail: Option<&str>, now: DateTime<Utc>) -> String {
    let mut lines = vec![
        "# Gemini YouTube Report (Error)".to_string(),
        String::new(),
        format!("- Generated at: {}", now.format("%Y-%m-%d %H:%M:%S UTC")),
        "- Status: Failed".to_string(),
        String::new(),
        "## Error".to_string(),
        String::new(),
        message.to_string(),
    ];
    if let Some(detail) = detail.filter(|d| !d.trim().is_empty()) {
        lines.extend([
            String::new(),
            "## Details".to_string(),
            String::new(),
            "```".to_string(),
            detail.to_string(),
            "```".to_string(),
        ]);
    }
    lines.push(String::new());
    lines.join("\n")
}
