//! Collectors for the supporting data the prompt documents read.
//!
//! Each collector fetches one source and writes a pretty-printed JSON file
//! into the data directory.

pub mod github;
pub mod reddit;
pub mod rss;

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Serialize;
use tracing::info;

use crate::error::WorkerResult;

pub use github::{GithubTrendingCollector, TrendingLanguages};
pub use reddit::{RedditCollector, RedditDigest};
pub use rss::{RssCollector, RssSources};

pub const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/127.0.0.0 Safari/537.36";

pub fn http_client(user_agent: &str, timeout: Duration) -> WorkerResult<Client> {
    Ok(Client::builder()
        .user_agent(user_agent)
        .timeout(timeout)
        .build()?)
}

/// `YYYY-MM-DDTHH:MM:SSZ`
pub fn utc_stamp(now: DateTime<Utc>) -> String {
    now.format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

/// Write `value` as pretty JSON to `dir/file_name`.
pub async fn write_json<T: Serialize>(dir: &Path, file_name: &str, value: &T) -> WorkerResult<PathBuf> {
    tokio::fs::create_dir_all(dir).await?;
    let path = dir.join(file_name);
    let body = serde_json::to_string_pretty(value)?;
    tokio::fs::write(&path, body).await?;
    info!(path = %path.display(), "Wrote collector output");
    Ok(path)
}

/// Thousands separators, `1234567 -> "1,234,567"`.
pub fn with_thousands(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_thousands() {
        assert_eq!(with_thousands(0), "0");
        assert_eq!(with_thousands(999), "999");
        assert_eq!(with_thousands(1000), "1,000");
        assert_eq!(with_thousands(1234567), "1,234,567");
    }

    #[tokio::test]
    async fn test_write_json_creates_dir() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("data");
        let path = write_json(&nested, "x.json", &serde_json::json!({"a": "日本語"}))
            .await
            .unwrap();
        let body = std::fs::read_to_string(path).unwrap();
        assert!(body.contains("日本語"));
    }
}
