//! Top posts of the day from two groups of subreddits.

use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use crate::collect::http_client;
use crate::error::{WorkerError, WorkerResult};

pub const REDDIT_BASE: &str = "https://www.reddit.com";
const USER_AGENT: &str = "CodexAgent/1.0 (contact: example@example.com)";

pub const TECH_SUBREDDITS: &[&str] = &["artificial", "compsci", "coding"];
pub const NEWS_SUBREDDITS: &[&str] = &["technology", "Futurology"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RedditPost {
    pub title: Option<String>,
    pub permalink: Option<String>,
    pub url: Option<String>,
    pub created_utc: Option<f64>,
    pub subreddit: Option<String>,
    pub author: Option<String>,
    pub score: Option<i64>,
    pub num_comments: Option<i64>,
    pub created_iso: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RedditDigest {
    pub tech: Vec<RedditPost>,
    pub news: Vec<RedditPost>,
    pub fetched_at: String,
}

pub struct RedditCollector {
    http: Client,
    base_url: String,
    limit: u32,
    attempts: u32,
    attempt_delay: Duration,
}

impl RedditCollector {
    pub fn new(limit: u32) -> WorkerResult<Self> {
        Ok(Self {
            http: http_client(USER_AGENT, Duration::from_secs(30))?,
            base_url: REDDIT_BASE.to_string(),
            limit,
            attempts: 3,
            attempt_delay: Duration::from_secs(1),
        })
    }

    pub fn with_base_url(mut self, base: impl Into<String>) -> Self {
        self.base_url = base.into();
        self
    }

    pub fn with_attempt_delay(mut self, delay: Duration) -> Self {
        self.attempt_delay = delay;
        self
    }

    pub fn group_url(&self, subreddits: &[&str]) -> String {
        format!(
            "{}/r/{}/top.json?t=day&limit={}",
            self.base_url,
            subreddits.join("+"),
            self.limit
        )
    }

    async fn fetch_group(&self, subreddits: &[&str]) -> WorkerResult<Value> {
        let url = self.group_url(subreddits);
        let mut attempt = 1;
        loop {
            let result = async {
                let resp = self.http.get(&url).send().await?.error_for_status()?;
                Ok::<Value, WorkerError>(resp.json::<Value>().await?)
            }
            .await;

            match result {
                Ok(value) => return Ok(value),
                Err(e) if attempt < self.attempts => {
                    warn!(url = %url, attempt, error = %e, "Reddit fetch failed, retrying");
                    tokio::time::sleep(self.attempt_delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    return Err(WorkerError::collector_failed(format!(
                        "reddit {url} after {attempt} attempts: {e}"
                    )))
                }
            }
        }
    }

    pub async fn collect(&self, now: DateTime<Utc>) -> WorkerResult<RedditDigest> {
        let tech = normalize_listing(&self.fetch_group(TECH_SUBREDDITS).await?);
        let news = normalize_listing(&self.fetch_group(NEWS_SUBREDDITS).await?);
        info!(tech = tech.len(), news = news.len(), "Collected Reddit posts");
        Ok(RedditDigest {
            tech,
            news,
            fetched_at: now.to_rfc3339_opts(SecondsFormat::Micros, false),
        })
    }
}

/// Flatten a listing's `data.children[].data` into posts.
pub fn normalize_listing(listing: &Value) -> Vec<RedditPost> {
    let children = listing
        .pointer("/data/children")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();

    children
        .iter()
        .map(|child| {
            let data = &child["data"];
            let text = |key: &str| data.get(key).and_then(Value::as_str).map(str::to_string);
            let created_utc = data.get("created_utc").and_then(Value::as_f64);
            RedditPost {
                title: text("title"),
                permalink: text("permalink"),
                url: text("url"),
                created_utc,
                subreddit: text("subreddit"),
                author: text("author"),
                score: data.get("score").and_then(Value::as_i64),
                num_comments: data.get("num_comments").and_then(Value::as_i64),
                created_iso: created_utc.and_then(to_iso),
            }
        })
        .collect()
}

fn to_iso(ts: f64) -> Option<String> {
    let secs = ts.trunc() as i64;
    let nanos = ((ts - ts.trunc()) * 1e9) as u32;
    DateTime::<Utc>::from_timestamp(secs, nanos).map(|dt| dt.to_rfc3339_opts(SecondsFormat::AutoSi, false))
}
