//! Turso pipeline client.

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use serde_json::Value;
use tracing::{debug, info, info_span, Instrument};

use crate::error::{StoreError, StoreResult};
use crate::types::{Arg, PipelineBody, PipelineRequest, PipelineResponse, PipelineResult, Statement};

const DEFAULT_SITE: &str = "ai-news.dev";

const DDL_DAILY_REPORT: &str = "CREATE TABLE IF NOT EXISTS daily_ai_news_reports (
  report_id TEXT PRIMARY KEY,
  site TEXT NOT NULL,
  report_date TEXT NOT NULL,
  generated_at TEXT,
  num_articles INTEGER NOT NULL,
  articles_json TEXT NOT NULL,
  markdown_content TEXT,
  created_at REAL NOT NULL,
  updated_at REAL
)";

const UPSERT_DAILY_REPORT: &str = "INSERT INTO daily_ai_news_reports (
  report_id, site, report_date, generated_at, num_articles, articles_json, markdown_content, created_at, updated_at
) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
ON CONFLICT(report_id) DO UPDATE SET
  site=excluded.site,
  report_date=excluded.report_date,
  generated_at=excluded.generated_at,
  num_articles=excluded.num_articles,
  articles_json=excluded.articles_json,
  markdown_content=excluded.markdown_content,
  updated_at=excluded.updated_at";

#[derive(Debug, Clone)]
pub struct TursoConfig {
    /// Database URL; `libsql://` is rewritten to `https://`
    pub database_url: String,
    pub auth_token: String,
    pub timeout: Duration,
    pub connect_timeout: Duration,
}

impl TursoConfig {
    /// Create config from environment variables.
    ///
    /// Returns `Ok(None)` when `TURSO_DATABASE_URL` is unset, so callers can
    /// treat archiving as optional.
    pub fn from_env() -> StoreResult<Option<Self>> {
        let database_url = match std::env::var("TURSO_DATABASE_URL") {
            Ok(url) if !url.trim().is_empty() => url,
            _ => return Ok(None),
        };
        let auth_token = std::env::var("TURSO_AUTH_TOKEN").map_err(|_| {
            StoreError::not_configured("TURSO_AUTH_TOKEN must be set when TURSO_DATABASE_URL is")
        })?;

        let timeout_secs: u64 = std::env::var("TURSO_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(30);

        Ok(Some(Self {
            database_url,
            auth_token,
            timeout: Duration::from_secs(timeout_secs),
            connect_timeout: Duration::from_secs(5),
        }))
    }

    fn pipeline_url(&self) -> String {
        let base = self.database_url.trim().trim_end_matches('/');
        let base = match base.strip_prefix("libsql://") {
            Some(host) => format!("https://{host}"),
            None => base.to_string(),
        };
        format!("{base}/v2/pipeline")
    }
}

/// One archived report.
#[derive(Debug, Clone, PartialEq)]
pub struct ReportRow {
    pub report_id: String,
    pub site: String,
    pub report_date: String,
    pub generated_at: String,
    pub num_articles: i64,
    pub articles_json: String,
    pub markdown_content: Option<String>,
    pub created_at: f64,
}

impl ReportRow {
    /// Build a row from a raw report artifact.
    ///
    /// Each push creates a new row: the id carries the unix timestamp.
    pub fn from_report(
        report: &Value,
        markdown: Option<&str>,
        report_date: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<Self> {
        let field = |name: &str| report.get(name).and_then(Value::as_str).filter(|s| !s.is_empty());
        let articles = report
            .get("articles")
            .cloned()
            .unwrap_or_else(|| Value::Array(Vec::new()));
        let article_len = articles.as_array().map(|a| a.len()).unwrap_or(0) as i64;
        let num_articles = report
            .get("num_articles")
            .and_then(Value::as_i64)
            .unwrap_or(article_len);

        Ok(Self {
            report_id: format!("ai-news-{report_date}-{}", now.timestamp()),
            site: field("site").unwrap_or(DEFAULT_SITE).to_string(),
            report_date: report_date.to_string(),
            generated_at: field("generated_at").unwrap_or_default().to_string(),
            num_articles,
            articles_json: serde_json::to_string(&articles)?,
            markdown_content: markdown.filter(|m| !m.is_empty()).map(str::to_string),
            created_at: now.timestamp_millis() as f64 / 1000.0,
        })
    }

    fn args(&self) -> Vec<Arg> {
        vec![
            Arg::text(&self.report_id),
            Arg::text(&self.site),
            Arg::text(&self.report_date),
            Arg::text(&self.generated_at),
            Arg::integer(self.num_articles),
            Arg::text(&self.articles_json),
            Arg::opt_text(self.markdown_content.as_deref()),
            Arg::float(self.created_at),
            Arg::float(self.created_at),
        ]
    }
}

#[derive(Clone)]
pub struct TursoClient {
    http: Client,
    config: TursoConfig,
    pipeline_url: String,
}

impl TursoClient {
    pub fn new(config: TursoConfig) -> StoreResult<Self> {
        let http = Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .user_agent(concat!("digest-store/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(StoreError::Network)?;
        let pipeline_url = config.pipeline_url();
        Ok(Self {
            http,
            config,
            pipeline_url,
        })
    }

    /// Create from environment variables, or `None` when not configured.
    pub fn from_env() -> StoreResult<Option<Self>> {
        TursoConfig::from_env()?.map(Self::new).transpose()
    }

    /// Run statements in one pipeline request; fails on the first statement error.
    pub async fn execute(&self, statements: Vec<Statement>) -> StoreResult<Vec<Value>> {
        let count = statements.len();
        let mut requests: Vec<PipelineRequest> = statements
            .into_iter()
            .map(|stmt| PipelineRequest::Execute { stmt })
            .collect();
        requests.push(PipelineRequest::Close);
        let body = PipelineBody { requests };

        let span = info_span!("turso_request", statements = count);
        async {
            let start = Instant::now();
            let response = self
                .http
                .post(&self.pipeline_url)
                .bearer_auth(&self.config.auth_token)
                .json(&body)
                .send()
                .await?;
            let status = response.status();
            debug!(status = status.as_u16(), latency_ms = start.elapsed().as_millis() as u64, "Turso responded");

            if status != StatusCode::OK {
                let text = response.text().await.unwrap_or_default();
                return Err(StoreError::from_http_status(status.as_u16(), text));
            }

            let parsed: PipelineResponse = response.json().await?;
            let mut values = Vec::with_capacity(count);
            for result in parsed.results.into_iter().take(count) {
                match result {
                    PipelineResult::Ok { response } => values.push(response),
                    PipelineResult::Error { error } => {
                        let code = error.code.unwrap_or_default();
                        return Err(StoreError::StatementFailed(
                            format!("{code} {}", error.message).trim().to_string(),
                        ));
                    }
                }
            }
            if values.len() != count {
                return Err(StoreError::InvalidResponse(format!(
                    "expected {count} results, got {}",
                    values.len()
                )));
            }
            Ok(values)
        }
        .instrument(span)
        .await
    }

    /// Create the table if needed and upsert the row. Returns the report id.
    pub async fn push_daily_report(&self, row: &ReportRow) -> StoreResult<String> {
        self.execute(vec![
            Statement {
                sql: DDL_DAILY_REPORT.to_string(),
                args: Vec::new(),
            },
            Statement {
                sql: UPSERT_DAILY_REPORT.to_string(),
                args: row.args(),
            },
        ])
        .await?;

        info!(report_id = %row.report_id, site = %row.site, "Archived report to Turso");
        Ok(row.report_id.clone())
    }
}
