//! GitHub Trending scraper.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use regex::Regex;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::collect::{http_client, utc_stamp, with_thousands, BROWSER_USER_AGENT};
use crate::error::WorkerResult;
use crate::text::strip_tags;

pub const GITHUB_BASE: &str = "https://github.com";
pub const SITE: &str = "github-trending";

/// Which trending pages to read. An empty language is the all-languages page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrendingLanguages {
    #[serde(default)]
    pub general: Vec<String>,
    #[serde(default)]
    pub specific: Vec<String>,
}

impl Default for TrendingLanguages {
    fn default() -> Self {
        Self {
            general: vec![String::new()],
            specific: Vec::new(),
        }
    }
}

impl TrendingLanguages {
    pub async fn load(path: &Path) -> WorkerResult<Self> {
        let raw = tokio::fs::read_to_string(path).await?;
        Ok(toml::from_str(&raw)?)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrendingRepository {
    pub name: String,
    pub description: Option<String>,
    pub link: String,
    pub stars: u64,
    /// Stars gained in the trending period
    pub stars_today: u64,
    pub stars_period: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendingArticle {
    pub url: String,
    pub title: String,
    pub date: Option<String>,
    pub executive_summary: Vec<String>,
    pub key_findings: Option<Vec<String>>,
    pub references: Vec<String>,
    pub retrieved_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendingReport {
    pub generated_at: String,
    pub site: String,
    pub num_articles: usize,
    pub articles: Vec<TrendingArticle>,
}

pub struct GithubTrendingCollector {
    http: Client,
    base_url: String,
    general_limit: usize,
    specific_limit: usize,
    min_stars_today: u64,
}

impl GithubTrendingCollector {
    pub fn new() -> WorkerResult<Self> {
        Ok(Self {
            http: http_client(BROWSER_USER_AGENT, Duration::from_secs(30))?,
            base_url: GITHUB_BASE.to_string(),
            general_limit: 10,
            specific_limit: 5,
            min_stars_today: 0,
        })
    }

    pub fn with_base_url(mut self, base: impl Into<String>) -> Self {
        self.base_url = base.into();
        self
    }

    pub fn with_min_stars_today(mut self, min: u64) -> Self {
        self.min_stars_today = min;
        self
    }

    pub fn trending_url(&self, language: &str) -> String {
        if language.is_empty() {
            format!("{}/trending", self.base_url)
        } else {
            format!("{}/trending/{}", self.base_url, language)
        }
    }

    /// A failed page yields no repositories rather than failing the run.
    async fn retrieve(&self, language: &str, limit: usize) -> Vec<TrendingRepository> {
        let url = self.trending_url(language);
        let html = match self.fetch(&url).await {
            Ok(html) => html,
            Err(e) => {
                warn!(url = %url, error = %e, "Trending page unavailable");
                return Vec::new();
            }
        };
        match parse_trending_page(&html, limit) {
            Ok(repos) => {
                debug!(url = %url, repos = repos.len(), "Parsed trending page");
                repos
            }
            Err(e) => {
                warn!(url = %url, error = %e, "Trending page could not be parsed");
                Vec::new()
            }
        }
    }

    async fn fetch(&self, url: &str) -> WorkerResult<String> {
        Ok(self
            .http
            .get(url)
            .header(
                "Accept",
                "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
            )
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?)
    }

    pub async fn collect(&self, languages: &TrendingLanguages, now: DateTime<Utc>) -> WorkerResult<TrendingReport> {
        let mut found = Vec::new();
        for lang in &languages.general {
            found.extend(self.retrieve(lang, self.general_limit).await);
        }
        for lang in &languages.specific {
            found.extend(self.retrieve(lang, self.specific_limit).await);
        }

        let mut repos = dedupe_repositories(found);
        repos.retain(|r| r.stars_today >= self.min_stars_today);
        sort_by_momentum(&mut repos);

        let report = build_report(&repos, now);
        info!(articles = report.num_articles, "Collected GitHub trending repositories");
        Ok(report)
    }
}

fn clean_name(raw: &str) -> String {
    raw.split('/')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

fn parse_count(text: &str) -> Option<u64> {
    let digits: String = text.trim().chars().filter(|c| *c != ',' && *c != '.').collect();
    digits.parse().ok()
}

/// Parse `article.Box-row` blocks of a trending page.
pub fn parse_trending_page(html: &str, limit: usize) -> WorkerResult<Vec<TrendingRepository>> {
    let article_re = Regex::new(r#"(?s)<article[^>]*class="[^"]*\bBox-row\b[^"]*"[^>]*>(.*?)</article>"#)?;
    let name_re = Regex::new(r#"(?s)<h2[^>]*>.*?<a[^>]*href="([^"]+)"[^>]*>(.*?)</a>"#)?;
    let desc_re = Regex::new(r"(?s)<p(?:\s[^>]*)?>(.*?)</p>")?;
    let stars_re = Regex::new(r#"(?s)<a[^>]*href="[^"]*/stargazers"[^>]*>(.*?)</a>"#)?;
    let trend_re = Regex::new(r"(?i)([\d,]+)\s+stars?\s+(today|this\s+week)")?;

    let mut repos = Vec::new();
    for caps in article_re.captures_iter(html) {
        if limit > 0 && repos.len() >= limit {
            break;
        }
        let Some(block) = caps.get(1).map(|m| m.as_str()) else {
            continue;
        };
        let Some(name_caps) = name_re.captures(block) else {
            continue;
        };
        let href = name_caps.get(1).map(|m| m.as_str().trim()).unwrap_or_default();
        let name = clean_name(&strip_tags(name_caps.get(2).map(|m| m.as_str()).unwrap_or_default())?);

        let description = match desc_re.captures(block).and_then(|c| c.get(1)) {
            Some(m) => Some(strip_tags(m.as_str())?).filter(|d| !d.is_empty()),
            None => None,
        };

        let stars = match stars_re.captures(block).and_then(|c| c.get(1)) {
            Some(m) => parse_count(&strip_tags(m.as_str())?).unwrap_or(0),
            None => 0,
        };

        let text = strip_tags(block)?;
        let (stars_today, stars_period) = match trend_re.captures(&text) {
            Some(t) => {
                let count = t.get(1).and_then(|m| parse_count(m.as_str())).unwrap_or(0);
                let period = t.get(2).map(|m| m.as_str().to_lowercase()).unwrap_or_default();
                let period = if period.contains("today") { "today" } else { "this week" };
                (count, period.to_string())
            }
            None => (0, "today".to_string()),
        };

        repos.push(TrendingRepository {
            name,
            description,
            link: format!("{GITHUB_BASE}{href}"),
            stars,
            stars_today,
            stars_period,
        });
    }
    Ok(repos)
}

/// One entry per link, preferring more stars today, then more stars.
pub fn dedupe_repositories(repos: Vec<TrendingRepository>) -> Vec<TrendingRepository> {
    let mut order = Vec::new();
    let mut best: HashMap<String, TrendingRepository> = HashMap::new();
    for repo in repos {
        let replace = match best.get(&repo.link) {
            None => {
                order.push(repo.link.clone());
                true
            }
            Some(seen) => (repo.stars_today, repo.stars) > (seen.stars_today, seen.stars),
        };
        if replace {
            best.insert(repo.link.clone(), repo);
        }
    }
    order.into_iter().filter_map(|link| best.remove(&link)).collect()
}

pub fn sort_by_momentum(repos: &mut [TrendingRepository]) {
    repos.sort_by(|a, b| (b.stars_today, b.stars).cmp(&(a.stars_today, a.stars)));
}

pub fn build_report(repos: &[TrendingRepository], now: DateTime<Utc>) -> TrendingReport {
    let stamp = utc_stamp(now);
    let articles: Vec<TrendingArticle> = repos
        .iter()
        .map(|r| {
            let mut summary = Vec::new();
            if let Some(desc) = &r.description {
                summary.push(desc.clone());
            }
            summary.push(format!("今日の獲得スター数: {}", with_thousands(r.stars_today)));
            summary.push(format!("累積スター数: {}", with_thousands(r.stars)));
            TrendingArticle {
                url: r.link.clone(),
                title: r.name.clone(),
                date: None,
                executive_summary: summary,
                key_findings: None,
                references: vec![r.link.clone()],
                retrieved_at: stamp.clone(),
            }
        })
        .collect();

    TrendingReport {
        generated_at: stamp,
        site: SITE.to_string(),
        num_articles: articles.len(),
        articles,
    }
}
