//! Recent posts from a categorized list of RSS and Atom feeds.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, NaiveDateTime, Utc};
use regex::Regex;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::collect::{http_client, utc_stamp, BROWSER_USER_AGENT};
use crate::error::WorkerResult;
use crate::text::{first_attribute, first_element, strip_tags};

pub const SITE: &str = "tech-blogs/rss-sources";
const UNTITLED: &str = "無題";

/// `category -> [feed url]`
pub type FeedConfig = BTreeMap<String, Vec<String>>;

/// Read the feed table. Keys whose value is not an array are ignored.
pub async fn load_feed_config(path: &Path) -> WorkerResult<FeedConfig> {
    let raw = tokio::fs::read_to_string(path).await?;
    parse_feed_config(&raw)
}

pub fn parse_feed_config(raw: &str) -> WorkerResult<FeedConfig> {
    let table: toml::Table = toml::from_str(raw)?;
    Ok(table
        .into_iter()
        .filter_map(|(category, value)| {
            let urls = value.as_array()?;
            let urls = urls
                .iter()
                .map(|u| match u.as_str() {
                    Some(s) => s.to_string(),
                    None => u.to_string(),
                })
                .collect();
            Some((category, urls))
        })
        .collect())
}

#[derive(Debug, Clone, PartialEq)]
pub struct FeedItem {
    pub title: Option<String>,
    pub link: Option<String>,
    pub published: Option<DateTime<Utc>>,
    pub summary: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedFeed {
    pub title: Option<String>,
    pub items: Vec<FeedItem>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RssSource {
    pub feed_name: String,
    pub category: String,
    pub title: String,
    pub url: String,
    pub date: Option<String>,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RssSources {
    pub generated_at: String,
    pub site: String,
    pub num_articles: usize,
    pub sources: Vec<RssSource>,
}

/// RFC 2822 (RSS), RFC 3339 (Atom), or a bare UTC timestamp.
pub fn parse_feed_date(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    DateTime::parse_from_rfc2822(raw)
        .or_else(|_| DateTime::parse_from_rfc3339(raw))
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S")
                .ok()
                .map(|n| n.and_utc())
        })
}

fn first_nonempty(body: &str, tags: &[&str]) -> WorkerResult<Option<String>> {
    for tag in tags {
        if let Some(v) = first_element(body, tag)?.map(|s| s.trim().to_string()) {
            if !v.is_empty() {
                return Ok(Some(v));
            }
        }
    }
    Ok(None)
}

/// Parse an RSS 2.0 or Atom document.
pub fn parse_feed(xml: &str) -> WorkerResult<ParsedFeed> {
    let item_re = Regex::new(r"(?s)<item(?:\s[^>]*)?>(.*?)</item>")?;
    let entry_re = Regex::new(r"(?s)<entry(?:\s[^>]*)?>(.*?)</entry>")?;

    let head_end = ["<item", "<entry"]
        .iter()
        .filter_map(|t| xml.find(t))
        .min()
        .unwrap_or(xml.len());
    let title = first_element(&xml[..head_end], "title")?
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty());

    let pattern = if item_re.is_match(xml) { &item_re } else { &entry_re };
    let mut items = Vec::new();
    for caps in pattern.captures_iter(xml) {
        let Some(body) = caps.get(1).map(|m| m.as_str()) else {
            continue;
        };
        let link = match first_nonempty(body, &["link"])? {
            Some(link) => Some(link),
            None => first_attribute(body, "link", "href")?.filter(|l| !l.trim().is_empty()),
        };
        let published = first_nonempty(body, &["pubDate", "published", "updated", "dc:date"])?
            .and_then(|d| parse_feed_date(&d));
        items.push(FeedItem {
            title: first_nonempty(body, &["title"])?,
            link,
            published,
            summary: first_nonempty(body, &["description", "summary", "content:encoded", "content"])?,
        });
    }
    Ok(ParsedFeed { title, items })
}

/// Readable text from an article page: meta description, else the first
/// paragraphs.
pub fn extract_page_text(html: &str) -> WorkerResult<String> {
    let meta = Regex::new(r#"(?is)<meta[^>]*name="description"[^>]*content="([^"]*)""#)?;
    if let Some(m) = meta.captures(html).and_then(|c| c.get(1)) {
        let text = strip_tags(m.as_str())?;
        if !text.is_empty() {
            return Ok(text);
        }
    }

    let para = Regex::new(r"(?s)<p(?:\s[^>]*)?>(.*?)</p>")?;
    let mut texts = Vec::new();
    for caps in para.captures_iter(html).take(6) {
        if let Some(m) = caps.get(1) {
            let t = strip_tags(m.as_str())?;
            if !t.is_empty() {
                texts.push(t);
            }
        }
    }
    Ok(texts.join("\n"))
}

/// Newest items of one category: `per_feed` per feed within the window,
/// then the newest `keep` overall. Undated items count as published now.
pub fn select_recent(
    feeds: Vec<(String, ParsedFeed)>,
    now: DateTime<Utc>,
    window: chrono::Duration,
    per_feed: usize,
    keep: usize,
) -> Vec<(String, FeedItem)> {
    let cutoff = now - window;
    let mut category: Vec<(DateTime<Utc>, String, FeedItem)> = Vec::new();

    for (feed_name, feed) in feeds {
        let mut recent: Vec<(DateTime<Utc>, FeedItem)> = feed
            .items
            .into_iter()
            .filter_map(|item| match item.published {
                Some(dt) if dt < cutoff => None,
                Some(dt) => Some((dt, item)),
                None => Some((now, item)),
            })
            .collect();
        recent.sort_by(|a, b| b.0.cmp(&a.0));
        category.extend(
            recent
                .into_iter()
                .take(per_feed)
                .map(|(dt, item)| (dt, feed_name.clone(), item)),
        );
    }

    category.sort_by(|a, b| b.0.cmp(&a.0));
    category
        .into_iter()
        .take(keep)
        .map(|(_, name, item)| (name, item))
        .collect()
}

pub struct RssCollector {
    http: Client,
    window: chrono::Duration,
    per_feed: usize,
    per_category: usize,
}

impl RssCollector {
    pub fn new() -> WorkerResult<Self> {
        Ok(Self {
            http: http_client(BROWSER_USER_AGENT, Duration::from_secs(15))?,
            window: chrono::Duration::days(2),
            per_feed: 3,
            per_category: 1,
        })
    }

    pub fn with_window(mut self, window: chrono::Duration) -> Self {
        self.window = window;
        self
    }

    async fn get_text(&self, url: &str) -> WorkerResult<String> {
        Ok(self.http.get(url).send().await?.error_for_status()?.text().await?)
    }

    async fn fetch_feed(&self, url: &str) -> WorkerResult<ParsedFeed> {
        parse_feed(&self.get_text(url).await?)
    }

    async fn article_text(&self, item: &FeedItem, url: &str) -> String {
        if let Some(summary) = &item.summary {
            match strip_tags(summary) {
                Ok(text) => return text,
                Err(e) => debug!(error = %e, "Summary could not be cleaned"),
            }
        }
        match self.get_text(url).await {
            Ok(html) => extract_page_text(&html).unwrap_or_default(),
            Err(e) => {
                debug!(url, error = %e, "Article page unavailable");
                String::new()
            }
        }
    }

    pub async fn collect(&self, config: &FeedConfig, now: DateTime<Utc>) -> WorkerResult<RssSources> {
        let mut sources = Vec::new();

        for (category, urls) in config {
            let mut feeds = Vec::new();
            for url in urls {
                match self.fetch_feed(url).await {
                    Ok(feed) => {
                        let name = feed.title.clone().unwrap_or_else(|| url.clone());
                        feeds.push((name, feed));
                    }
                    Err(e) => warn!(category = %category, url = %url, error = %e, "Feed skipped"),
                }
            }

            for (feed_name, item) in select_recent(feeds, now, self.window, self.per_feed, self.per_category) {
                let Some(url) = item.link.clone() else {
                    continue;
                };
                let text = self.article_text(&item, &url).await;
                sources.push(RssSource {
                    feed_name,
                    category: category.clone(),
                    title: item.title.clone().unwrap_or_else(|| UNTITLED.to_string()),
                    url,
                    date: item.published.map(|d| d.format("%Y-%m-%dT%H:%M:%S").to_string()),
                    text,
                });
            }
        }

        info!(sources = sources.len(), categories = config.len(), "Collected RSS sources");
        Ok(RssSources {
            generated_at: utc_stamp(now),
            site: SITE.to_string(),
            num_articles: sources.len(),
            sources,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const RSS: &str = r#"<?xml version="1.0"?>
<rss version="2.0"><channel>
  <title>Engineering Blog</title>
  <item>
    <title>Old post</title>
    <link>https://blog.example/old</link>
    <pubDate>Mon, 23 Feb 2026 08:00:00 +0000</pubDate>
  </item>
  <item>
    <title>New post</title>
    <link>https://blog.example/new</link>
    <pubDate>Sun, 01 Mar 2026 08:00:00 +0000</pubDate>
    <description>&lt;p&gt;Shipping &lt;b&gt;fast&lt;/b&gt;&lt;/p&gt;</description>
  </item>
</channel></rss>"#;

    const ATOM: &str = r#"<feed xmlns="http://www.w3.org/2005/Atom">
  <title>Atom Notes</title>
  <entry>
    <title>Newest note</title>
    <link href="https://notes.example/1"/>
    <updated>2026-03-01T09:30:00Z</updated>
    <summary><![CDATA[<p>Short summary</p>]]></summary>
  </entry>
</feed>"#;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_parse_rss_and_atom() {
        let feed = parse_feed(RSS).unwrap();
        assert_eq!(feed.title.as_deref(), Some("Engineering Blog"));
        assert_eq!(feed.items.len(), 2);
        assert_eq!(feed.items[1].link.as_deref(), Some("https://blog.example/new"));
        assert_eq!(strip_tags(feed.items[1].summary.as_deref().unwrap()).unwrap(), "Shipping fast");

        let feed = parse_feed(ATOM).unwrap();
        assert_eq!(feed.title.as_deref(), Some("Atom Notes"));
        assert_eq!(feed.items[0].link.as_deref(), Some("https://notes.example/1"));
        assert_eq!(
            feed.items[0].published,
            Some(Utc.with_ymd_and_hms(2026, 3, 1, 9, 30, 0).unwrap())
        );
    }

    #[test]
    fn test_parse_feed_date_formats() {
        assert!(parse_feed_date("Sun, 01 Mar 2026 08:00:00 +0900").is_some());
        assert!(parse_feed_date("2026-03-01T08:00:00+09:00").is_some());
        assert!(parse_feed_date("2026-03-01T08:00:00").is_some());
        assert!(parse_feed_date("yesterday").is_none());
    }

    #[test]
    fn test_select_recent_keeps_newest_in_window() {
        let rss = parse_feed(RSS).unwrap();
        let atom = parse_feed(ATOM).unwrap();
        let picked = select_recent(
            vec![("rss".into(), rss), ("atom".into(), atom)],
            now(),
            chrono::Duration::days(2),
            3,
            1,
        );
        assert_eq!(picked.len(), 1);
        assert_eq!(picked[0].0, "atom");

        let picked = select_recent(
            vec![("rss".into(), parse_feed(RSS).unwrap())],
            now(),
            chrono::Duration::days(2),
            3,
            5,
        );
        // The week-old post falls outside the window.
        assert_eq!(picked.len(), 1);
        assert_eq!(picked[0].1.title.as_deref(), Some("New post"));
    }

    #[test]
    fn test_undated_items_count_as_now() {
        let feed = ParsedFeed {
            title: None,
            items: vec![FeedItem {
                title: None,
                link: Some("https://x.example".into()),
                published: None,
                summary: None,
            }],
        };
        let picked = select_recent(vec![("f".into(), feed)], now(), chrono::Duration::days(2), 3, 1);
        assert_eq!(picked.len(), 1);
    }

    #[test]
    fn test_feed_config_ignores_scalars() {
        let config = parse_feed_config("note = \"x\"\nai = [\"https://a\", \"https://b\"]\n").unwrap();
        assert_eq!(config.len(), 1);
        assert_eq!(config["ai"], vec!["https://a", "https://b"]);
    }

    #[test]
    fn test_extract_page_text() {
        let html = r#"<head><meta name="description" content="About rockets"></head>"#;
        assert_eq!(extract_page_text(html).unwrap(), "About rockets");
        let html = "<p>One</p><p></p><p>Two <i>more</i></p>";
        assert_eq!(extract_page_text(html).unwrap(), "One\nTwo more");
    }

    #[tokio::test]
    async fn test_collect_one_per_category() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rss"))
            .respond_with(ResponseTemplate::new(200).set_body_string(RSS))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/broken"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let mut config = FeedConfig::new();
        config.insert(
            "blogs".into(),
            vec![format!("{}/rss", server.uri()), format!("{}/broken", server.uri())],
        );

        let collector = RssCollector::new()
            .unwrap()
            .with_window(chrono::Duration::days(36500));
        let out = collector.collect(&config, Utc::now()).await.unwrap();
        assert_eq!(out.site, "tech-blogs/rss-sources");
        assert_eq!(out.num_articles, 1);
        let source = &out.sources[0];
        assert_eq!(source.feed_name, "Engineering Blog");
        assert_eq!(source.category, "blogs");
        assert_eq!(source.title, "New post");
        assert_eq!(source.date.as_deref(), Some("2026-03-01T08:00:00"));
        assert_eq!(source.text, "Shipping fast");
    }
}
