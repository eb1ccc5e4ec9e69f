//! Channel resolution and Atom feed parsing.

use std::time::Duration;

use digest_models::{channel_id_from_url, dedupe_entries, video_id_from_link, FeedEntry};
use regex::Regex;
use reqwest::Client;
use tracing::{debug, info, warn};

use crate::error::{WorkerError, WorkerResult};
use crate::text::{first_attribute, first_element};

pub const DEFAULT_FEED_BASE: &str = "https://www.youtube.com/feeds/videos.xml";

const CHANNEL_PAGE_USER_AGENT: &str = "Mozilla/5.0 (compatible; yt-top3-bot/1.0)";

/// Where the channel id hides in a channel page.
const CHANNEL_ID_PATTERNS: &[&str] = &[
    r#""channelId"\s*:\s*"(UC[a-zA-Z0-9_-]{10,})""#,
    r#""externalId"\s*:\s*"(UC[a-zA-Z0-9_-]{10,})""#,
    r#"itemprop="channelId"\s+content="(UC[a-zA-Z0-9_-]{10,})""#,
];

#[derive(Debug, Clone)]
pub struct ChannelFeedClient {
    http: Client,
    feed_base: String,
}

impl ChannelFeedClient {
    pub fn new() -> WorkerResult<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(20))
            .user_agent(CHANNEL_PAGE_USER_AGENT)
            .build()?;
        Ok(Self {
            http,
            feed_base: DEFAULT_FEED_BASE.to_string(),
        })
    }

    pub fn with_feed_base(mut self, base: impl Into<String>) -> Self {
        self.feed_base = base.into();
        self
    }

    pub fn feed_url(&self, channel_id: &str) -> String {
        format!("{}?channel_id={}", self.feed_base, channel_id)
    }

    /// `/channel/UC…` URLs resolve locally; anything else is fetched and scanned.
    pub async fn resolve_channel_id(&self, channel_url: &str) -> WorkerResult<String> {
        if let Some(id) = channel_id_from_url(channel_url) {
            return Ok(id);
        }

        debug!(url = %channel_url, "Fetching channel page to find its id");
        let html = self
            .http
            .get(channel_url)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;

        extract_channel_id_from_html(&html)?.ok_or_else(|| {
            WorkerError::non_retryable(format!(
                "could not extract a channel id (UC...) from {channel_url}; pass a /channel/UC... URL"
            ))
        })
    }

    pub async fn fetch_entries(&self, channel_id: &str) -> WorkerResult<Vec<FeedEntry>> {
        let url = self.feed_url(channel_id);
        let xml = self
            .http
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        let entries = parse_atom_entries(&xml)?;
        info!(channel_id, entries = entries.len(), "Fetched channel feed");
        Ok(entries)
    }
}

pub fn extract_channel_id_from_html(html: &str) -> WorkerResult<Option<String>> {
    for pattern in CHANNEL_ID_PATTERNS {
        let re = Regex::new(pattern)?;
        if let Some(m) = re.captures(html).and_then(|c| c.get(1)) {
            return Ok(Some(m.as_str().to_string()));
        }
    }
    Ok(None)
}

/// Parse the `<entry>` elements of a YouTube channel feed.
pub fn parse_atom_entries(xml: &str) -> WorkerResult<Vec<FeedEntry>> {
    let entry_re = Regex::new(r"(?s)<entry(?:\s[^>]*)?>(.*?)</entry>")?;
    let mut entries = Vec::new();

    for caps in entry_re.captures_iter(xml) {
        let Some(body) = caps.get(1).map(|m| m.as_str()) else {
            continue;
        };
        let title = first_element(body, "title")?.unwrap_or_default().trim().to_string();
        let link = first_attribute(body, "link", "href")?.unwrap_or_default().trim().to_string();
        let published = first_element(body, "published")?.unwrap_or_default().trim().to_string();
        let video_id = first_element(body, "yt:videoId")?
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .or_else(|| video_id_from_link(&link));

        entries.push(FeedEntry {
            title,
            link,
            published,
            video_id,
        });
    }
    Ok(entries)
}

/// Pick the newest `count` distinct videos.
///
/// Scans `max(4 * count, 10)` entries. Entries without an id are named
/// `unknown_{rank}`.
pub fn select_videos(entries: &[FeedEntry], count: usize) -> Vec<FeedEntry> {
    let scan = entries.len().min((count * 4).max(10));
    let mut picked = dedupe_entries(&entries[..scan], count);

    for (idx, entry) in picked.iter_mut().enumerate() {
        if entry.video_id.is_none() {
            entry.video_id = Some(format!("unknown_{}", idx + 1));
        }
    }

    if picked.len() < count {
        warn!(
            found = picked.len(),
            requested = count,
            scanned = scan,
            "Fewer unique videos than requested"
        );
    }
    picked
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    pub(crate) const SAMPLE_FEED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<feed xmlns:yt="http://www.youtube.com/xml/schemas/2015" xmlns="http://www.w3.org/2005/Atom">
 <title>Channel</title>
 <entry>
  <id>yt:video:AAAAAAAAAAA</id>
  <yt:videoId>AAAAAAAAAAA</yt:videoId>
  <title>First &amp; best</title>
  <link rel="alternate" href="https://www.youtube.com/watch?v=AAAAAAAAAAA"/>
  <published>2026-03-01T10:00:00+00:00</published>
 </entry>
 <entry>
  <yt:videoId>BBBBBBBBBBB</yt:videoId>
  <title>  first   &amp; BEST </title>
  <link rel="alternate" href="https://www.youtube.com/watch?v=BBBBBBBBBBB"/>
  <published>2026-02-28T10:00:00+00:00</published>
 </entry>
 <entry>
  <title>Short clip</title>
  <link rel="alternate" href="https://www.youtube.com/shorts/CCCCCCCCCCC"/>
  <published>2026-02-27T10:00:00+00:00</published>
 </entry>
 <entry>
  <title>No id at all</title>
  <link rel="alternate" href="https://example.com/post"/>
  <published>2026-02-26T10:00:00+00:00</published>
 </entry>
</feed>"#;

    #[test]
    fn test_parse_atom_entries() {
        let entries = parse_atom_entries(SAMPLE_FEED).unwrap();
        assert_eq!(entries.len(), 4);
        assert_eq!(entries[0].title, "First & best");
        assert_eq!(entries[0].video_id.as_deref(), Some("AAAAAAAAAAA"));
        assert_eq!(entries[0].published, "2026-03-01T10:00:00+00:00");
        assert_eq!(entries[2].video_id.as_deref(), Some("CCCCCCCCCCC"));
        assert_eq!(entries[3].video_id, None);
    }

    #[test]
    fn test_select_videos_dedupes_and_names_unknown() {
        let entries = parse_atom_entries(SAMPLE_FEED).unwrap();
        let picked = select_videos(&entries, 5);
        // The second entry repeats the first title.
        assert_eq!(picked.len(), 3);
        assert_eq!(picked[1].video_id.as_deref(), Some("CCCCCCCCCCC"));
        assert_eq!(picked[2].video_id.as_deref(), Some("unknown_3"));
    }

    #[test]
    fn test_select_videos_limits_scan_window() {
        let entries: Vec<FeedEntry> = (0..30)
            .map(|i| FeedEntry {
                title: format!("video {i}"),
                link: String::new(),
                published: String::new(),
                video_id: Some(format!("id{i}")),
            })
            .collect();
        assert_eq!(select_videos(&entries, 1).len(), 1);
        assert_eq!(select_videos(&entries, 20).len(), 20);
        assert_eq!(select_videos(&entries[..3], 5).len(), 3);
    }

    #[test]
    fn test_extract_channel_id_from_html() {
        let html = r#"<meta itemprop="channelId" content="UCabcdefghijklmnop">"#;
        assert_eq!(
            extract_channel_id_from_html(html).unwrap().as_deref(),
            Some("UCabcdefghijklmnop")
        );
        let html = r#"{"externalId":"UC0123456789abcdef"}"#;
        assert_eq!(
            extract_channel_id_from_html(html).unwrap().as_deref(),
            Some("UC0123456789abcdef")
        );
        assert_eq!(extract_channel_id_from_html("<html></html>").unwrap(), None);
    }

    #[tokio::test]
    async fn test_resolve_and_fetch_over_http() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/@handle"))
            .respond_with(
                ResponseTemplate::new(200).set_body_string(r#"<script>{"channelId":"UCxxxxxxxxxxxxxxxxxxxxxx"}</script>"#),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/feeds/videos.xml"))
            .and(query_param("channel_id", "UCxxxxxxxxxxxxxxxxxxxxxx"))
            .respond_with(ResponseTemplate::new(200).set_body_string(SAMPLE_FEED))
            .mount(&server)
            .await;

        let client = ChannelFeedClient::new()
            .unwrap()
            .with_feed_base(format!("{}/feeds/videos.xml", server.uri()));
        let id = client
            .resolve_channel_id(&format!("{}/@handle", server.uri()))
            .await
            .unwrap();
        assert_eq!(id, "UCxxxxxxxxxxxxxxxxxxxxxx");

        let entries = client.fetch_entries(&id).await.unwrap();
        assert_eq!(entries.len(), 4);
    }

    #[tokio::test]
    async fn test_channel_url_resolves_without_fetch() {
        let client = ChannelFeedClient::new().unwrap();
        let id = client
            .resolve_channel_id("https://www.youtube.com/channel/UCUWtuyVjeMQygQiy3adHb1g")
            .await
            .unwrap();
        assert_eq!(id, "UCUWtuyVjeMQygQiy3adHb1g");
    }
}
