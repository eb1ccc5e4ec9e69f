//! Channel feed entries.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::utils::normalize_title;

/// One `<entry>` of a channel's Atom feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedEntry {
    pub title: String,
    pub link: String,
    /// Publication timestamp as the feed reports it
    pub published: String,
    /// `None` when the link carries no recognizable id
    pub video_id: Option<String>,
}

/// Keep the first `limit` entries that are unique by video id and by
/// normalized title, preserving feed order.
pub fn dedupe_entries(entries: &[FeedEntry], limit: usize) -> Vec<FeedEntry> {
    let mut seen_ids = HashSet::new();
    let mut seen_titles = HashSet::new();
    let mut picked = Vec::new();

    for entry in entries {
        if picked.len() >= limit {
            break;
        }
        if let Some(id) = &entry.video_id {
            if !seen_ids.insert(id.clone()) {
                continue;
            }
        }
        let title = normalize_title(&entry.title);
        if !title.is_empty() && !seen_titles.insert(title) {
            continue;
        }
        picked.push(entry.clone());
    }

    picked
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: &str, title: &str) -> FeedEntry {
        FeedEntry {
            title: title.to_string(),
            link: format!("https://www.youtube.com/watch?v={id}"),
            published: "2026-01-01T00:00:00+00:00".to_string(),
            video_id: Some(id.to_string()),
        }
    }

    #[test]
    fn test_same_id_different_casing_is_one() {
        let entries = vec![
            entry("aaaaaaaaaaa", "Launch Day Recap"),
            entry("aaaaaaaaaaa", "LAUNCH DAY RECAP"),
        ];
        let picked = dedupe_entries(&entries, 5);
        assert_eq!(picked.len(), 1);
        assert_eq!(picked[0].title, "Launch Day Recap");
    }

    #[test]
    fn test_same_normalized_title_is_one() {
        let entries = vec![
            entry("aaaaaaaaaaa", "Launch  Day Recap"),
            entry("bbbbbbbbbbb", "launch day\trecap "),
        ];
        assert_eq!(dedupe_entries(&entries, 5).len(), 1);
    }

    #[test]
    fn test_limit_and_order() {
        let entries = vec![
            entry("aaaaaaaaaaa", "one"),
            entry("bbbbbbbbbbb", "two"),
            entry("ccccccccccc", "three"),
        ];
        let picked = dedupe_entries(&entries, 2);
        let titles: Vec<_> = picked.iter().map(|e| e.title.as_str()).collect();
        assert_eq!(titles, vec!["one", "two"]);
    }

    #[test]
    fn test_missing_ids_still_deduped_by_title() {
        let mut a = entry("x", "Same");
        a.video_id = None;
        let mut b = entry("y", "same");
        b.video_id = None;
        assert_eq!(dedupe_entries(&[a, b], 5).len(), 1);
    }
}
