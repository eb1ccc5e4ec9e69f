//! URL parsing and filename helpers shared across the digest crates.

use url::Url;

/// Errors that can occur during YouTube ID extraction.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum YoutubeIdError {
    #[error("URL is not a valid YouTube URL")]
    InvalidYoutubeUrl,
    #[error("Video ID has invalid format")]
    InvalidVideoId,
    #[error("Video ID not found in URL")]
    VideoIdNotFound,
}

pub type YoutubeIdResult<T> = Result<T, YoutubeIdError>;

const MAX_FILENAME_CHARS: usize = 120;

/// Extract the 11-character video id from any common YouTube URL form:
/// `watch?v=`, `youtu.be/`, `/embed/`, `/v/` and `/shorts/`.
pub fn extract_youtube_id(url: &str) -> YoutubeIdResult<String> {
    let parsed = Url::parse(url.trim()).map_err(|_| YoutubeIdError::InvalidYoutubeUrl)?;
    let host = parsed
        .host_str()
        .map(|h| h.to_ascii_lowercase())
        .ok_or(YoutubeIdError::InvalidYoutubeUrl)?;

    if !(host.ends_with("youtube.com") || host == "youtu.be") {
        return Err(YoutubeIdError::InvalidYoutubeUrl);
    }

    if let Some((_, v)) = parsed.query_pairs().find(|(k, _)| k == "v") {
        return validate_youtube_id(&v);
    }

    let segments: Vec<&str> = parsed
        .path_segments()
        .map(|s| s.filter(|p| !p.is_empty()).collect())
        .unwrap_or_default();

    let candidate = if host == "youtu.be" {
        segments.first().copied()
    } else {
        match segments.as_slice() {
            ["embed" | "v" | "shorts" | "live", id, ..] => Some(*id),
            _ => None,
        }
    };

    match candidate {
        Some(id) => validate_youtube_id(id),
        None => Err(YoutubeIdError::VideoIdNotFound),
    }
}

/// Video id for a feed link, or `None` when the link has no usable id.
pub fn video_id_from_link(link: &str) -> Option<String> {
    extract_youtube_id(link).ok()
}

fn validate_youtube_id(id: &str) -> YoutubeIdResult<String> {
    let id = id.trim();
    if id.len() != 11 || !id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') {
        return Err(YoutubeIdError::InvalidVideoId);
    }
    Ok(id.to_string())
}

/// Channel id (`UC...`) embedded in a `/channel/` URL.
pub fn channel_id_from_url(url: &str) -> Option<String> {
    let start = url.find("/channel/")? + "/channel/".len();
    let id: String = url[start..]
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
        .collect();
    (id.starts_with("UC") && id.len() >= 12).then_some(id)
}

/// Lowercase and collapse whitespace, for duplicate detection.
pub fn normalize_title(title: &str) -> String {
    title
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Make a title usable as a file name on every platform.
pub fn safe_filename(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut in_bad_run = false;
    for c in name.chars() {
        if matches!(c, '\\' | '/' | ':' | '*' | '?' | '"' | '<' | '>' | '|') {
            if !in_bad_run {
                out.push('_');
            }
            in_bad_run = true;
        } else {
            out.push(c);
            in_bad_run = false;
        }
    }
    let collapsed = out.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed.chars().take(MAX_FILENAME_CHARS).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_youtube_id_forms() {
        for url in [
            "https://www.youtube.com/watch?v=dQw4w9WgXcQ",
            "https://youtube.com/watch?feature=share&v=dQw4w9WgXcQ#t=3",
            "https://youtu.be/dQw4w9WgXcQ?si=abc",
            "https://www.youtube.com/embed/dQw4w9WgXcQ",
            "https://www.youtube.com/shorts/dQw4w9WgXcQ",
            "https://m.youtube.com/v/dQw4w9WgXcQ",
        ] {
            assert_eq!(extract_youtube_id(url).unwrap(), "dQw4w9WgXcQ", "{url}");
        }
    }

    #[test]
    fn test_extract_youtube_id_errors() {
        assert_eq!(
            extract_youtube_id("https://vimeo.com/123"),
            Err(YoutubeIdError::InvalidYoutubeUrl)
        );
        assert_eq!(
            extract_youtube_id("https://www.youtube.com/watch?v=short"),
            Err(YoutubeIdError::InvalidVideoId)
        );
        assert_eq!(
            extract_youtube_id("https://www.youtube.com/@somechannel"),
            Err(YoutubeIdError::VideoIdNotFound)
        );
        assert!(video_id_from_link("not a url").is_none());
    }

    #[test]
    fn test_channel_id_from_url() {
        assert_eq!(
            channel_id_from_url("https://www.youtube.com/channel/UCUWtuyVjeMQygQiy3adHb1g/videos"),
            Some("UCUWtuyVjeMQygQiy3adHb1g".to_string())
        );
        assert_eq!(channel_id_from_url("https://www.youtube.com/@handle"), None);
        assert_eq!(channel_id_from_url("https://www.youtube.com/channel/UCshort"), None);
    }

    #[test]
    fn test_safe_filename() {
        assert_eq!(safe_filename("a/b:c??d"), "a_b_c_d");
        assert_eq!(safe_filename("  many   spaces\there "), "many spaces here");
        assert_eq!(safe_filename(&"x".repeat(300)).chars().count(), 120);
    }

    #[test]
    fn test_normalize_title() {
        assert_eq!(normalize_title("  Hello\n  World "), "hello world");
    }
}
