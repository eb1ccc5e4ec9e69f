//! Small text helpers for scraped HTML and XML.

use regex::Regex;

use crate::error::WorkerResult;

/// Decode the XML predefined entities, numeric references and CDATA wrappers.
pub fn decode_entities(text: &str) -> String {
    let text = text.trim();
    let text = text
        .strip_prefix("<![CDATA[")
        .and_then(|t| t.strip_suffix("]]>"))
        .unwrap_or(text);

    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find('&') {
        out.push_str(&rest[..start]);
        let tail = &rest[start..];
        let Some(end) = tail.find(';').filter(|&e| e <= 10) else {
            out.push('&');
            rest = &tail[1..];
            continue;
        };
        let entity = &tail[1..end];
        let decoded = match entity {
            "amp" => Some('&'),
            "lt" => Some('<'),
            "gt" => Some('>'),
            "quot" => Some('"'),
            "apos" => Some('\''),
            "nbsp" => Some(' '),
            _ => entity
                .strip_prefix("#x")
                .or_else(|| entity.strip_prefix("#X"))
                .and_then(|hex| u32::from_str_radix(hex, 16).ok())
                .or_else(|| entity.strip_prefix('#').and_then(|d| d.parse().ok()))
                .and_then(char::from_u32),
        };
        match decoded {
            Some(c) => {
                out.push(c);
                rest = &tail[end + 1..];
            }
            None => {
                out.push('&');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

/// Collapse runs of whitespace into single spaces.
pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Drop markup and decode entities, leaving readable text.
pub fn strip_tags(html: &str) -> WorkerResult<String> {
    let tags = Regex::new(r"(?s)<[^>]*>")?;
    Ok(collapse_whitespace(&decode_entities(&tags.replace_all(html, " "))))
}

/// Inner text of the first `<tag ...>...</tag>` in `xml`.
pub fn first_element(xml: &str, tag: &str) -> WorkerResult<Option<String>> {
    let pattern = Regex::new(&format!(r"(?s)<{0}(?:\s[^>]*)?>(.*?)</{0}>", regex::escape(tag)))?;
    Ok(pattern
        .captures(xml)
        .and_then(|c| c.get(1))
        .map(|m| decode_entities(m.as_str())))
}

/// Value of `attr` on the first `<tag>` carrying it.
pub fn first_attribute(xml: &str, tag: &str, attr: &str) -> WorkerResult<Option<String>> {
    let pattern = Regex::new(&format!(
        r#"<{}\b[^>]*\b{}\s*=\s*"([^"]*)""#,
        regex::escape(tag),
        regex::escape(attr)
    ))?;
    Ok(pattern
        .captures(xml)
        .and_then(|c| c.get(1))
        .map(|m| decode_entities(m.as_str())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_entities() {
        assert_eq!(decode_entities("a &amp; b &lt;c&gt;"), "a & b <c>");
        assert_eq!(decode_entities("&#39;q&#x27; &quot;"), "'q' \"");
        assert_eq!(decode_entities("<![CDATA[raw & text]]>"), "raw & text");
        assert_eq!(decode_entities("AT&T; fish & chips"), "AT&T; fish & chips");
    }

    #[test]
    fn test_strip_tags() {
        let text = strip_tags("<p>Hello <b>world</b></p>\n<p>again &amp; again</p>").unwrap();
        assert_eq!(text, "Hello world again & again");
    }

    #[test]
    fn test_first_element_and_attribute() {
        let xml = r#"<entry><title type="text">One &amp; Two</title><link rel="alternate" href="https://x.example/?a=1&amp;b=2"/></entry>"#;
        assert_eq!(first_element(xml, "title").unwrap().as_deref(), Some("One & Two"));
        assert_eq!(
            first_attribute(xml, "link", "href").unwrap().as_deref(),
            Some("https://x.example/?a=1&b=2")
        );
        assert_eq!(first_element(xml, "missing").unwrap(), None);
    }

    #[test]
    fn test_first_element_respects_tag_boundary() {
        let xml = "<titles>no</titles><title>yes</title>";
        assert_eq!(first_element(xml, "title").unwrap().as_deref(), Some("yes"));
    }
}
