//! Markdown rendering for news reports.

use digest_models::{KeyFinding, Report};

fn clean(text: Option<&str>) -> &str {
    text.map(str::trim).unwrap_or("")
}

/// Render one report artifact.
pub fn render_report(report: &Report) -> String {
    let mut lines: Vec<String> = Vec::new();

    lines.push(format!("# AI News Report ({})", clean(report.site.as_deref())));
    lines.push(String::new());
    lines.push(format!("- Generated at: {}", clean(report.generated_at.as_deref())));
    lines.push(format!("- Articles: {}", report.article_count()));
    lines.push(String::new());

    for (idx, article) in report.articles.iter().enumerate() {
        let title = match clean(article.title.as_deref()) {
            "" => format!("Article {}", idx + 1),
            t => t.to_string(),
        };
        lines.push(format!("## {title}"));
        let date = clean(article.date.as_deref());
        if !date.is_empty() {
            lines.push(format!("- Date: {date}"));
        }
        lines.push(String::new());

        if !article.executive_summary.is_empty() {
            lines.push("### Executive Summary".to_string());
            push_bullets(&mut lines, &article.executive_summary);
            lines.push(String::new());
        }

        if !article.key_findings.is_empty() {
            lines.push("### Key Findings".to_string());
            for finding in &article.key_findings {
                match finding {
                    KeyFinding::Point { point, footnote } => {
                        let footnote = clean(footnote.as_deref());
                        if footnote.is_empty() {
                            lines.push(format!("- {}", point.trim()));
                        } else {
                            lines.push(format!("- {} [^]", point.trim()));
                            lines.push(format!("  - Footnote: {footnote}"));
                        }
                    }
                    KeyFinding::Text(text) if !text.trim().is_empty() => {
                        lines.push(format!("- {}", text.trim()));
                    }
                    KeyFinding::Text(_) => {}
                }
            }
            lines.push(String::new());
        }

        if !article.references.is_empty() {
            lines.push("### References".to_string());
            push_bullets(&mut lines, &article.references);
            lines.push(String::new());
        }
    }

    let mut out = lines.join("\n").trim_end().to_string();
    out.push('\n');
    out
}

fn push_bullets(lines: &mut Vec<String>, items: &[String]) {
    lines.extend(
        items
            .iter()
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .map(|s| format!("- {s}")),
    );
}

/// Combine rendered reports into the day's digest.
pub fn render_digest(date: &str, reports: &[String]) -> String {
    let mut out = format!("# AI News Digest {date}\n\n- Reports: {}\n", reports.len());
    for markdown in reports {
        out.push_str("\n---\n\n");
        out.push_str(markdown.trim_end());
        out.push('\n');
    }
    out
}

/// Written as `report_N.md` when a prompt document produced no report.
pub fn render_failure(prompt: &str, generated_at: &str, error: &str) -> String {
    format!(
        "# AI News Report (Error)\n\n- Prompt: {prompt}\n- Generated at: {generated_at}\n- Status: Failed\n\n\
         ## Error\n\n```\n{}\n```\n",
        error.trim()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn report(value: serde_json::Value) -> Report {
        Report::from_value(&value).unwrap()
    }

    #[test]
    fn test_render_full_article() {
        let md = render_report(&report(json!({
            "generated_at": "2026-03-01T00:00:00Z",
            "site": " news.example ",
            "articles": [{
                "title": "Big launch",
                "date": "2026-02-28",
                "executive_summary": ["first", "  ", "second "],
                "key_findings": ["plain", {"point": "with note", "footnote": "source"}, {"point": "bare"}],
                "references": ["https://a.example"]
            }]
        })));

        let expected = "\
# AI News Report (news.example)

- Generated at: 2026-03-01T00:00:00Z
- Articles: 1

## Big launch
- Date: 2026-02-28

### Executive Summary
- first
- second

### Key Findings
- plain
- with note [^]
  - Footnote: source
- bare

### References
- https://a.example
";
        assert_eq!(md, expected);
    }

    #[test]
    fn test_render_defaults() {
        let md = render_report(&report(json!({
            "articles": [{"key_findings": null}],
            "num_articles": 7
        })));
        assert!(md.starts_with("# AI News Report ()\n"));
        assert!(md.contains("- Articles: 7"));
        assert!(md.contains("## Article 1\n"));
        assert!(!md.contains("### Key Findings"));
        assert!(md.ends_with("## Article 1\n"));
    }

    #[test]
    fn test_render_digest_joins_reports() {
        let digest = render_digest("2026-03-01", &["# A\n".to_string(), "# B\n\n".to_string()]);
        assert!(digest.starts_with("# AI News Digest 2026-03-01\n\n- Reports: 2\n"));
        assert!(digest.contains("\n---\n\n# A\n"));
        assert!(digest.ends_with("# B\n"));
    }

    #[test]
    fn test_render_failure() {
        let md = render_failure("AGENTS_2.md", "2026-03-01T06:00:00Z", "Process exited with code 2: denied\n");
        assert_eq!(
            md,
            "# AI News Report (Error)\n\n- Prompt: AGENTS_2.md\n- Generated at: 2026-03-01T06:00:00Z\n\
             - Status: Failed\n\n## Error\n\n```\nProcess exited with code 2: denied\n```\n"
        );
    }
}
