//! News report artifact produced by the coding agent.
//!
//! The agent writes a JSON object with a top-level `articles` array. Every
//! article field is optional; rendering skips what is missing.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Field that must hold the article array.
pub const ARTICLES_FIELD: &str = "articles";

/// Structural problems in a report artifact.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchemaError {
    #[error("report root must be a JSON object")]
    RootNotObject,

    #[error("report is missing the `{0}` array")]
    MissingArray(&'static str),

    #[error("report field has an unexpected shape: {0}")]
    InvalidField(String),
}

/// A single daily news report.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Report {
    /// Timestamp the agent stamped on the report (UTC, ISO 8601)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generated_at: Option<String>,

    /// Source label, e.g. "github-trending"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub site: Option<String>,

    /// Declared article count; falls back to `articles.len()`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_articles: Option<u64>,

    pub articles: Vec<Article>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Article {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,

    #[serde(default, deserialize_with = "null_as_empty")]
    pub executive_summary: Vec<String>,

    #[serde(default, deserialize_with = "null_as_empty")]
    pub key_findings: Vec<KeyFinding>,

    #[serde(default, deserialize_with = "null_as_empty")]
    pub references: Vec<String>,
}

/// A key finding is either a bare sentence or a point with a footnote.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum KeyFinding {
    Text(String),
    Point {
        point: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        footnote: Option<String>,
    },
}

fn null_as_empty<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}

impl Report {
    /// Validate the raw artifact shape, then decode it.
    pub fn from_value(value: &Value) -> Result<Self, SchemaError> {
        let root = value.as_object().ok_or(SchemaError::RootNotObject)?;
        match root.get(ARTICLES_FIELD) {
            Some(Value::Array(_)) => {}
            _ => return Err(SchemaError::MissingArray(ARTICLES_FIELD)),
        }
        serde_json::from_value(value.clone()).map_err(|e| SchemaError::InvalidField(e.to_string()))
    }

    /// Parse an artifact from its JSON text.
    pub fn from_json_str(text: &str) -> Result<(Self, Value), SchemaError> {
        let value: Value =
            serde_json::from_str(text).map_err(|e| SchemaError::InvalidField(e.to_string()))?;
        let report = Self::from_value(&value)?;
        Ok((report, value))
    }

    pub fn article_count(&self) -> u64 {
        self.num_articles.unwrap_or(self.articles.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_root_must_be_object() {
        let err = Report::from_value(&json!([1, 2, 3])).unwrap_err();
        assert_eq!(err, SchemaError::RootNotObject);
    }

    #[test]
    fn test_articles_must_be_array() {
        let err = Report::from_value(&json!({"site": "x", "articles": {}})).unwrap_err();
        assert_eq!(err, SchemaError::MissingArray("articles"));

        let err = Report::from_value(&json!({"site": "x"})).unwrap_err();
        assert_eq!(err, SchemaError::MissingArray("articles"));
    }

    #[test]
    fn test_mixed_key_findings() {
        let value = json!({
            "generated_at": "2026-01-02T03:04:05Z",
            "site": "news",
            "articles": [{
                "title": "A",
                "executive_summary": ["one", "two"],
                "key_findings": ["plain", {"point": "p", "footnote": "f"}, {"point": "q"}],
                "references": null
            }]
        });
        let report = Report::from_value(&value).unwrap();
        let article = &report.articles[0];
        assert_eq!(article.key_findings.len(), 3);
        assert_eq!(article.key_findings[0], KeyFinding::Text("plain".into()));
        assert_eq!(
            article.key_findings[1],
            KeyFinding::Point {
                point: "p".into(),
                footnote: Some("f".into())
            }
        );
        assert!(article.references.is_empty());
        assert_eq!(report.article_count(), 1);
    }

    #[test]
    fn test_declared_count_wins() {
        let report = Report::from_value(&json!({"num_articles": 7, "articles": []})).unwrap();
        assert_eq!(report.article_count(), 7);
    }
}
