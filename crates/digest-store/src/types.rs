//! Wire types for the libSQL HTTP pipeline protocol.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A positional statement argument.
///
/// Integers travel as strings and floats as numbers, per the protocol.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Arg {
    Null,
    Integer { value: String },
    Float { value: f64 },
    Text { value: String },
}

impl Arg {
    pub fn integer(v: i64) -> Self {
        Arg::Integer {
            value: v.to_string(),
        }
    }

    pub fn float(v: f64) -> Self {
        Arg::Float { value: v }
    }

    pub fn text(v: impl Into<String>) -> Self {
        Arg::Text { value: v.into() }
    }

    pub fn opt_text(v: Option<impl Into<String>>) -> Self {
        match v {
            Some(v) => Arg::text(v),
            None => Arg::Null,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Statement {
    pub sql: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<Arg>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum PipelineRequest {
    Execute { stmt: Statement },
    Close,
}

#[derive(Debug, Serialize)]
pub struct PipelineBody {
    pub requests: Vec<PipelineRequest>,
}

#[derive(Debug, Deserialize)]
pub struct PipelineResponse {
    #[serde(default)]
    pub results: Vec<PipelineResult>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum PipelineResult {
    Ok {
        #[serde(default)]
        response: Value,
    },
    Error {
        error: PipelineError,
    },
}

#[derive(Debug, Deserialize)]
pub struct PipelineError {
    pub message: String,
    #[serde(default)]
    pub code: Option<String>,
}
