//! Turso HTTP client.
//!
//! Talks to the libSQL `/v2/pipeline` endpoint with a bearer token and
//! archives each rendered report as one row of `daily_ai_news_reports`.

pub mod client;
pub mod error;
pub mod types;


pub use client::{ReportRow, TursoClient, TursoConfig};
pub use error::{StoreError, StoreResult};
pub use types::Arg;
