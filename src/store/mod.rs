/// Processed-post store
///
/// Durable, append-only record of posts that went through a complete
/// response cycle. The social source consults it to skip posts that were
/// already handled.

pub mod json;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::StoreError;

pub use json::JsonProcessedStore;
pub use postgres::PgProcessedStore;

/// A post that was answered, together with what was said about it.
///
/// Serialized with the short field names of the JSON log format. On read,
/// `id` may be a string or an integer and `time` may be RFC 3339, a naive
/// `YYYY-MM-DDTHH:MM:SS` / `YYYY-MM-DD HH:MM:SS` timestamp (taken as UTC) or
/// a bare date (midnight UTC), so older logs keep loading.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessedRecord {
    #[serde(rename = "id", deserialize_with = "post_id_from_string_or_int")]
    pub post_id: String,
    #[serde(rename = "time", deserialize_with = "timestamp_lenient")]
    pub processed_at: DateTime<Utc>,
    #[serde(rename = "tweet")]
    pub source_text: String,
    #[serde(rename = "response")]
    pub response_text: String,
}

impl ProcessedRecord {
    pub fn new(
        post_id: impl Into<String>,
        processed_at: DateTime<Utc>,
        source_text: impl Into<String>,
        response_text: impl Into<String>,
    ) -> Self {
        Self {
            post_id: post_id.into(),
            processed_at,
            source_text: source_text.into(),
            response_text: response_text.into(),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawPostId {
    Text(String),
    Signed(i64),
    Unsigned(u64),
}

fn post_id_from_string_or_int<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match RawPostId::deserialize(deserializer)? {
        RawPostId::Text(s) => s,
        RawPostId::Signed(n) => n.to_string(),
        RawPostId::Unsigned(n) => n.to_string(),
    })
}

fn timestamp_lenient<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_timestamp(&raw)
        .ok_or_else(|| serde::de::Error::custom(format!("unrecognized timestamp {:?}", raw)))
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(t) = DateTime::parse_from_rfc3339(raw) {
        return Some(t.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(t) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(t.and_utc());
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|t| t.and_utc())
}

#[async_trait]
pub trait ProcessedStore: Send + Sync {
    /// Whether `post_id` has already been recorded.
    async fn is_processed(&self, post_id: &str) -> Result<bool, StoreError>;

    /// Append a record. Fails with [`StoreError::Duplicate`] when the post id
    /// is already present; existing records are never rewritten.
    async fn record(&self, record: ProcessedRecord) -> Result<(), StoreError>;
}
