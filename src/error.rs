/// Error types
///
/// Each external collaborator gets its own error enum so callers can tell a
/// platform outage apart from a broken processed-post store.

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Failure talking to the social platform.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("unauthorized (status {status}): {message}")]
    Unauthorized { status: u16, message: String },

    #[error("rate limited until {}", describe_reset(.reset_at))]
    RateLimited { reset_at: Option<DateTime<Utc>> },

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("parse error: {0}")]
    Parse(String),

    #[error("processed-post store error: {0}")]
    Store(#[from] StoreError),
}

fn describe_reset(reset_at: &Option<DateTime<Utc>>) -> String {
    reset_at
        .map(|t| t.to_rfc3339())
        .unwrap_or_else(|| "unknown".to_string())
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        FetchError::Transport(err.to_string())
    }
}

impl From<serde_json::Error> for FetchError {
    fn from(err: serde_json::Error) -> Self {
        FetchError::Parse(err.to_string())
    }
}

/// Failure producing a response from the language model.
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("model endpoint returned status {status}: {message}")]
    Status { status: u16, message: String },

    #[error("parse error: {0}")]
    Parse(String),

    #[error("model reply had no `response` field")]
    MissingResponse,
}

impl From<reqwest::Error> for GenerationError {
    fn from(err: reqwest::Error) -> Self {
        GenerationError::Transport(err.to_string())
    }
}

/// Failure reading or writing processed-post state.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("corrupt store {path}: {message}")]
    Corrupt { path: String, message: String },

    #[error("post {0} is already recorded as processed")]
    Duplicate(String),

    #[error("database error: {0}")]
    Database(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        StoreError::Database(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limit_message_without_reset() {
        let err = FetchError::RateLimited { reset_at: None };
        assert_eq!(err.to_string(), "rate limited until unknown");
    }

    #[test]
    fn store_errors_wrap_into_fetch_errors() {
        let err: FetchError = StoreError::Duplicate("42".into()).into();
        assert!(matches!(err, FetchError::Store(StoreError::Duplicate(ref id)) if id == "42"));
        assert!(err.to_string().contains("processed-post store"));
    }
}
