/// Configuration module for managing environment variables and API keys
///
/// Values are read once at startup (typically from a .env file) and never
/// change for the lifetime of the process.

use anyhow::{bail, Context, Result};
use std::env;
use std::str::FromStr;

use crate::social::SearchCriteria;

/// Log filter used when `LOG_LEVEL` is unset or the configuration can't be loaded
pub const DEFAULT_LOG_LEVEL: &str = "info";

#[derive(Debug, Clone)]
pub struct Config {
    /// App-only Bearer Token for the X API v2
    pub twitter_bearer_token: String,

    /// Username (or numeric id) the bot posts as; its own posts are skipped
    pub twitter_username: String,

    pub hashtags: Vec<String>,
    pub accounts: Vec<String>,

    /// Size of the search window, in hours before now
    pub hours_back: u32,

    /// Cap on posts fetched per pass
    pub max_results: u32,

    /// Upper bound of the randomized backoff, in minutes
    pub max_backoff_minutes: u32,

    /// Base URL of the X API (overridable for proxies)
    pub twitter_api_base: String,

    /// Model endpoint (e.g., "http://localhost:11434/api/generate")
    pub llm_api_url: String,

    pub llm_model: String,

    /// Log filter, in `env_logger` syntax (e.g., "info" or "assimilation_bot=debug")
    pub log_level: String,

    /// JSON log of processed posts, used when no database is configured
    pub processed_store_path: String,

    /// PostgreSQL database URL; selects the Postgres store when set
    pub database_url: Option<String>,

    pub processed_table: String,

    /// Timeout applied to every outbound HTTP request
    pub http_timeout_secs: u64,

    /// When set, re-run a pass every N minutes instead of once
    pub interval_minutes: Option<u64>,
}

impl Config {
    /// Load configuration from environment variables
    ///
    /// # Errors
    /// Returns an error if a required variable is missing or a numeric one
    /// doesn't parse
    pub fn from_env() -> Result<Self> {
        // Load .env file if it exists
        dotenv::dotenv().ok();

        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build the configuration from any key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        Ok(Config {
            twitter_bearer_token: get("TWITTER_BEARER_TOKEN")
                .context("TWITTER_BEARER_TOKEN must be set")?,

            twitter_username: get("TWITTER_USERNAME").context("TWITTER_USERNAME must be set")?,

            hashtags: split_list(get("TWITTER_HASHTAGS")),
            accounts: split_list(get("TWITTER_ACCOUNTS")),

            hours_back: parse_or(get("TWITTER_HOURS_BACK"), "TWITTER_HOURS_BACK", 24)?,
            max_results: parse_or(get("TWITTER_TOP_TWEETS"), "TWITTER_TOP_TWEETS", 100)?,
            max_backoff_minutes: parse_or(
                get("TWITTER_MAX_SLEEP_MINUTES"),
                "TWITTER_MAX_SLEEP_MINUTES",
                60,
            )?,

            twitter_api_base: get("TWITTER_API_BASE")
                .unwrap_or_else(|| crate::social::x::DEFAULT_API_BASE.to_string()),

            llm_api_url: get("LLM_API_URL")
                .unwrap_or_else(|| "http://localhost:11434/api/generate".to_string()),

            llm_model: get("LLM_MODEL").unwrap_or_else(|| "llama3".to_string()),

            log_level: get("LOG_LEVEL").unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string()),

            processed_store_path: get("PROCESSED_STORE_PATH")
                .unwrap_or_else(|| "processed_posts.json".to_string()),

            database_url: get("DATABASE_URL"),

            processed_table: get("PROCESSED_TABLE")
                .unwrap_or_else(|| "processed_posts".to_string()),

            http_timeout_secs: parse_or(get("HTTP_TIMEOUT_SECS"), "HTTP_TIMEOUT_SECS", 30)?,

            interval_minutes: get("ASSIMILATE_INTERVAL_MINUTES")
                .map(|v| parse_value::<u64>(&v, "ASSIMILATE_INTERVAL_MINUTES"))
                .transpose()?,
        })
    }

    /// Search criteria for the social source, validated.
    pub fn search_criteria(&self) -> Result<SearchCriteria> {
        SearchCriteria::new(
            &self.hashtags,
            &self.accounts,
            self.hours_back,
            self.max_results,
            self.max_backoff_minutes,
            &self.twitter_username,
        )
        .context("Invalid search configuration")
    }

    /// Validate invariants and, if a database is configured, that it answers
    pub async fn validate(&self) -> Result<()> {
        log::info!("Validating configuration...");

        self.search_criteria()?;

        if self.http_timeout_secs == 0 {
            bail!("HTTP_TIMEOUT_SECS must be greater than zero");
        }
        if self.interval_minutes == Some(0) {
            bail!("ASSIMILATE_INTERVAL_MINUTES must be greater than zero");
        }

        if let Some(database_url) = &self.database_url {
            let pool = sqlx::postgres::PgPoolOptions::new()
                .max_connections(1)
                .connect(database_url)
                .await
                .context("Failed to connect to PostgreSQL database")?;

            sqlx::query("SELECT 1")
                .fetch_one(&pool)
                .await
                .context("Database connection test query failed")?;

            pool.close().await;
        }

        log::info!("Configuration validated successfully");
        Ok(())
    }
}

fn split_list(value: Option<String>) -> Vec<String> {
    value
        .map(|v| {
            v.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn parse_value<T>(value: &str, key: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value
        .trim()
        .parse()
        .with_context(|| format!("{} must be a non-negative integer, got {:?}", key, value))
}

fn parse_or<T>(value: Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match value {
        Some(v) => parse_value(&v, key),
        None => Ok(default),
    }
}
