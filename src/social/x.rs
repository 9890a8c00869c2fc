/// X (Twitter) API v2 social source
///
/// Searches recent posts with app-only Bearer Token authentication, resolves
/// author usernames from the `author_id` expansion and filters the result
/// against the processed-post store.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;

use super::{backoff_delay, build_search_query, filter_candidates, window_start};
use super::{Post, SearchCriteria, SocialSource};
use crate::error::FetchError;
use crate::shutdown::Shutdown;
use crate::store::ProcessedStore;

pub const DEFAULT_API_BASE: &str = "https://api.twitter.com";

// The recent-search endpoint accepts max_results in 10..=100
const API_MIN_RESULTS: u32 = 10;
const API_MAX_RESULTS: u32 = 100;

#[derive(Debug, Deserialize)]
struct SearchResponse {
    data: Option<Vec<ApiTweet>>,
    includes: Option<Includes>,
    errors: Option<Vec<ApiProblem>>,
}

#[derive(Debug, Deserialize)]
struct ApiTweet {
    id: String,
    text: String,
    author_id: Option<String>,
    created_at: Option<String>,
    public_metrics: Option<PublicMetrics>,
}

#[derive(Debug, Deserialize)]
struct PublicMetrics {
    like_count: Option<u64>,
    retweet_count: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct Includes {
    #[serde(default)]
    users: Vec<ApiUser>,
}

#[derive(Debug, Deserialize)]
struct ApiUser {
    id: String,
    username: String,
}

#[derive(Debug, Deserialize)]
struct ApiProblem {
    title: Option<String>,
    detail: Option<String>,
}

pub struct XSource {
    http_client: reqwest::Client,
    bearer_token: String,
    api_base: String,
    criteria: SearchCriteria,
    store: Arc<dyn ProcessedStore>,
    shutdown: Shutdown,
}

impl XSource {
    pub fn new(
        http_client: reqwest::Client,
        bearer_token: impl Into<String>,
        api_base: impl Into<String>,
        criteria: SearchCriteria,
        store: Arc<dyn ProcessedStore>,
        shutdown: Shutdown,
    ) -> Self {
        Self {
            http_client,
            bearer_token: bearer_token.into(),
            api_base: api_base.into().trim_end_matches('/').to_string(),
            criteria,
            store,
            shutdown,
        }
    }

    async fn search(&self, now: DateTime<Utc>) -> Result<Vec<Post>, FetchError> {
        let url = format!("{}/2/tweets/search/recent", self.api_base);
        let query = build_search_query(&self.criteria);
        let start_time = window_start(now, self.criteria.hours_back)
            .to_rfc3339_opts(SecondsFormat::Secs, true);
        let max_results = self
            .criteria
            .max_results
            .clamp(API_MIN_RESULTS, API_MAX_RESULTS)
            .to_string();

        log::debug!(
            "Searching posts with query: {} (since {}, max: {})",
            query,
            start_time,
            max_results
        );

        let response = self
            .http_client
            .get(&url)
            .bearer_auth(self.bearer_token.trim())
            .query(&[
                ("query", query.as_str()),
                ("start_time", start_time.as_str()),
                ("max_results", max_results.as_str()),
                ("tweet.fields", "created_at,author_id,public_metrics"),
                ("expansions", "author_id"),
                ("user.fields", "username,name"),
            ])
            .send()
            .await?;

        let rate_limit_remaining = response
            .headers()
            .get("x-rate-limit-remaining")
            .and_then(|h| h.to_str().ok())
            .and_then(|s| s.parse::<u32>().ok());

        let rate_limit_reset = response
            .headers()
            .get("x-rate-limit-reset")
            .and_then(|h| h.to_str().ok())
            .and_then(|s| s.parse::<i64>().ok())
            .and_then(|ts| DateTime::<Utc>::from_timestamp(ts, 0));

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(match status.as_u16() {
                401 | 403 => FetchError::Unauthorized {
                    status: status.as_u16(),
                    message: text,
                },
                429 => FetchError::RateLimited {
                    reset_at: rate_limit_reset,
                },
                code => FetchError::Api {
                    status: code,
                    message: text,
                },
            });
        }

        if let Some(remaining) = rate_limit_remaining {
            log::info!("X API rate limit: {} requests remaining", remaining);
            if remaining < 5 {
                log::warn!("Low X API rate limit remaining ({})", remaining);
            }
        }

        let body = response.text().await?;
        let mut posts = parse_search_response(&body)?;
        // The cap applies to what the platform returned, before self-authored
        // and already-processed posts are filtered out, so a pass may yield
        // fewer than max_results candidates.
        posts.truncate(self.criteria.max_results as usize);
        Ok(posts)
    }
}

#[async_trait]
impl SocialSource for XSource {
    async fn fetch_recent_posts(&self) -> Result<Vec<Post>, FetchError> {
        let posts = self.search(Utc::now()).await?;
        let fetched = posts.len();

        let candidates = filter_candidates(posts, &self.criteria, self.store.as_ref()).await?;

        log::info!(
            "Fetched {} posts, {} new candidates after filtering",
            fetched,
            candidates.len()
        );
        Ok(candidates)
    }

    async fn sleep(&self) {
        let delay = backoff_delay(self.criteria.max_backoff_minutes, &mut rand::rng());
        log::info!("Sleeping for {} minutes", delay.as_secs() / 60);

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = self.shutdown.wait() => {
                log::info!("Shutdown requested, cutting backoff short");
            }
        }
    }
}

/// Turn a recent-search body into posts. Posts without an author id are
/// dropped since they can't be checked against the self id.
fn parse_search_response(body: &str) -> Result<Vec<Post>, FetchError> {
    let response: SearchResponse = serde_json::from_str(body)?;

    let tweets = match (response.data, response.errors) {
        (Some(tweets), _) => tweets,
        (None, Some(problems)) if !problems.is_empty() => {
            let message = problems
                .iter()
                .map(|p| {
                    p.detail
                        .clone()
                        .or_else(|| p.title.clone())
                        .unwrap_or_else(|| "unknown problem".to_string())
                })
                .collect::<Vec<_>>()
                .join("; ");
            return Err(FetchError::Api {
                status: 200,
                message,
            });
        }
        (None, _) => Vec::new(),
    };

    let usernames: HashMap<String, String> = response
        .includes
        .map(|i| i.users)
        .unwrap_or_default()
        .into_iter()
        .map(|u| (u.id, u.username))
        .collect();

    let posts = tweets
        .into_iter()
        .filter_map(|tweet| {
            let Some(author_id) = tweet.author_id else {
                log::warn!("Dropping post {}: response carried no author id", tweet.id);
                return None;
            };
            let metrics = tweet.public_metrics;
            Some(Post {
                author_username: usernames.get(&author_id).cloned(),
                created_at: tweet
                    .created_at
                    .as_deref()
                    .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                    .map(|d| d.with_timezone(&Utc)),
                like_count: metrics.as_ref().and_then(|m| m.like_count).unwrap_or(0),
                retweet_count: metrics.as_ref().and_then(|m| m.retweet_count).unwrap_or(0),
                id: tweet.id,
                author_id,
                text: tweet.text,
            })
        })
        .collect();

    Ok(posts)
}
