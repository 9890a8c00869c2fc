/// Social platform access
///
/// Defines the post model, the search criteria built at startup and the
/// `SocialSource` capability the assimilation loop depends on, plus the pure
/// helpers shared by implementations: query building, candidate filtering
/// and the randomized backoff.

pub mod x;

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rand::Rng;
use std::collections::BTreeSet;
use std::time::Duration;

use crate::error::FetchError;
use crate::store::ProcessedStore;

pub use x::XSource;

/// Recent search only reaches seven days back.
pub const MAX_HOURS_BACK: u32 = 7 * 24;

/// A post as returned by the platform, with its engagement counters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Post {
    pub id: String,
    pub author_id: String,
    pub author_username: Option<String>,
    pub text: String,
    pub like_count: u64,
    pub retweet_count: u64,
    pub created_at: Option<DateTime<Utc>>,
}

/// What to search for and how to behave between polls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchCriteria {
    pub hashtags: BTreeSet<String>,
    pub accounts: BTreeSet<String>,
    pub hours_back: u32,
    pub max_results: u32,
    pub max_backoff_minutes: u32,
    pub self_id: String,
}

impl SearchCriteria {
    /// Normalizes hashtags to a leading `#` and accounts/self id without a
    /// leading `@`; blank entries are dropped.
    pub fn new<H, A>(
        hashtags: H,
        accounts: A,
        hours_back: u32,
        max_results: u32,
        max_backoff_minutes: u32,
        self_id: &str,
    ) -> Result<Self>
    where
        H: IntoIterator,
        H::Item: AsRef<str>,
        A: IntoIterator,
        A::Item: AsRef<str>,
    {
        let hashtags: BTreeSet<String> = hashtags
            .into_iter()
            .map(|h| h.as_ref().trim().trim_start_matches('#').to_string())
            .filter(|h| !h.is_empty())
            .map(|h| format!("#{}", h))
            .collect();

        let accounts: BTreeSet<String> = accounts
            .into_iter()
            .map(|a| a.as_ref().trim().trim_start_matches('@').to_string())
            .filter(|a| !a.is_empty())
            .collect();

        let self_id = self_id.trim().trim_start_matches('@').to_string();

        if hours_back == 0 {
            bail!("hours_back must be greater than zero");
        }
        if hours_back > MAX_HOURS_BACK {
            bail!(
                "hours_back must be at most {} (recent search covers the last 7 days), got {}",
                MAX_HOURS_BACK,
                hours_back
            );
        }
        if max_results == 0 {
            bail!("max_results must be greater than zero");
        }
        if max_backoff_minutes == 0 {
            bail!("max_backoff_minutes must be greater than zero");
        }
        if self_id.is_empty() {
            bail!("self id (TWITTER_USERNAME) must not be empty");
        }
        if hashtags.is_empty() && accounts.is_empty() {
            bail!("at least one hashtag or account is required to build a search query");
        }

        Ok(Self {
            hashtags,
            accounts,
            hours_back,
            max_results,
            max_backoff_minutes,
            self_id,
        })
    }

    /// Whether `post` was written by the account this bot runs as.
    pub fn is_self_authored(&self, post: &Post) -> bool {
        post.author_id == self.self_id
            || post
                .author_username
                .as_deref()
                .map(|u| u.eq_ignore_ascii_case(&self.self_id))
                .unwrap_or(false)
    }
}

#[async_trait]
pub trait SocialSource: Send + Sync {
    /// Recent posts matching the configured criteria, with already-processed
    /// and self-authored posts removed.
    async fn fetch_recent_posts(&self) -> Result<Vec<Post>, FetchError>;

    /// Back off for a random number of minutes before the next poll.
    async fn sleep(&self);
}

/// `(#a OR #b) OR (from:x OR from:y)`, omitting an empty group.
pub fn build_search_query(criteria: &SearchCriteria) -> String {
    let hashtag_query = criteria
        .hashtags
        .iter()
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join(" OR ");

    let account_query = criteria
        .accounts
        .iter()
        .map(|a| format!("from:{}", a))
        .collect::<Vec<_>>()
        .join(" OR ");

    match (hashtag_query.is_empty(), account_query.is_empty()) {
        (false, false) => format!("({}) OR ({})", hashtag_query, account_query),
        (false, true) => format!("({})", hashtag_query),
        (true, false) => format!("({})", account_query),
        (true, true) => String::new(),
    }
}

/// Lower bound of the search window.
pub fn window_start(now: DateTime<Utc>, hours_back: u32) -> DateTime<Utc> {
    now - ChronoDuration::hours(i64::from(hours_back))
}

/// Drop self-authored posts and posts already in the store, keeping input order.
pub async fn filter_candidates(
    posts: Vec<Post>,
    criteria: &SearchCriteria,
    store: &dyn ProcessedStore,
) -> Result<Vec<Post>, FetchError> {
    let mut kept = Vec::with_capacity(posts.len());

    for post in posts {
        if criteria.is_self_authored(&post) {
            log::debug!("Skipping post {}: authored by self", post.id);
            continue;
        }
        if store.is_processed(&post.id).await? {
            log::debug!("Skipping post {}: already processed", post.id);
            continue;
        }
        kept.push(post);
    }

    Ok(kept)
}

/// Uniformly random whole minutes in `[1, max_minutes]`, as a duration.
pub fn backoff_delay<R: Rng + ?Sized>(max_minutes: u32, rng: &mut R) -> Duration {
    let minutes = rng.random_range(1..=max_minutes.max(1));
    Duration::from_secs(u64::from(minutes) * 60)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{ProcessedRecord, ProcessedStore};
    use crate::error::StoreError;
    use chrono::TimeZone;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::HashSet;

    struct FixedStore {
        processed: HashSet<String>,
    }

    #[async_trait]
    impl ProcessedStore for FixedStore {
        async fn is_processed(&self, post_id: &str) -> Result<bool, StoreError> {
            Ok(self.processed.contains(post_id))
        }

        async fn record(&self, _record: ProcessedRecord) -> Result<(), StoreError> {
            unimplemented!("read-only test store")
        }
    }

    struct BrokenStore;

    #[async_trait]
    impl ProcessedStore for BrokenStore {
        async fn is_processed(&self, _post_id: &str) -> Result<bool, StoreError> {
            Err(StoreError::Database("connection reset".into()))
        }

        async fn record(&self, _record: ProcessedRecord) -> Result<(), StoreError> {
            unimplemented!("read-only test store")
        }
    }

    fn store_with(ids: &[&str]) -> FixedStore {
        FixedStore {
            processed: ids.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn post(id: &str, author: &str) -> Post {
        Post {
            id: id.into(),
            author_id: author.into(),
            author_username: None,
            text: format!("post {}", id),
            like_count: 0,
            retweet_count: 0,
            created_at: None,
        }
    }

    fn criteria() -> SearchCriteria {
        SearchCriteria::new(["#Test"], ["testuser"], 24, 10, 30, "me").unwrap()
    }

    #[test]
    fn query_combines_hashtags_and_accounts() {
        assert_eq!(
            build_search_query(&criteria()),
            "(#Test) OR (from:testuser)"
        );
    }

    #[test]
    fn query_joins_each_group_with_or() {
        let c = SearchCriteria::new(
            ["rust", "#tokio"],
            ["@alice", "bob"],
            1,
            10,
            5,
            "me",
        )
        .unwrap();
        assert_eq!(
            build_search_query(&c),
            "(#rust OR #tokio) OR (from:alice OR from:bob)"
        );
    }

    #[test]
    fn query_omits_empty_group() {
        let c = SearchCriteria::new(["#rust", " "], Vec::<String>::new(), 1, 10, 5, "me").unwrap();
        assert_eq!(build_search_query(&c), "(#rust)");
    }

    #[test]
    fn criteria_rejects_invalid_bounds() {
        assert!(SearchCriteria::new(["#a"], ["b"], 0, 10, 5, "me").is_err());
        assert!(SearchCriteria::new(["#a"], ["b"], 1, 0, 5, "me").is_err());
        assert!(SearchCriteria::new(["#a"], ["b"], 1, 10, 0, "me").is_err());
        assert!(SearchCriteria::new(["#a"], ["b"], 1, 10, 5, "  ").is_err());
        assert!(SearchCriteria::new([""], [""], 1, 10, 5, "me").is_err());
    }

    #[test]
    fn hours_back_is_limited_to_a_week() {
        assert!(SearchCriteria::new(["#a"], ["b"], MAX_HOURS_BACK, 10, 5, "me").is_ok());

        let err = SearchCriteria::new(["#a"], ["b"], MAX_HOURS_BACK + 1, 10, 5, "me").unwrap_err();
        assert!(err.to_string().contains("at most 168"));
    }

    #[test]
    fn window_starts_hours_back() {
        let now = Utc.with_ymd_and_hms(2024, 3, 2, 12, 0, 0).unwrap();
        assert_eq!(
            window_start(now, 24),
            Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
        );
    }

    #[tokio::test]
    async fn self_authored_post_is_filtered() {
        let c = criteria();
        let mut mine = post("5", "me");
        mine.like_count = 1_000;

        let kept = filter_candidates(vec![mine], &c, &store_with(&[]))
            .await
            .unwrap();

        assert!(kept.is_empty());
    }

    #[tokio::test]
    async fn self_match_uses_username_case_insensitively() {
        let c = criteria();
        let mut mine = post("5", "99887766");
        mine.author_username = Some("ME".into());

        let kept = filter_candidates(vec![mine, post("6", "other")], &c, &store_with(&[]))
            .await
            .unwrap();

        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].id, "6");
    }

    #[tokio::test]
    async fn processed_posts_are_filtered() {
        let c = criteria();
        let posts = vec![post("1", "a"), post("2", "b"), post("3", "c")];

        let kept = filter_candidates(posts, &c, &store_with(&["2"]))
            .await
            .unwrap();

        let ids: Vec<_> = kept.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["1", "3"]);
    }

    #[tokio::test]
    async fn filtering_is_idempotent() {
        let c = criteria();
        let store = store_with(&["2"]);
        let posts = vec![post("1", "a"), post("2", "b"), post("4", "me")];

        let once = filter_candidates(posts, &c, &store).await.unwrap();
        let twice = filter_candidates(once.clone(), &c, &store).await.unwrap();

        assert_eq!(once, twice);
    }

    #[tokio::test]
    async fn store_failure_surfaces_as_store_error() {
        let err = filter_candidates(vec![post("1", "a")], &criteria(), &BrokenStore)
            .await
            .unwrap_err();

        assert!(matches!(err, FetchError::Store(_)));
    }

    #[test]
    fn backoff_stays_within_bounds() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..500 {
            let d = backoff_delay(30, &mut rng);
            assert!(d.as_secs() >= 60 && d.as_secs() <= 30 * 60);
            assert_eq!(d.as_secs() % 60, 0);
        }
    }

    #[test]
    fn backoff_with_one_minute_cap_is_exactly_one_minute() {
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(backoff_delay(1, &mut rng), Duration::from_secs(60));
    }
}
