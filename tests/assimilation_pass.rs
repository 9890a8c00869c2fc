// tests/assimilation_pass.rs
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use assimilation_bot::assimilation::{AssimilationLoop, IdleReason, PassOutcome, SelectionResult};
use assimilation_bot::error::{FetchError, StoreError};
use assimilation_bot::llm::ResponseGenerator;
use assimilation_bot::scheduler::run_scheduler;
use assimilation_bot::shutdown::{self, ShutdownTrigger};
use assimilation_bot::social::{
    backoff_delay, filter_candidates, Post, SearchCriteria, SocialSource,
};
use assimilation_bot::store::{JsonProcessedStore, ProcessedRecord, ProcessedStore};

const MAX_BACKOFF_MINUTES: u32 = 30;

enum Script {
    Posts(Vec<Post>),
    Fail,
    StoreDown,
}

/// Source that replays a scripted fetch result and records backoffs
/// instead of sleeping.
struct MockSource {
    script: Script,
    sleeps: Mutex<Vec<Duration>>,
    stop_after_sleeps: Option<(usize, ShutdownTrigger)>,
}

impl MockSource {
    fn new(script: Script) -> Self {
        Self {
            script,
            sleeps: Mutex::new(Vec::new()),
            stop_after_sleeps: None,
        }
    }

    fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().unwrap().clone()
    }
}

#[async_trait]
impl SocialSource for MockSource {
    async fn fetch_recent_posts(&self) -> Result<Vec<Post>, FetchError> {
        match &self.script {
            Script::Posts(posts) => Ok(posts.clone()),
            Script::Fail => Err(FetchError::Transport("connection refused".into())),
            Script::StoreDown => Err(StoreError::Database("pool timed out".into()).into()),
        }
    }

    async fn sleep(&self) {
        let delay = backoff_delay(MAX_BACKOFF_MINUTES, &mut rand::rng());
        let count = {
            let mut sleeps = self.sleeps.lock().unwrap();
            sleeps.push(delay);
            sleeps.len()
        };
        if let Some((limit, trigger)) = &self.stop_after_sleeps {
            if count >= *limit {
                trigger.trigger();
            }
        }
    }
}

/// Generator that answers from a fixed reply (or not at all) and keeps the prompts.
struct CannedGenerator {
    reply: Option<String>,
    prompts: Mutex<Vec<String>>,
}

impl CannedGenerator {
    fn replying(reply: Option<&str>) -> Arc<Self> {
        Arc::new(Self {
            reply: reply.map(str::to_string),
            prompts: Mutex::new(Vec::new()),
        })
    }

    fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl ResponseGenerator for CannedGenerator {
    async fn generate(&self, prompt: &str) -> Option<String> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        self.reply.clone()
    }
}

fn assimilation_loop(source: Arc<MockSource>) -> AssimilationLoop {
    AssimilationLoop::new(source, CannedGenerator::replying(Some("Nice post!")))
}

fn post(id: &str, author: &str, likes: u64, retweets: u64) -> Post {
    Post {
        id: id.into(),
        author_id: author.into(),
        author_username: None,
        text: format!("text of {}", id),
        like_count: likes,
        retweet_count: retweets,
        created_at: None,
    }
}

fn expect_selection(outcome: PassOutcome) -> SelectionResult {
    match outcome {
        PassOutcome::ReadyForResponse(selection) => selection,
        other => panic!("expected a selection, got {:?}", other),
    }
}

#[tokio::test]
async fn selects_most_liked_and_most_retweeted() {
    let source = Arc::new(MockSource::new(Script::Posts(vec![
        post("1", "a", 10, 5),
        post("2", "b", 5, 15),
        post("3", "c", 3, 2),
    ])));
    let assimilation = assimilation_loop(source.clone());

    let outcome = assimilation.run_pass().await;

    let selection = expect_selection(outcome);
    assert_eq!(selection.most_liked.unwrap().id, "1");
    assert_eq!(selection.most_retweeted.unwrap().id, "2");
    assert!(source.sleeps().is_empty());
}

#[tokio::test]
async fn drafts_once_per_distinct_selected_post() {
    let source = Arc::new(MockSource::new(Script::Posts(vec![
        post("1", "a", 1, 1),
        post("2", "b", 90, 90),
    ])));
    let generator = CannedGenerator::replying(Some("  Nice post!\n"));
    let assimilation = AssimilationLoop::new(source.clone(), generator.clone());

    let selection = expect_selection(assimilation.run_pass().await);
    let drafts = assimilation.draft_responses(&selection).await;

    assert_eq!(drafts.len(), 1);
    assert_eq!(drafts[0].post.id, "2");
    assert_eq!(drafts[0].text, "Nice post!");
    let prompts = generator.prompts();
    assert_eq!(prompts.len(), 1);
    assert!(prompts[0].contains("text of 2"));
}

#[tokio::test]
async fn failed_generation_yields_no_drafts() {
    let source = Arc::new(MockSource::new(Script::Posts(vec![
        post("1", "a", 10, 5),
        post("2", "b", 5, 15),
    ])));
    let generator = CannedGenerator::replying(None);
    let assimilation = AssimilationLoop::new(source.clone(), generator.clone());

    let selection = expect_selection(assimilation.run_pass().await);
    let drafts = assimilation.draft_responses(&selection).await;

    assert!(drafts.is_empty());
    assert_eq!(generator.prompts().len(), 2);
}

#[tokio::test]
async fn empty_fetch_sleeps_once_within_bounds() {
    let source = Arc::new(MockSource::new(Script::Posts(vec![])));
    let assimilation = assimilation_loop(source.clone());

    let outcome = assimilation.run_pass().await;

    assert_eq!(outcome, PassOutcome::Idle(IdleReason::NoNewPosts));
    let sleeps = source.sleeps();
    assert_eq!(sleeps.len(), 1);
    let secs = sleeps[0].as_secs();
    assert!((60..=u64::from(MAX_BACKOFF_MINUTES) * 60).contains(&secs));
}

#[tokio::test]
async fn fetch_failure_sleeps_once_and_returns() {
    let source = Arc::new(MockSource::new(Script::Fail));
    let assimilation = assimilation_loop(source.clone());

    let outcome = assimilation.run_pass().await;

    assert_eq!(outcome, PassOutcome::Idle(IdleReason::FetchFailed));
    assert_eq!(source.sleeps().len(), 1);
}

#[tokio::test]
async fn store_failure_is_a_failed_fetch() {
    let source = Arc::new(MockSource::new(Script::StoreDown));
    let assimilation = assimilation_loop(source.clone());

    let outcome = assimilation.run_pass().await;

    assert_eq!(outcome, PassOutcome::Idle(IdleReason::FetchFailed));
    assert_eq!(source.sleeps().len(), 1);
}

#[tokio::test]
async fn processed_and_self_posts_never_reach_ranking() {
    let dir = tempfile::tempdir().unwrap();
    let store = JsonProcessedStore::open(dir.path().join("processed.json"))
        .await
        .unwrap();
    store
        .record(ProcessedRecord::new(
            "1",
            chrono::Utc::now(),
            "text of 1",
            "already answered",
        ))
        .await
        .unwrap();
    let criteria = SearchCriteria::new(["#rust"], ["alice"], 24, 10, 5, "me").unwrap();

    let fetched = vec![
        post("1", "a", 500, 500),
        post("5", "me", 900, 900),
        post("2", "b", 4, 8),
        post("3", "c", 6, 1),
    ];
    let candidates = filter_candidates(fetched, &criteria, &store).await.unwrap();

    let source = Arc::new(MockSource::new(Script::Posts(candidates)));
    let outcome = assimilation_loop(source).run_pass().await;

    let selection = expect_selection(outcome);
    assert_eq!(selection.most_liked.unwrap().id, "3");
    assert_eq!(selection.most_retweeted.unwrap().id, "2");
}

#[tokio::test]
async fn only_self_authored_candidate_leaves_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let store = JsonProcessedStore::open(dir.path().join("processed.json"))
        .await
        .unwrap();
    let criteria = SearchCriteria::new(["#rust"], Vec::<String>::new(), 24, 10, 5, "me").unwrap();

    let candidates = filter_candidates(vec![post("5", "me", 1, 1)], &criteria, &store)
        .await
        .unwrap();

    assert!(candidates.is_empty());
}

#[tokio::test]
async fn scheduler_repeats_passes_until_shutdown() {
    let (trigger, shutdown) = shutdown::channel();
    let mut source = MockSource::new(Script::Fail);
    source.stop_after_sleeps = Some((3, trigger));
    let source = Arc::new(source);
    let assimilation = assimilation_loop(source.clone());

    let stats = tokio::time::timeout(
        Duration::from_secs(10),
        run_scheduler(&assimilation, Duration::from_millis(5), shutdown),
    )
    .await
    .expect("scheduler should stop on shutdown");

    assert_eq!(stats.passes, 3);
    assert_eq!(stats.fetch_failures, 3);
    assert_eq!(source.sleeps().len(), 3);
}

#[tokio::test]
async fn scheduler_exits_immediately_when_already_shut_down() {
    let (trigger, shutdown) = shutdown::channel();
    trigger.trigger();
    let source = Arc::new(MockSource::new(Script::Posts(vec![post("1", "a", 1, 1)])));
    let assimilation = assimilation_loop(source.clone());

    let stats = tokio::time::timeout(
        Duration::from_secs(10),
        run_scheduler(&assimilation, Duration::from_secs(3600), shutdown),
    )
    .await
    .expect("scheduler should not start");

    assert_eq!(stats.passes, 0);
    assert!(source.sleeps().is_empty());
}
