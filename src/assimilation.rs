/// Assimilation Loop
///
/// One pass: fetch candidate posts, rank them by engagement and either hand
/// the winners on for a response or back off. A pass never fails; fetch
/// problems are logged and answered with the source's randomized sleep.
///
/// Drafts for the selected posts can be requested from the language model
/// afterwards. Drafts are only returned; nothing is posted or recorded as
/// processed.

use std::sync::Arc;

use crate::error::FetchError;
use crate::llm::ResponseGenerator;
use crate::social::{Post, SocialSource};

/// The most engaged-with candidates of a pass. Both slots may hold the same post.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectionResult {
    pub most_liked: Option<Post>,
    pub most_retweeted: Option<Post>,
}

impl SelectionResult {
    pub fn is_empty(&self) -> bool {
        self.most_liked.is_none() && self.most_retweeted.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdleReason {
    FetchFailed,
    NoNewPosts,
}

/// How a pass ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PassOutcome {
    /// The source backed off; nothing to respond to this time.
    Idle(IdleReason),
    /// Selected posts waiting for response generation.
    ReadyForResponse(SelectionResult),
}

/// Pick the post with the most likes and the one with the most retweets.
///
/// Ties go to the post that comes first in `posts`.
pub fn select_top(posts: &[Post]) -> SelectionResult {
    let most_liked = posts
        .iter()
        .reduce(|best, p| if p.like_count > best.like_count { p } else { best })
        .cloned();

    let most_retweeted = posts
        .iter()
        .reduce(|best, p| {
            if p.retweet_count > best.retweet_count {
                p
            } else {
                best
            }
        })
        .cloned();

    SelectionResult {
        most_liked,
        most_retweeted,
    }
}

/// Model-generated reply text for a selected post.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DraftResponse {
    pub post: Post,
    pub text: String,
}

/// Prompt asking the model for a reply to `post`.
pub fn response_prompt(post: &Post) -> String {
    let author = match &post.author_username {
        Some(username) => format!("@{}", username),
        None => format!("user {}", post.author_id),
    };
    format!(
        "Write a short, friendly reply to this post by {}. Answer with the reply text only.\n\n{}",
        author, post.text
    )
}

pub struct AssimilationLoop {
    source: Arc<dyn SocialSource>,
    generator: Arc<dyn ResponseGenerator>,
}

impl AssimilationLoop {
    pub fn new(source: Arc<dyn SocialSource>, generator: Arc<dyn ResponseGenerator>) -> Self {
        Self { source, generator }
    }

    /// Run exactly one pass. Re-invoking is up to the caller.
    pub async fn run_pass(&self) -> PassOutcome {
        let posts = match self.source.fetch_recent_posts().await {
            Ok(posts) => posts,
            Err(e) => {
                match &e {
                    FetchError::Store(store_err) => log::error!(
                        "Processed-post store failed while filtering candidates; dedup state may be at risk: {}",
                        store_err
                    ),
                    other => log::error!("Error fetching recent posts: {}", other),
                }
                self.source.sleep().await;
                return PassOutcome::Idle(IdleReason::FetchFailed);
            }
        };

        if posts.is_empty() {
            log::warn!("No new posts to process. Sleeping...");
            self.source.sleep().await;
            return PassOutcome::Idle(IdleReason::NoNewPosts);
        }

        let selection = select_top(&posts);
        if selection.is_empty() {
            log::warn!("No usable candidates among {} posts. Sleeping...", posts.len());
            self.source.sleep().await;
            return PassOutcome::Idle(IdleReason::NoNewPosts);
        }

        if let Some(p) = &selection.most_liked {
            log::info!("Most liked post: {} ({} likes)", p.id, p.like_count);
        }
        if let Some(p) = &selection.most_retweeted {
            log::info!("Most retweeted post: {} ({} retweets)", p.id, p.retweet_count);
        }

        PassOutcome::ReadyForResponse(selection)
    }

    /// Ask the model for a reply to each selected post, once per distinct post.
    ///
    /// Posts the model produced nothing for are left out; the generator has
    /// already logged why.
    pub async fn draft_responses(&self, selection: &SelectionResult) -> Vec<DraftResponse> {
        let mut posts: Vec<&Post> = Vec::with_capacity(2);
        for post in [&selection.most_liked, &selection.most_retweeted]
            .into_iter()
            .flatten()
        {
            if !posts.iter().any(|p| p.id == post.id) {
                posts.push(post);
            }
        }

        let mut drafts = Vec::with_capacity(posts.len());
        for post in posts {
            match self.generator.generate(&response_prompt(post)).await {
                Some(text) if !text.trim().is_empty() => {
                    log::info!("Drafted response for post {}", post.id);
                    drafts.push(DraftResponse {
                        post: post.clone(),
                        text: text.trim().to_string(),
                    });
                }
                Some(_) => log::warn!("Model returned an empty response for post {}", post.id),
                None => log::warn!("No response drafted for post {}", post.id),
            }
        }
        drafts
    }
}
