/// Assimilation Bot
///
/// Runs one assimilation pass against X (or, with ASSIMILATE_INTERVAL_MINUTES
/// set, one pass per interval until Ctrl+C):
/// - Searches recent posts for the configured hashtags and accounts
/// - Skips posts already processed and posts written by the bot itself
/// - Selects the most liked and most retweeted candidates and asks the
///   language model for a draft reply to each (drafts are only logged)
/// - Backs off for a random number of minutes when there is nothing new or
///   the platform can't be reached

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;

use assimilation_bot::assimilation::{AssimilationLoop, PassOutcome};
use assimilation_bot::config::{Config, DEFAULT_LOG_LEVEL};
use assimilation_bot::llm::OllamaGenerator;
use assimilation_bot::scheduler::run_scheduler;
use assimilation_bot::shutdown;
use assimilation_bot::social::XSource;
use assimilation_bot::store::{JsonProcessedStore, PgProcessedStore, ProcessedStore};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration from environment; the logger needs its filter
    let cfg = Config::from_env();

    // Initialize logger
    let filters = cfg
        .as_ref()
        .map(|c| c.log_level.as_str())
        .unwrap_or(DEFAULT_LOG_LEVEL);
    pretty_env_logger::formatted_builder()
        .parse_filters(filters)
        .init();

    log::info!("Starting assimilation bot...");

    // Errors are logged, never turned into a failing exit code
    let result = match cfg {
        Ok(cfg) => run(cfg).await,
        Err(e) => Err(e),
    };
    if let Err(e) = result {
        log::error!("Error occurred: {:#}", e);
    }

    Ok(())
}

async fn run(cfg: Config) -> Result<()> {
    cfg.validate().await?;

    let (trigger, shutdown) = shutdown::channel();
    shutdown::trigger_on_ctrl_c(trigger);

    let store = open_store(&cfg).await?;

    let http_client = reqwest::Client::builder()
        .timeout(Duration::from_secs(cfg.http_timeout_secs))
        .connect_timeout(Duration::from_secs(cfg.http_timeout_secs.min(30)))
        .build()
        .context("Failed to create HTTP client")?;

    let generator = OllamaGenerator::new(http_client.clone(), &cfg.llm_api_url, &cfg.llm_model);

    let source = XSource::new(
        http_client,
        &cfg.twitter_bearer_token,
        &cfg.twitter_api_base,
        cfg.search_criteria()?,
        store,
        shutdown.clone(),
    );
    let assimilation = AssimilationLoop::new(Arc::new(source), Arc::new(generator));

    match cfg.interval_minutes {
        Some(minutes) => {
            run_scheduler(&assimilation, Duration::from_secs(minutes * 60), shutdown).await;
        }
        None => match assimilation.run_pass().await {
            PassOutcome::ReadyForResponse(selection) => {
                let ids = [&selection.most_liked, &selection.most_retweeted]
                    .into_iter()
                    .flatten()
                    .map(|p| p.id.as_str())
                    .collect::<Vec<_>>();
                log::info!("Pass complete: selected posts {:?}", ids);

                for draft in assimilation.draft_responses(&selection).await {
                    log::info!("Draft reply to {}: {}", draft.post.id, draft.text);
                }
            }
            PassOutcome::Idle(reason) => {
                log::info!("Pass complete: idle ({:?})", reason);
            }
        },
    }

    Ok(())
}

async fn open_store(cfg: &Config) -> Result<Arc<dyn ProcessedStore>> {
    match &cfg.database_url {
        Some(database_url) => {
            let store = PgProcessedStore::connect(database_url, &cfg.processed_table)
                .await
                .context("Failed to open processed-post table")?;
            store.initialize().await?;
            Ok(Arc::new(store))
        }
        None => {
            let store = JsonProcessedStore::open(&cfg.processed_store_path)
                .await
                .with_context(|| {
                    format!("Failed to open processed-post log {}", cfg.processed_store_path)
                })?;
            Ok(Arc::new(store))
        }
    }
}
