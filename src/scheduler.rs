/// Scheduler Module
///
/// Re-invokes assimilation passes at a fixed interval until shutdown.

use std::time::Duration;
use tokio::time;

use crate::assimilation::{AssimilationLoop, IdleReason, PassOutcome};
use crate::shutdown::Shutdown;

/// Counts of how the passes run by the scheduler ended.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    pub passes: u32,
    pub selections: u32,
    pub fetch_failures: u32,
    pub idle: u32,
    pub drafts: u32,
}

impl SchedulerStats {
    fn observe(&mut self, outcome: &PassOutcome) {
        self.passes += 1;
        match outcome {
            PassOutcome::ReadyForResponse(_) => self.selections += 1,
            PassOutcome::Idle(IdleReason::FetchFailed) => self.fetch_failures += 1,
            PassOutcome::Idle(IdleReason::NoNewPosts) => self.idle += 1,
        }
    }
}

/// Run a pass now and then once per `interval` until `shutdown` fires.
///
/// A pass that is already running is allowed to finish; the backoff inside
/// it ends early on shutdown.
pub async fn run_scheduler(
    assimilation: &AssimilationLoop,
    interval: Duration,
    shutdown: Shutdown,
) -> SchedulerStats {
    let mut ticker = time::interval(interval);
    // A long backoff must not cause a burst of catch-up passes
    ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

    log::info!(
        "Starting assimilation scheduler (interval: {} minutes)",
        interval.as_secs() / 60
    );

    let mut stats = SchedulerStats::default();

    loop {
        tokio::select! {
            biased;
            _ = shutdown.wait() => break,
            _ = ticker.tick() => {}
        }

        log::info!("Scheduled assimilation pass triggered");
        let outcome = assimilation.run_pass().await;
        stats.observe(&outcome);
        if let PassOutcome::ReadyForResponse(selection) = &outcome {
            let drafts = assimilation.draft_responses(selection).await;
            stats.drafts += drafts.len() as u32;
        }

        if shutdown.is_triggered() {
            break;
        }
    }

    log::info!(
        "Scheduler stopped after {} passes ({} selections, {} drafts, {} fetch failures, {} idle)",
        stats.passes,
        stats.selections,
        stats.drafts,
        stats.fetch_failures,
        stats.idle
    );
    stats
}
