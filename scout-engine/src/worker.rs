//! Flush worker
//!
//! Polls the flush_timers table for due timers, claims them, and runs each
//! through the orchestrator. Any number of workers may poll the same
//! database; claim-by-delete keeps a timer from firing twice.

use crate::flush::FlushOrchestrator;
use crate::scheduler::DebounceScheduler;
use scout_common::time;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

pub struct FlushWorker {
    scheduler: DebounceScheduler,
    orchestrator: FlushOrchestrator,
    poll_interval: Duration,
}

impl FlushWorker {
    pub fn new(
        scheduler: DebounceScheduler,
        orchestrator: FlushOrchestrator,
        poll_interval: Duration,
    ) -> Self {
        Self {
            scheduler,
            orchestrator,
            poll_interval,
        }
    }

    /// Run until cancelled. Each poll claims the due timers and flushes
    /// them sequentially; a failed flush is logged and does not stop the
    /// worker (the turn recovers via the candidate's next message).
    pub async fn run(self, cancel_token: CancellationToken) {
        let mut interval = tokio::time::interval(self.poll_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        info!(
            poll_interval_ms = self.poll_interval.as_millis() as u64,
            "Flush worker started"
        );

        loop {
            tokio::select! {
                _ = cancel_token.cancelled() => {
                    info!("Flush worker stopping");
                    return;
                }
                _ = interval.tick() => {}
            }

            self.poll_once().await;
        }
    }

    /// One claim-and-flush pass (extracted for tests)
    pub async fn poll_once(&self) {
        let due = match self.scheduler.claim_due(time::now_ms()).await {
            Ok(due) => due,
            Err(e) => {
                error!(error = %e, "Failed to claim due flush timers");
                return;
            }
        };

        for timer in due {
            if let Err(e) = self.orchestrator.flush(&timer).await {
                error!(
                    session_id = %timer.session_id,
                    turn = timer.turn,
                    flush_key = %timer.flush_key,
                    error = %e,
                    "Flush failed"
                );
            }
        }
    }
}
