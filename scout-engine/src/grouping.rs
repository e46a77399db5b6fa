//! Grouping evaluator
//!
//! Decides whether the fragment that triggered a flush is the last of its
//! burst and whether the burst can be aggregated yet. Deterministic given
//! the store's state at call time; deliberately re-evaluated at every flush
//! because readiness can only be confirmed by the last message's own
//! debounce firing.

use crate::buffer::BufferService;
use crate::config::EngineConfig;
use scout_common::db::models::Fragment;
use scout_common::{time, Result};
use std::fmt;
use tracing::debug;
use uuid::Uuid;

/// Why a burst is not ready to process yet
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotReadyReason {
    /// A fragment with a later arrival timestamp exists; the trigger was
    /// superseded and the newer fragment's own debounce will handle the turn
    NewerMessageExists,
    /// The quiet period after the trigger's arrival has not elapsed
    StillWaiting { elapsed_ms: i64, remaining_ms: i64 },
    /// A voice fragment in the window has no transcription yet
    PendingTranscription { external_id: String },
    /// The triggering fragment could not be found in the lookback window.
    /// Fails closed: processing an unrelated or partial burst is worse than
    /// waiting for the candidate's next message to start a fresh turn.
    TriggerNotFound,
}

impl fmt::Display for NotReadyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NotReadyReason::NewerMessageExists => write!(f, "newer message exists"),
            NotReadyReason::StillWaiting {
                elapsed_ms,
                remaining_ms,
            } => write!(
                f,
                "still waiting ({}ms elapsed, {}ms remaining)",
                elapsed_ms, remaining_ms
            ),
            NotReadyReason::PendingTranscription { external_id } => {
                write!(f, "pending transcription for {}", external_id)
            }
            NotReadyReason::TriggerNotFound => write!(f, "trigger fragment not found"),
        }
    }
}

/// Outcome of a grouping evaluation
#[derive(Debug, Clone)]
pub enum GroupingDecision {
    /// The burst is complete; fragments of the lookback window in arrival
    /// order
    Ready(Vec<Fragment>),
    NotReady(NotReadyReason),
}

/// Readiness decision function over the fragment store
#[derive(Clone)]
pub struct GroupingEvaluator {
    buffer: BufferService,
    config: EngineConfig,
}

impl GroupingEvaluator {
    pub fn new(buffer: BufferService, config: EngineConfig) -> Self {
        Self { buffer, config }
    }

    /// Evaluate whether the burst containing `trigger_external_id` is ready
    /// to aggregate.
    pub async fn evaluate(
        &self,
        session_id: Uuid,
        trigger_external_id: &str,
    ) -> Result<GroupingDecision> {
        // Administratively disabled: process immediately, no batching
        if !self.config.grouping_enabled {
            let fragments = self.buffer.list_recent(session_id, 0).await?;
            return Ok(GroupingDecision::Ready(fragments));
        }

        let now_ms = time::now_ms();
        let window_ms = self.config.grouping_window_ms();
        let lookback_ms = window_ms + self.config.grouping_lookback_buffer_ms();

        // Candidate-authored fragments within the bounded lookback window
        let fragments = self
            .buffer
            .list_recent(session_id, now_ms - lookback_ms)
            .await?;

        // Nothing buffered: nothing to wait for (the flush no-ops on an
        // empty turn)
        if fragments.is_empty() {
            return Ok(GroupingDecision::Ready(fragments));
        }

        let trigger = match fragments
            .iter()
            .find(|f| f.external_id == trigger_external_id)
        {
            Some(f) => f.clone(),
            None => {
                debug!(
                    session_id = %session_id,
                    external_id = %trigger_external_id,
                    "Trigger fragment not in lookback window, failing closed"
                );
                return Ok(GroupingDecision::NotReady(NotReadyReason::TriggerNotFound));
            }
        };

        // The trigger must be the most recent message of the conversation
        if fragments
            .iter()
            .any(|f| f.arrived_at_ms > trigger.arrived_at_ms)
        {
            return Ok(GroupingDecision::NotReady(
                NotReadyReason::NewerMessageExists,
            ));
        }

        // The quiet period must have elapsed since the trigger arrived
        let elapsed_ms = now_ms - trigger.arrived_at_ms;
        if elapsed_ms < window_ms {
            return Ok(GroupingDecision::NotReady(NotReadyReason::StillWaiting {
                elapsed_ms,
                remaining_ms: window_ms - elapsed_ms,
            }));
        }

        // Race re-check: a newer message may have arrived since the window
        // query above
        if let Some(latest) = self.buffer.latest_fragment(session_id).await? {
            if latest.external_id != trigger.external_id {
                return Ok(GroupingDecision::NotReady(
                    NotReadyReason::NewerMessageExists,
                ));
            }
        }

        // Voice fragments must never be aggregated before their text exists
        if let Some(pending) = fragments.iter().find(|f| f.awaiting_transcription()) {
            return Ok(GroupingDecision::NotReady(
                NotReadyReason::PendingTranscription {
                    external_id: pending.external_id.clone(),
                },
            ));
        }

        Ok(GroupingDecision::Ready(fragments))
    }
}
