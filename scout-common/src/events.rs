//! Event types for the scout event system
//!
//! Provides shared event definitions and the EventBus used by the engine to
//! notify downstream consumers (delivery, scoring, monitoring) of turn
//! outcomes.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Scout engine event types
///
/// Events are broadcast via EventBus; all events carry the session they
/// belong to and a UTC timestamp. Outward-facing consumers care about
/// `QuestionSent`, `ReplySent`, and `InterviewCompleted`; the rest exist for
/// observability of the buffering pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ScoutEvent {
    /// A candidate message fragment was appended to a turn buffer
    FragmentBuffered {
        session_id: Uuid,
        turn: i64,
        external_id: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// An async transcription finished and was attached to a voice fragment
    TranscriptionAttached {
        session_id: Uuid,
        turn: i64,
        external_id: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A debounce timer was (re)armed for a turn
    FlushScheduled {
        session_id: Uuid,
        turn: i64,
        flush_key: Uuid,
        fires_at: chrono::DateTime<chrono::Utc>,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A flush fired but did not act (superseded, duplicate, empty turn, ...)
    FlushSkipped {
        session_id: Uuid,
        turn: i64,
        flush_key: Uuid,
        reason: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// The next interview question was dispatched to the candidate
    QuestionSent {
        session_id: Uuid,
        question: String,
        question_number: i64,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// An aside was answered without advancing the question counter
    ReplySent {
        session_id: Uuid,
        reply: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// The interview reached a terminal state.
    /// Carries the transcript so scoring/notification consumers need no
    /// further reads.
    InterviewCompleted {
        session_id: Uuid,
        reason: String,
        question_count: i64,
        transcript: Vec<TranscriptEntry>,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// The reasoning collaborator failed; the turn was abandoned
    ReasoningFailed {
        session_id: Uuid,
        turn: i64,
        error: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },
}

/// One question/answer pair of a completed interview transcript
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TranscriptEntry {
    pub question: String,
    pub answer: String,
}

// ============================================================================
// EventBus Implementation
// ============================================================================

/// Broadcast event bus backed by tokio::sync::broadcast
///
/// Multiple producers, multiple consumers; slow consumers lag and drop old
/// events rather than blocking producers.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ScoutEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with the specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    ///
    /// Events emitted before subscription are not received.
    pub fn subscribe(&self) -> broadcast::Receiver<ScoutEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Ok(subscriber_count)` if at least one subscriber exists.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: ScoutEvent,
    ) -> Result<usize, broadcast::error::SendError<ScoutEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: ScoutEvent) {
        let _ = self.tx.send(event);
    }

    /// Current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
