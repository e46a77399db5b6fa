//! Database row models

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Content modality of a buffered fragment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FragmentKind {
    Text,
    Voice,
}

impl FragmentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FragmentKind::Text => "text",
            FragmentKind::Voice => "voice",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "text" => Ok(FragmentKind::Text),
            "voice" => Ok(FragmentKind::Voice),
            other => Err(Error::InvalidInput(format!(
                "Unknown fragment kind: {}",
                other
            ))),
        }
    }

    /// Label used when rendering a multi-fragment turn for the reasoning
    /// collaborator ("Voice 1:", "Text 2:", ...)
    pub fn label(&self) -> &'static str {
        match self {
            FragmentKind::Text => "Text",
            FragmentKind::Voice => "Voice",
        }
    }
}

/// One buffered inbound candidate message fragment
///
/// Append-only: after insert the only field ever mutated is `transcription`
/// (filled once when async transcription completes). Fragments are deleted
/// as a whole turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fragment {
    pub guid: Uuid,
    /// Stable external message id, unique across all fragments (dedup key)
    pub external_id: String,
    pub session_id: Uuid,
    pub turn: i64,
    pub content: String,
    pub kind: FragmentKind,
    pub transcription: Option<String>,
    /// The question this fragment is presumably answering
    pub question_context: Option<String>,
    /// Arrival time, epoch milliseconds (ordering key within a turn)
    pub arrived_at_ms: i64,
}

impl Fragment {
    /// Text to aggregate: transcription for voice fragments, raw content
    /// otherwise.
    pub fn effective_text(&self) -> &str {
        match (&self.kind, &self.transcription) {
            (FragmentKind::Voice, Some(t)) => t.as_str(),
            _ => self.content.as_str(),
        }
    }

    /// A voice fragment whose transcription has not arrived yet
    pub fn awaiting_transcription(&self) -> bool {
        self.kind == FragmentKind::Voice && self.transcription.is_none()
    }
}

/// Lifecycle status of a conversation session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Completed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Active => "active",
            SessionStatus::Completed => "completed",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "active" => Ok(SessionStatus::Active),
            "completed" => Ok(SessionStatus::Completed),
            other => Err(Error::InvalidInput(format!(
                "Unknown session status: {}",
                other
            ))),
        }
    }
}

/// Immutable record of one question asked and the aggregated answer received
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub question: String,
    pub answer: String,
}

/// One interview instance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub guid: Uuid,
    pub status: SessionStatus,
    /// Last-used delivery channel ("chat", "web", ...)
    pub channel: Option<String>,
    /// Question currently awaiting an answer
    pub current_question: Option<String>,
    /// Ordered answered question/answer pairs
    pub history: Vec<HistoryEntry>,
    pub candidate_meta: Option<serde_json::Value>,
    pub vacancy_meta: Option<serde_json::Value>,
    pub completed_reason: Option<String>,
}

impl Session {
    /// Number of questions already answered
    pub fn question_count(&self) -> i64 {
        self.history.len() as i64
    }

    /// 1-based index of the question currently in flight
    pub fn current_question_number(&self) -> i64 {
        self.question_count() + 1
    }
}

/// One pending debounce timer row, claimed by the flush worker when due
#[derive(Debug, Clone)]
pub struct FlushTimer {
    pub session_id: Uuid,
    pub turn: i64,
    /// External id of the fragment whose arrival last armed this timer
    pub trigger_external_id: String,
    /// Idempotency key for the flush this timer will fire
    pub flush_key: Uuid,
    pub fires_at_ms: i64,
}
