//! External collaborator interfaces
//!
//! The engine consumes four collaborators: the reasoning/policy service, the
//! transcription service, outbound message delivery, and the conversation
//! context builder. All are traits at the seam so tests can substitute
//! recording mocks; production wiring uses the HTTP implementations in
//! `http.rs` (and the DB-backed context builder below).

pub mod http;

pub use http::{HttpOutboundDelivery, HttpReasoningClient, HttpTranscriptionClient};

use crate::session::SessionService;
use async_trait::async_trait;
use scout_common::db::models::HistoryEntry;
use scout_common::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Full conversation context handed to the reasoning collaborator
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationContext {
    pub session_id: Uuid,
    /// 1-based number of the question currently being answered
    pub question_number: i64,
    pub current_question: Option<String>,
    /// The aggregated candidate utterance for this turn
    pub candidate_reply: String,
    pub history: Vec<HistoryEntry>,
    pub candidate_meta: Option<Value>,
    pub vacancy_meta: Option<Value>,
}

/// Decision returned by the reasoning collaborator
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReasoningOutcome {
    pub should_continue: bool,
    #[serde(default)]
    pub next_question: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
    /// True when the candidate's message was a throwaway courtesy
    /// ("thanks", "ok") that should not end the interview
    #[serde(default)]
    pub is_simple_acknowledgment: bool,
}

/// Reasoning/policy collaborator: turns an aggregated utterance plus context
/// into the next conversational step. May fail (network/API error); the
/// orchestrator treats that as a retryable external failure, not a crash.
#[async_trait]
pub trait ReasoningClient: Send + Sync {
    async fn decide(&self, context: &ConversationContext) -> Result<ReasoningOutcome>;
}

/// Transcription collaborator. `Ok(None)` means the feature is disabled,
/// not a failure.
#[async_trait]
pub trait TranscriptionClient: Send + Sync {
    async fn transcribe(&self, audio: &[u8]) -> Result<Option<String>>;
}

/// Outbound message delivery. Fire-and-forget from the engine's point of
/// view; retry policy belongs to the messaging subsystem.
#[async_trait]
pub trait OutboundDelivery: Send + Sync {
    async fn send_message(
        &self,
        session_id: Uuid,
        channel: Option<&str>,
        text: &str,
    ) -> Result<()>;
}

/// Builds the conversation context for a reasoning call
#[async_trait]
pub trait ContextBuilder: Send + Sync {
    async fn get_context(
        &self,
        session_id: Uuid,
        aggregated_text: &str,
        current_question: Option<&str>,
    ) -> Result<ConversationContext>;
}

/// Transcription client for deployments without a transcription
/// collaborator: always reports the feature as disabled.
pub struct NullTranscriptionClient;

#[async_trait]
impl TranscriptionClient for NullTranscriptionClient {
    async fn transcribe(&self, _audio: &[u8]) -> Result<Option<String>> {
        Ok(None)
    }
}

/// Context builder backed by the session store
#[derive(Clone)]
pub struct DbContextBuilder {
    sessions: SessionService,
}

impl DbContextBuilder {
    pub fn new(sessions: SessionService) -> Self {
        Self { sessions }
    }
}

#[async_trait]
impl ContextBuilder for DbContextBuilder {
    async fn get_context(
        &self,
        session_id: Uuid,
        aggregated_text: &str,
        current_question: Option<&str>,
    ) -> Result<ConversationContext> {
        let session = self.sessions.get(session_id).await?;

        Ok(ConversationContext {
            session_id,
            question_number: session.current_question_number(),
            current_question: current_question
                .map(|q| q.to_string())
                .or_else(|| session.current_question.clone()),
            candidate_reply: aggregated_text.to_string(),
            history: session.history,
            candidate_meta: session.candidate_meta,
            vacancy_meta: session.vacancy_meta,
        })
    }
}
