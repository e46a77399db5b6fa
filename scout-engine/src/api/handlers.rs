//! HTTP handlers

use super::AppState;
use crate::engine::{InboundMessage, IngestOutcome};
use crate::error::{ApiError, ApiResult};
use crate::session::NewSession;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use base64::Engine as _;
use scout_common::db::models::{FragmentKind, HistoryEntry, Session};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Health check (no auth)
pub async fn health() -> Json<Value> {
    Json(serde_json::json!({
        "status": "ok",
        "service": "scout-engine",
    }))
}

/// Build identification
pub async fn buildinfo() -> Json<Value> {
    Json(serde_json::json!({
        "version": env!("CARGO_PKG_VERSION"),
        "git_hash": env!("GIT_HASH"),
        "build_timestamp": env!("BUILD_TIMESTAMP"),
        "profile": env!("BUILD_PROFILE"),
    }))
}

#[derive(Debug, Deserialize)]
pub struct CreateSessionRequest {
    pub channel: Option<String>,
    pub opening_question: Option<String>,
    pub candidate_meta: Option<Value>,
    pub vacancy_meta: Option<Value>,
}

#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub session_id: Uuid,
    pub status: String,
    pub channel: Option<String>,
    pub current_question: Option<String>,
    pub question_count: i64,
    pub history: Vec<HistoryEntry>,
    pub completed_reason: Option<String>,
}

impl From<Session> for SessionResponse {
    fn from(session: Session) -> Self {
        Self {
            session_id: session.guid,
            status: session.status.as_str().to_string(),
            channel: session.channel,
            current_question: session.current_question,
            question_count: session.history.len() as i64,
            history: session.history,
            completed_reason: session.completed_reason,
        }
    }
}

/// Start an interview session
pub async fn create_session(
    State(state): State<AppState>,
    Json(request): Json<CreateSessionRequest>,
) -> ApiResult<(StatusCode, Json<SessionResponse>)> {
    let session = state
        .engine
        .start_session(NewSession {
            channel: request.channel,
            opening_question: request.opening_question,
            candidate_meta: request.candidate_meta,
            vacancy_meta: request.vacancy_meta,
        })
        .await?;

    Ok((StatusCode::CREATED, Json(session.into())))
}

/// Inspect a session
pub async fn get_session(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> ApiResult<Json<SessionResponse>> {
    let session = state.engine.sessions().get(session_id).await?;
    Ok(Json(session.into()))
}

#[derive(Debug, Deserialize)]
pub struct IngestMessageRequest {
    pub session_id: Uuid,
    pub external_id: String,
    #[serde(default)]
    pub content: String,
    pub kind: FragmentKind,
    pub channel: Option<String>,
    pub turn: Option<i64>,
    /// Base64-encoded audio for the inline transcription fast path
    pub audio_base64: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct IngestMessageResponse {
    pub outcome: String,
    pub turn: Option<i64>,
}

/// Candidate message webhook
pub async fn ingest_message(
    State(state): State<AppState>,
    Json(request): Json<IngestMessageRequest>,
) -> ApiResult<Json<IngestMessageResponse>> {
    if request.external_id.trim().is_empty() {
        return Err(ApiError::BadRequest("external_id is required".to_string()));
    }

    let audio = request
        .audio_base64
        .as_deref()
        .map(|encoded| {
            base64::engine::general_purpose::STANDARD
                .decode(encoded)
                .map_err(|e| ApiError::BadRequest(format!("Invalid audio_base64: {}", e)))
        })
        .transpose()?;

    let outcome = state
        .engine
        .ingest_message(InboundMessage {
            session_id: request.session_id,
            external_id: request.external_id,
            content: request.content,
            kind: request.kind,
            channel: request.channel,
            turn: request.turn,
            audio,
        })
        .await?;

    let (outcome_str, turn) = match outcome {
        IngestOutcome::Buffered { turn } => ("buffered", Some(turn)),
        IngestOutcome::AwaitingTranscription { turn } => ("awaiting_transcription", Some(turn)),
        IngestOutcome::Duplicate => ("duplicate", None),
        IngestOutcome::EmptyContent => ("empty_content", None),
    };

    Ok(Json(IngestMessageResponse {
        outcome: outcome_str.to_string(),
        turn,
    }))
}

#[derive(Debug, Deserialize)]
pub struct AttachTranscriptionRequest {
    pub external_id: String,
    pub text: String,
}

#[derive(Debug, Serialize)]
pub struct AttachTranscriptionResponse {
    pub attached: bool,
}

/// Transcription completion callback
pub async fn attach_transcription(
    State(state): State<AppState>,
    Json(request): Json<AttachTranscriptionRequest>,
) -> ApiResult<Json<AttachTranscriptionResponse>> {
    let attached = state
        .engine
        .attach_transcription(&request.external_id, &request.text)
        .await?;

    Ok(Json(AttachTranscriptionResponse { attached }))
}
