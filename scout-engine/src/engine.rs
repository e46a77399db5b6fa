//! Engine facade
//!
//! Bundles the services behind the operations the inbound edge needs:
//! start a session, ingest a message fragment, attach a transcription.
//! This is the only layer that decides when the debounce gets armed -
//! text fragments arm immediately, voice fragments only once their
//! transcription exists.

use crate::buffer::{AddOutcome, BufferService, NewFragment};
use crate::clients::{OutboundDelivery, TranscriptionClient};
use crate::config::EngineConfig;
use crate::scheduler::DebounceScheduler;
use crate::session::{NewSession, SessionService};
use scout_common::db::models::{Fragment, FragmentKind, Session, SessionStatus};
use scout_common::events::{EventBus, ScoutEvent};
use scout_common::{time, Error, Result};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// One inbound candidate message from any channel
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub session_id: Uuid,
    /// Stable message id from the delivery channel (dedup key)
    pub external_id: String,
    pub content: String,
    pub kind: FragmentKind,
    pub channel: Option<String>,
    /// Turn override; derived from the session when absent
    pub turn: Option<i64>,
    /// Raw audio for the inline transcription fast path
    pub audio: Option<Vec<u8>>,
}

/// What ingesting a message did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    /// Stored and debounce armed
    Buffered { turn: i64 },
    /// Stored; waiting on async transcription before arming
    AwaitingTranscription { turn: i64 },
    /// Redelivery of a known external id; nothing changed
    Duplicate,
    /// Whitespace-only content; nothing stored
    EmptyContent,
}

#[derive(Clone)]
pub struct Engine {
    buffer: BufferService,
    scheduler: DebounceScheduler,
    sessions: SessionService,
    transcription: Arc<dyn TranscriptionClient>,
    outbound: Arc<dyn OutboundDelivery>,
    event_bus: EventBus,
    config: EngineConfig,
}

impl Engine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        buffer: BufferService,
        scheduler: DebounceScheduler,
        sessions: SessionService,
        transcription: Arc<dyn TranscriptionClient>,
        outbound: Arc<dyn OutboundDelivery>,
        event_bus: EventBus,
        config: EngineConfig,
    ) -> Self {
        Self {
            buffer,
            scheduler,
            sessions,
            transcription,
            outbound,
            event_bus,
            config,
        }
    }

    pub fn sessions(&self) -> &SessionService {
        &self.sessions
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Start an interview. The opening question, when present, is counted
    /// as question 1, delivered through the outbound collaborator, and
    /// announced on the event bus.
    pub async fn start_session(&self, new: NewSession) -> Result<Session> {
        let opening_question = new.opening_question.clone();
        let session = self.sessions.create(new).await?;

        if let Some(question) = opening_question {
            // Delivery failures are logged, not surfaced; retry belongs to
            // the messaging subsystem
            if let Err(e) = self
                .outbound
                .send_message(session.guid, session.channel.as_deref(), &question)
                .await
            {
                warn!(
                    session_id = %session.guid,
                    error = %e,
                    "Opening question delivery failed (messaging subsystem owns retry)"
                );
            }

            self.event_bus.emit_lossy(ScoutEvent::QuestionSent {
                session_id: session.guid,
                question,
                question_number: 1,
                timestamp: time::now(),
            });
        }

        Ok(session)
    }

    /// Ingest one candidate message fragment.
    pub async fn ingest_message(&self, message: InboundMessage) -> Result<IngestOutcome> {
        let session = self.sessions.get(message.session_id).await?;
        if session.status == SessionStatus::Completed {
            return Err(Error::Conflict(format!(
                "Session {} is completed",
                session.guid
            )));
        }

        if let Some(channel) = &message.channel {
            self.sessions.touch_channel(session.guid, channel).await?;
        }

        let turn = message.turn.unwrap_or_else(|| session.current_question_number());

        // Inline transcription fast path for voice fragments carrying audio
        let transcription = match (&message.kind, &message.audio) {
            (FragmentKind::Voice, Some(audio)) => {
                match self.transcription.transcribe(audio).await? {
                    Some(text) => Some(text),
                    // Feature disabled upstream: degrade to the raw content
                    // so the turn can never wedge waiting on text that will
                    // not come
                    None => Some(message.content.clone()),
                }
            }
            _ => None,
        };

        let outcome = self
            .buffer
            .add_fragment(NewFragment {
                external_id: message.external_id.clone(),
                session_id: session.guid,
                turn,
                content: message.content,
                kind: message.kind,
                transcription,
                question_context: session.current_question.clone(),
            })
            .await?;

        let fragment = match outcome {
            AddOutcome::Added(fragment) => fragment,
            AddOutcome::Duplicate => return Ok(IngestOutcome::Duplicate),
            AddOutcome::EmptyContent => return Ok(IngestOutcome::EmptyContent),
        };

        self.event_bus.emit_lossy(ScoutEvent::FragmentBuffered {
            session_id: session.guid,
            turn,
            external_id: fragment.external_id.clone(),
            timestamp: time::now(),
        });

        // Text arms the debounce immediately; voice only once transcribed
        if fragment.awaiting_transcription() {
            debug!(
                session_id = %session.guid,
                external_id = %fragment.external_id,
                "Voice fragment buffered, waiting for transcription"
            );
            return Ok(IngestOutcome::AwaitingTranscription { turn });
        }

        self.arm(&fragment).await?;
        Ok(IngestOutcome::Buffered { turn })
    }

    /// Attach an asynchronously completed transcription, then arm the
    /// debounce for the owning turn. Returns false when the fragment is
    /// gone (already flushed or never stored).
    pub async fn attach_transcription(&self, external_id: &str, text: &str) -> Result<bool> {
        let location = self.buffer.attach_transcription(external_id, text).await?;

        let Some((session_id, turn)) = location else {
            info!(external_id, "Transcription arrived for unknown or cleared fragment");
            return Ok(false);
        };

        self.event_bus.emit_lossy(ScoutEvent::TranscriptionAttached {
            session_id,
            turn,
            external_id: external_id.to_string(),
            timestamp: time::now(),
        });

        self.scheduler.arm(session_id, turn, external_id).await?;
        Ok(true)
    }

    async fn arm(&self, fragment: &Fragment) -> Result<()> {
        self.scheduler
            .arm(fragment.session_id, fragment.turn, &fragment.external_id)
            .await?;
        Ok(())
    }
}
