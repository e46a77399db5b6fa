//! Flush/aggregation orchestrator
//!
//! Invoked by the flush worker when a debounce timer fires. The handler is
//! idempotent as a whole: it claims the flush key up front, re-derives all
//! state from the buffer and session stores rather than trusting its input,
//! and performs side effects (history append, outbound event) before the
//! buffer clear that commits the turn.

use crate::buffer::BufferService;
use crate::clients::{ContextBuilder, OutboundDelivery, ReasoningClient};
use crate::config::EngineConfig;
use crate::grouping::{GroupingDecision, GroupingEvaluator, NotReadyReason};
use crate::session::{SessionService, TurnAction};
use scout_common::db::models::{Fragment, FlushTimer, SessionStatus};
use scout_common::events::{EventBus, ScoutEvent, TranscriptEntry};
use scout_common::{time, Result};
use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Join a turn's fragments into the logical candidate utterance.
///
/// Single-fragment turns pass through verbatim; multi-fragment turns are
/// concatenated in arrival order, double-newline separated.
pub fn aggregate_text(fragments: &[Fragment]) -> String {
    fragments
        .iter()
        .map(|f| f.effective_text())
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Render a turn for the reasoning collaborator.
///
/// Multi-fragment turns prefix each fragment with its modality and ordinal
/// ("Voice 1:", "Text 2:") to preserve the modality signal; single-fragment
/// turns stay verbatim.
pub fn render_for_reasoning(fragments: &[Fragment]) -> String {
    if fragments.len() <= 1 {
        return aggregate_text(fragments);
    }

    fragments
        .iter()
        .enumerate()
        .map(|(i, f)| format!("{} {}: {}", f.kind.label(), i + 1, f.effective_text()))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// What a flush invocation did
#[derive(Debug, Clone)]
pub enum FlushOutcome {
    /// Another invocation already owns this flush key
    Duplicate,
    /// The turn buffer was empty; a concurrent clear already handled it
    EmptyTurn,
    /// Grouping said the burst is not complete; a later timer will handle it
    NotReady(NotReadyReason),
    /// The session is already terminal; the stale turn was discarded
    SessionClosed,
    /// The turn was aggregated and the action applied
    Acted(TurnAction),
}

#[derive(Clone)]
pub struct FlushOrchestrator {
    db: SqlitePool,
    buffer: BufferService,
    grouping: GroupingEvaluator,
    sessions: SessionService,
    context_builder: Arc<dyn ContextBuilder>,
    reasoning: Arc<dyn ReasoningClient>,
    outbound: Arc<dyn OutboundDelivery>,
    event_bus: EventBus,
    config: EngineConfig,
}

impl FlushOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        db: SqlitePool,
        buffer: BufferService,
        grouping: GroupingEvaluator,
        sessions: SessionService,
        context_builder: Arc<dyn ContextBuilder>,
        reasoning: Arc<dyn ReasoningClient>,
        outbound: Arc<dyn OutboundDelivery>,
        event_bus: EventBus,
        config: EngineConfig,
    ) -> Self {
        Self {
            db,
            buffer,
            grouping,
            sessions,
            context_builder,
            reasoning,
            outbound,
            event_bus,
            config,
        }
    }

    /// Execute one flush. Two invocations with the same flush key produce
    /// exactly one externally visible effect.
    pub async fn flush(&self, timer: &FlushTimer) -> Result<FlushOutcome> {
        let session_id = timer.session_id;
        let turn = timer.turn;

        // Claim the idempotency key; a retry or duplicate delivery of the
        // same key stops here
        if !self.claim_key(timer).await? {
            debug!(flush_key = %timer.flush_key, "Flush key already executed, skipping");
            return Ok(FlushOutcome::Duplicate);
        }

        // Re-derive everything from the store
        let fragments = self.buffer.list_fragments(session_id, turn).await?;
        if fragments.is_empty() {
            self.skip(timer, "empty turn").await?;
            return Ok(FlushOutcome::EmptyTurn);
        }

        match self
            .grouping
            .evaluate(session_id, &timer.trigger_external_id)
            .await?
        {
            GroupingDecision::Ready(_) => {}
            GroupingDecision::NotReady(reason) => {
                self.skip(timer, &reason.to_string()).await?;
                return Ok(FlushOutcome::NotReady(reason));
            }
        }

        // Missing session is fatal for this flush: surfaced to the caller,
        // no partial state mutation
        let session = self.sessions.get(session_id).await?;
        if session.status == SessionStatus::Completed {
            self.buffer.clear_turn(session_id, turn).await?;
            self.skip(timer, "session already completed").await?;
            return Ok(FlushOutcome::SessionClosed);
        }

        let aggregated = aggregate_text(&fragments);
        let rendered = render_for_reasoning(&fragments);

        let context = self
            .context_builder
            .get_context(session_id, &rendered, session.current_question.as_deref())
            .await?;

        let outcome = match self.reasoning.decide(&context).await {
            Ok(outcome) => outcome,
            Err(e) => {
                // Degradation policy: no partial response reaches the
                // candidate. Clear the buffer so stale input is never
                // reprocessed; the candidate's next message starts a fresh
                // turn.
                error!(
                    session_id = %session_id,
                    turn,
                    error = %e,
                    "Reasoning collaborator failed, abandoning turn"
                );
                self.buffer.clear_turn(session_id, turn).await?;
                self.record_outcome(timer.flush_key, "reasoning_failed").await?;
                self.event_bus.emit_lossy(ScoutEvent::ReasoningFailed {
                    session_id,
                    turn,
                    error: e.to_string(),
                    timestamp: time::now(),
                });
                return Err(e);
            }
        };

        let action = TurnAction::derive(&outcome, context.question_number, self.config.max_questions);

        self.apply(timer, &session, &aggregated, &action).await?;

        // Commit point: the turn is handled once its fragments are gone
        self.buffer.clear_turn(session_id, turn).await?;
        self.record_outcome(timer.flush_key, action_label(&action)).await?;

        Ok(FlushOutcome::Acted(action))
    }

    async fn apply(
        &self,
        timer: &FlushTimer,
        session: &scout_common::db::models::Session,
        aggregated: &str,
        action: &TurnAction,
    ) -> Result<()> {
        let session_id = timer.session_id;
        let channel = session.channel.as_deref();

        match action {
            TurnAction::AskQuestion(question) => {
                let updated = self
                    .sessions
                    .record_answer(session, aggregated, Some(question))
                    .await?;
                let question_number = updated.current_question_number();

                self.deliver(session_id, channel, question).await;
                self.event_bus.emit_lossy(ScoutEvent::QuestionSent {
                    session_id,
                    question: question.clone(),
                    question_number,
                    timestamp: time::now(),
                });
                info!(
                    session_id = %session_id,
                    question_number,
                    "Next interview question sent"
                );
            }
            TurnAction::Reply(reply) => {
                // An aside: answered without touching history or the
                // question counter
                self.deliver(session_id, channel, reply).await;
                self.event_bus.emit_lossy(ScoutEvent::ReplySent {
                    session_id,
                    reply: reply.clone(),
                    timestamp: time::now(),
                });
                info!(session_id = %session_id, "Aside answered");
            }
            TurnAction::Complete(reason) => {
                let updated = self
                    .sessions
                    .complete(session, reason, Some(aggregated))
                    .await?;

                let transcript = updated
                    .history
                    .iter()
                    .map(|entry| TranscriptEntry {
                        question: entry.question.clone(),
                        answer: entry.answer.clone(),
                    })
                    .collect();

                self.event_bus.emit_lossy(ScoutEvent::InterviewCompleted {
                    session_id,
                    reason: reason.clone(),
                    question_count: updated.question_count(),
                    transcript,
                    timestamp: time::now(),
                });
                info!(session_id = %session_id, reason = %reason, "Interview completed");
            }
            TurnAction::Noop => {
                debug!(session_id = %session_id, "Turn resolved to no action");
            }
        }

        Ok(())
    }

    /// Outbound delivery is fire-and-forget: failures are logged, retries
    /// belong to the messaging subsystem
    async fn deliver(&self, session_id: Uuid, channel: Option<&str>, text: &str) {
        if let Err(e) = self.outbound.send_message(session_id, channel, text).await {
            warn!(
                session_id = %session_id,
                error = %e,
                "Outbound delivery failed (messaging subsystem owns retry)"
            );
        }
    }

    /// Returns true when this invocation won the idempotency claim
    async fn claim_key(&self, timer: &FlushTimer) -> Result<bool> {
        let result = sqlx::query(
            "INSERT OR IGNORE INTO flush_executions (flush_key, session_id, turn) VALUES (?, ?, ?)",
        )
        .bind(timer.flush_key.to_string())
        .bind(timer.session_id.to_string())
        .bind(timer.turn)
        .execute(&self.db)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn record_outcome(&self, flush_key: Uuid, outcome: &str) -> Result<()> {
        sqlx::query("UPDATE flush_executions SET outcome = ? WHERE flush_key = ?")
            .bind(outcome)
            .bind(flush_key.to_string())
            .execute(&self.db)
            .await?;
        Ok(())
    }

    async fn skip(&self, timer: &FlushTimer, reason: &str) -> Result<()> {
        debug!(
            session_id = %timer.session_id,
            turn = timer.turn,
            flush_key = %timer.flush_key,
            reason,
            "Flush skipped"
        );
        self.record_outcome(timer.flush_key, &format!("skipped: {}", reason))
            .await?;
        self.event_bus.emit_lossy(ScoutEvent::FlushSkipped {
            session_id: timer.session_id,
            turn: timer.turn,
            flush_key: timer.flush_key,
            reason: reason.to_string(),
            timestamp: time::now(),
        });
        Ok(())
    }
}

fn action_label(action: &TurnAction) -> &'static str {
    match action {
        TurnAction::AskQuestion(_) => "question_sent",
        TurnAction::Reply(_) => "reply_sent",
        TurnAction::Complete(_) => "completed",
        TurnAction::Noop => "noop",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scout_common::db::models::FragmentKind;

    fn fragment(content: &str, kind: FragmentKind, transcription: Option<&str>) -> Fragment {
        Fragment {
            guid: Uuid::new_v4(),
            external_id: Uuid::new_v4().to_string(),
            session_id: Uuid::new_v4(),
            turn: 1,
            content: content.to_string(),
            kind,
            transcription: transcription.map(|t| t.to_string()),
            question_context: None,
            arrived_at_ms: 0,
        }
    }

    #[test]
    fn test_single_fragment_passes_through_verbatim() {
        let frags = vec![fragment("Hi there", FragmentKind::Text, None)];
        assert_eq!(aggregate_text(&frags), "Hi there");
        assert_eq!(render_for_reasoning(&frags), "Hi there");
    }

    #[test]
    fn test_multi_fragment_joined_in_arrival_order() {
        let frags = vec![
            fragment("Hi", FragmentKind::Text, None),
            fragment("I have 5 years experience", FragmentKind::Text, None),
        ];
        assert_eq!(aggregate_text(&frags), "Hi\n\nI have 5 years experience");
    }

    #[test]
    fn test_reasoning_rendering_carries_modality_prefixes() {
        let frags = vec![
            fragment("[voice]", FragmentKind::Voice, Some("Hello, thanks for reaching out")),
            fragment("Here is my portfolio", FragmentKind::Text, None),
        ];
        assert_eq!(
            render_for_reasoning(&frags),
            "Voice 1: Hello, thanks for reaching out\n\nText 2: Here is my portfolio"
        );
    }

    #[test]
    fn test_voice_aggregation_uses_transcription() {
        let frags = vec![fragment("[voice]", FragmentKind::Voice, Some("Spoken answer"))];
        assert_eq!(aggregate_text(&frags), "Spoken answer");
    }
}
