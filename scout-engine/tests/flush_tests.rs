//! Integration tests for the flush/aggregation orchestrator
//!
//! These drive the full pipeline against an in-memory database with mock
//! collaborators: buffer fragments, hand the orchestrator a claimed timer,
//! and observe history, outbound messages, and session state.

mod helpers;

use helpers::{harness, harness_with, instant_config, MockReasoning};
use scout_common::db::models::{FragmentKind, SessionStatus};
use scout_common::events::ScoutEvent;
use scout_common::Error;
use scout_engine::buffer::NewFragment;
use scout_engine::clients::ReasoningOutcome;
use scout_engine::config::EngineConfig;
use scout_engine::flush::FlushOutcome;
use scout_engine::grouping::NotReadyReason;
use scout_engine::session::TurnAction;
use uuid::Uuid;

async fn buffer_text(
    h: &helpers::TestHarness,
    session_id: Uuid,
    turn: i64,
    external_id: &str,
    content: &str,
) {
    h.buffer
        .add_fragment(NewFragment {
            external_id: external_id.to_string(),
            session_id,
            turn,
            content: content.to_string(),
            kind: FragmentKind::Text,
            transcription: None,
            question_context: None,
        })
        .await
        .unwrap();
}

fn drain_events(rx: &mut tokio::sync::broadcast::Receiver<ScoutEvent>) -> Vec<ScoutEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

#[tokio::test]
async fn test_burst_is_aggregated_into_one_answer() {
    let h = harness(instant_config()).await;
    let session = h.session("Tell me about yourself").await;

    buffer_text(&h, session.guid, 1, "msg-1", "Hi").await;
    buffer_text(&h, session.guid, 1, "msg-2", "I have 5 years experience").await;

    let mut rx = h.event_bus.subscribe();
    let timer = h.timer(session.guid, 1, "msg-2");
    let outcome = h.orchestrator.flush(&timer).await.unwrap();

    match outcome {
        FlushOutcome::Acted(TurnAction::AskQuestion(q)) => {
            assert_eq!(q, "What interests you about this role?");
        }
        other => panic!("expected a question, got {:?}", other),
    }

    // Exactly one reasoning call saw the joined burst
    assert_eq!(h.reasoning.call_count(), 1);

    // History holds the aggregated reply under the answered question
    let updated = h.sessions.get(session.guid).await.unwrap();
    assert_eq!(updated.history.len(), 1);
    assert_eq!(updated.history[0].question, "Tell me about yourself");
    assert_eq!(updated.history[0].answer, "Hi\n\nI have 5 years experience");
    assert_eq!(
        updated.current_question.as_deref(),
        Some("What interests you about this role?")
    );

    // One outbound message, the next question
    assert_eq!(h.outbound.sent_texts(), vec!["What interests you about this role?"]);

    // Commit point: the turn buffer is gone
    assert!(!h.buffer.turn_has_fragments(session.guid, 1).await.unwrap());

    let events = drain_events(&mut rx);
    assert!(events.iter().any(|e| matches!(
        e,
        ScoutEvent::QuestionSent { question_number: 2, .. }
    )));
}

#[tokio::test]
async fn test_same_flush_key_acts_exactly_once() {
    let h = harness(instant_config()).await;
    let session = h.session("Q1").await;
    buffer_text(&h, session.guid, 1, "msg-1", "my answer").await;

    let timer = h.timer(session.guid, 1, "msg-1");

    let first = h.orchestrator.flush(&timer).await.unwrap();
    assert!(matches!(first, FlushOutcome::Acted(_)));

    // Redelivery of the same claimed timer (retry, crashed worker, etc.)
    let second = h.orchestrator.flush(&timer).await.unwrap();
    assert!(matches!(second, FlushOutcome::Duplicate));

    assert_eq!(h.reasoning.call_count(), 1);
    assert_eq!(h.outbound.sent_count(), 1);
    let updated = h.sessions.get(session.guid).await.unwrap();
    assert_eq!(updated.history.len(), 1);
}

#[tokio::test]
async fn test_not_ready_burst_is_deferred_intact() {
    // Production-length window: the just-arrived fragment is still waiting
    let h = harness(EngineConfig::default()).await;
    let session = h.session("Q1").await;
    buffer_text(&h, session.guid, 1, "msg-1", "partial answer").await;

    let timer = h.timer(session.guid, 1, "msg-1");
    let outcome = h.orchestrator.flush(&timer).await.unwrap();

    assert!(matches!(
        outcome,
        FlushOutcome::NotReady(NotReadyReason::StillWaiting { .. })
    ));

    // Nothing happened: buffer intact, no reasoning, no outbound
    assert!(h.buffer.turn_has_fragments(session.guid, 1).await.unwrap());
    assert_eq!(h.reasoning.call_count(), 0);
    assert_eq!(h.outbound.sent_count(), 0);
    let updated = h.sessions.get(session.guid).await.unwrap();
    assert!(updated.history.is_empty());
}

#[tokio::test]
async fn test_empty_turn_is_a_noop() {
    let h = harness(instant_config()).await;
    let session = h.session("Q1").await;

    let timer = h.timer(session.guid, 1, "msg-never-stored");
    let outcome = h.orchestrator.flush(&timer).await.unwrap();

    assert!(matches!(outcome, FlushOutcome::EmptyTurn));
    assert_eq!(h.reasoning.call_count(), 0);
    assert_eq!(h.outbound.sent_count(), 0);
}

#[tokio::test]
async fn test_completed_session_discards_stale_turn() {
    let h = harness(instant_config()).await;
    let session = h.session("Q1").await;
    let completed = h
        .sessions
        .complete(&session, "candidate declined", None)
        .await
        .unwrap();
    assert_eq!(completed.status, SessionStatus::Completed);

    // A fragment arrives for the dead session anyway
    buffer_text(&h, session.guid, 1, "msg-late", "too late").await;

    let timer = h.timer(session.guid, 1, "msg-late");
    let outcome = h.orchestrator.flush(&timer).await.unwrap();

    assert!(matches!(outcome, FlushOutcome::SessionClosed));
    assert!(!h.buffer.turn_has_fragments(session.guid, 1).await.unwrap());
    assert_eq!(h.reasoning.call_count(), 0);
    assert_eq!(h.outbound.sent_count(), 0);
}

#[tokio::test]
async fn test_reasoning_failure_abandons_turn_without_output() {
    let h = harness_with(instant_config(), MockReasoning::failing()).await;
    let session = h.session("Q1").await;
    buffer_text(&h, session.guid, 1, "msg-1", "my answer").await;

    let mut rx = h.event_bus.subscribe();
    let timer = h.timer(session.guid, 1, "msg-1");
    let result = h.orchestrator.flush(&timer).await;

    assert!(matches!(result, Err(Error::ReasoningUnavailable(_))));

    // No partial response reached the candidate, no history was written,
    // and the stale input is gone so it cannot be reprocessed
    assert_eq!(h.outbound.sent_count(), 0);
    let updated = h.sessions.get(session.guid).await.unwrap();
    assert_eq!(updated.status, SessionStatus::Active);
    assert!(updated.history.is_empty());
    assert!(!h.buffer.turn_has_fragments(session.guid, 1).await.unwrap());

    let events = drain_events(&mut rx);
    assert!(events
        .iter()
        .any(|e| matches!(e, ScoutEvent::ReasoningFailed { .. })));
}

#[tokio::test]
async fn test_simple_acknowledgment_keeps_interview_open() {
    let reasoning = MockReasoning::with_outcome(ReasoningOutcome {
        should_continue: false,
        next_question: None,
        reason: None,
        is_simple_acknowledgment: true,
    });
    let h = harness_with(instant_config(), reasoning).await;
    let session = h.session("Q1").await;
    buffer_text(&h, session.guid, 1, "msg-1", "thanks!").await;

    let timer = h.timer(session.guid, 1, "msg-1");
    let outcome = h.orchestrator.flush(&timer).await.unwrap();

    assert!(matches!(outcome, FlushOutcome::Acted(TurnAction::Noop)));

    // Nothing was sent and the session is untouched, but the turn is done
    assert_eq!(h.outbound.sent_count(), 0);
    let updated = h.sessions.get(session.guid).await.unwrap();
    assert_eq!(updated.status, SessionStatus::Active);
    assert!(updated.history.is_empty());
    assert_eq!(updated.current_question.as_deref(), Some("Q1"));
    assert!(!h.buffer.turn_has_fragments(session.guid, 1).await.unwrap());
}

#[tokio::test]
async fn test_aside_reply_does_not_advance_the_interview() {
    let reasoning = MockReasoning::with_outcome(ReasoningOutcome {
        should_continue: false,
        next_question: Some("We are a fully remote team.".to_string()),
        reason: None,
        is_simple_acknowledgment: false,
    });
    let h = harness_with(instant_config(), reasoning).await;
    let session = h.session("Q1").await;
    buffer_text(&h, session.guid, 1, "msg-1", "Is this remote?").await;

    let mut rx = h.event_bus.subscribe();
    let timer = h.timer(session.guid, 1, "msg-1");
    let outcome = h.orchestrator.flush(&timer).await.unwrap();

    match outcome {
        FlushOutcome::Acted(TurnAction::Reply(reply)) => {
            assert_eq!(reply, "We are a fully remote team.");
        }
        other => panic!("expected a reply, got {:?}", other),
    }

    // The aside is delivered but neither history nor the pending question
    // moves
    assert_eq!(h.outbound.sent_texts(), vec!["We are a fully remote team."]);
    let updated = h.sessions.get(session.guid).await.unwrap();
    assert!(updated.history.is_empty());
    assert_eq!(updated.current_question.as_deref(), Some("Q1"));

    let events = drain_events(&mut rx);
    assert!(events.iter().any(|e| matches!(e, ScoutEvent::ReplySent { .. })));
}

#[tokio::test]
async fn test_stop_without_reply_completes_the_interview() {
    let reasoning = MockReasoning::with_outcome(ReasoningOutcome {
        should_continue: false,
        next_question: None,
        reason: Some("all topics covered".to_string()),
        is_simple_acknowledgment: false,
    });
    let h = harness_with(instant_config(), reasoning).await;
    let session = h.session("Any final questions?").await;
    buffer_text(&h, session.guid, 1, "msg-1", "No, all clear").await;

    let mut rx = h.event_bus.subscribe();
    let timer = h.timer(session.guid, 1, "msg-1");
    let outcome = h.orchestrator.flush(&timer).await.unwrap();

    match outcome {
        FlushOutcome::Acted(TurnAction::Complete(reason)) => {
            assert_eq!(reason, "all topics covered");
        }
        other => panic!("expected completion, got {:?}", other),
    }

    let updated = h.sessions.get(session.guid).await.unwrap();
    assert_eq!(updated.status, SessionStatus::Completed);
    assert_eq!(updated.completed_reason.as_deref(), Some("all topics covered"));
    assert!(updated.current_question.is_none());
    // The final answer made it into the transcript
    assert_eq!(updated.history.len(), 1);
    assert_eq!(updated.history[0].question, "Any final questions?");
    assert_eq!(updated.history[0].answer, "No, all clear");

    let events = drain_events(&mut rx);
    let completed = events.iter().find_map(|e| match e {
        ScoutEvent::InterviewCompleted {
            reason, transcript, ..
        } => Some((reason.clone(), transcript.len())),
        _ => None,
    });
    assert_eq!(completed, Some(("all topics covered".to_string(), 1)));
}

#[tokio::test]
async fn test_question_ceiling_completes_despite_reasoning() {
    // One-question interview: the opening question is the ceiling
    let config = EngineConfig {
        max_questions: 1,
        ..instant_config()
    };
    // Reasoning wants to keep going; the ceiling must override it
    let h = harness_with(config, MockReasoning::continuing("One more?")).await;
    let session = h.session("Q1").await;
    buffer_text(&h, session.guid, 1, "msg-1", "my only answer").await;

    let timer = h.timer(session.guid, 1, "msg-1");
    let outcome = h.orchestrator.flush(&timer).await.unwrap();

    match outcome {
        FlushOutcome::Acted(TurnAction::Complete(reason)) => {
            assert_eq!(reason, "question limit reached");
        }
        other => panic!("expected completion, got {:?}", other),
    }

    let updated = h.sessions.get(session.guid).await.unwrap();
    assert_eq!(updated.status, SessionStatus::Completed);
    assert_eq!(updated.history.len(), 1);
    assert_eq!(updated.history[0].answer, "my only answer");
    // No further question went out
    assert_eq!(h.outbound.sent_count(), 0);
}

#[tokio::test]
async fn test_worker_poll_drives_the_full_pipeline() {
    use scout_common::db::models::FragmentKind;
    use scout_engine::engine::InboundMessage;
    use scout_engine::worker::FlushWorker;
    use std::time::Duration;

    let h = harness(instant_config()).await;
    let session = h.session("Tell me about yourself").await;
    let worker = FlushWorker::new(
        h.scheduler.clone(),
        h.orchestrator.clone(),
        Duration::from_millis(10),
    );

    // Webhook in, timer armed (and already due: zero-length window)
    h.engine
        .ingest_message(InboundMessage {
            session_id: session.guid,
            external_id: "msg-1".to_string(),
            content: "I build backend services".to_string(),
            kind: FragmentKind::Text,
            channel: Some("chat".to_string()),
            turn: None,
            audio: None,
        })
        .await
        .unwrap();

    worker.poll_once().await;

    // The claimed timer fired once: question out, history written
    assert_eq!(h.outbound.sent_texts(), vec!["What interests you about this role?"]);
    let updated = h.sessions.get(session.guid).await.unwrap();
    assert_eq!(updated.history[0].answer, "I build backend services");

    // A second poll finds nothing to claim
    worker.poll_once().await;
    assert_eq!(h.outbound.sent_count(), 1);
}

#[tokio::test]
async fn test_voice_transcription_flows_into_the_answer() {
    let h = harness(instant_config()).await;
    let session = h.session("Q1").await;

    buffer_text(&h, session.guid, 1, "msg-1", "See voice note").await;
    h.buffer
        .add_fragment(NewFragment {
            external_id: "voice-1".to_string(),
            session_id: session.guid,
            turn: 1,
            content: "[voice message]".to_string(),
            kind: FragmentKind::Voice,
            transcription: Some("I led a team of four".to_string()),
            question_context: None,
        })
        .await
        .unwrap();

    let timer = h.timer(session.guid, 1, "voice-1");
    let outcome = h.orchestrator.flush(&timer).await.unwrap();
    assert!(matches!(outcome, FlushOutcome::Acted(TurnAction::AskQuestion(_))));

    // History carries the transcription, not the placeholder content
    let updated = h.sessions.get(session.guid).await.unwrap();
    assert_eq!(
        updated.history[0].answer,
        "See voice note\n\nI led a team of four"
    );
}
