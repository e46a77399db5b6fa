//! Integration tests for the debounce scheduler

mod helpers;

use helpers::{harness, instant_config};
use scout_common::db::models::FragmentKind;
use scout_common::time;
use scout_engine::buffer::NewFragment;
use uuid::Uuid;

async fn buffer_text(h: &helpers::TestHarness, session_id: Uuid, external_id: &str) {
    h.buffer
        .add_fragment(NewFragment {
            external_id: external_id.to_string(),
            session_id,
            turn: 1,
            content: "hello".to_string(),
            kind: FragmentKind::Text,
            transcription: None,
            question_context: None,
        })
        .await
        .unwrap();
}

#[tokio::test]
async fn test_arm_persists_a_timer() {
    let h = harness(instant_config()).await;
    let session = h.session("Q1").await;
    buffer_text(&h, session.guid, "msg-1").await;

    let flush_key = h.scheduler.arm(session.guid, 1, "msg-1").await.unwrap();
    assert!(flush_key.is_some());

    let pending = h.scheduler.pending(session.guid, 1).await.unwrap().unwrap();
    assert_eq!(pending.trigger_external_id, "msg-1");
    assert_eq!(pending.flush_key, flush_key.unwrap());
}

#[tokio::test]
async fn test_rearm_supersedes_with_fresh_flush_key() {
    let h = harness(instant_config()).await;
    let session = h.session("Q1").await;
    buffer_text(&h, session.guid, "msg-1").await;
    buffer_text(&h, session.guid, "msg-2").await;

    let first_key = h.scheduler.arm(session.guid, 1, "msg-1").await.unwrap().unwrap();
    let second_key = h.scheduler.arm(session.guid, 1, "msg-2").await.unwrap().unwrap();
    assert_ne!(first_key, second_key);

    // One row per (session, turn): last write wins
    let pending = h.scheduler.pending(session.guid, 1).await.unwrap().unwrap();
    assert_eq!(pending.flush_key, second_key);
    assert_eq!(pending.trigger_external_id, "msg-2");
}

#[tokio::test]
async fn test_arm_skips_empty_turn() {
    let h = harness(instant_config()).await;
    let session = h.session("Q1").await;

    // No fragments buffered: a stale re-arm must not create a timer
    let flush_key = h.scheduler.arm(session.guid, 1, "msg-gone").await.unwrap();
    assert!(flush_key.is_none());
    assert!(h.scheduler.pending(session.guid, 1).await.unwrap().is_none());
}

#[tokio::test]
async fn test_claim_due_removes_the_timer() {
    let h = harness(instant_config()).await;
    let session = h.session("Q1").await;
    buffer_text(&h, session.guid, "msg-1").await;

    let flush_key = h.scheduler.arm(session.guid, 1, "msg-1").await.unwrap().unwrap();

    // Window is zero, so the timer is already due
    let claimed = h.scheduler.claim_due(time::now_ms()).await.unwrap();
    assert_eq!(claimed.len(), 1);
    assert_eq!(claimed[0].session_id, session.guid);
    assert_eq!(claimed[0].flush_key, flush_key);

    // Claimed rows are gone; a second poll gets nothing
    assert!(h.scheduler.claim_due(time::now_ms()).await.unwrap().is_empty());
    assert!(h.scheduler.pending(session.guid, 1).await.unwrap().is_none());
}

#[tokio::test]
async fn test_claim_due_skips_future_timers() {
    let config = scout_engine::config::EngineConfig::default();
    let h = harness(config).await;
    let session = h.session("Q1").await;
    buffer_text(&h, session.guid, "msg-1").await;

    // Ten-minute window: the timer fires well in the future
    h.scheduler.arm(session.guid, 1, "msg-1").await.unwrap();

    assert!(h.scheduler.claim_due(time::now_ms()).await.unwrap().is_empty());
    assert!(h.scheduler.pending(session.guid, 1).await.unwrap().is_some());
}

#[tokio::test]
async fn test_cancel_drops_pending_timer() {
    let h = harness(instant_config()).await;
    let session = h.session("Q1").await;
    buffer_text(&h, session.guid, "msg-1").await;

    h.scheduler.arm(session.guid, 1, "msg-1").await.unwrap();

    assert!(h.scheduler.cancel(session.guid, 1).await.unwrap());
    assert!(!h.scheduler.cancel(session.guid, 1).await.unwrap());
    assert!(h.scheduler.pending(session.guid, 1).await.unwrap().is_none());
}
