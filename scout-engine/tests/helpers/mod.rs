//! Shared test fixtures: in-memory database, mock collaborators, and a
//! fully wired engine harness.

#![allow(dead_code)]

use async_trait::async_trait;
use scout_common::db::init::init_memory_database;
use scout_common::db::models::{FlushTimer, Session};
use scout_common::events::EventBus;
use scout_common::{Error, Result};
use scout_engine::buffer::BufferService;
use scout_engine::clients::{
    ContextBuilder, ConversationContext, DbContextBuilder, OutboundDelivery, ReasoningClient,
    ReasoningOutcome, TranscriptionClient,
};
use scout_engine::config::EngineConfig;
use scout_engine::engine::Engine;
use scout_engine::flush::FlushOrchestrator;
use scout_engine::grouping::GroupingEvaluator;
use scout_engine::scheduler::DebounceScheduler;
use scout_engine::session::{NewSession, SessionService};
use sqlx::SqlitePool;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// Reasoning mock: returns a configured outcome, or fails on demand.
/// Counts invocations.
pub struct MockReasoning {
    outcome: Mutex<ReasoningOutcome>,
    fail: AtomicBool,
    pub calls: AtomicUsize,
}

impl MockReasoning {
    pub fn continuing(next_question: &str) -> Arc<Self> {
        Arc::new(Self {
            outcome: Mutex::new(ReasoningOutcome {
                should_continue: true,
                next_question: Some(next_question.to_string()),
                reason: None,
                is_simple_acknowledgment: false,
            }),
            fail: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn with_outcome(outcome: ReasoningOutcome) -> Arc<Self> {
        Arc::new(Self {
            outcome: Mutex::new(outcome),
            fail: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn failing() -> Arc<Self> {
        let mock = Self::continuing("unused");
        mock.fail.store(true, Ordering::SeqCst);
        mock
    }

    pub fn set_outcome(&self, outcome: ReasoningOutcome) {
        *self.outcome.lock().unwrap() = outcome;
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ReasoningClient for MockReasoning {
    async fn decide(&self, _context: &ConversationContext) -> Result<ReasoningOutcome> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::ReasoningUnavailable(
                "simulated upstream timeout".to_string(),
            ));
        }
        Ok(self.outcome.lock().unwrap().clone())
    }
}

/// Outbound mock: records every message instead of delivering it
#[derive(Default)]
pub struct RecordingOutbound {
    pub sent: Mutex<Vec<(Uuid, String)>>,
}

impl RecordingOutbound {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn sent_texts(&self) -> Vec<String> {
        self.sent.lock().unwrap().iter().map(|(_, t)| t.clone()).collect()
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

#[async_trait]
impl OutboundDelivery for RecordingOutbound {
    async fn send_message(
        &self,
        session_id: Uuid,
        _channel: Option<&str>,
        text: &str,
    ) -> Result<()> {
        self.sent.lock().unwrap().push((session_id, text.to_string()));
        Ok(())
    }
}

/// Transcription mock: fixed response
pub struct MockTranscription {
    pub text: Option<String>,
}

#[async_trait]
impl TranscriptionClient for MockTranscription {
    async fn transcribe(&self, _audio: &[u8]) -> Result<Option<String>> {
        Ok(self.text.clone())
    }
}

/// Everything a test needs, wired against one in-memory database
pub struct TestHarness {
    pub pool: SqlitePool,
    pub config: EngineConfig,
    pub buffer: BufferService,
    pub sessions: SessionService,
    pub scheduler: DebounceScheduler,
    pub grouping: GroupingEvaluator,
    pub orchestrator: FlushOrchestrator,
    pub engine: Engine,
    pub event_bus: EventBus,
    pub reasoning: Arc<MockReasoning>,
    pub outbound: Arc<RecordingOutbound>,
}

/// Config with a zero-length quiet period so flushes are ready immediately
pub fn instant_config() -> EngineConfig {
    EngineConfig {
        grouping_window_secs: 0,
        grouping_lookback_buffer_secs: 300,
        ..EngineConfig::default()
    }
}

pub async fn harness(config: EngineConfig) -> TestHarness {
    harness_with(config, MockReasoning::continuing("What interests you about this role?")).await
}

pub async fn harness_with(config: EngineConfig, reasoning: Arc<MockReasoning>) -> TestHarness {
    let pool = init_memory_database().await.unwrap();
    let event_bus = EventBus::new(64);
    let outbound = RecordingOutbound::new();

    let buffer = BufferService::new(pool.clone());
    let sessions = SessionService::new(pool.clone());
    let grouping = GroupingEvaluator::new(buffer.clone(), config.clone());
    let scheduler = DebounceScheduler::new(
        pool.clone(),
        buffer.clone(),
        event_bus.clone(),
        config.clone(),
    );
    let context_builder: Arc<dyn ContextBuilder> =
        Arc::new(DbContextBuilder::new(sessions.clone()));

    let orchestrator = FlushOrchestrator::new(
        pool.clone(),
        buffer.clone(),
        grouping.clone(),
        sessions.clone(),
        context_builder,
        reasoning.clone(),
        outbound.clone(),
        event_bus.clone(),
        config.clone(),
    );

    let engine = Engine::new(
        buffer.clone(),
        scheduler.clone(),
        sessions.clone(),
        Arc::new(MockTranscription { text: None }),
        outbound.clone(),
        event_bus.clone(),
        config.clone(),
    );

    TestHarness {
        pool,
        config,
        buffer,
        sessions,
        scheduler,
        grouping,
        orchestrator,
        engine,
        event_bus,
        reasoning,
        outbound,
    }
}

impl TestHarness {
    /// Create an active session awaiting its first answer
    pub async fn session(&self, current_question: &str) -> Session {
        self.sessions
            .create(NewSession {
                channel: Some("chat".to_string()),
                opening_question: Some(current_question.to_string()),
                candidate_meta: None,
                vacancy_meta: None,
            })
            .await
            .unwrap()
    }

    /// A timer as the flush worker would have claimed it
    pub fn timer(&self, session_id: Uuid, turn: i64, trigger_external_id: &str) -> FlushTimer {
        FlushTimer {
            session_id,
            turn,
            trigger_external_id: trigger_external_id.to_string(),
            flush_key: Uuid::new_v4(),
            fires_at_ms: scout_common::time::now_ms(),
        }
    }
}
