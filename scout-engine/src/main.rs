//! scout-engine - interview message buffering and conversation
//! orchestration service
//!
//! Receives candidate messages from delivery channels, batches bursts with
//! a persistent debounce, and drives the interview state machine.

use anyhow::{Context, Result};
use clap::Parser;
use scout_common::config::{self, TomlConfig};
use scout_common::db::init::init_database;
use scout_common::events::EventBus;
use scout_engine::buffer::BufferService;
use scout_engine::clients::{
    DbContextBuilder, HttpOutboundDelivery, HttpReasoningClient, HttpTranscriptionClient,
    NullTranscriptionClient, TranscriptionClient,
};
use scout_engine::config::EngineConfig;
use scout_engine::flush::FlushOrchestrator;
use scout_engine::grouping::GroupingEvaluator;
use scout_engine::scheduler::DebounceScheduler;
use scout_engine::session::SessionService;
use scout_engine::worker::FlushWorker;
use scout_engine::{build_router, AppState, Engine};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "scout-engine", about = "Interview conversation orchestration engine")]
struct Args {
    /// Root folder holding the database (overrides SCOUT_ROOT and TOML)
    #[arg(long)]
    root_folder: Option<String>,

    /// HTTP listen address
    #[arg(long, default_value = "127.0.0.1:5730", env = "SCOUT_LISTEN_ADDR")]
    listen: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // TOML config is read before tracing init so its logging level can act
    // as the default filter; RUST_LOG still wins when set
    let toml_config = config::config_file_path()
        .and_then(|path| config::load_toml_config(&path))
        .ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new(
                    toml_config
                        .as_ref()
                        .map(|c| c.logging.level.as_str())
                        .unwrap_or("info"),
                )
            }),
        )
        .init();

    // Build identification immediately after tracing init, before any
    // database delays
    info!(
        "Starting scout-engine v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );

    let toml_config = toml_config.unwrap_or_else(|| {
        info!("No TOML config found, using defaults");
        TomlConfig::default()
    });

    let root_folder = config::resolve_root_folder(args.root_folder.as_deref())?;
    std::fs::create_dir_all(&root_folder)
        .with_context(|| format!("Failed to create root folder {}", root_folder.display()))?;

    let db_path = root_folder.join("scout.db");
    info!("Database path: {}", db_path.display());
    let pool = init_database(&db_path).await?;

    let engine_config = EngineConfig::load(&pool).await?;
    info!(
        grouping_window_secs = engine_config.grouping_window_secs,
        max_questions = engine_config.max_questions,
        "Engine configuration loaded"
    );

    let event_bus = EventBus::new(engine_config.event_bus_capacity);

    // Collaborator clients
    let reasoning_timeout = Duration::from_millis(engine_config.reasoning_timeout_ms);
    let reasoning_base_url = toml_config
        .reasoning_base_url
        .clone()
        .or_else(|| std::env::var("SCOUT_REASONING_URL").ok())
        .context("Reasoning collaborator URL not configured (TOML reasoning_base_url or SCOUT_REASONING_URL)")?;
    let outbound_base_url = toml_config
        .outbound_base_url
        .clone()
        .or_else(|| std::env::var("SCOUT_OUTBOUND_URL").ok())
        .context("Outbound delivery URL not configured (TOML outbound_base_url or SCOUT_OUTBOUND_URL)")?;

    let reasoning = Arc::new(HttpReasoningClient::new(reasoning_base_url, reasoning_timeout)?);
    let outbound = Arc::new(HttpOutboundDelivery::new(
        outbound_base_url,
        Duration::from_secs(10),
    )?);
    let transcription: Arc<dyn TranscriptionClient> = match toml_config
        .transcription_base_url
        .clone()
        .or_else(|| std::env::var("SCOUT_TRANSCRIPTION_URL").ok())
    {
        Some(url) => {
            info!("Transcription collaborator: {}", url);
            Arc::new(HttpTranscriptionClient::new(url, Duration::from_secs(60))?)
        }
        None => {
            info!("Transcription collaborator not configured (feature disabled)");
            Arc::new(NullTranscriptionClient)
        }
    };

    // Services
    let buffer = BufferService::new(pool.clone());
    let sessions = SessionService::new(pool.clone());
    let grouping = GroupingEvaluator::new(buffer.clone(), engine_config.clone());
    let scheduler = DebounceScheduler::new(
        pool.clone(),
        buffer.clone(),
        event_bus.clone(),
        engine_config.clone(),
    );
    let context_builder = Arc::new(DbContextBuilder::new(sessions.clone()));
    let orchestrator = FlushOrchestrator::new(
        pool.clone(),
        buffer.clone(),
        grouping,
        sessions.clone(),
        context_builder,
        reasoning,
        outbound.clone(),
        event_bus.clone(),
        engine_config.clone(),
    );

    let engine = Arc::new(Engine::new(
        buffer,
        scheduler.clone(),
        sessions,
        transcription,
        outbound,
        event_bus.clone(),
        engine_config.clone(),
    ));

    // Flush worker
    let cancel_token = CancellationToken::new();
    let worker = FlushWorker::new(
        scheduler,
        orchestrator,
        Duration::from_millis(engine_config.timer_poll_interval_ms),
    );
    let worker_handle = tokio::spawn(worker.run(cancel_token.clone()));

    // HTTP server
    let state = AppState::new(engine);
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&args.listen)
        .await
        .with_context(|| format!("Failed to bind {}", args.listen))?;
    info!("scout-engine listening on http://{}", args.listen);

    let shutdown_token = cancel_token.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown signal received");
            shutdown_token.cancel();
        })
        .await?;

    cancel_token.cancel();
    let _ = worker_handle.await;
    info!("scout-engine stopped");

    Ok(())
}
