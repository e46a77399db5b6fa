//! Inbound HTTP API
//!
//! The engine's event-transport edge: webhooks deliver candidate messages
//! and transcription completions here, and interview sessions are started
//! and inspected here. Outbound delivery happens through the collaborator
//! clients, never through this surface.

pub mod handlers;

use crate::engine::Engine;
use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Application state shared across HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
}

impl AppState {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self { engine }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/api/buildinfo", get(handlers::buildinfo))
        .route("/api/sessions", post(handlers::create_session))
        .route("/api/sessions/:id", get(handlers::get_session))
        .route("/api/messages", post(handlers::ingest_message))
        .route("/api/transcriptions", post(handlers::attach_transcription))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
