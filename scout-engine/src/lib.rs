//! scout-engine library - interview message buffering and debounced
//! conversation orchestration
//!
//! Inbound candidate messages are buffered per (session, turn), batched by
//! a persistent last-write-wins debounce, aggregated exactly once when the
//! quiet period elapses, and fed through the conversation state machine to
//! produce the next question, an aside reply, or the interview's
//! completion.

pub mod api;
pub mod buffer;
pub mod clients;
pub mod config;
pub mod engine;
pub mod error;
pub mod flush;
pub mod grouping;
pub mod scheduler;
pub mod session;
pub mod worker;

pub use api::{build_router, AppState};
pub use engine::Engine;
