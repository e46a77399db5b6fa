//! # Scout Common Library
//!
//! Shared code for the scout interview orchestration engine including:
//! - Database schema, initialization, and row models
//! - Event types (ScoutEvent enum) and the broadcast EventBus
//! - Configuration loading and root folder resolution
//! - Common error type
//! - Timestamp utilities

pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod time;

pub use error::{Error, Result};
