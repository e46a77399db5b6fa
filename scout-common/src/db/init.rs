//! Database initialization
//!
//! Creates the SQLite database on first run and brings the schema up
//! idempotently. All cross-process state of the engine lives here: the
//! message buffer, debounce timers, flush idempotency records, and session
//! rows. WAL mode plus a busy timeout let multiple worker processes operate
//! on the same database concurrently.

use crate::Result;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use std::path::Path;
use tracing::{info, warn};

/// Initialize database connection and create tables if needed
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    let pool = SqlitePoolOptions::new()
        .max_connections(10)
        .min_connections(2)
        .connect(&db_url)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    configure_connection(&pool).await?;
    create_all_tables(&pool).await?;
    init_default_settings(&pool).await?;

    Ok(pool)
}

/// Open an in-memory database with the full schema (test use)
pub async fn init_memory_database() -> Result<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await?;

    configure_connection(&pool).await?;
    create_all_tables(&pool).await?;
    init_default_settings(&pool).await?;

    Ok(pool)
}

async fn configure_connection(pool: &SqlitePool) -> Result<()> {
    sqlx::query("PRAGMA foreign_keys = ON").execute(pool).await?;

    // WAL allows concurrent readers with one writer; required for the
    // multi-worker deployment model
    sqlx::query("PRAGMA journal_mode = WAL").execute(pool).await?;

    sqlx::query("PRAGMA busy_timeout = 5000").execute(pool).await?;

    Ok(())
}

/// Create all tables (idempotent - safe to call multiple times)
pub async fn create_all_tables(pool: &SqlitePool) -> Result<()> {
    create_settings_table(pool).await?;
    create_sessions_table(pool).await?;
    create_message_buffer_table(pool).await?;
    create_flush_timers_table(pool).await?;
    create_flush_executions_table(pool).await?;
    Ok(())
}

/// Create the settings table
///
/// Stores engine configuration key-value pairs.
pub async fn create_settings_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS settings (
            key TEXT PRIMARY KEY,
            value TEXT,
            updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Create the sessions table
///
/// One row per interview instance. `history` is a JSON array of
/// question/answer pairs; the current question index is its length + 1.
pub async fn create_sessions_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sessions (
            guid TEXT PRIMARY KEY,
            status TEXT NOT NULL DEFAULT 'active' CHECK (status IN ('active', 'completed')),
            channel TEXT,
            current_question TEXT,
            history TEXT NOT NULL DEFAULT '[]',
            candidate_meta TEXT,
            vacancy_meta TEXT,
            completed_reason TEXT,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_sessions_status ON sessions(status)")
        .execute(pool)
        .await?;

    Ok(())
}

/// Create the message_buffer table
///
/// Append-only store of inbound candidate fragments. The UNIQUE constraint
/// on external_id is what makes fragment insertion idempotent under
/// at-least-once delivery.
pub async fn create_message_buffer_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS message_buffer (
            guid TEXT PRIMARY KEY,
            external_id TEXT NOT NULL UNIQUE,
            session_id TEXT NOT NULL REFERENCES sessions(guid) ON DELETE CASCADE,
            turn INTEGER NOT NULL,
            content TEXT NOT NULL,
            kind TEXT NOT NULL CHECK (kind IN ('text', 'voice')),
            transcription TEXT,
            question_context TEXT,
            arrived_at_ms INTEGER NOT NULL,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            CHECK (turn >= 1),
            CHECK (arrived_at_ms >= 0)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_message_buffer_turn ON message_buffer(session_id, turn, arrived_at_ms)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_message_buffer_arrival ON message_buffer(session_id, arrived_at_ms)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Create the flush_timers table
///
/// One pending debounce timer per (session, turn). Re-arming replaces the
/// row (last write wins); the flush worker claims due rows by deleting them.
pub async fn create_flush_timers_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS flush_timers (
            session_id TEXT NOT NULL,
            turn INTEGER NOT NULL,
            trigger_external_id TEXT NOT NULL,
            flush_key TEXT NOT NULL,
            fires_at_ms INTEGER NOT NULL,
            updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            PRIMARY KEY (session_id, turn),
            CHECK (fires_at_ms >= 0)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_flush_timers_due ON flush_timers(fires_at_ms)")
        .execute(pool)
        .await?;

    Ok(())
}

/// Create the flush_executions table
///
/// Idempotency-key dedup: the first invocation of a flush key inserts a row
/// here; any retry or duplicate delivery of the same key sees the conflict
/// and skips.
pub async fn create_flush_executions_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS flush_executions (
            flush_key TEXT PRIMARY KEY,
            session_id TEXT NOT NULL,
            turn INTEGER NOT NULL,
            outcome TEXT,
            executed_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Initialize or update default settings
///
/// Ensures all engine settings exist with default values; NULL values are
/// reset to defaults.
pub async fn init_default_settings(pool: &SqlitePool) -> Result<()> {
    // Grouping / debounce
    ensure_setting(pool, "grouping_enabled", "true").await?;
    ensure_setting(pool, "grouping_window_secs", "600").await?;
    ensure_setting(pool, "grouping_lookback_buffer_secs", "300").await?;

    // Conversation policy
    ensure_setting(pool, "max_questions", "4").await?;

    // Flush worker
    ensure_setting(pool, "timer_poll_interval_ms", "1000").await?;
    ensure_setting(pool, "timer_claim_batch_size", "16").await?;

    // Collaborators
    ensure_setting(pool, "reasoning_timeout_ms", "30000").await?;

    // Event bus
    ensure_setting(pool, "event_bus_capacity", "1000").await?;

    info!("Default settings initialized");
    Ok(())
}

/// Ensure a setting exists with the specified default value
///
/// If the setting doesn't exist, it will be created with the default.
/// If the setting exists but has a NULL value, it will be reset to the default.
pub async fn ensure_setting(pool: &SqlitePool, key: &str, default_value: &str) -> Result<()> {
    let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM settings WHERE key = ?)")
        .bind(key)
        .fetch_one(pool)
        .await?;

    if !exists {
        // INSERT OR IGNORE handles concurrent initialization races
        sqlx::query("INSERT OR IGNORE INTO settings (key, value) VALUES (?, ?)")
            .bind(key)
            .bind(default_value)
            .execute(pool)
            .await?;
        return Ok(());
    }

    let value: Option<String> = sqlx::query_scalar("SELECT value FROM settings WHERE key = ?")
        .bind(key)
        .fetch_one(pool)
        .await?;

    if value.is_none() {
        sqlx::query("UPDATE settings SET value = ? WHERE key = ?")
            .bind(default_value)
            .bind(key)
            .execute(pool)
            .await?;
        warn!("Setting '{}' was NULL, reset to default: {}", key, default_value);
    }

    Ok(())
}

/// Read a setting value
pub async fn get_setting(pool: &SqlitePool, key: &str) -> Result<Option<String>> {
    let value: Option<Option<String>> =
        sqlx::query_scalar("SELECT value FROM settings WHERE key = ?")
            .bind(key)
            .fetch_optional(pool)
            .await?;
    Ok(value.flatten())
}

/// Write a setting value
pub async fn set_setting(pool: &SqlitePool, key: &str, value: &str) -> Result<()> {
    sqlx::query(
        "INSERT INTO settings (key, value) VALUES (?, ?)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = CURRENT_TIMESTAMP",
    )
    .bind(key)
    .bind(value)
    .execute(pool)
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_database_has_schema_and_defaults() {
        let pool = init_memory_database().await.unwrap();

        let window = get_setting(&pool, "grouping_window_secs").await.unwrap();
        assert_eq!(window.as_deref(), Some("600"));

        // Tables exist and are empty
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM message_buffer")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn test_ensure_setting_preserves_existing_value() {
        let pool = init_memory_database().await.unwrap();

        set_setting(&pool, "max_questions", "7").await.unwrap();
        ensure_setting(&pool, "max_questions", "4").await.unwrap();

        let value = get_setting(&pool, "max_questions").await.unwrap();
        assert_eq!(value.as_deref(), Some("7"));
    }

    #[tokio::test]
    async fn test_create_all_tables_is_idempotent() {
        let pool = init_memory_database().await.unwrap();
        create_all_tables(&pool).await.unwrap();
        create_all_tables(&pool).await.unwrap();
    }

    #[tokio::test]
    async fn test_file_backed_database_survives_reopen() {
        let dir = tempfile::TempDir::new().unwrap();
        let db_path = dir.path().join("scout.db");

        let pool = init_database(&db_path).await.unwrap();
        assert!(db_path.exists());
        set_setting(&pool, "max_questions", "9").await.unwrap();
        pool.close().await;

        // Reopening runs init again; existing values must not be disturbed
        let pool = init_database(&db_path).await.unwrap();
        let value = get_setting(&pool, "max_questions").await.unwrap();
        assert_eq!(value.as_deref(), Some("9"));

        let mode: String = sqlx::query_scalar("PRAGMA journal_mode")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(mode.to_lowercase(), "wal");
    }
}
