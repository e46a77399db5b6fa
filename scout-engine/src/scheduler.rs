//! Debounce scheduler
//!
//! One pending timer per (session, turn), persisted in the flush_timers
//! table so that the quiet-period wait survives process restarts and is
//! visible to every worker. Re-arming UPSERTs the row with a pushed-out
//! deadline and a freshly generated flush key: last write wins, there is no
//! queue of timers. The flush worker claims due rows by deleting them, which
//! makes the claim atomic across concurrent workers.

use crate::buffer::BufferService;
use crate::config::EngineConfig;
use scout_common::db::models::FlushTimer;
use scout_common::events::{EventBus, ScoutEvent};
use scout_common::{time, Error, Result};
use sqlx::SqlitePool;
use tracing::debug;
use uuid::Uuid;

#[derive(Clone)]
pub struct DebounceScheduler {
    db: SqlitePool,
    buffer: BufferService,
    event_bus: EventBus,
    config: EngineConfig,
}

impl DebounceScheduler {
    pub fn new(
        db: SqlitePool,
        buffer: BufferService,
        event_bus: EventBus,
        config: EngineConfig,
    ) -> Self {
        Self {
            db,
            buffer,
            event_bus,
            config,
        }
    }

    /// (Re)arm the debounce timer for a turn.
    ///
    /// Skips when the turn buffer no longer exists - a stale re-arm after a
    /// fast-path flush must not re-process an already-handled turn. Returns
    /// the flush key when a timer was armed.
    pub async fn arm(
        &self,
        session_id: Uuid,
        turn: i64,
        trigger_external_id: &str,
    ) -> Result<Option<Uuid>> {
        if !self.buffer.turn_has_fragments(session_id, turn).await? {
            debug!(
                session_id = %session_id,
                turn,
                "Turn buffer already cleared, skipping debounce arm"
            );
            return Ok(None);
        }

        let flush_key = Uuid::new_v4();
        let fires_at_ms = time::now_ms() + self.config.grouping_window_ms();

        sqlx::query(
            r#"
            INSERT INTO flush_timers (session_id, turn, trigger_external_id, flush_key, fires_at_ms)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(session_id, turn) DO UPDATE SET
                trigger_external_id = excluded.trigger_external_id,
                flush_key = excluded.flush_key,
                fires_at_ms = excluded.fires_at_ms,
                updated_at = CURRENT_TIMESTAMP
            "#,
        )
        .bind(session_id.to_string())
        .bind(turn)
        .bind(trigger_external_id)
        .bind(flush_key.to_string())
        .bind(fires_at_ms)
        .execute(&self.db)
        .await?;

        debug!(
            session_id = %session_id,
            turn,
            flush_key = %flush_key,
            fires_at_ms,
            "Debounce timer armed"
        );

        self.event_bus.emit_lossy(ScoutEvent::FlushScheduled {
            session_id,
            turn,
            flush_key,
            fires_at: time::ms_to_datetime(fires_at_ms),
            timestamp: time::now(),
        });

        Ok(Some(flush_key))
    }

    /// Atomically claim all timers due at `now_ms`, up to the configured
    /// batch size. Claimed rows are removed; each fires exactly once.
    pub async fn claim_due(&self, now_ms: i64) -> Result<Vec<FlushTimer>> {
        let rows: Vec<(String, i64, String, String, i64)> = sqlx::query_as(
            r#"
            DELETE FROM flush_timers
            WHERE rowid IN (
                SELECT rowid FROM flush_timers
                WHERE fires_at_ms <= ?
                ORDER BY fires_at_ms ASC
                LIMIT ?
            )
            RETURNING session_id, turn, trigger_external_id, flush_key, fires_at_ms
            "#,
        )
        .bind(now_ms)
        .bind(self.config.timer_claim_batch_size)
        .fetch_all(&self.db)
        .await?;

        rows.into_iter()
            .map(|(session_id, turn, trigger_external_id, flush_key, fires_at_ms)| {
                Ok(FlushTimer {
                    session_id: Uuid::parse_str(&session_id)
                        .map_err(|e| Error::Internal(format!("Bad session guid: {}", e)))?,
                    turn,
                    trigger_external_id,
                    flush_key: Uuid::parse_str(&flush_key)
                        .map_err(|e| Error::Internal(format!("Bad flush key: {}", e)))?,
                    fires_at_ms,
                })
            })
            .collect()
    }

    /// Drop a pending timer, if any (used when a turn is abandoned)
    pub async fn cancel(&self, session_id: Uuid, turn: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM flush_timers WHERE session_id = ? AND turn = ?")
            .bind(session_id.to_string())
            .bind(turn)
            .execute(&self.db)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// The pending timer for a turn, if one exists (observability/tests)
    pub async fn pending(&self, session_id: Uuid, turn: i64) -> Result<Option<FlushTimer>> {
        let row: Option<(String, i64, String, String, i64)> = sqlx::query_as(
            "SELECT session_id, turn, trigger_external_id, flush_key, fires_at_ms
             FROM flush_timers WHERE session_id = ? AND turn = ?",
        )
        .bind(session_id.to_string())
        .bind(turn)
        .fetch_optional(&self.db)
        .await?;

        row.map(|(session_id, turn, trigger_external_id, flush_key, fires_at_ms)| {
            Ok(FlushTimer {
                session_id: Uuid::parse_str(&session_id)
                    .map_err(|e| Error::Internal(format!("Bad session guid: {}", e)))?,
                turn,
                trigger_external_id,
                flush_key: Uuid::parse_str(&flush_key)
                    .map_err(|e| Error::Internal(format!("Bad flush key: {}", e)))?,
                fires_at_ms,
            })
        })
        .transpose()
    }
}
