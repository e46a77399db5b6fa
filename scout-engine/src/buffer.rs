//! Buffer service
//!
//! CRUD surface over the message_buffer table. Only candidate-authored
//! messages enter this store; bot-authored replies are never buffered, which
//! is what lets the grouping evaluator treat every row as part of a burst.
//!
//! Concurrency is handled at the storage layer (WAL + busy timeout +
//! single-statement writes), not with in-process locks: multiple worker
//! processes may call these operations for the same (session, turn) key.

use scout_common::db::models::{Fragment, FragmentKind};
use scout_common::{time, Error, Result};
use sqlx::SqlitePool;
use tracing::debug;
use uuid::Uuid;

/// Input for a fragment insert
#[derive(Debug, Clone)]
pub struct NewFragment {
    /// Stable external message id from the delivery channel
    pub external_id: String,
    pub session_id: Uuid,
    pub turn: i64,
    pub content: String,
    pub kind: FragmentKind,
    /// Transcription, when already available at insert time
    pub transcription: Option<String>,
    /// The question this fragment is presumably answering
    pub question_context: Option<String>,
}

/// Result of an add_fragment call
#[derive(Debug, Clone)]
pub enum AddOutcome {
    /// Fragment stored
    Added(Fragment),
    /// Same external id already stored; nothing inserted
    Duplicate,
    /// Content was empty or whitespace-only; nothing inserted
    EmptyContent,
}

/// CRUD-like API over the fragment store
#[derive(Clone)]
pub struct BufferService {
    db: SqlitePool,
}

type FragmentRow = (
    String,         // guid
    String,         // external_id
    String,         // session_id
    i64,            // turn
    String,         // content
    String,         // kind
    Option<String>, // transcription
    Option<String>, // question_context
    i64,            // arrived_at_ms
);

fn fragment_from_row(row: FragmentRow) -> Result<Fragment> {
    Ok(Fragment {
        guid: Uuid::parse_str(&row.0)
            .map_err(|e| Error::Internal(format!("Bad fragment guid: {}", e)))?,
        external_id: row.1,
        session_id: Uuid::parse_str(&row.2)
            .map_err(|e| Error::Internal(format!("Bad session guid: {}", e)))?,
        turn: row.3,
        content: row.4,
        kind: FragmentKind::parse(&row.5)?,
        transcription: row.6,
        question_context: row.7,
        arrived_at_ms: row.8,
    })
}

const FRAGMENT_COLUMNS: &str =
    "guid, external_id, session_id, turn, content, kind, transcription, question_context, arrived_at_ms";

impl BufferService {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Append a fragment to its turn buffer.
    ///
    /// Whitespace-only content is a no-op, not an error. Redelivery of the
    /// same external id is absorbed by the UNIQUE constraint: the insert is
    /// `INSERT OR IGNORE`, so a duplicate never creates a second row.
    pub async fn add_fragment(&self, new: NewFragment) -> Result<AddOutcome> {
        if new.content.trim().is_empty() {
            debug!(
                session_id = %new.session_id,
                external_id = %new.external_id,
                "Ignoring empty fragment"
            );
            return Ok(AddOutcome::EmptyContent);
        }

        let fragment = Fragment {
            guid: Uuid::new_v4(),
            external_id: new.external_id,
            session_id: new.session_id,
            turn: new.turn,
            content: new.content,
            kind: new.kind,
            transcription: new.transcription,
            question_context: new.question_context,
            arrived_at_ms: time::now_ms(),
        };

        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO message_buffer
                (guid, external_id, session_id, turn, content, kind, transcription, question_context, arrived_at_ms)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(fragment.guid.to_string())
        .bind(&fragment.external_id)
        .bind(fragment.session_id.to_string())
        .bind(fragment.turn)
        .bind(&fragment.content)
        .bind(fragment.kind.as_str())
        .bind(&fragment.transcription)
        .bind(&fragment.question_context)
        .bind(fragment.arrived_at_ms)
        .execute(&self.db)
        .await?;

        if result.rows_affected() == 0 {
            debug!(
                external_id = %fragment.external_id,
                "Duplicate fragment delivery ignored"
            );
            return Ok(AddOutcome::Duplicate);
        }

        Ok(AddOutcome::Added(fragment))
    }

    /// All fragments of a turn, ordered by arrival timestamp ascending.
    /// An empty turn is a valid, non-error result.
    pub async fn list_fragments(&self, session_id: Uuid, turn: i64) -> Result<Vec<Fragment>> {
        let rows: Vec<FragmentRow> = sqlx::query_as(&format!(
            "SELECT {FRAGMENT_COLUMNS} FROM message_buffer
             WHERE session_id = ? AND turn = ?
             ORDER BY arrived_at_ms ASC, rowid ASC"
        ))
        .bind(session_id.to_string())
        .bind(turn)
        .fetch_all(&self.db)
        .await?;

        rows.into_iter().map(fragment_from_row).collect()
    }

    /// All fragments of a session that arrived at or after `since_ms`,
    /// ordered by arrival. Used by the grouping evaluator's lookback window.
    pub async fn list_recent(&self, session_id: Uuid, since_ms: i64) -> Result<Vec<Fragment>> {
        let rows: Vec<FragmentRow> = sqlx::query_as(&format!(
            "SELECT {FRAGMENT_COLUMNS} FROM message_buffer
             WHERE session_id = ? AND arrived_at_ms >= ?
             ORDER BY arrived_at_ms ASC, rowid ASC"
        ))
        .bind(session_id.to_string())
        .bind(since_ms)
        .fetch_all(&self.db)
        .await?;

        rows.into_iter().map(fragment_from_row).collect()
    }

    /// The single most recently arrived fragment of a session, if any
    pub async fn latest_fragment(&self, session_id: Uuid) -> Result<Option<Fragment>> {
        let row: Option<FragmentRow> = sqlx::query_as(&format!(
            "SELECT {FRAGMENT_COLUMNS} FROM message_buffer
             WHERE session_id = ?
             ORDER BY arrived_at_ms DESC, rowid DESC
             LIMIT 1"
        ))
        .bind(session_id.to_string())
        .fetch_optional(&self.db)
        .await?;

        row.map(fragment_from_row).transpose()
    }

    /// Look up a fragment by its external message id
    pub async fn find_by_external_id(&self, external_id: &str) -> Result<Option<Fragment>> {
        let row: Option<FragmentRow> = sqlx::query_as(&format!(
            "SELECT {FRAGMENT_COLUMNS} FROM message_buffer WHERE external_id = ?"
        ))
        .bind(external_id)
        .fetch_optional(&self.db)
        .await?;

        row.map(fragment_from_row).transpose()
    }

    /// Delete all fragments of a turn. Safe to call on an already-empty
    /// turn; returns the number of rows removed.
    pub async fn clear_turn(&self, session_id: Uuid, turn: i64) -> Result<u64> {
        let result = sqlx::query("DELETE FROM message_buffer WHERE session_id = ? AND turn = ?")
            .bind(session_id.to_string())
            .bind(turn)
            .execute(&self.db)
            .await?;
        Ok(result.rows_affected())
    }

    /// Whether a turn still has buffered fragments
    pub async fn turn_has_fragments(&self, session_id: Uuid, turn: i64) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM message_buffer WHERE session_id = ? AND turn = ?)",
        )
        .bind(session_id.to_string())
        .bind(turn)
        .fetch_one(&self.db)
        .await?;
        Ok(exists)
    }

    /// Attach a completed transcription to a voice fragment.
    ///
    /// The transcription column is the only field ever mutated after insert,
    /// and only from NULL. Returns the owning (session, turn) when the
    /// fragment exists.
    pub async fn attach_transcription(
        &self,
        external_id: &str,
        text: &str,
    ) -> Result<Option<(Uuid, i64)>> {
        sqlx::query(
            "UPDATE message_buffer SET transcription = ?
             WHERE external_id = ? AND kind = 'voice' AND transcription IS NULL",
        )
        .bind(text)
        .bind(external_id)
        .execute(&self.db)
        .await?;

        // The fragment may have been cleared by a concurrent flush, or the
        // transcription may already have been attached; either way the
        // caller only needs to know where to re-arm, if anywhere.
        let row: Option<(String, i64)> = sqlx::query_as(
            "SELECT session_id, turn FROM message_buffer WHERE external_id = ?",
        )
        .bind(external_id)
        .fetch_optional(&self.db)
        .await?;

        row.map(|(session_id, turn)| {
            Ok((
                Uuid::parse_str(&session_id)
                    .map_err(|e| Error::Internal(format!("Bad session guid: {}", e)))?,
                turn,
            ))
        })
        .transpose()
    }
}
