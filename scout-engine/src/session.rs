//! Conversation sessions and the turn state machine
//!
//! A session is `active` until a flush completes it; completion is terminal.
//! All mutations are single-row compare-and-set writes guarded on
//! `status = 'active'` (and, for history appends, on the expected history
//! value) so concurrent flushes racing on one session cannot lose updates.

use crate::clients::ReasoningOutcome;
use scout_common::db::models::{HistoryEntry, Session, SessionStatus};
use scout_common::{Error, Result};
use serde_json::Value;
use sqlx::SqlitePool;
use tracing::info;
use uuid::Uuid;

/// Sentinel reply from the reasoning collaborator meaning "send nothing",
/// regardless of the continue flag
pub const NO_REPLY_SENTINEL: &str = "[no-reply]";

/// What a completed flush should do, derived from the reasoning outcome
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnAction {
    /// Ask the next numbered question and record the answered one
    AskQuestion(String),
    /// Answer an aside without advancing the question counter
    Reply(String),
    /// End the interview with the given reason
    Complete(String),
    /// Send nothing, change nothing
    Noop,
}

/// Normalize a collaborator-supplied reply: whitespace and the no-reply
/// sentinel both mean "nothing to send".
fn sanitize_reply(raw: Option<&str>) -> Option<String> {
    let text = raw?.trim();
    if text.is_empty() || text.eq_ignore_ascii_case(NO_REPLY_SENTINEL) {
        return None;
    }
    Some(text.to_string())
}

impl TurnAction {
    /// Derive the action for an answered question.
    ///
    /// `question_number` is the 1-based number of the question this turn
    /// answered. The question ceiling overrides any reasoning output; after
    /// that: continue-with-question asks it, stop-with-reply answers an
    /// aside, stop-without-reply completes unless the reasoning flagged the
    /// candidate's message as a throwaway acknowledgment.
    pub fn derive(outcome: &ReasoningOutcome, question_number: i64, max_questions: i64) -> Self {
        if question_number >= max_questions {
            return TurnAction::Complete("question limit reached".to_string());
        }

        let next_question = sanitize_reply(outcome.next_question.as_deref());

        match (outcome.should_continue, next_question) {
            (true, Some(question)) => TurnAction::AskQuestion(question),
            (true, None) => TurnAction::Noop,
            (false, Some(reply)) => TurnAction::Reply(reply),
            (false, None) => {
                if outcome.is_simple_acknowledgment {
                    TurnAction::Noop
                } else {
                    TurnAction::Complete(
                        outcome
                            .reason
                            .clone()
                            .filter(|r| !r.trim().is_empty())
                            .unwrap_or_else(|| "interview concluded".to_string()),
                    )
                }
            }
        }
    }
}

/// Input for session creation
#[derive(Debug, Clone, Default)]
pub struct NewSession {
    pub channel: Option<String>,
    /// First interview question; sent outbound by the caller
    pub opening_question: Option<String>,
    pub candidate_meta: Option<Value>,
    pub vacancy_meta: Option<Value>,
}

#[derive(Clone)]
pub struct SessionService {
    db: SqlitePool,
}

type SessionRow = (
    String,         // guid
    String,         // status
    Option<String>, // channel
    Option<String>, // current_question
    String,         // history
    Option<String>, // candidate_meta
    Option<String>, // vacancy_meta
    Option<String>, // completed_reason
);

const SESSION_COLUMNS: &str =
    "guid, status, channel, current_question, history, candidate_meta, vacancy_meta, completed_reason";

fn session_from_row(row: SessionRow) -> Result<Session> {
    Ok(Session {
        guid: Uuid::parse_str(&row.0)
            .map_err(|e| Error::Internal(format!("Bad session guid: {}", e)))?,
        status: SessionStatus::parse(&row.1)?,
        channel: row.2,
        current_question: row.3,
        history: serde_json::from_str(&row.4)?,
        candidate_meta: row.5.map(|s| serde_json::from_str(&s)).transpose()?,
        vacancy_meta: row.6.map(|s| serde_json::from_str(&s)).transpose()?,
        completed_reason: row.7,
    })
}

impl SessionService {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Create a new active session
    pub async fn create(&self, new: NewSession) -> Result<Session> {
        let session = Session {
            guid: Uuid::new_v4(),
            status: SessionStatus::Active,
            channel: new.channel,
            current_question: new.opening_question,
            history: Vec::new(),
            candidate_meta: new.candidate_meta,
            vacancy_meta: new.vacancy_meta,
            completed_reason: None,
        };

        sqlx::query(
            r#"
            INSERT INTO sessions (guid, status, channel, current_question, history, candidate_meta, vacancy_meta)
            VALUES (?, 'active', ?, ?, ?, ?, ?)
            "#,
        )
        .bind(session.guid.to_string())
        .bind(&session.channel)
        .bind(&session.current_question)
        .bind(serde_json::to_string(&session.history)?)
        .bind(
            session
                .candidate_meta
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?,
        )
        .bind(
            session
                .vacancy_meta
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?,
        )
        .execute(&self.db)
        .await?;

        info!(session_id = %session.guid, "Session created");
        Ok(session)
    }

    /// Load a session, failing with NotFound when absent
    pub async fn get(&self, session_id: Uuid) -> Result<Session> {
        let sql = format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE guid = ?");
        let row: Option<SessionRow> = sqlx::query_as(&sql)
            .bind(session_id.to_string())
            .fetch_optional(&self.db)
            .await?;

        match row {
            Some(row) => session_from_row(row),
            None => Err(Error::NotFound(format!("Session {}", session_id))),
        }
    }

    /// Record the last-used delivery channel
    pub async fn touch_channel(&self, session_id: Uuid, channel: &str) -> Result<()> {
        sqlx::query(
            "UPDATE sessions SET channel = ?, updated_at = CURRENT_TIMESTAMP
             WHERE guid = ? AND status = 'active'",
        )
        .bind(channel)
        .bind(session_id.to_string())
        .execute(&self.db)
        .await?;
        Ok(())
    }

    /// Append the answered question to history and install the next one.
    ///
    /// Compare-and-set against the session's expected history; losing the
    /// race (or racing a completion) surfaces as a Conflict instead of a
    /// lost update.
    pub async fn record_answer(
        &self,
        session: &Session,
        answer: &str,
        next_question: Option<&str>,
    ) -> Result<Session> {
        let mut history = session.history.clone();
        history.push(HistoryEntry {
            question: session.current_question.clone().unwrap_or_default(),
            answer: answer.to_string(),
        });

        let expected_history = serde_json::to_string(&session.history)?;
        let new_history = serde_json::to_string(&history)?;

        let result = sqlx::query(
            r#"
            UPDATE sessions
            SET history = ?, current_question = ?, updated_at = CURRENT_TIMESTAMP
            WHERE guid = ? AND status = 'active' AND history = ?
            "#,
        )
        .bind(&new_history)
        .bind(next_question)
        .bind(session.guid.to_string())
        .bind(&expected_history)
        .execute(&self.db)
        .await?;

        if result.rows_affected() == 0 {
            return Err(Error::Conflict(format!(
                "Session {} changed concurrently or is completed",
                session.guid
            )));
        }

        Ok(Session {
            history,
            current_question: next_question.map(|q| q.to_string()),
            ..session.clone()
        })
    }

    /// Terminal transition: record the final answer (when one exists) and
    /// mark the session completed. No further writes happen after this.
    pub async fn complete(
        &self,
        session: &Session,
        reason: &str,
        final_answer: Option<&str>,
    ) -> Result<Session> {
        let mut history = session.history.clone();
        if let Some(answer) = final_answer {
            history.push(HistoryEntry {
                question: session.current_question.clone().unwrap_or_default(),
                answer: answer.to_string(),
            });
        }

        let expected_history = serde_json::to_string(&session.history)?;
        let new_history = serde_json::to_string(&history)?;

        let result = sqlx::query(
            r#"
            UPDATE sessions
            SET status = 'completed', history = ?, completed_reason = ?,
                current_question = NULL, updated_at = CURRENT_TIMESTAMP
            WHERE guid = ? AND status = 'active' AND history = ?
            "#,
        )
        .bind(&new_history)
        .bind(reason)
        .bind(session.guid.to_string())
        .bind(&expected_history)
        .execute(&self.db)
        .await?;

        if result.rows_affected() == 0 {
            return Err(Error::Conflict(format!(
                "Session {} changed concurrently or is already completed",
                session.guid
            )));
        }

        info!(session_id = %session.guid, reason, "Session completed");

        Ok(Session {
            status: SessionStatus::Completed,
            history,
            current_question: None,
            completed_reason: Some(reason.to_string()),
            ..session.clone()
        })
    }
}
