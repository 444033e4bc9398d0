//! Turn log and session directory operations.

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use tracing::debug;

use crate::backend::{SessionIndex, SessionStore};
use crate::error::{MemoryError, Result};
use crate::types::{ConversationTurn, Metadata, SessionRecord, TurnId, now};
use crate::validation::validate_session_id_result;

use super::{SqliteStore, format_ts, parse_ts};

const SESSION_COLUMNS: &str =
    "id, owner_id, title, created_at, updated_at, turn_count, summarized_through";

const TURN_COLUMNS: &str = "id, session_id, role, content, owner_id, metadata, created_at";

// ─────────────────────────────────────────────────────────────────────────────
// Row helpers
// ─────────────────────────────────────────────────────────────────────────────

impl SqliteStore {
    /// Insert the session row if missing, otherwise bump `updated_at`.
    ///
    /// An existing owner is never overwritten.
    pub(crate) fn upsert_session_row(
        conn: &Connection,
        session_id: &str,
        owner_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let now = format_ts(now);
        conn.execute(
            r#"
            INSERT INTO sessions (id, owner_id, title, created_at, updated_at, turn_count)
            VALUES (?1, ?2, ?3, ?4, ?4, 0)
            ON CONFLICT(id) DO UPDATE SET
                updated_at = excluded.updated_at,
                owner_id = COALESCE(sessions.owner_id, excluded.owner_id)
            "#,
            params![
                session_id,
                owner_id,
                SessionRecord::default_title(session_id),
                now
            ],
        )?;
        Ok(())
    }

    /// Set `turn_count` to the number of logged turns.
    fn refresh_turn_count(conn: &Connection, session_id: &str) -> Result<()> {
        conn.execute(
            r#"
            UPDATE sessions
            SET turn_count = (SELECT COUNT(*) FROM turns WHERE session_id = ?1)
            WHERE id = ?1
            "#,
            params![session_id],
        )?;
        Ok(())
    }

    pub(crate) fn read_session_row(
        conn: &Connection,
        session_id: &str,
    ) -> Result<Option<SessionRecord>> {
        let row = conn
            .query_row(
                &format!("SELECT {} FROM sessions WHERE id = ?1", SESSION_COLUMNS),
                params![session_id],
                |row| Ok(Self::row_to_session(row)),
            )
            .optional()?;
        row.transpose()
    }

    fn row_to_session(row: &rusqlite::Row) -> Result<SessionRecord> {
        let session_id: String = row.get(0)?;
        let owner_id: Option<String> = row.get(1)?;
        let title: String = row.get(2)?;
        let created_at: String = row.get(3)?;
        let updated_at: String = row.get(4)?;
        let turn_count: i64 = row.get(5)?;
        let summarized_through: i64 = row.get(6)?;

        Ok(SessionRecord {
            session_id,
            owner_id,
            title,
            created_at: parse_ts(&created_at)?,
            updated_at: parse_ts(&updated_at)?,
            turn_count: turn_count as usize,
            summarized_through: summarized_through as usize,
        })
    }

    fn row_to_turn(row: &rusqlite::Row) -> Result<ConversationTurn> {
        let id: String = row.get(0)?;
        let session_id: String = row.get(1)?;
        let role: String = row.get(2)?;
        let content: String = row.get(3)?;
        let owner_id: Option<String> = row.get(4)?;
        let metadata: String = row.get(5)?;
        let created_at: String = row.get(6)?;

        Ok(ConversationTurn {
            turn_id: TurnId::parse(&id)?,
            session_id,
            role: role.parse()?,
            content,
            owner_id,
            metadata: serde_json::from_str::<Metadata>(&metadata)?,
            created_at: parse_ts(&created_at)?,
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Session Store
// ─────────────────────────────────────────────────────────────────────────────

impl SessionStore for SqliteStore {
    fn append_turn(&self, turn: &ConversationTurn) -> Result<SessionRecord> {
        validate_session_id_result(&turn.session_id)?;
        let metadata = serde_json::to_string(&turn.metadata)?;

        let record = self.with_transaction(|conn| {
            Self::upsert_session_row(
                conn,
                &turn.session_id,
                turn.owner_id.as_deref(),
                now(),
            )?;

            conn.execute(
                r#"
                INSERT INTO turns (id, session_id, role, content, owner_id, metadata, created_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                "#,
                params![
                    turn.turn_id.to_string(),
                    turn.session_id,
                    turn.role.as_str(),
                    turn.content,
                    turn.owner_id,
                    metadata,
                    format_ts(turn.created_at),
                ],
            )?;

            Self::refresh_turn_count(conn, &turn.session_id)?;

            Self::read_session_row(conn, &turn.session_id)?
                .ok_or_else(|| MemoryError::NotFound(format!("Session {}", turn.session_id)))
        })?;

        debug!(
            "Appended {} turn {} to session {} (count {})",
            turn.role, turn.turn_id, turn.session_id, record.turn_count
        );
        Ok(record)
    }

    fn read_turns(
        &self,
        session_id: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<ConversationTurn>> {
        let conn = self.conn.lock();

        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM turns WHERE session_id = ?1 ORDER BY seq DESC LIMIT ?2 OFFSET ?3",
            TURN_COLUMNS
        ))?;
        let mut rows = stmt.query(params![session_id, limit as i64, offset as i64])?;

        let mut turns = Vec::new();
        while let Some(row) = rows.next()? {
            turns.push(Self::row_to_turn(row)?);
        }
        turns.reverse();

        Ok(turns)
    }

    fn count_turns(&self, session_id: &str) -> Result<usize> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM turns WHERE session_id = ?1",
            params![session_id],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    fn delete_session(&self, session_id: &str) -> Result<bool> {
        let existed = self.with_transaction(|conn| {
            let turns = conn.execute("DELETE FROM turns WHERE session_id = ?1", params![session_id])?;
            conn.execute(
                "DELETE FROM summaries WHERE session_id = ?1",
                params![session_id],
            )?;
            let sessions = conn.execute("DELETE FROM sessions WHERE id = ?1", params![session_id])?;
            Ok(turns > 0 || sessions > 0)
        })?;

        if existed {
            debug!("Deleted session {}", session_id);
        }
        Ok(existed)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Session Index
// ─────────────────────────────────────────────────────────────────────────────

impl SessionIndex for SqliteStore {
    fn upsert_session(&self, session_id: &str, owner_id: Option<&str>) -> Result<SessionRecord> {
        validate_session_id_result(session_id)?;
        self.with_transaction(|conn| {
            Self::upsert_session_row(conn, session_id, owner_id, now())?;
            Self::refresh_turn_count(conn, session_id)?;
            Self::read_session_row(conn, session_id)?
                .ok_or_else(|| MemoryError::NotFound(format!("Session {}", session_id)))
        })
    }

    fn get_session(&self, session_id: &str) -> Result<Option<SessionRecord>> {
        let conn = self.conn.lock();
        Self::read_session_row(&conn, session_id)
    }

    fn list_sessions(
        &self,
        owner_id: Option<&str>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<SessionRecord>> {
        let conn = self.conn.lock();

        let mut stmt = conn.prepare(&format!(
            r#"
            SELECT {} FROM sessions
            WHERE (?1 IS NULL OR owner_id = ?1)
            ORDER BY updated_at DESC, id ASC
            LIMIT ?2 OFFSET ?3
            "#,
            SESSION_COLUMNS
        ))?;
        let mut rows = stmt.query(params![owner_id, limit as i64, offset as i64])?;

        let mut sessions = Vec::new();
        while let Some(row) = rows.next()? {
            sessions.push(Self::row_to_session(row)?);
        }

        Ok(sessions)
    }

    fn remove_session(&self, session_id: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let rows = conn.execute("DELETE FROM sessions WHERE id = ?1", params![session_id])?;
        Ok(rows > 0)
    }

    fn mark_summarized(&self, session_id: &str, through: usize) -> Result<()> {
        let conn = self.conn.lock();
        let rows = conn.execute(
            "UPDATE sessions SET summarized_through = MAX(summarized_through, ?2) WHERE id = ?1",
            params![session_id, through as i64],
        )?;

        if rows == 0 {
            return Err(MemoryError::NotFound(format!("Session {}", session_id)));
        }
        Ok(())
    }

    fn inactive_sessions(&self, cutoff: DateTime<Utc>) -> Result<Vec<String>> {
        let conn = self.conn.lock();

        let mut stmt =
            conn.prepare("SELECT id FROM sessions WHERE updated_at < ?1 ORDER BY updated_at")?;
        let ids = stmt
            .query_map(params![format_ts(cutoff)], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(ids)
    }
}
