//! Conversation summary storage.

use rusqlite::{OptionalExtension, params};
use tracing::debug;

use crate::backend::SummaryStore;
use crate::error::{MemoryError, Result};
use crate::types::ConversationSummary;

use super::{SqliteStore, format_ts, parse_ts};

impl SummaryStore for SqliteStore {
    fn save_summary(&self, summary: &ConversationSummary) -> Result<()> {
        self.with_transaction(|conn| {
            let rows = conn.execute(
                r#"
                UPDATE sessions
                SET summarized_through = MAX(summarized_through, ?2)
                WHERE id = ?1
                "#,
                params![summary.session_id, summary.covers_turns as i64],
            )?;
            if rows == 0 {
                return Err(MemoryError::NotFound(format!(
                    "Session {}",
                    summary.session_id
                )));
            }

            conn.execute(
                r#"
                INSERT INTO summaries (session_id, summary, covers_turns, created_at)
                VALUES (?1, ?2, ?3, ?4)
                "#,
                params![
                    summary.session_id,
                    summary.summary,
                    summary.covers_turns as i64,
                    format_ts(summary.created_at),
                ],
            )?;
            Ok(())
        })?;

        debug!(
            "Saved summary for session {} covering {} turns",
            summary.session_id, summary.covers_turns
        );
        Ok(())
    }

    fn latest_summary(&self, session_id: &str) -> Result<Option<ConversationSummary>> {
        let conn = self.conn.lock();
        let row = conn
            .query_row(
                r#"
                SELECT session_id, summary, covers_turns, created_at
                FROM summaries
                WHERE session_id = ?1
                ORDER BY id DESC
                LIMIT 1
                "#,
                params![session_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                },
            )
            .optional()?;

        row.map(|(session_id, summary, covers_turns, created_at)| {
            Ok(ConversationSummary {
                session_id,
                summary,
                covers_turns: covers_turns as usize,
                created_at: parse_ts(&created_at)?,
            })
        })
        .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{SessionIndex, SessionStore};
    use crate::types::ConversationTurn;

    #[test]
    fn test_save_and_fetch_latest() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.append_turn(&ConversationTurn::user("s1", "hi")).unwrap();

        assert!(store.latest_summary("s1").unwrap().is_none());

        store
            .save_summary(&ConversationSummary::new("s1", "first", 20))
            .unwrap();
        store
            .save_summary(&ConversationSummary::new("s1", "second", 40))
            .unwrap();

        let latest = store.latest_summary("s1").unwrap().unwrap();
        assert_eq!(latest.summary, "second");
        assert_eq!(latest.covers_turns, 40);
        assert_eq!(
            store.get_session("s1").unwrap().unwrap().summarized_through,
            40
        );
    }

    #[test]
    fn test_summary_requires_session() {
        let store = SqliteStore::open_in_memory().unwrap();
        let result = store.save_summary(&ConversationSummary::new("ghost", "x", 1));
        assert!(matches!(result, Err(MemoryError::NotFound(_))));
    }

    #[test]
    fn test_summaries_removed_with_session() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.append_turn(&ConversationTurn::user("s1", "hi")).unwrap();
        store
            .save_summary(&ConversationSummary::new("s1", "sum", 1))
            .unwrap();

        store.delete_session("s1").unwrap();
        assert!(store.latest_summary("s1").unwrap().is_none());
        assert_eq!(store.stats().unwrap().summary_count, 0);
    }
}
