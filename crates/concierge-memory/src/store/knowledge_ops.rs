//! Knowledge catalog CRUD.

use std::collections::BTreeSet;

use rusqlite::{OptionalExtension, params};
use tracing::debug;

use crate::backend::KnowledgeStore;
use crate::error::{MemoryError, Result};
use crate::types::{EntryId, KnowledgeDraft, KnowledgeEntry, now};
use crate::validation::validate_draft;

use super::{SqliteStore, format_ts, parse_ts};

const KNOWLEDGE_COLUMNS: &str = "id, title, body, category, tags, created_at, updated_at";

impl SqliteStore {
    fn row_to_entry(row: &rusqlite::Row) -> Result<KnowledgeEntry> {
        let id: String = row.get(0)?;
        let title: String = row.get(1)?;
        let body: String = row.get(2)?;
        let category: Option<String> = row.get(3)?;
        let tags_json: String = row.get(4)?;
        let created_at: String = row.get(5)?;
        let updated_at: String = row.get(6)?;

        Ok(KnowledgeEntry {
            id: EntryId::parse(&id)?,
            title,
            body,
            category,
            tags: serde_json::from_str::<BTreeSet<String>>(&tags_json)?,
            created_at: parse_ts(&created_at)?,
            updated_at: parse_ts(&updated_at)?,
        })
    }

    fn query_entries(&self, sql: &str, args: impl rusqlite::Params) -> Result<Vec<KnowledgeEntry>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(sql)?;
        let mut rows = stmt.query(args)?;

        let mut entries = Vec::new();
        while let Some(row) = rows.next()? {
            entries.push(Self::row_to_entry(row)?);
        }
        Ok(entries)
    }
}

impl KnowledgeStore for SqliteStore {
    fn insert_entry(&self, draft: KnowledgeDraft) -> Result<KnowledgeEntry> {
        validate_draft(&draft)?;

        let created = now();
        let entry = KnowledgeEntry {
            id: EntryId::new(),
            title: draft.title,
            body: draft.body,
            category: draft.category,
            tags: draft.tags,
            created_at: created,
            updated_at: created,
        };

        let conn = self.conn.lock();
        conn.execute(
            r#"
            INSERT INTO knowledge (id, title, body, category, tags, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
            params![
                entry.id.to_string(),
                entry.title,
                entry.body,
                entry.category,
                serde_json::to_string(&entry.tags)?,
                format_ts(entry.created_at),
                format_ts(entry.updated_at),
            ],
        )?;

        debug!("Inserted knowledge entry {}", entry.id);
        Ok(entry)
    }

    fn get_entry(&self, id: EntryId) -> Result<Option<KnowledgeEntry>> {
        let conn = self.conn.lock();
        let row = conn
            .query_row(
                &format!("SELECT {} FROM knowledge WHERE id = ?1", KNOWLEDGE_COLUMNS),
                params![id.to_string()],
                |row| Ok(Self::row_to_entry(row)),
            )
            .optional()?;
        row.transpose()
    }

    fn update_entry(&self, id: EntryId, draft: KnowledgeDraft) -> Result<KnowledgeEntry> {
        validate_draft(&draft)?;

        self.with_transaction(|conn| {
            let rows = conn.execute(
                r#"
                UPDATE knowledge
                SET title = ?2, body = ?3, category = ?4, tags = ?5, updated_at = ?6
                WHERE id = ?1
                "#,
                params![
                    id.to_string(),
                    draft.title,
                    draft.body,
                    draft.category,
                    serde_json::to_string(&draft.tags)?,
                    format_ts(now()),
                ],
            )?;

            if rows == 0 {
                return Err(MemoryError::NotFound(format!("Knowledge entry {}", id)));
            }

            let entry = conn.query_row(
                &format!("SELECT {} FROM knowledge WHERE id = ?1", KNOWLEDGE_COLUMNS),
                params![id.to_string()],
                |row| Ok(Self::row_to_entry(row)),
            )??;

            debug!("Updated knowledge entry {}", id);
            Ok(entry)
        })
    }

    fn delete_entry(&self, id: EntryId) -> Result<bool> {
        let conn = self.conn.lock();
        let rows = conn.execute("DELETE FROM knowledge WHERE id = ?1", params![id.to_string()])?;

        if rows > 0 {
            debug!("Deleted knowledge entry {}", id);
        }
        Ok(rows > 0)
    }

    fn list_entries(
        &self,
        category: Option<&str>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<KnowledgeEntry>> {
        match category {
            Some(category) => self.query_entries(
                &format!(
                    "SELECT {} FROM knowledge WHERE category = ?1 \
                     ORDER BY updated_at DESC, seq ASC LIMIT ?2 OFFSET ?3",
                    KNOWLEDGE_COLUMNS
                ),
                params![category, limit as i64, offset as i64],
            ),
            None => self.query_entries(
                &format!(
                    "SELECT {} FROM knowledge ORDER BY updated_at DESC, seq ASC LIMIT ?1 OFFSET ?2",
                    KNOWLEDGE_COLUMNS
                ),
                params![limit as i64, offset as i64],
            ),
        }
    }

    fn categories(&self) -> Result<Vec<String>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT DISTINCT category FROM knowledge \
             WHERE category IS NOT NULL AND category != '' ORDER BY category",
        )?;
        let categories = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(categories)
    }

    fn all_entries(&self) -> Result<Vec<KnowledgeEntry>> {
        self.query_entries(
            &format!(
                "SELECT {} FROM knowledge ORDER BY updated_at DESC, seq ASC",
                KNOWLEDGE_COLUMNS
            ),
            [],
        )
    }

    fn count_entries(&self) -> Result<usize> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM knowledge", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}
