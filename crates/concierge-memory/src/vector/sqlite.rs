//! Vector index persisted with the sqlite-vec extension.

use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::Once;

use parking_lot::Mutex;
use rusqlite::{Connection, OpenFlags, OptionalExtension, params};
use tracing::{debug, info, warn};
use zerocopy::IntoBytes;

use crate::error::{MemoryError, Result};
use crate::types::{EntryId, VectorEntry, VectorMatch};
use crate::validation::validate_embedding;

use super::{VectorIndex, rank};

static VEC_INIT: Once = Once::new();

/// Register sqlite-vec for every connection opened afterwards.
pub fn init_vector_extension() {
    use rusqlite::ffi::sqlite3_auto_extension;
    use sqlite_vec::sqlite3_vec_init;

    VEC_INIT.call_once(|| unsafe {
        #[allow(clippy::missing_transmute_annotations)]
        sqlite3_auto_extension(Some(std::mem::transmute(sqlite3_vec_init as *const ())));
    });
}

/// Vector index stored in a `vec0` virtual table.
///
/// Display fields and insertion order live in a companion `vector_meta`
/// table. The configured dimensionality is recorded; opening with a
/// different one drops the stored vectors so they can be rebuilt.
pub struct SqliteVectorIndex {
    conn: Mutex<Connection>,
    dimensions: usize,
}

impl std::fmt::Debug for SqliteVectorIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteVectorIndex")
            .field("dimensions", &self.dimensions)
            .finish_non_exhaustive()
    }
}

impl SqliteVectorIndex {
    /// Open or create an index at the given path.
    pub fn open(path: impl AsRef<Path>, dimensions: usize) -> Result<Self> {
        init_vector_extension();
        let path = path.as_ref();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            std::fs::create_dir_all(parent).map_err(|_| {
                MemoryError::Database(rusqlite::Error::InvalidPath(path.to_path_buf()))
            })?;
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_FULL_MUTEX,
        )?;
        conn.pragma_update(None, "journal_mode", "WAL")?;

        let index = Self::with_connection(conn, dimensions)?;
        info!("Vector index opened at {:?} ({} dims)", path, dimensions);
        Ok(index)
    }

    /// Create an in-memory index (useful for testing).
    pub fn open_in_memory(dimensions: usize) -> Result<Self> {
        init_vector_extension();
        Self::with_connection(Connection::open_in_memory()?, dimensions)
    }

    fn with_connection(conn: Connection, dimensions: usize) -> Result<Self> {
        if dimensions == 0 {
            return Err(MemoryError::InvalidData(
                "vector dimensions must be positive".to_string(),
            ));
        }
        Self::create_schema(&conn, dimensions)?;
        Ok(Self {
            conn: Mutex::new(conn),
            dimensions,
        })
    }

    fn create_schema(conn: &Connection, dims: usize) -> Result<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS vector_meta (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                entry_id TEXT NOT NULL UNIQUE,
                title TEXT NOT NULL,
                category TEXT,
                tags TEXT NOT NULL DEFAULT '[]'
            );

            CREATE TABLE IF NOT EXISTS vector_state (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );
            "#,
        )?;

        let stored: Option<usize> = conn
            .query_row(
                "SELECT value FROM vector_state WHERE key = 'embedding.dimensions'",
                [],
                |row| row.get::<_, String>(0),
            )
            .optional()?
            .and_then(|s| s.parse().ok());

        if let Some(existing) = stored
            && existing != dims
        {
            warn!(
                "Vector index dimensions changed ({} -> {}); dropping stored vectors",
                existing, dims
            );
            conn.execute_batch(
                "DROP TABLE IF EXISTS knowledge_vectors; DELETE FROM vector_meta;",
            )?;
        }

        Self::create_vector_table(conn, dims)?;
        conn.execute(
            "INSERT OR REPLACE INTO vector_state (key, value) VALUES ('embedding.dimensions', ?1)",
            params![dims.to_string()],
        )?;
        Ok(())
    }

    fn create_vector_table(conn: &Connection, dims: usize) -> Result<()> {
        conn.execute_batch(&format!(
            r#"
            CREATE VIRTUAL TABLE IF NOT EXISTS knowledge_vectors USING vec0(
                entry_id TEXT PRIMARY KEY,
                embedding float[{dims}]
            )
            "#
        ))?;
        Ok(())
    }

    /// Version of the loaded sqlite-vec extension.
    pub fn extension_version(&self) -> Result<String> {
        let conn = self.conn.lock();
        let version: String = conn.query_row("SELECT vec_version()", [], |row| row.get(0))?;
        Ok(version)
    }

    fn write_entry(conn: &Connection, entry: &VectorEntry) -> Result<()> {
        let id = entry.id.to_string();

        // vec0 doesn't support INSERT OR REPLACE
        conn.execute(
            "DELETE FROM knowledge_vectors WHERE entry_id = ?1",
            params![id],
        )?;
        conn.execute(
            "INSERT INTO knowledge_vectors (entry_id, embedding) VALUES (?1, ?2)",
            params![id, entry.vector.as_bytes()],
        )?;

        conn.execute(
            r#"
            INSERT INTO vector_meta (entry_id, title, category, tags)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(entry_id) DO UPDATE SET
                title = excluded.title,
                category = excluded.category,
                tags = excluded.tags
            "#,
            params![
                id,
                entry.title,
                entry.category,
                serde_json::to_string(&entry.tags)?
            ],
        )?;
        Ok(())
    }
}

impl VectorIndex for SqliteVectorIndex {
    fn upsert(&self, entry: VectorEntry) -> Result<()> {
        validate_embedding(&entry.vector, self.dimensions)?;

        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        Self::write_entry(&tx, &entry)?;
        tx.commit()?;

        debug!("Stored vector for entry {}", entry.id);
        Ok(())
    }

    fn delete(&self, id: EntryId) -> Result<bool> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let id = id.to_string();
        tx.execute(
            "DELETE FROM knowledge_vectors WHERE entry_id = ?1",
            params![id],
        )?;
        let rows = tx.execute("DELETE FROM vector_meta WHERE entry_id = ?1", params![id])?;
        tx.commit()?;
        Ok(rows > 0)
    }

    fn query(&self, vector: &[f32], k: usize) -> Result<Vec<VectorMatch>> {
        validate_embedding(vector, self.dimensions)?;
        if k == 0 {
            return Ok(Vec::new());
        }

        let conn = self.conn.lock();
        let total: i64 = conn.query_row("SELECT COUNT(*) FROM knowledge_vectors", [], |row| {
            row.get(0)
        })?;
        let total = total as usize;
        if total == 0 {
            return Ok(Vec::new());
        }

        let mut stmt = conn.prepare(
            r#"
            SELECT entry_id, distance
            FROM knowledge_vectors
            WHERE embedding MATCH ?1
            ORDER BY distance
            LIMIT ?2
            "#,
        )?;

        // The KNN cut only orders by distance, so widen it until every row
        // tied with the k-th hit is in hand before applying insertion order.
        let mut fetch = k.min(total);
        let hits = loop {
            let mut rows = stmt.query(params![vector.as_bytes(), fetch as i64])?;
            let mut hits: Vec<(String, f64)> = Vec::with_capacity(fetch);
            while let Some(row) = rows.next()? {
                hits.push((row.get(0)?, row.get(1)?));
            }

            let page_full = hits.len() == fetch && fetch < total;
            let boundary = hits.get(k - 1).map(|h| h.1);
            if !page_full || boundary.is_none() || hits.last().map(|h| h.1) != boundary {
                break hits;
            }
            fetch = (fetch * 2).min(total);
        };

        let mut seq_stmt = conn.prepare("SELECT seq FROM vector_meta WHERE entry_id = ?1")?;
        let mut seqs: HashMap<String, u64> = HashMap::with_capacity(hits.len());
        for (id, _) in &hits {
            let seq: Option<i64> = seq_stmt
                .query_row(params![id], |row| row.get(0))
                .optional()?;
            seqs.insert(id.clone(), seq.unwrap_or(i64::MAX) as u64);
        }

        let scored = hits
            .into_iter()
            .map(|(id, distance)| {
                let seq = seqs.get(&id).copied().unwrap_or(u64::MAX);
                let hit = VectorMatch {
                    id: EntryId::parse(&id)?,
                    score: (1.0 / (1.0 + distance)) as f32,
                };
                Ok((hit, seq))
            })
            .collect::<Result<Vec<_>>>()?;

        debug!("Vector query returned {} hits (k: {})", scored.len(), k);
        Ok(rank(scored, k))
    }

    fn get(&self, id: EntryId) -> Result<Option<VectorEntry>> {
        let conn = self.conn.lock();
        let key = id.to_string();

        let meta = conn
            .query_row(
                "SELECT title, category, tags FROM vector_meta WHERE entry_id = ?1",
                params![key],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, Option<String>>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                },
            )
            .optional()?;
        let Some((title, category, tags)) = meta else {
            return Ok(None);
        };

        let blob: Option<Vec<u8>> = conn
            .query_row(
                "SELECT embedding FROM knowledge_vectors WHERE entry_id = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        let Some(blob) = blob else {
            return Ok(None);
        };

        Ok(Some(VectorEntry {
            id,
            vector: decode_vector(&blob)?,
            title,
            category,
            tags: serde_json::from_str::<BTreeSet<String>>(&tags)?,
        }))
    }

    fn len(&self) -> Result<usize> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM vector_meta", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    fn replace_all(&self, entries: Vec<VectorEntry>) -> Result<()> {
        for entry in &entries {
            validate_embedding(&entry.vector, self.dimensions)?;
        }

        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        tx.execute_batch("DROP TABLE IF EXISTS knowledge_vectors; DELETE FROM vector_meta;")?;
        Self::create_vector_table(&tx, self.dimensions)?;
        for entry in &entries {
            Self::write_entry(&tx, entry)?;
        }
        tx.commit()?;

        info!("Rebuilt vector index with {} entries", entries.len());
        Ok(())
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn name(&self) -> &str {
        "sqlite-vec"
    }
}

fn decode_vector(blob: &[u8]) -> Result<Vec<f32>> {
    if blob.len() % 4 != 0 {
        return Err(MemoryError::InvalidData(format!(
            "vector blob length {} is not a multiple of 4",
            blob.len()
        )));
    }
    Ok(blob
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(vector: Vec<f32>, title: &str) -> VectorEntry {
        VectorEntry {
            id: EntryId::new(),
            vector,
            title: title.to_string(),
            category: Some("general".into()),
            tags: ["t".to_string()].into_iter().collect(),
        }
    }

    #[test]
    fn test_extension_loaded() {
        let index = SqliteVectorIndex::open_in_memory(4).unwrap();
        assert!(index.extension_version().unwrap().starts_with('v'));
    }

    #[test]
    fn test_upsert_get_roundtrip() {
        let index = SqliteVectorIndex::open_in_memory(3).unwrap();
        let e = entry(vec![0.1, 0.2, 0.3], "first");
        index.upsert(e.clone()).unwrap();

        assert_eq!(index.get(e.id).unwrap().unwrap(), e);
        assert_eq!(index.len().unwrap(), 1);
        assert!(index.get(EntryId::new()).unwrap().is_none());
    }

    #[test]
    fn test_query_nearest_first() {
        let index = SqliteVectorIndex::open_in_memory(2).unwrap();
        let near = entry(vec![1.0, 0.0], "near");
        let far = entry(vec![0.0, 1.0], "far");
        index.upsert(far.clone()).unwrap();
        index.upsert(near.clone()).unwrap();

        let hits = index.query(&[0.9, 0.1], 2).unwrap();
        assert_eq!(hits[0].id, near.id);
        assert_eq!(hits[1].id, far.id);
        assert!(hits[0].score > hits[1].score);
    }

    #[test]
    fn test_update_only_touches_target() {
        let index = SqliteVectorIndex::open_in_memory(2).unwrap();
        let a = entry(vec![1.0, 0.0], "a");
        let b = entry(vec![0.0, 1.0], "b");
        index.upsert(a.clone()).unwrap();
        index.upsert(b.clone()).unwrap();

        let mut changed = a.clone();
        changed.title = "a2".into();
        index.upsert(changed).unwrap();

        assert_eq!(index.get(a.id).unwrap().unwrap().title, "a2");
        assert_eq!(index.get(b.id).unwrap().unwrap(), b);
        assert_eq!(index.len().unwrap(), 2);
    }

    #[test]
    fn test_ties_follow_insertion_order_after_update() {
        let index = SqliteVectorIndex::open_in_memory(4).unwrap();
        let a = entry(vec![1.0, 0.0, 0.0, 0.0], "a");
        let b = entry(vec![1.0, 0.0, 0.0, 0.0], "b");
        index.upsert(a.clone()).unwrap();
        index.upsert(b.clone()).unwrap();

        let mut renamed = a.clone();
        renamed.title = "a2".into();
        index.upsert(renamed).unwrap();

        let top = index.query(&[1.0, 0.0, 0.0, 0.0], 1).unwrap();
        assert_eq!(top.len(), 1);
        assert_eq!(top[0].id, a.id);

        let both = index.query(&[1.0, 0.0, 0.0, 0.0], 2).unwrap();
        let ids: Vec<_> = both.iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![a.id, b.id]);
    }

    #[test]
    fn test_ties_widen_past_many_equal_rows() {
        let index = SqliteVectorIndex::open_in_memory(2).unwrap();
        let entries: Vec<_> = (0..5)
            .map(|i| entry(vec![0.0, 1.0], &format!("e{i}")))
            .collect();
        for e in &entries {
            index.upsert(e.clone()).unwrap();
        }
        for e in entries.iter().rev() {
            index.upsert(e.clone()).unwrap();
        }

        let top = index.query(&[0.0, 1.0], 2).unwrap();
        let ids: Vec<_> = top.iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![entries[0].id, entries[1].id]);
    }

    #[test]
    fn test_delete_and_replace_all() {
        let index = SqliteVectorIndex::open_in_memory(2).unwrap();
        let a = entry(vec![1.0, 0.0], "a");
        index.upsert(a.clone()).unwrap();
        assert!(index.delete(a.id).unwrap());
        assert!(!index.delete(a.id).unwrap());
        assert!(index.is_empty().unwrap());

        let b = entry(vec![0.0, 1.0], "b");
        let c = entry(vec![1.0, 1.0], "c");
        index.replace_all(vec![b.clone(), c.clone()]).unwrap();
        assert_eq!(index.len().unwrap(), 2);
        assert_eq!(index.query(&[0.0, 1.0], 1).unwrap()[0].id, b.id);
    }

    #[test]
    fn test_dimension_change_drops_vectors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vectors.db");

        {
            let index = SqliteVectorIndex::open(&path, 2).unwrap();
            index.upsert(entry(vec![1.0, 0.0], "a")).unwrap();
            assert_eq!(index.len().unwrap(), 1);
        }

        {
            let index = SqliteVectorIndex::open(&path, 2).unwrap();
            assert_eq!(index.len().unwrap(), 1);
        }

        let index = SqliteVectorIndex::open(&path, 3).unwrap();
        assert_eq!(index.len().unwrap(), 0);
        index.upsert(entry(vec![1.0, 0.0, 0.0], "b")).unwrap();
        assert!(index.upsert(entry(vec![1.0, 0.0], "c")).is_err());
    }

    #[test]
    fn test_zero_dimensions_rejected() {
        assert!(SqliteVectorIndex::open_in_memory(0).is_err());
    }
}
