//! Relational store: documents, chunks, vectors, processing progress and the
//! optional note graph, all in one sqlite database.
//!
//! The vectors table is the source of truth for embeddings; the usearch and
//! tantivy artifacts are derived from it and rebuildable at any time.

pub mod graph;
pub mod progress;

use std::path::Path;

use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, Transaction, params};

use crate::error::{EngineError, EngineResult};
use crate::types::{ChunkId, DocumentId, DocumentInfo, DocumentSummary};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS documents (
    id INTEGER PRIMARY KEY,
    path TEXT NOT NULL UNIQUE,
    hash TEXT NOT NULL,
    extraction_method TEXT NOT NULL,
    indexed_at INTEGER NOT NULL,
    chunk_count INTEGER NOT NULL DEFAULT 0
);
CREATE INDEX IF NOT EXISTS idx_documents_hash ON documents(hash);

CREATE TABLE IF NOT EXISTS chunks (
    id INTEGER PRIMARY KEY,
    document_id INTEGER NOT NULL REFERENCES documents(id),
    ordinal INTEGER NOT NULL,
    content TEXT NOT NULL,
    page INTEGER,
    metadata TEXT
);
CREATE INDEX IF NOT EXISTS idx_chunks_document ON chunks(document_id);

CREATE TABLE IF NOT EXISTS vectors (
    chunk_id INTEGER PRIMARY KEY REFERENCES chunks(id),
    embedding BLOB NOT NULL
);

CREATE TABLE IF NOT EXISTS processing_progress (
    path TEXT PRIMARY KEY,
    hash TEXT NOT NULL,
    status TEXT NOT NULL,
    extraction_method TEXT NOT NULL DEFAULT '',
    started_at INTEGER NOT NULL,
    completed_at INTEGER,
    error_message TEXT
);
CREATE INDEX IF NOT EXISTS idx_progress_status ON processing_progress(status);

CREATE TABLE IF NOT EXISTS graph_nodes (
    id INTEGER PRIMARY KEY,
    path TEXT NOT NULL UNIQUE,
    title TEXT NOT NULL DEFAULT '',
    placeholder INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS graph_edges (
    source INTEGER NOT NULL REFERENCES graph_nodes(id),
    target INTEGER NOT NULL REFERENCES graph_nodes(id),
    kind TEXT NOT NULL,
    UNIQUE(source, target, kind)
);
CREATE INDEX IF NOT EXISTS idx_edges_source ON graph_edges(source);
CREATE INDEX IF NOT EXISTS idx_edges_target ON graph_edges(target);

CREATE TABLE IF NOT EXISTS meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;

/// A chunk hydrated for search results (content + owning document path).
#[derive(Debug, Clone)]
pub struct HydratedChunk {
    pub chunk_id: ChunkId,
    pub content: String,
    pub page: Option<u32>,
    pub path: String,
}

pub struct Db {
    conn: Mutex<Connection>,
}

impl Db {
    pub fn open(path: &Path) -> EngineResult<Self> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> EngineResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> EngineResult<T>) -> EngineResult<T> {
        let conn = self.conn.lock();
        f(&conn)
    }

    /// Run `f` inside a transaction; commit on Ok, roll back on Err.
    pub fn with_tx<T>(&self, f: impl FnOnce(&Transaction) -> EngineResult<T>) -> EngineResult<T> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let out = f(&tx)?;
        tx.commit()?;
        Ok(out)
    }

    // ---- meta -------------------------------------------------------------

    pub fn meta_get(&self, key: &str) -> EngineResult<Option<String>> {
        self.with_conn(|c| {
            Ok(c.query_row("SELECT value FROM meta WHERE key = ?1", params![key], |r| {
                r.get(0)
            })
            .optional()?)
        })
    }

    pub fn meta_set(&self, key: &str, value: &str) -> EngineResult<()> {
        self.with_conn(|c| {
            c.execute(
                "INSERT INTO meta(key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                params![key, value],
            )?;
            Ok(())
        })
    }

    /// Verify (or record, on first open) the embedding dimension and model.
    /// The dimension is immutable for the lifetime of the store.
    pub fn check_embedding_meta(&self, dim: usize, model: &str) -> EngineResult<()> {
        match self.meta_get("embedding_dim")? {
            Some(stored) => {
                let stored: usize = stored.parse().unwrap_or(0);
                if stored != dim {
                    return Err(EngineError::BadRequest(format!(
                        "store was created with embedding dimension {stored}, embedder produces {dim}"
                    )));
                }
            }
            None => {
                self.meta_set("embedding_dim", &dim.to_string())?;
                self.meta_set("embedding_model", model)?;
            }
        }
        Ok(())
    }

    // ---- documents --------------------------------------------------------

    pub fn document_by_path(&self, path: &str) -> EngineResult<Option<DocumentInfo>> {
        self.with_conn(|c| {
            Ok(c.query_row(
                "SELECT id, path, hash, extraction_method, indexed_at, chunk_count
                 FROM documents WHERE path = ?1",
                params![path],
                |r| {
                    Ok(DocumentInfo {
                        summary: DocumentSummary {
                            id: r.get(0)?,
                            path: r.get(1)?,
                            extraction_method: r.get(3)?,
                            indexed_at: r.get(4)?,
                            chunk_count: r.get(5)?,
                        },
                        hash: r.get(2)?,
                    })
                },
            )
            .optional()?)
        })
    }

    pub fn list_documents(&self, pattern: Option<&str>) -> EngineResult<Vec<DocumentSummary>> {
        let matcher = match pattern {
            Some(p) => Some(
                globset::GlobBuilder::new(p)
                    .literal_separator(false)
                    .build()
                    .map_err(|e| EngineError::BadRequest(format!("bad glob pattern: {e}")))?
                    .compile_matcher(),
            ),
            None => None,
        };

        self.with_conn(|c| {
            let mut stmt = c.prepare(
                "SELECT id, path, extraction_method, indexed_at, chunk_count
                 FROM documents ORDER BY path",
            )?;
            let rows = stmt.query_map([], |r| {
                Ok(DocumentSummary {
                    id: r.get(0)?,
                    path: r.get(1)?,
                    extraction_method: r.get(2)?,
                    indexed_at: r.get(3)?,
                    chunk_count: r.get(4)?,
                })
            })?;

            let mut out = Vec::new();
            for row in rows {
                let row = row?;
                if matcher.as_ref().is_none_or(|m| m.is_match(&row.path)) {
                    out.push(row);
                }
            }
            Ok(out)
        })
    }

    pub fn all_document_paths(&self) -> EngineResult<Vec<(DocumentId, String)>> {
        self.with_conn(|c| {
            let mut stmt = c.prepare("SELECT id, path FROM documents")?;
            let rows = stmt.query_map([], |r| Ok((r.get(0)?, r.get(1)?)))?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
    }

    pub fn document_count(&self) -> EngineResult<i64> {
        self.with_conn(|c| Ok(c.query_row("SELECT COUNT(*) FROM documents", [], |r| r.get(0))?))
    }

    pub fn chunk_count(&self) -> EngineResult<i64> {
        self.with_conn(|c| Ok(c.query_row("SELECT COUNT(*) FROM chunks", [], |r| r.get(0))?))
    }

    pub fn vector_count(&self) -> EngineResult<i64> {
        self.with_conn(|c| Ok(c.query_row("SELECT COUNT(*) FROM vectors", [], |r| r.get(0))?))
    }

    pub fn chunk_ids_for_document(&self, doc_id: DocumentId) -> EngineResult<Vec<ChunkId>> {
        self.with_conn(|c| {
            let mut stmt = c.prepare("SELECT id FROM chunks WHERE document_id = ?1")?;
            let rows = stmt.query_map(params![doc_id], |r| r.get(0))?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
    }

    /// Hydrate chunks for result shaping. Ids that no longer resolve are
    /// silently dropped; callers treat the store as the visibility boundary.
    pub fn hydrate_chunks(&self, ids: &[ChunkId]) -> EngineResult<Vec<HydratedChunk>> {
        self.with_conn(|c| {
            let mut stmt = c.prepare(
                "SELECT ch.id, ch.content, ch.page, d.path
                 FROM chunks ch JOIN documents d ON d.id = ch.document_id
                 WHERE ch.id = ?1",
            )?;
            let mut out = Vec::with_capacity(ids.len());
            for id in ids {
                let row = stmt
                    .query_row(params![id], |r| {
                        Ok(HydratedChunk {
                            chunk_id: r.get(0)?,
                            content: r.get(1)?,
                            page: r.get::<_, Option<i64>>(2)?.map(|p| p as u32),
                            path: r.get(3)?,
                        })
                    })
                    .optional()?;
                if let Some(row) = row {
                    out.push(row);
                }
            }
            Ok(out)
        })
    }

    // ---- vectors ----------------------------------------------------------

    /// Stream every stored embedding to `f`. Used by index rebuilds.
    pub fn for_each_vector(&self, mut f: impl FnMut(ChunkId, Vec<f32>)) -> EngineResult<usize> {
        self.with_conn(|c| {
            let mut stmt = c.prepare("SELECT chunk_id, embedding FROM vectors")?;
            let mut rows = stmt.query([])?;
            let mut n = 0usize;
            while let Some(row) = rows.next()? {
                let id: ChunkId = row.get(0)?;
                let blob: Vec<u8> = row.get(1)?;
                f(id, decode_embedding(&blob));
                n += 1;
            }
            Ok(n)
        })
    }

    /// Stream every chunk's (id, content) to `f`. Used by FTS rebuilds.
    pub fn for_each_chunk(&self, mut f: impl FnMut(ChunkId, DocumentId, String, String)) -> EngineResult<usize> {
        self.with_conn(|c| {
            let mut stmt = c.prepare(
                "SELECT ch.id, ch.document_id, ch.content, d.path
                 FROM chunks ch JOIN documents d ON d.id = ch.document_id",
            )?;
            let mut rows = stmt.query([])?;
            let mut n = 0usize;
            while let Some(row) = rows.next()? {
                f(row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?);
                n += 1;
            }
            Ok(n)
        })
    }

    // ---- orphan queries (self-heal) ---------------------------------------

    pub fn orphan_chunk_ids(&self) -> EngineResult<Vec<ChunkId>> {
        self.with_conn(|c| {
            let mut stmt = c.prepare(
                "SELECT id FROM chunks
                 WHERE document_id NOT IN (SELECT id FROM documents)",
            )?;
            let rows = stmt.query_map([], |r| r.get(0))?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
    }

    pub fn orphan_vector_ids(&self) -> EngineResult<Vec<ChunkId>> {
        self.with_conn(|c| {
            let mut stmt = c.prepare(
                "SELECT chunk_id FROM vectors
                 WHERE chunk_id NOT IN (SELECT id FROM chunks)",
            )?;
            let rows = stmt.query_map([], |r| r.get(0))?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
    }

    /// Documents whose stored chunk_count disagrees with the live count.
    pub fn mismatched_chunk_counts(&self) -> EngineResult<Vec<(DocumentId, String, i64, i64)>> {
        self.with_conn(|c| {
            let mut stmt = c.prepare(
                "SELECT d.id, d.path, d.chunk_count,
                        (SELECT COUNT(*) FROM chunks ch WHERE ch.document_id = d.id)
                 FROM documents d",
            )?;
            let rows = stmt.query_map([], |r| {
                Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?))
            })?;
            let mut out = Vec::new();
            for row in rows {
                let row = row?;
                if row.2 != row.3 {
                    out.push(row);
                }
            }
            Ok(out)
        })
    }

    pub fn empty_documents(&self) -> EngineResult<Vec<(DocumentId, String)>> {
        self.with_conn(|c| {
            let mut stmt =
                c.prepare("SELECT id, path FROM documents WHERE chunk_count = 0")?;
            let rows = stmt.query_map([], |r| Ok((r.get(0)?, r.get(1)?)))?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
    }
}

/// Embeddings are stored as little-endian f32 bytes.
pub fn encode_embedding(v: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(v.len() * 4);
    for x in v {
        out.extend_from_slice(&x.to_le_bytes());
    }
    out
}

pub fn decode_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedding_roundtrip() {
        let v = vec![0.25f32, -1.5, 3.0];
        assert_eq!(decode_embedding(&encode_embedding(&v)), v);
    }

    #[test]
    fn schema_opens_and_meta_roundtrips() {
        let db = Db::open_in_memory().unwrap();
        assert_eq!(db.meta_get("embedding_dim").unwrap(), None);
        db.meta_set("embedding_dim", "64").unwrap();
        assert_eq!(db.meta_get("embedding_dim").unwrap().as_deref(), Some("64"));
    }

    #[test]
    fn embedding_dim_is_immutable() {
        let db = Db::open_in_memory().unwrap();
        db.check_embedding_meta(64, "hashing").unwrap();
        assert!(db.check_embedding_meta(64, "hashing").is_ok());
        assert!(db.check_embedding_meta(128, "other").is_err());
    }

    #[test]
    fn list_documents_filters_by_glob() {
        let db = Db::open_in_memory().unwrap();
        db.with_conn(|c| {
            c.execute(
                "INSERT INTO documents(path, hash, extraction_method, indexed_at, chunk_count)
                 VALUES ('notes/a.md', 'h', 'markdown', 0, 1),
                        ('src/b.rs', 'h', 'text', 0, 1)",
                [],
            )?;
            Ok(())
        })
        .unwrap();

        let all = db.list_documents(None).unwrap();
        assert_eq!(all.len(), 2);
        let md = db.list_documents(Some("*.md")).unwrap();
        assert_eq!(md.len(), 1);
        assert_eq!(md[0].path, "notes/a.md");
    }
}
