//! Transactional orchestration over documents, chunks, vectors and FTS
//! entries.
//!
//! The sqlite transaction is the commit point: a reader never sees a half
//! generation because search hydration resolves chunk ids through sqlite and
//! drops ids that no longer exist. The tantivy and usearch updates follow
//! the transaction inside the same per-path lock; any crash window between
//! them is reconciled by the self-heal pass.

use std::sync::Arc;

use parking_lot::Mutex;
use rusqlite::params;
use serde::Serialize;
use tracing::debug;

use crate::error::{EngineError, EngineResult};
use crate::fts::FtsIndex;
use crate::store::{Db, encode_embedding, graph};
use crate::types::{ChunkId, DocumentId, EmbeddedDocument};
use crate::vector::VectorIndex;

const LOCK_SHARDS: usize = 64;

#[derive(Debug, Clone, Serialize)]
pub struct DeleteOutcome {
    pub document_deleted: bool,
    pub chunks_deleted: usize,
}

pub struct Repository {
    db: Arc<Db>,
    fts: Arc<FtsIndex>,
    vectors: Arc<VectorIndex>,
    /// Per-fingerprint write locks, sharded by path hash. At most one commit
    /// per document at a time; concurrent commits for the same path
    /// serialize here (last writer wins by commit order).
    path_locks: Vec<Mutex<()>>,
}

impl Repository {
    pub fn new(db: Arc<Db>, fts: Arc<FtsIndex>, vectors: Arc<VectorIndex>) -> Self {
        Self {
            db,
            fts,
            vectors,
            path_locks: (0..LOCK_SHARDS).map(|_| Mutex::new(())).collect(),
        }
    }

    pub fn db(&self) -> &Arc<Db> {
        &self.db
    }

    fn shard_for(&self, path: &str) -> &Mutex<()> {
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for b in path.as_bytes() {
            hash ^= *b as u64;
            hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
        }
        &self.path_locks[(hash % LOCK_SHARDS as u64) as usize]
    }

    /// Commit a processed document: replace any prior generation, insert the
    /// new one, and bring FTS + k-NN in line. Zero-chunk documents still get
    /// a row so unchanged empty files are not re-processed forever.
    pub fn commit_document(&self, doc: &EmbeddedDocument) -> EngineResult<DocumentId> {
        if doc.vectors.len() != doc.doc.chunks.len() {
            return Err(EngineError::Embedding(format!(
                "{}: {} vectors for {} chunks",
                doc.doc.path,
                doc.vectors.len(),
                doc.doc.chunks.len()
            )));
        }

        let _guard = self.shard_for(&doc.doc.path).lock();

        let now = chrono::Utc::now().timestamp();
        let mut old_chunk_ids: Vec<ChunkId> = Vec::new();
        let mut new_entries: Vec<(ChunkId, DocumentId, String, String)> = Vec::new();
        let mut new_vectors: Vec<(ChunkId, Vec<f32>)> = Vec::new();

        let doc_id = self.db.with_tx(|tx| {
            // Drop the prior generation, cascading to chunks, vectors and
            // the note's graph entry.
            if let Some(old_id) = document_id_by_path(tx, &doc.doc.path)? {
                old_chunk_ids = chunk_ids(tx, old_id)?;
                tx.execute(
                    "DELETE FROM vectors WHERE chunk_id IN
                     (SELECT id FROM chunks WHERE document_id = ?1)",
                    params![old_id],
                )?;
                tx.execute("DELETE FROM chunks WHERE document_id = ?1", params![old_id])?;
                tx.execute("DELETE FROM documents WHERE id = ?1", params![old_id])?;
                graph::remove_note(tx, &doc.doc.path)?;
            }

            tx.execute(
                "INSERT INTO documents(path, hash, extraction_method, indexed_at, chunk_count)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    doc.doc.path,
                    doc.doc.hash,
                    doc.doc.extraction_method,
                    now,
                    doc.doc.chunks.len() as i64
                ],
            )?;
            let doc_id: DocumentId = tx.last_insert_rowid();

            for (chunk, vector) in doc.doc.chunks.iter().zip(doc.vectors.iter()) {
                let metadata = if chunk.metadata.is_empty() {
                    None
                } else {
                    Some(serde_json::to_string(&chunk.metadata)?)
                };
                tx.execute(
                    "INSERT INTO chunks(document_id, ordinal, content, page, metadata)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![
                        doc_id,
                        chunk.ordinal as i64,
                        chunk.text,
                        chunk.page.map(|p| p as i64),
                        metadata
                    ],
                )?;
                let chunk_id: ChunkId = tx.last_insert_rowid();

                tx.execute(
                    "INSERT INTO vectors(chunk_id, embedding) VALUES (?1, ?2)",
                    params![chunk_id, encode_embedding(vector)],
                )?;

                new_entries.push((chunk_id, doc_id, chunk.text.clone(), doc.doc.path.clone()));
                new_vectors.push((chunk_id, vector.clone()));
            }

            if let Some(note) = &doc.doc.note {
                graph::upsert_note(tx, &doc.doc.path, note)?;
            }

            Ok(doc_id)
        })?;

        // Derived indexes follow the committed transaction, still under the
        // per-path lock.
        self.fts.delete_chunks(&old_chunk_ids)?;
        self.fts.add_chunks(&new_entries)?;
        self.fts.commit()?;

        self.vectors.remove_batch(&old_chunk_ids)?;
        self.vectors.insert_batch(&new_vectors)?;

        debug!(
            path = %doc.doc.path,
            chunks = doc.doc.chunks.len(),
            replaced = !old_chunk_ids.is_empty(),
            "document committed"
        );
        Ok(doc_id)
    }

    /// Delete a document and everything hanging off it: chunks, vectors,
    /// FTS entries, graph edges and its progress row.
    pub fn delete_document(&self, path: &str) -> EngineResult<DeleteOutcome> {
        let _guard = self.shard_for(path).lock();

        let mut chunk_list: Vec<ChunkId> = Vec::new();
        let deleted = self.db.with_tx(|tx| {
            let Some(doc_id) = document_id_by_path(tx, path)? else {
                return Ok(false);
            };
            chunk_list = chunk_ids(tx, doc_id)?;
            tx.execute(
                "DELETE FROM vectors WHERE chunk_id IN
                 (SELECT id FROM chunks WHERE document_id = ?1)",
                params![doc_id],
            )?;
            tx.execute("DELETE FROM chunks WHERE document_id = ?1", params![doc_id])?;
            tx.execute("DELETE FROM documents WHERE id = ?1", params![doc_id])?;
            tx.execute(
                "DELETE FROM processing_progress WHERE path = ?1",
                params![path],
            )?;
            graph::remove_note(tx, path)?;
            Ok(true)
        })?;

        if deleted {
            self.fts.delete_chunks(&chunk_list)?;
            self.fts.commit()?;
            self.vectors.remove_batch(&chunk_list)?;
        }

        Ok(DeleteOutcome {
            document_deleted: deleted,
            chunks_deleted: chunk_list.len(),
        })
    }

    /// Delete chunk rows that have no parent document (self-heal repair).
    pub fn delete_orphan_chunks(&self, ids: &[ChunkId]) -> EngineResult<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        self.db.with_tx(|tx| {
            for id in ids {
                tx.execute("DELETE FROM vectors WHERE chunk_id = ?1", params![id])?;
                tx.execute("DELETE FROM chunks WHERE id = ?1", params![id])?;
            }
            Ok(())
        })?;
        self.fts.delete_chunks(ids)?;
        self.fts.commit()?;
        self.vectors.remove_batch(ids)?;
        Ok(ids.len())
    }

    /// Delete vector rows that have no chunk (self-heal repair).
    pub fn delete_orphan_vectors(&self, ids: &[ChunkId]) -> EngineResult<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        self.db.with_tx(|tx| {
            for id in ids {
                tx.execute("DELETE FROM vectors WHERE chunk_id = ?1", params![id])?;
            }
            Ok(())
        })?;
        self.vectors.remove_batch(ids)?;
        Ok(ids.len())
    }
}

fn document_id_by_path(
    tx: &rusqlite::Transaction,
    path: &str,
) -> rusqlite::Result<Option<DocumentId>> {
    use rusqlite::OptionalExtension;
    tx.query_row(
        "SELECT id FROM documents WHERE path = ?1",
        params![path],
        |r| r.get(0),
    )
    .optional()
}

fn chunk_ids(tx: &rusqlite::Transaction, doc_id: DocumentId) -> rusqlite::Result<Vec<ChunkId>> {
    let mut stmt = tx.prepare("SELECT id FROM chunks WHERE document_id = ?1")?;
    let rows = stmt.query_map(params![doc_id], |r| r.get(0))?;
    rows.collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ChunkMetadata, ExtractedChunk, ExtractedDocument};

    const DIM: usize = 8;

    fn repo() -> (tempfile::TempDir, Repository) {
        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(Db::open_in_memory().unwrap());
        let fts = Arc::new(FtsIndex::open(&dir.path().join("fts")).unwrap());
        let vectors =
            Arc::new(VectorIndex::open(&dir.path().join("v.usearch"), DIM, 64).unwrap());
        (dir, Repository::new(db, fts, vectors))
    }

    fn embedded(path: &str, texts: &[&str]) -> EmbeddedDocument {
        let chunks: Vec<ExtractedChunk> = texts
            .iter()
            .enumerate()
            .map(|(i, t)| ExtractedChunk {
                text: t.to_string(),
                ordinal: i,
                page: None,
                metadata: ChunkMetadata::default(),
            })
            .collect();
        let vectors = (0..texts.len())
            .map(|i| {
                let mut v = vec![0.0f32; DIM];
                v[i % DIM] = 1.0;
                v
            })
            .collect();
        EmbeddedDocument {
            doc: ExtractedDocument {
                path: path.to_string(),
                abs_path: path.into(),
                hash: format!("hash-of-{path}-{}", texts.len()),
                extraction_method: "text".into(),
                chunks,
                note: None,
            },
            vectors,
        }
    }

    #[test]
    fn commit_populates_all_stores() {
        let (_dir, repo) = repo();
        repo.commit_document(&embedded("a.md", &["alpha text", "beta text"]))
            .unwrap();

        assert_eq!(repo.db.document_count().unwrap(), 1);
        assert_eq!(repo.db.chunk_count().unwrap(), 2);
        assert_eq!(repo.db.vector_count().unwrap(), 2);
        assert_eq!(repo.vectors.len(), 2);
        assert_eq!(repo.fts.num_docs(), 2);

        let info = repo.db.document_by_path("a.md").unwrap().unwrap();
        assert_eq!(info.summary.chunk_count, 2);
    }

    #[test]
    fn recommit_replaces_prior_generation() {
        let (_dir, repo) = repo();
        repo.commit_document(&embedded("a.md", &["old one", "old two", "old three"]))
            .unwrap();
        let old_ids = {
            let info = repo.db.document_by_path("a.md").unwrap().unwrap();
            repo.db.chunk_ids_for_document(info.summary.id).unwrap()
        };

        repo.commit_document(&embedded("a.md", &["fresh content"]))
            .unwrap();

        assert_eq!(repo.db.document_count().unwrap(), 1);
        assert_eq!(repo.db.chunk_count().unwrap(), 1);
        assert_eq!(repo.db.vector_count().unwrap(), 1);
        assert_eq!(repo.vectors.len(), 1);
        assert_eq!(repo.fts.num_docs(), 1);

        // old generation fully invisible
        assert!(repo.db.hydrate_chunks(&old_ids).unwrap().is_empty());
        assert!(repo.fts.search("old", 10).unwrap().is_empty());
    }

    #[test]
    fn zero_chunk_document_gets_row() {
        let (_dir, repo) = repo();
        repo.commit_document(&embedded("empty.txt", &[])).unwrap();
        let info = repo.db.document_by_path("empty.txt").unwrap().unwrap();
        assert_eq!(info.summary.chunk_count, 0);
        assert_eq!(repo.db.chunk_count().unwrap(), 0);
        assert_eq!(repo.vectors.len(), 0);
    }

    #[test]
    fn delete_cascades_everywhere() {
        let (_dir, repo) = repo();
        repo.commit_document(&embedded("a.md", &["some text"])).unwrap();
        repo.db().progress_start("a.md", "h").unwrap();
        repo.db().progress_complete("a.md", "h", "text").unwrap();

        let out = repo.delete_document("a.md").unwrap();
        assert!(out.document_deleted);
        assert_eq!(out.chunks_deleted, 1);
        assert_eq!(repo.db.document_count().unwrap(), 0);
        assert_eq!(repo.db.chunk_count().unwrap(), 0);
        assert_eq!(repo.db.vector_count().unwrap(), 0);
        assert_eq!(repo.vectors.len(), 0);
        assert_eq!(repo.fts.num_docs(), 0);
        assert!(repo.db.progress_get("a.md").unwrap().is_none());
    }

    #[test]
    fn delete_missing_is_reported() {
        let (_dir, repo) = repo();
        let out = repo.delete_document("ghost.md").unwrap();
        assert!(!out.document_deleted);
        assert_eq!(out.chunks_deleted, 0);
    }

    #[test]
    fn vector_chunk_mismatch_rejected() {
        let (_dir, repo) = repo();
        let mut doc = embedded("a.md", &["text"]);
        doc.vectors.clear();
        assert!(repo.commit_document(&doc).is_err());
    }
}
