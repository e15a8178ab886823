//! Approximate k-NN index over chunk embeddings (usearch HNSW, cosine).
//!
//! The sqlite `vectors` table is the source of truth; this index is a derived
//! artifact. It is deliberately NOT flushed per write — a background timer
//! flushes at an interval and `close()` flushes on graceful shutdown. A crash
//! inside the flush window loses at most that window's inserts from the disk
//! artifact, never from the vectors table, and `rebuild_from_vectors`
//! recovers them.

use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use tracing::{info, warn};
use usearch::ffi::{IndexOptions, MetricKind, ScalarKind};

use crate::error::{EngineError, EngineResult};
use crate::store::Db;
use crate::types::ChunkId;

const INITIAL_CAPACITY: usize = 4_096;

struct Inner {
    index: usearch::Index,
    /// Current expansion_search applied to the index.
    expansion: usize,
    dirty: bool,
}

pub struct VectorIndex {
    inner: Mutex<Inner>,
    path: PathBuf,
    dim: usize,
    default_expansion: usize,
}

impl VectorIndex {
    /// Open (or create) the on-disk index. A load failure is not fatal: the
    /// index restarts empty and the startup heal pass detects the count
    /// mismatch against the vectors table and rebuilds.
    pub fn open(path: &Path, dim: usize, expansion_search: usize) -> EngineResult<Self> {
        let index = new_index(dim, expansion_search)?;

        if path.exists() {
            if let Err(e) = index.load(path.to_string_lossy().as_ref()) {
                warn!(path = %path.display(), error = %e,
                    "failed to load vector index, starting empty (rebuild will follow)");
            }
        }
        if index.capacity() < INITIAL_CAPACITY {
            index
                .reserve(INITIAL_CAPACITY)
                .map_err(|e| EngineError::IndexCorruption(format!("reserve failed: {e}")))?;
        }

        Ok(Self {
            inner: Mutex::new(Inner {
                index,
                expansion: expansion_search,
                dirty: false,
            }),
            path: path.to_path_buf(),
            dim,
            default_expansion: expansion_search,
        })
    }

    pub fn dimension(&self) -> usize {
        self.dim
    }

    pub fn insert(&self, id: ChunkId, vector: &[f32]) -> EngineResult<()> {
        self.insert_batch(std::slice::from_ref(&(id, vector.to_vec())))
    }

    pub fn insert_batch(&self, entries: &[(ChunkId, Vec<f32>)]) -> EngineResult<()> {
        let mut inner = self.inner.lock();
        for (id, vector) in entries {
            if vector.len() != self.dim {
                return Err(EngineError::Embedding(format!(
                    "vector for chunk {id} has dimension {}, index expects {}",
                    vector.len(),
                    self.dim
                )));
            }
            ensure_capacity(&inner.index, 1)?;
            inner
                .index
                .add(*id as u64, vector)
                .map_err(|e| EngineError::IndexCorruption(format!("add failed: {e}")))?;
        }
        if !entries.is_empty() {
            inner.dirty = true;
        }
        Ok(())
    }

    pub fn remove(&self, id: ChunkId) -> EngineResult<()> {
        self.remove_batch(&[id])
    }

    pub fn remove_batch(&self, ids: &[ChunkId]) -> EngineResult<()> {
        let mut inner = self.inner.lock();
        for id in ids {
            // Removing a key that was never added is a no-op, not an error.
            let _ = inner.index.remove(*id as u64);
        }
        if !ids.is_empty() {
            inner.dirty = true;
        }
        Ok(())
    }

    /// k-NN search. `quality` is the recall/latency knob (expansion_search,
    /// clamped to at least k); `None` uses the calibrated default.
    pub fn search(
        &self,
        query: &[f32],
        k: usize,
        quality: Option<usize>,
    ) -> EngineResult<Vec<(ChunkId, f32)>> {
        if query.len() != self.dim {
            return Err(EngineError::Search(format!(
                "query vector has dimension {}, index expects {}",
                query.len(),
                self.dim
            )));
        }

        let mut inner = self.inner.lock();
        if inner.index.size() == 0 {
            return Ok(Vec::new());
        }

        let wanted = quality.unwrap_or(self.default_expansion).max(k);
        if wanted != inner.expansion {
            inner.index.change_expansion_search(wanted);
            inner.expansion = wanted;
        }

        let matches = inner
            .index
            .search(query, k)
            .map_err(|e| EngineError::Search(format!("vector search failed: {e}")))?;

        Ok(matches
            .keys
            .iter()
            .zip(matches.distances.iter())
            .map(|(key, dist)| (*key as ChunkId, *dist))
            .collect())
    }

    pub fn len(&self) -> usize {
        self.inner.lock().index.size()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Durably persist the index if anything changed since the last flush.
    /// Serialized by the index lock like every other operation.
    pub fn flush(&self) -> EngineResult<()> {
        let mut inner = self.inner.lock();
        if !inner.dirty {
            return Ok(());
        }
        inner
            .index
            .save(self.path.to_string_lossy().as_ref())
            .map_err(|e| EngineError::IndexCorruption(format!("index save failed: {e}")))?;
        inner.dirty = false;
        Ok(())
    }

    /// Flush and release. Called once during graceful shutdown.
    pub fn close(&self) -> EngineResult<()> {
        self.flush()
    }

    /// Reconstruct the whole index from the vectors table, then persist.
    /// Returns the number of vectors loaded.
    pub fn rebuild_from_vectors(&self, db: &Db) -> EngineResult<usize> {
        let fresh = new_index(self.dim, self.default_expansion)?;
        fresh
            .reserve(INITIAL_CAPACITY)
            .map_err(|e| EngineError::IndexCorruption(format!("reserve failed: {e}")))?;

        let mut failed = 0usize;
        let count = db.for_each_vector(|id, vector| {
            if ensure_capacity(&fresh, 1).is_err() || fresh.add(id as u64, &vector).is_err() {
                failed += 1;
            }
        })?;
        if failed > 0 {
            warn!(failed, "some vectors could not be re-added during rebuild");
        }

        let mut inner = self.inner.lock();
        inner.index = fresh;
        inner.expansion = self.default_expansion;
        inner.dirty = true;
        inner
            .index
            .save(self.path.to_string_lossy().as_ref())
            .map_err(|e| EngineError::IndexCorruption(format!("index save failed: {e}")))?;
        inner.dirty = false;

        info!(count, "vector index rebuilt from vectors table");
        Ok(count - failed)
    }
}

fn new_index(dim: usize, expansion_search: usize) -> EngineResult<usearch::Index> {
    let options = IndexOptions {
        dimensions: dim,
        metric: MetricKind::Cos,
        quantization: ScalarKind::F32,
        connectivity: 16,
        expansion_add: 128,
        expansion_search,
        multi: false,
    };
    usearch::Index::new(&options)
        .map_err(|e| EngineError::IndexCorruption(format!("failed to create vector index: {e}")))
}

fn ensure_capacity(index: &usearch::Index, extra: usize) -> EngineResult<()> {
    let needed = index.size() + extra;
    if needed >= index.capacity() {
        index
            .reserve((index.capacity() * 2).max(INITIAL_CAPACITY))
            .map_err(|e| EngineError::IndexCorruption(format!("reserve failed: {e}")))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(dim: usize, hot: usize) -> Vec<f32> {
        let mut v = vec![0.0; dim];
        v[hot] = 1.0;
        v
    }

    #[test]
    fn insert_search_remove() {
        let dir = tempfile::tempdir().unwrap();
        let idx = VectorIndex::open(&dir.path().join("v.usearch"), 8, 64).unwrap();

        idx.insert(1, &unit(8, 0)).unwrap();
        idx.insert(2, &unit(8, 1)).unwrap();
        assert_eq!(idx.len(), 2);

        let hits = idx.search(&unit(8, 0), 2, None).unwrap();
        assert_eq!(hits[0].0, 1);
        assert!(hits[0].1 < hits[1].1);

        idx.remove(1).unwrap();
        let hits = idx.search(&unit(8, 0), 2, None).unwrap();
        assert!(hits.iter().all(|(id, _)| *id != 1));
    }

    #[test]
    fn dimension_mismatch_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let idx = VectorIndex::open(&dir.path().join("v.usearch"), 8, 64).unwrap();
        assert!(idx.insert(1, &[1.0, 0.0]).is_err());
        assert!(idx.search(&[1.0, 0.0], 1, None).is_err());
    }

    #[test]
    fn flush_persists_across_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("v.usearch");
        {
            let idx = VectorIndex::open(&path, 4, 64).unwrap();
            idx.insert(7, &unit(4, 2)).unwrap();
            idx.close().unwrap();
        }
        let idx = VectorIndex::open(&path, 4, 64).unwrap();
        assert_eq!(idx.len(), 1);
        let hits = idx.search(&unit(4, 2), 1, None).unwrap();
        assert_eq!(hits[0].0, 7);
    }

    #[test]
    fn rebuild_restores_from_table() {
        let dir = tempfile::tempdir().unwrap();
        let db = Db::open_in_memory().unwrap();
        db.with_conn(|c| {
            c.execute(
                "INSERT INTO documents(id, path, hash, extraction_method, indexed_at, chunk_count)
                 VALUES (1, 'a.md', 'h', 'text', 0, 1)",
                [],
            )?;
            c.execute(
                "INSERT INTO chunks(id, document_id, ordinal, content) VALUES (10, 1, 0, 'x')",
                [],
            )?;
            c.execute(
                "INSERT INTO vectors(chunk_id, embedding) VALUES (10, ?1)",
                rusqlite::params![crate::store::encode_embedding(&unit(4, 1))],
            )?;
            Ok(())
        })
        .unwrap();

        let idx = VectorIndex::open(&dir.path().join("v.usearch"), 4, 64).unwrap();
        assert_eq!(idx.len(), 0);
        let n = idx.rebuild_from_vectors(&db).unwrap();
        assert_eq!(n, 1);
        assert_eq!(idx.len(), 1);
        let hits = idx.search(&unit(4, 1), 1, None).unwrap();
        assert_eq!(hits[0].0, 10);
    }
}
