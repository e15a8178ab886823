//! Self-healing and maintenance.
//!
//! Runs once at startup (before the watcher begins feeding the queue) and is
//! also exposed through the control plane. Every operation is idempotent and
//! supports dry-run. Repairs are non-fatal: anything that cannot be fixed is
//! logged and skipped, never aborts startup.

use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use crate::error::EngineResult;
use crate::fts::FtsIndex;
use crate::pipeline::IngestQueue;
use crate::repository::Repository;
use crate::search::QueryCache;
use crate::store::Db;
use crate::types::Priority;
use crate::vector::VectorIndex;

#[derive(Debug, Clone, Default, Serialize)]
pub struct IntegrityReport {
    /// Progress says completed but no document row exists.
    pub orphaned_files: Vec<String>,
    /// Progress left pending / in_progress / failed.
    pub incomplete_files: Vec<String>,
    /// Document row whose file is gone from disk.
    pub phantom_documents: Vec<String>,
    /// Document rows with chunk_count = 0.
    pub empty_documents: Vec<String>,
    pub orphan_chunks: usize,
    pub orphan_vectors: usize,
    /// (index size, vectors table size) when they disagree.
    pub vector_index_mismatch: Option<(usize, usize)>,
    /// (fts doc count, chunks table size) when they disagree.
    pub fts_mismatch: Option<(u64, i64)>,
    /// Documents whose stored chunk_count disagrees with the live count.
    pub chunk_count_mismatches: Vec<String>,
}

impl IntegrityReport {
    pub fn is_clean(&self) -> bool {
        self.orphaned_files.is_empty()
            && self.incomplete_files.is_empty()
            && self.phantom_documents.is_empty()
            && self.orphan_chunks == 0
            && self.orphan_vectors == 0
            && self.vector_index_mismatch.is_none()
            && self.fts_mismatch.is_none()
            && self.chunk_count_mismatches.is_empty()
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct OrphanCleanup {
    pub orphan_chunks: usize,
    pub orphan_vectors: usize,
    pub phantom_documents: usize,
    pub empty_documents: usize,
    pub dry_run: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RebuildOutcome {
    pub rebuilt: bool,
    pub count: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RepairOutcome {
    pub vector_index: RebuildOutcome,
    pub fts_index: RebuildOutcome,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ReindexOutcome {
    pub documents_queued: usize,
    pub paths: Vec<String>,
    pub dry_run: bool,
}

pub struct Sanitizer {
    db: Arc<Db>,
    repo: Arc<Repository>,
    fts: Arc<FtsIndex>,
    vectors: Arc<VectorIndex>,
    queue: Arc<IngestQueue>,
    cache: Arc<QueryCache>,
    root_abs: PathBuf,
    auto_self_heal: bool,
}

impl Sanitizer {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        db: Arc<Db>,
        repo: Arc<Repository>,
        fts: Arc<FtsIndex>,
        vectors: Arc<VectorIndex>,
        queue: Arc<IngestQueue>,
        cache: Arc<QueryCache>,
        root_abs: PathBuf,
        auto_self_heal: bool,
    ) -> Self {
        Self {
            db,
            repo,
            fts,
            vectors,
            queue,
            cache,
            root_abs,
            auto_self_heal,
        }
    }

    /// Document paths whose files are gone from disk. Stat calls run in
    /// parallel; large corpora make this the slow part of verification.
    fn missing_files(&self) -> EngineResult<Vec<String>> {
        use rayon::prelude::*;
        let mut missing: Vec<String> = self
            .db
            .all_document_paths()?
            .into_par_iter()
            .filter_map(|(_, path)| (!self.root_abs.join(&path).exists()).then_some(path))
            .collect();
        missing.sort();
        Ok(missing)
    }

    /// Pure detection; mutates nothing.
    pub fn verify_integrity(&self) -> EngineResult<IntegrityReport> {
        let mut report = IntegrityReport::default();

        report.orphaned_files = self
            .db
            .progress_completed_without_document()?
            .into_iter()
            .map(|r| r.path)
            .collect();

        report.incomplete_files = self
            .db
            .progress_unfinished()?
            .into_iter()
            .map(|r| r.path)
            .collect();

        report.phantom_documents = self.missing_files()?;

        report.empty_documents = self
            .db
            .empty_documents()?
            .into_iter()
            .map(|(_, p)| p)
            .collect();

        report.orphan_chunks = self.db.orphan_chunk_ids()?.len();
        report.orphan_vectors = self.db.orphan_vector_ids()?.len();

        let index_size = self.vectors.len();
        let table_size = self.db.vector_count()? as usize;
        if index_size != table_size {
            report.vector_index_mismatch = Some((index_size, table_size));
        }

        let fts_size = self.fts.num_docs();
        let chunk_size = self.db.chunk_count()?;
        if fts_size != chunk_size as u64 {
            report.fts_mismatch = Some((fts_size, chunk_size));
        }

        report.chunk_count_mismatches = self
            .db
            .mismatched_chunk_counts()?
            .into_iter()
            .map(|(_, p, _, _)| p)
            .collect();

        Ok(report)
    }

    /// The startup pass: detect, then repair what can be repaired. Returns
    /// the number of repair actions taken. Orphaned and incomplete files are
    /// re-enqueued at HIGH priority; phantom documents are deleted; index
    /// mismatches trigger rebuilds from the tables of record.
    pub fn startup_heal(&self) -> EngineResult<usize> {
        let report = self.verify_integrity()?;
        if report.is_clean() && report.empty_documents.is_empty() {
            info!("self-heal: store is consistent");
            return Ok(0);
        }

        let mut actions = 0usize;

        for path in &report.orphaned_files {
            self.queue.enqueue(path, Priority::High, true);
            actions += 1;
        }
        for path in &report.incomplete_files {
            self.queue.enqueue(path, Priority::High, true);
            actions += 1;
        }

        for path in &report.phantom_documents {
            match self.repo.delete_document(path) {
                Ok(_) => actions += 1,
                Err(e) => warn!(path, error = %e, "failed to delete phantom document"),
            }
        }

        if self.auto_self_heal {
            for path in &report.empty_documents {
                // still on disk means legitimately empty; keep the row so
                // the file is not re-processed forever
                if self.root_abs.join(path).exists() {
                    continue;
                }
                match self.repo.delete_document(path) {
                    Ok(_) => actions += 1,
                    Err(e) => warn!(path, error = %e, "failed to delete empty document"),
                }
            }
        }

        let orphan_chunks = self.db.orphan_chunk_ids()?;
        actions += self.repo.delete_orphan_chunks(&orphan_chunks)?;
        let orphan_vectors = self.db.orphan_vector_ids()?;
        actions += self.repo.delete_orphan_vectors(&orphan_vectors)?;

        if report.vector_index_mismatch.is_some() {
            match self.vectors.rebuild_from_vectors(&self.db) {
                Ok(n) => {
                    info!(count = n, "self-heal rebuilt vector index");
                    actions += 1;
                }
                Err(e) => warn!(error = %e, "vector index rebuild failed"),
            }
        }
        if report.fts_mismatch.is_some() {
            match self.fts.rebuild_from_chunks(&self.db) {
                Ok(n) => {
                    info!(count = n, "self-heal rebuilt fts index");
                    actions += 1;
                }
                Err(e) => warn!(error = %e, "fts index rebuild failed"),
            }
        }

        self.cache.clear();
        info!(actions, "self-heal pass finished");
        Ok(actions)
    }

    pub fn cleanup_orphans(&self, dry_run: bool) -> EngineResult<OrphanCleanup> {
        let orphan_chunks = self.db.orphan_chunk_ids()?;
        let orphan_vectors = self.db.orphan_vector_ids()?;

        let phantom = self.missing_files()?;
        let empty: Vec<String> = self
            .db
            .empty_documents()?
            .into_iter()
            .map(|(_, p)| p)
            .filter(|p| !self.root_abs.join(p).exists())
            .collect();

        let cleanup = OrphanCleanup {
            orphan_chunks: orphan_chunks.len(),
            orphan_vectors: orphan_vectors.len(),
            phantom_documents: phantom.len(),
            empty_documents: empty.len(),
            dry_run,
        };
        if dry_run {
            return Ok(cleanup);
        }

        self.repo.delete_orphan_chunks(&orphan_chunks)?;
        self.repo.delete_orphan_vectors(&orphan_vectors)?;
        for path in phantom.iter().chain(empty.iter()) {
            if let Err(e) = self.repo.delete_document(path) {
                warn!(path, error = %e, "orphan cleanup: delete failed");
            }
        }
        self.cache.clear();
        Ok(cleanup)
    }

    pub fn rebuild_vector_index(&self, dry_run: bool) -> EngineResult<RebuildOutcome> {
        if dry_run {
            return Ok(RebuildOutcome {
                rebuilt: false,
                count: self.db.vector_count()? as usize,
            });
        }
        let count = self.vectors.rebuild_from_vectors(&self.db)?;
        self.cache.clear();
        Ok(RebuildOutcome {
            rebuilt: true,
            count,
        })
    }

    pub fn rebuild_fts_index(&self, dry_run: bool) -> EngineResult<RebuildOutcome> {
        if dry_run {
            return Ok(RebuildOutcome {
                rebuilt: false,
                count: self.db.chunk_count()? as usize,
            });
        }
        let count = self.fts.rebuild_from_chunks(&self.db)?;
        self.cache.clear();
        Ok(RebuildOutcome {
            rebuilt: true,
            count,
        })
    }

    pub fn repair_indexes(&self, dry_run: bool) -> EngineResult<RepairOutcome> {
        Ok(RepairOutcome {
            vector_index: self.rebuild_vector_index(dry_run)?,
            fts_index: self.rebuild_fts_index(dry_run)?,
        })
    }

    /// Re-enqueue documents whose progress (or chunk accounting) marks them
    /// as unhealthy. `issue_types` filters by {"failed", "rejected",
    /// "pending", "in_progress", "mismatch"}; None means failed + pending +
    /// in_progress.
    pub fn reindex_failed_documents(
        &self,
        issue_types: Option<&[String]>,
        dry_run: bool,
    ) -> EngineResult<ReindexOutcome> {
        let wanted: Vec<&str> = match issue_types {
            Some(types) => types.iter().map(|s| s.as_str()).collect(),
            None => vec!["failed", "pending", "in_progress"],
        };

        let mut paths: Vec<String> = Vec::new();
        let statuses: Vec<&str> = wanted
            .iter()
            .copied()
            .filter(|t| matches!(*t, "failed" | "rejected" | "pending" | "in_progress"))
            .collect();
        if !statuses.is_empty() {
            paths.extend(
                self.db
                    .progress_with_status(&statuses)?
                    .into_iter()
                    .map(|r| r.path),
            );
        }
        if wanted.contains(&"mismatch") {
            paths.extend(
                self.db
                    .mismatched_chunk_counts()?
                    .into_iter()
                    .map(|(_, p, _, _)| p),
            );
        }
        paths.sort();
        paths.dedup();
        paths.retain(|p| self.root_abs.join(p).exists());

        if !dry_run {
            for path in &paths {
                self.queue.enqueue(path, Priority::High, true);
            }
        }

        Ok(ReindexOutcome {
            documents_queued: paths.len(),
            paths,
            dry_run,
        })
    }
}
