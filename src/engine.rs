//! The control plane. Constructs every component once, wires the pipeline,
//! and exposes the public operations (ingest, query, pause/resume/clear,
//! status, document CRUD, maintenance). The HTTP layer in `routes/` is a
//! thin adapter over this type.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::config::EngineConfig;
use crate::embed::{self, Embedder};
use crate::error::{EngineError, EngineResult};
use crate::events::EngineEvent;
use crate::extract::ExtractorRegistry;
use crate::fingerprint;
use crate::fts::FtsIndex;
use crate::heal::{
    IntegrityReport, OrphanCleanup, ReindexOutcome, RepairOutcome, Sanitizer,
};
use crate::pipeline::{
    Coordinator, EnqueueOutcome, IngestQueue, PipelineStatus, Shared, WatchService,
};
use crate::repository::{DeleteOutcome, Repository};
use crate::rerank::{self, Reranker};
use crate::search::{HybridConfig, HybridSearcher, QueryCache, QueryExecutor, SearchRequest};
use crate::store::Db;
use crate::store::graph::GraphNeighbor;
use crate::types::{DocumentInfo, DocumentSummary, Priority, SearchResult};
use crate::validate::{DefaultValidator, Validator};
use crate::vector::VectorIndex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestStatus {
    Enqueued,
    Deduplicated,
    QueueFull,
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestOutcome {
    pub status: IngestStatus,
    pub path: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueueState {
    pub queue_size: usize,
    pub paused: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct Health {
    pub document_count: i64,
    pub chunk_count: i64,
    pub indexing_in_progress: bool,
    pub model_name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReindexDocumentOutcome {
    pub deletion: DeleteOutcome,
    pub queued: bool,
    pub priority: Priority,
}

pub struct Engine {
    config: EngineConfig,
    root_abs: PathBuf,
    db: Arc<Db>,
    repo: Arc<Repository>,
    coordinator: Coordinator,
    watcher: WatchService,
    executor: QueryExecutor,
    sanitizer: Sanitizer,
    embedder: Arc<dyn Embedder>,
    events: broadcast::Sender<EngineEvent>,
    stopped: AtomicBool,
}

impl Engine {
    /// Build an engine from configuration, constructing the configured
    /// embedder/reranker and the default validator and extractor registry.
    pub fn from_config(config: EngineConfig) -> EngineResult<Self> {
        let embedder = embed::from_config(&config.embedder)?;
        let reranker = rerank::from_config(&config.reranker)?;
        let validator: Arc<dyn Validator> =
            Arc::new(DefaultValidator::new(config.max_file_size_bytes));
        Self::new(
            config,
            embedder,
            reranker,
            validator,
            Arc::new(ExtractorRegistry::with_defaults()),
        )
    }

    /// Full-injection constructor: every external collaborator is passed in.
    pub fn new(
        config: EngineConfig,
        embedder: Arc<dyn Embedder>,
        reranker: Option<Arc<dyn Reranker>>,
        validator: Arc<dyn Validator>,
        registry: Arc<ExtractorRegistry>,
    ) -> EngineResult<Self> {
        std::fs::create_dir_all(&config.root_dir)?;
        std::fs::create_dir_all(&config.data_dir)?;
        let root_abs = dunce::canonicalize(&config.root_dir)?;

        let db = Arc::new(Db::open(&config.data_dir.join("lodestone.db"))?);
        db.check_embedding_meta(embedder.dimension(), embedder.model_name())?;

        let fts = Arc::new(FtsIndex::open(&config.data_dir.join("fts"))?);
        let vectors = Arc::new(VectorIndex::open(
            &config.data_dir.join("vectors.usearch"),
            embedder.dimension(),
            config.search_expansion,
        )?);
        let repo = Arc::new(Repository::new(db.clone(), fts.clone(), vectors.clone()));

        let cache = Arc::new(QueryCache::new(config.query_cache_capacity));
        let searcher = Arc::new(HybridSearcher::new(
            db.clone(),
            fts.clone(),
            vectors.clone(),
            embedder.clone(),
            reranker,
            HybridConfig {
                candidate_multiplier: config.candidate_multiplier,
                min_candidates: config.min_candidates,
                rrf_k: config.rrf_k,
                title_boost: config.title_boost,
                rerank_candidates: config.rerank_candidates,
                search_quality: Some(config.search_expansion),
            },
        ));
        let executor = QueryExecutor::new(searcher, cache.clone());

        let queue = Arc::new(IngestQueue::new(config.queue_capacity));
        let (events, _) = broadcast::channel(1024);

        let shared = Arc::new(Shared {
            root_abs: root_abs.clone(),
            queue: queue.clone(),
            db: db.clone(),
            repo: repo.clone(),
            registry,
            validator,
            embedder: embedder.clone(),
            cache: cache.clone(),
            vectors: vectors.clone(),
            events: events.clone(),
            cancel: AtomicBool::new(false),
            config: config.clone(),
        });
        let coordinator = Coordinator::new(shared);

        let watcher = WatchService::new(
            root_abs.clone(),
            config.watcher_debounce_ms,
            queue.clone(),
        );

        let sanitizer = Sanitizer::new(
            db.clone(),
            repo.clone(),
            fts,
            vectors,
            queue,
            cache,
            root_abs.clone(),
            config.auto_self_heal,
        );

        Ok(Self {
            config,
            root_abs,
            db,
            repo,
            coordinator,
            watcher,
            executor,
            sanitizer,
            embedder,
            events,
            stopped: AtomicBool::new(false),
        })
    }

    /// Start order matters: heal before the pipeline consumes anything the
    /// heal pass enqueues, pipeline before the watcher produces events.
    pub fn start(&self) -> EngineResult<usize> {
        let heal_actions = self.sanitizer.startup_heal()?;
        if heal_actions > 0 {
            let _ = self.events.send(EngineEvent::HealCompleted {
                actions: heal_actions,
            });
        }

        self.coordinator.start();

        if self.config.backfill_on_start {
            let queued = self.backfill_scan();
            info!(queued, "startup backfill scan finished");
        }

        self.watcher.start()?;
        Ok(heal_actions)
    }

    /// Walk the root and enqueue supported files at LOW priority. The
    /// extraction stage's hash check keeps unchanged files cheap.
    fn backfill_scan(&self) -> usize {
        let mut queued = 0usize;
        let walker = ignore::WalkBuilder::new(&self.root_abs)
            .hidden(true)
            .git_ignore(true)
            .max_depth(Some(32))
            .build();
        for entry in walker.filter_map(|e| e.ok()) {
            if !entry.file_type().is_some_and(|t| t.is_file()) {
                continue;
            }
            if let Some(key) = crate::pipeline::watcher::watchable_key(&self.root_abs, entry.path())
                && self.coordinator.submit(&key, Priority::Low, false) == EnqueueOutcome::Enqueued
            {
                queued += 1;
            }
        }
        queued
    }

    // ---- control plane ----------------------------------------------------

    pub fn ingest(&self, path: &str, priority: Priority, force: bool) -> EngineResult<IngestOutcome> {
        let (_, key) = fingerprint::canonicalize(&self.root_abs, std::path::Path::new(path))?;
        let status = match self.coordinator.submit(&key, priority, force) {
            EnqueueOutcome::Enqueued => IngestStatus::Enqueued,
            EnqueueOutcome::Deduplicated => IngestStatus::Deduplicated,
            EnqueueOutcome::Full => IngestStatus::QueueFull,
        };
        Ok(IngestOutcome { status, path: key })
    }

    pub fn query(&self, req: &SearchRequest) -> EngineResult<Arc<Vec<SearchResult>>> {
        self.executor.execute(req)
    }

    pub fn pause(&self) -> QueueState {
        self.coordinator.pause();
        self.queue_state()
    }

    pub fn resume(&self) -> QueueState {
        self.coordinator.resume();
        self.queue_state()
    }

    pub fn clear(&self) -> QueueState {
        self.coordinator.clear();
        self.queue_state()
    }

    fn queue_state(&self) -> QueueState {
        let status = self.coordinator.status();
        QueueState {
            queue_size: status.input_queue_size,
            paused: status.paused,
        }
    }

    pub fn status(&self) -> PipelineStatus {
        self.coordinator.status()
    }

    pub fn health(&self) -> EngineResult<Health> {
        let status = self.coordinator.status();
        let busy = status.input_queue_size > 0
            || !status.extract.active_jobs.is_empty()
            || !status.embed.active_jobs.is_empty()
            || !status.store.active_jobs.is_empty()
            || status.embed.queue_size > 0
            || status.store.queue_size > 0;
        Ok(Health {
            document_count: self.db.document_count()?,
            chunk_count: self.db.chunk_count()?,
            indexing_in_progress: busy,
            model_name: self.embedder.model_name().to_string(),
        })
    }

    pub fn list_documents(&self, pattern: Option<&str>) -> EngineResult<Vec<DocumentSummary>> {
        self.db.list_documents(pattern)
    }

    pub fn get_document(&self, path: &str) -> EngineResult<DocumentInfo> {
        if let Some(info) = self.db.document_by_path(path)? {
            return Ok(info);
        }
        // tolerate non-canonical spellings of an existing file
        if let Ok((_, key)) = fingerprint::canonicalize(&self.root_abs, std::path::Path::new(path))
            && let Some(info) = self.db.document_by_path(&key)?
        {
            return Ok(info);
        }
        Err(EngineError::NotFound(path.to_string()))
    }

    pub fn delete_document(&self, path: &str) -> EngineResult<DeleteOutcome> {
        let key = self.get_document(path)?.summary.path;
        let out = self.repo.delete_document(&key)?;
        self.executor.cache().clear();
        let _ = self.events.send(EngineEvent::DocumentDeleted { path: key });
        Ok(out)
    }

    /// Delete the stored generation and re-enqueue at HIGH priority.
    pub fn reindex_document(&self, path: &str) -> EngineResult<ReindexDocumentOutcome> {
        let key = self.get_document(path)?.summary.path;
        let deletion = self.repo.delete_document(&key)?;
        self.executor.cache().clear();
        let queued = !matches!(
            self.coordinator.submit(&key, Priority::High, true),
            EnqueueOutcome::Full
        );
        Ok(ReindexDocumentOutcome {
            deletion,
            queued,
            priority: Priority::High,
        })
    }

    // ---- maintenance ------------------------------------------------------

    pub fn verify_integrity(&self) -> EngineResult<IntegrityReport> {
        self.sanitizer.verify_integrity()
    }

    pub fn cleanup_orphans(&self, dry_run: bool) -> EngineResult<OrphanCleanup> {
        self.sanitizer.cleanup_orphans(dry_run)
    }

    pub fn rebuild_vector_index(&self, dry_run: bool) -> EngineResult<crate::heal::RebuildOutcome> {
        self.sanitizer.rebuild_vector_index(dry_run)
    }

    pub fn rebuild_fts_index(&self, dry_run: bool) -> EngineResult<crate::heal::RebuildOutcome> {
        self.sanitizer.rebuild_fts_index(dry_run)
    }

    pub fn repair_indexes(&self, dry_run: bool) -> EngineResult<RepairOutcome> {
        self.sanitizer.repair_indexes(dry_run)
    }

    pub fn reindex_failed_documents(
        &self,
        issue_types: Option<&[String]>,
        dry_run: bool,
    ) -> EngineResult<ReindexOutcome> {
        self.sanitizer.reindex_failed_documents(issue_types, dry_run)
    }

    // ---- extras -----------------------------------------------------------

    pub fn graph_neighbors(&self, path: &str, max_hops: usize) -> EngineResult<Vec<GraphNeighbor>> {
        self.db.graph_neighbors(path, max_hops.clamp(1, 6))
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Graceful: stop the watcher, drain the pipeline, flush + close the
    /// vector index. Immediate: skip draining; in-flight progress rows are
    /// left for the next startup's heal pass.
    pub fn shutdown(&self, graceful: bool) -> EngineResult<()> {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.watcher.stop();
        if let Err(e) = self.coordinator.shutdown(graceful) {
            warn!(error = %e, "pipeline shutdown reported an error");
        }
        info!(graceful, "engine stopped");
        Ok(())
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        let _ = self.shutdown(true);
    }
}
