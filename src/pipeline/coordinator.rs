//! Pipeline coordinator: owns the queue, the stage channels, the worker
//! threads and the vector-index flush timer.
//!
//! Topology: N chunk workers pull from the priority queue, M embed workers
//! pull extracted documents, one storage worker serializes commits. Every
//! channel is bounded, so a slow stage backpressures upstream. Workers are
//! blocking threads (extractors, the candle embedder and rusqlite are all
//! synchronous); the async control plane crosses over via `spawn_blocking`.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use crate::config::EngineConfig;
use crate::embed::Embedder;
use crate::error::EngineResult;
use crate::events::EngineEvent;
use crate::extract::ExtractorRegistry;
use crate::repository::Repository;
use crate::search::QueryCache;
use crate::store::Db;
use crate::types::{EmbeddedDocument, ExtractedDocument, Priority};
use crate::validate::Validator;
use crate::vector::VectorIndex;

use super::queue::{EnqueueOutcome, IngestQueue};
use super::{embed_stage, extract_stage, store_stage};

/// Everything the stage workers need, constructed once at startup and passed
/// explicitly — no ambient access.
pub struct Shared {
    pub config: EngineConfig,
    pub root_abs: PathBuf,
    pub queue: Arc<IngestQueue>,
    pub db: Arc<Db>,
    pub repo: Arc<Repository>,
    pub registry: Arc<ExtractorRegistry>,
    pub validator: Arc<dyn Validator>,
    pub embedder: Arc<dyn Embedder>,
    pub cache: Arc<QueryCache>,
    pub vectors: Arc<VectorIndex>,
    pub events: broadcast::Sender<EngineEvent>,
    pub cancel: AtomicBool,
}

#[derive(Default)]
pub struct ActiveSet(dashmap::DashSet<String>);

impl ActiveSet {
    fn insert(&self, path: &str) {
        self.0.insert(path.to_string());
    }
    fn remove(&self, path: &str) {
        self.0.remove(path);
    }
    pub fn list(&self) -> Vec<String> {
        let mut v: Vec<String> = self.0.iter().map(|e| e.key().clone()).collect();
        v.sort();
        v
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StageStatus {
    pub queue_size: usize,
    pub active_jobs: Vec<String>,
    pub workers: usize,
    pub worker_running: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct PipelineStatus {
    pub input_queue_size: usize,
    pub paused: bool,
    /// Queue lengths per band, URGENT first.
    pub bands: [usize; Priority::COUNT],
    pub extract: StageStatus,
    pub embed: StageStatus,
    pub store: StageStatus,
}

pub struct Coordinator {
    shared: Arc<Shared>,
    threads: Mutex<Vec<JoinHandle<()>>>,
    extract_active: Arc<ActiveSet>,
    embed_active: Arc<ActiveSet>,
    store_active: Arc<ActiveSet>,
    extract_running: Arc<AtomicUsize>,
    embed_running: Arc<AtomicUsize>,
    store_running: Arc<AtomicUsize>,
    /// Receiver clones held only for depth introspection.
    chunk_probe: Mutex<Option<flume::Receiver<ExtractedDocument>>>,
    embed_probe: Mutex<Option<flume::Receiver<EmbeddedDocument>>>,
    flush_stop: Arc<(Mutex<bool>, Condvar)>,
    started: AtomicBool,
}

impl Coordinator {
    pub fn new(shared: Arc<Shared>) -> Self {
        Self {
            shared,
            threads: Mutex::new(Vec::new()),
            extract_active: Arc::new(ActiveSet::default()),
            embed_active: Arc::new(ActiveSet::default()),
            store_active: Arc::new(ActiveSet::default()),
            extract_running: Arc::new(AtomicUsize::new(0)),
            embed_running: Arc::new(AtomicUsize::new(0)),
            store_running: Arc::new(AtomicUsize::new(0)),
            chunk_probe: Mutex::new(None),
            embed_probe: Mutex::new(None),
            flush_stop: Arc::new((Mutex::new(false), Condvar::new())),
            started: AtomicBool::new(false),
        }
    }

    pub fn shared(&self) -> &Arc<Shared> {
        &self.shared
    }

    pub fn start(&self) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }

        let cap = self.shared.config.stage_channel_capacity.max(1);
        let (chunk_tx, chunk_rx) = flume::bounded::<ExtractedDocument>(cap);
        let (embed_tx, embed_rx) = flume::bounded::<EmbeddedDocument>(cap);
        *self.chunk_probe.lock() = Some(chunk_rx.clone());
        *self.embed_probe.lock() = Some(embed_rx.clone());

        let mut threads = self.threads.lock();

        for i in 0..self.shared.config.chunk_workers.max(1) {
            let shared = self.shared.clone();
            let active = self.extract_active.clone();
            let running = self.extract_running.clone();
            let tx = chunk_tx.clone();
            threads.push(
                std::thread::Builder::new()
                    .name(format!("lodestone-chunk-{i}"))
                    .spawn(move || {
                        running.fetch_add(1, Ordering::SeqCst);
                        extract_loop(&shared, &active, &tx);
                        running.fetch_sub(1, Ordering::SeqCst);
                    })
                    .expect("failed to spawn chunk worker"),
            );
        }
        drop(chunk_tx);

        for i in 0..self.shared.config.embed_workers.max(1) {
            let shared = self.shared.clone();
            let active = self.embed_active.clone();
            let running = self.embed_running.clone();
            let rx = chunk_rx.clone();
            let tx = embed_tx.clone();
            threads.push(
                std::thread::Builder::new()
                    .name(format!("lodestone-embed-{i}"))
                    .spawn(move || {
                        running.fetch_add(1, Ordering::SeqCst);
                        embed_loop(&shared, &active, &rx, &tx);
                        running.fetch_sub(1, Ordering::SeqCst);
                    })
                    .expect("failed to spawn embed worker"),
            );
        }
        drop(embed_tx);
        drop(chunk_rx);

        {
            let shared = self.shared.clone();
            let active = self.store_active.clone();
            let running = self.store_running.clone();
            threads.push(
                std::thread::Builder::new()
                    .name("lodestone-store".to_string())
                    .spawn(move || {
                        running.fetch_add(1, Ordering::SeqCst);
                        store_loop(&shared, &active, &embed_rx);
                        running.fetch_sub(1, Ordering::SeqCst);
                    })
                    .expect("failed to spawn store worker"),
            );
        }

        {
            let vectors = self.shared.vectors.clone();
            let stop = self.flush_stop.clone();
            let interval =
                Duration::from_secs(self.shared.config.vector_flush_interval_secs.max(1));
            threads.push(
                std::thread::Builder::new()
                    .name("lodestone-flush".to_string())
                    .spawn(move || {
                        let (lock, cvar) = &*stop;
                        loop {
                            let mut stopped = lock.lock();
                            if *stopped {
                                break;
                            }
                            cvar.wait_for(&mut stopped, interval);
                            if *stopped {
                                break;
                            }
                            drop(stopped);
                            if let Err(e) = vectors.flush() {
                                warn!(error = %e, "periodic vector index flush failed");
                            }
                        }
                    })
                    .expect("failed to spawn flush timer"),
            );
        }

        info!(
            chunk_workers = self.shared.config.chunk_workers,
            embed_workers = self.shared.config.embed_workers,
            "pipeline started"
        );
    }

    /// Non-blocking best-effort submission; never bypasses the queue.
    pub fn submit(&self, path: &str, priority: Priority, force: bool) -> EnqueueOutcome {
        self.shared.queue.enqueue(path, priority, force)
    }

    pub fn pause(&self) {
        self.shared.queue.pause();
        let _ = self.shared.events.send(EngineEvent::QueuePaused);
    }

    pub fn resume(&self) {
        self.shared.queue.resume();
        let _ = self.shared.events.send(EngineEvent::QueueResumed);
    }

    /// Clear queued items. In-flight work in later stages runs to
    /// completion.
    pub fn clear(&self) -> usize {
        let removed = self.shared.queue.clear();
        let _ = self.shared.events.send(EngineEvent::QueueCleared { removed });
        removed
    }

    pub fn status(&self) -> PipelineStatus {
        let queue = &self.shared.queue;
        PipelineStatus {
            input_queue_size: queue.size(),
            paused: queue.is_paused(),
            bands: queue.band_sizes(),
            extract: StageStatus {
                queue_size: queue.size(),
                active_jobs: self.extract_active.list(),
                workers: self.shared.config.chunk_workers,
                worker_running: self.extract_running.load(Ordering::SeqCst) > 0,
            },
            embed: StageStatus {
                queue_size: self.chunk_probe.lock().as_ref().map_or(0, |r| r.len()),
                active_jobs: self.embed_active.list(),
                workers: self.shared.config.embed_workers,
                worker_running: self.embed_running.load(Ordering::SeqCst) > 0,
            },
            store: StageStatus {
                queue_size: self.embed_probe.lock().as_ref().map_or(0, |r| r.len()),
                active_jobs: self.store_active.list(),
                workers: 1,
                worker_running: self.store_running.load(Ordering::SeqCst) > 0,
            },
        }
    }

    /// Stop the pipeline. Graceful: stop accepting, drain every stage, then
    /// flush and close the vector index. Immediate: workers bail after their
    /// current item; whatever is left in flight stays `in_progress` for the
    /// next startup's heal pass.
    pub fn shutdown(&self, graceful: bool) -> EngineResult<()> {
        if !graceful {
            self.shared.cancel.store(true, Ordering::SeqCst);
        }
        self.shared.queue.close();

        {
            let (lock, cvar) = &*self.flush_stop;
            *lock.lock() = true;
            cvar.notify_all();
        }

        for handle in self.threads.lock().drain(..) {
            if handle.join().is_err() {
                error!("pipeline worker thread panicked during shutdown");
            }
        }

        self.shared.vectors.close()?;
        info!(graceful, "pipeline shut down");
        Ok(())
    }
}

fn extract_loop(
    shared: &Arc<Shared>,
    active: &Arc<ActiveSet>,
    tx: &flume::Sender<ExtractedDocument>,
) {
    while let Some(item) = shared.queue.dequeue() {
        if shared.cancel.load(Ordering::Relaxed) {
            break;
        }
        active.insert(&item.path);
        let outcome = catch_unwind(AssertUnwindSafe(|| extract_stage::process_item(shared, &item)));
        active.remove(&item.path);

        match outcome {
            Ok(Ok(Some(doc))) => {
                // blocking send = backpressure; Err means shutdown
                if tx.send(doc).is_err() {
                    break;
                }
            }
            Ok(Ok(None)) => {}
            Ok(Err(e)) => {
                warn!(path = %item.path, error = %e, "extraction stage error");
                let _ = shared.db.progress_fail(&item.path, &e.to_string());
                shared.queue.mark_done(&item.path);
            }
            Err(_) => {
                error!(path = %item.path, "chunk worker caught a panic, item marked failed");
                let _ = shared.db.progress_fail(&item.path, "worker panicked");
                shared.queue.mark_done(&item.path);
            }
        }
    }
}

fn embed_loop(
    shared: &Arc<Shared>,
    active: &Arc<ActiveSet>,
    rx: &flume::Receiver<ExtractedDocument>,
    tx: &flume::Sender<EmbeddedDocument>,
) {
    while let Ok(doc) = rx.recv() {
        if shared.cancel.load(Ordering::Relaxed) {
            // immediate shutdown: progress stays in_progress for self-heal
            continue;
        }
        let path = doc.path.clone();
        active.insert(&path);
        let outcome = catch_unwind(AssertUnwindSafe(|| embed_stage::embed_document(shared, doc)));
        active.remove(&path);

        match outcome {
            Ok(Ok(embedded)) => {
                if tx.send(embedded).is_err() {
                    break;
                }
            }
            Ok(Err(e)) => {
                warn!(path, error = %e, "embedding failed, document failed whole");
                let _ = shared.db.progress_fail(&path, &e.to_string());
                let _ = shared.events.send(EngineEvent::DocumentFailed {
                    path: path.clone(),
                    error: e.to_string(),
                });
                shared.queue.mark_done(&path);
            }
            Err(_) => {
                error!(path, "embed worker caught a panic, item marked failed");
                let _ = shared.db.progress_fail(&path, "worker panicked");
                shared.queue.mark_done(&path);
            }
        }
    }
}

fn store_loop(
    shared: &Arc<Shared>,
    active: &Arc<ActiveSet>,
    rx: &flume::Receiver<EmbeddedDocument>,
) {
    while let Ok(doc) = rx.recv() {
        if shared.cancel.load(Ordering::Relaxed) {
            continue;
        }
        let path = doc.doc.path.clone();
        active.insert(&path);
        let outcome = catch_unwind(AssertUnwindSafe(|| store_stage::store_document(shared, doc)));
        active.remove(&path);
        if outcome.is_err() {
            error!(path, "store worker caught a panic, item marked failed");
            let _ = shared.db.progress_fail(&path, "worker panicked");
            shared.queue.mark_done(&path);
        }
    }
}

#[cfg(test)]
impl Shared {
    /// Minimal shared context for stage unit tests.
    pub(crate) fn for_tests(batch_size: usize) -> Arc<Self> {
        use crate::embed::HashingEmbedder;
        use crate::fts::FtsIndex;
        use crate::validate::DefaultValidator;

        let base = std::env::temp_dir().join(format!(
            "lodestone-shared-test-{}-{batch_size}",
            std::process::id()
        ));
        std::fs::create_dir_all(&base).unwrap();

        let mut config = EngineConfig::for_root(base.clone(), base.clone());
        config.embed_batch_size = batch_size;

        let db = Arc::new(Db::open_in_memory().unwrap());
        let fts = Arc::new(FtsIndex::open(&base.join("fts")).unwrap());
        let vectors = Arc::new(
            VectorIndex::open(&base.join("v.usearch"), HashingEmbedder::DEFAULT_DIM, 64).unwrap(),
        );
        let repo = Arc::new(Repository::new(db.clone(), fts, vectors.clone()));
        let (events, _) = broadcast::channel(64);

        Arc::new(Shared {
            root_abs: config.root_dir.clone(),
            queue: Arc::new(IngestQueue::new(config.queue_capacity)),
            db,
            repo,
            registry: Arc::new(ExtractorRegistry::with_defaults()),
            validator: Arc::new(DefaultValidator::new(config.max_file_size_bytes)),
            embedder: Arc::new(HashingEmbedder::default()),
            cache: Arc::new(QueryCache::new(config.query_cache_capacity)),
            vectors,
            events,
            cancel: AtomicBool::new(false),
            config,
        })
    }
}
