//! End-to-end scenarios driven through the full engine with the hashing
//! embedder: ingest pipeline, priority handling, dedup, resumability and
//! index corruption recovery.

use std::sync::Arc;
use std::time::{Duration, Instant};

use lodestone::engine::Engine;
use lodestone::search::SearchRequest;
use lodestone::types::Priority;
use lodestone::{EngineConfig, EngineError};

struct TestBed {
    root: tempfile::TempDir,
    data: tempfile::TempDir,
}

impl TestBed {
    fn new() -> Self {
        Self {
            root: tempfile::tempdir().unwrap(),
            data: tempfile::tempdir().unwrap(),
        }
    }

    fn config(&self) -> EngineConfig {
        EngineConfig::for_root(
            self.root.path().to_path_buf(),
            self.data.path().to_path_buf(),
        )
    }

    fn engine(&self) -> Arc<Engine> {
        let engine = Arc::new(Engine::from_config(self.config()).unwrap());
        engine.start().unwrap();
        engine
    }

    fn write(&self, rel: &str, content: &str) {
        let p = self.root.path().join(rel);
        if let Some(parent) = p.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(p, content).unwrap();
    }
}

fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(25));
    }
    cond()
}

fn wait_indexed(engine: &Engine, path: &str) {
    assert!(
        wait_until(Duration::from_secs(10), || engine
            .get_document(path)
            .is_ok()),
        "timed out waiting for {path} to be indexed"
    );
}

fn query(engine: &Engine, text: &str) -> Vec<lodestone::types::SearchResult> {
    engine
        .query(&SearchRequest {
            query: text.into(),
            top_k: 5,
            threshold: None,
            decompose: true,
            rerank: false,
        })
        .unwrap()
        .to_vec()
}

#[test]
fn single_text_file_round_trip() {
    let bed = TestBed::new();
    bed.write("fox.txt", "the quick brown fox");
    let engine = bed.engine();

    let out = engine.ingest("fox.txt", Priority::Normal, false).unwrap();
    assert_eq!(format!("{:?}", out.status), "Enqueued");
    wait_indexed(&engine, "fox.txt");

    let doc = engine.get_document("fox.txt").unwrap();
    assert_eq!(doc.summary.chunk_count, 1);

    let health = engine.health().unwrap();
    assert_eq!(health.document_count, 1);
    assert_eq!(health.chunk_count, 1);

    let results = query(&engine, "quick fox");
    assert_eq!(results[0].path, "fox.txt");
    assert!(results[0].score > 0.5, "score was {}", results[0].score);

    engine.shutdown(true).unwrap();
}

#[test]
fn priority_preemption_order() {
    let bed = TestBed::new();
    for name in ["a.txt", "b.txt", "c.txt", "d.txt"] {
        bed.write(name, &format!("content of {name} with unique words"));
    }
    let engine = bed.engine();
    let mut events = engine.subscribe_events();

    engine.pause();
    engine.ingest("a.txt", Priority::Normal, false).unwrap();
    engine.ingest("b.txt", Priority::Normal, false).unwrap();
    engine.ingest("c.txt", Priority::Normal, false).unwrap();
    engine.ingest("d.txt", Priority::High, false).unwrap();
    engine.resume();

    let mut order = Vec::new();
    while order.len() < 4 {
        match events.blocking_recv().unwrap() {
            lodestone::events::EngineEvent::DocumentIndexed { path, .. } => order.push(path),
            _ => {}
        }
    }
    assert_eq!(order, vec!["d.txt", "a.txt", "b.txt", "c.txt"]);

    engine.shutdown(true).unwrap();
}

#[test]
fn dedup_promotes_priority_without_growth() {
    let bed = TestBed::new();
    bed.write("file.md", "# dedup target");
    let engine = bed.engine();

    engine.pause();
    let first = engine.ingest("file.md", Priority::Normal, false).unwrap();
    let second = engine.ingest("file.md", Priority::High, false).unwrap();
    assert_eq!(format!("{:?}", first.status), "Enqueued");
    assert_eq!(format!("{:?}", second.status), "Deduplicated");
    assert_eq!(engine.status().input_queue_size, 1);
    assert_eq!(engine.status().bands, [0, 1, 0, 0]);

    engine.resume();
    wait_indexed(&engine, "file.md");
    engine.shutdown(true).unwrap();
}

#[test]
fn empty_file_yields_zero_chunk_document() {
    let bed = TestBed::new();
    bed.write("empty.txt", "");
    let engine = bed.engine();

    engine.ingest("empty.txt", Priority::Normal, false).unwrap();
    wait_indexed(&engine, "empty.txt");

    let doc = engine.get_document("empty.txt").unwrap();
    assert_eq!(doc.summary.chunk_count, 0);
    let health = engine.health().unwrap();
    assert_eq!(health.document_count, 1);
    assert_eq!(health.chunk_count, 0);
    let first_indexed_at = doc.summary.indexed_at;

    // re-ingest without force is a no-op
    engine.ingest("empty.txt", Priority::Normal, false).unwrap();
    assert!(wait_until(Duration::from_secs(5), || {
        !engine.health().unwrap().indexing_in_progress
    }));
    let doc = engine.get_document("empty.txt").unwrap();
    assert_eq!(doc.summary.indexed_at, first_indexed_at);
    assert_eq!(engine.health().unwrap().document_count, 1);

    engine.shutdown(true).unwrap();
}

#[test]
fn idempotent_reingest_keeps_one_generation() {
    let bed = TestBed::new();
    bed.write("note.md", "# Note\nstable content here");
    let engine = bed.engine();

    engine.ingest("note.md", Priority::Normal, false).unwrap();
    wait_indexed(&engine, "note.md");
    let chunks_before = engine.get_document("note.md").unwrap().summary.chunk_count;

    engine.ingest("note.md", Priority::Normal, false).unwrap();
    assert!(wait_until(Duration::from_secs(5), || {
        !engine.health().unwrap().indexing_in_progress
    }));

    let doc = engine.get_document("note.md").unwrap();
    assert_eq!(doc.summary.chunk_count, chunks_before);
    assert_eq!(engine.health().unwrap().document_count, 1);

    engine.shutdown(true).unwrap();
}

#[test]
fn interrupted_processing_resumes_on_restart() {
    let bed = TestBed::new();
    bed.write("big.txt", "resumable document content with several words");

    // first run: engine comes up but the file is never submitted; fake a
    // crash mid-pipeline by leaving an in_progress row behind
    {
        let engine = Arc::new(Engine::from_config(bed.config()).unwrap());
        // simulate: extraction started, process died before commit
        lodestone::store::Db::open(&bed.data.path().join("lodestone.db"))
            .unwrap()
            .progress_start("big.txt", "stale-hash")
            .unwrap();
        drop(engine);
    }

    // second run: startup heal re-enqueues and the file converges
    let engine = bed.engine();
    wait_indexed(&engine, "big.txt");
    let doc = engine.get_document("big.txt").unwrap();
    assert_eq!(doc.summary.chunk_count, 1);
    assert_eq!(engine.health().unwrap().document_count, 1);

    let results = query(&engine, "resumable document");
    assert_eq!(results[0].path, "big.txt");

    engine.shutdown(true).unwrap();
}

#[test]
fn truncated_vector_index_is_rebuilt() {
    let bed = TestBed::new();
    bed.write("alpha.txt", "alpha content about lighthouses");
    bed.write("beta.txt", "beta content about submarines");

    let before: Vec<String>;
    {
        let engine = bed.engine();
        engine.ingest("alpha.txt", Priority::Normal, false).unwrap();
        engine.ingest("beta.txt", Priority::Normal, false).unwrap();
        wait_indexed(&engine, "alpha.txt");
        wait_indexed(&engine, "beta.txt");
        before = query(&engine, "lighthouses")
            .into_iter()
            .map(|r| r.path)
            .collect();
        engine.shutdown(true).unwrap();
    }

    // corrupt the on-disk index while the process is down
    std::fs::write(bed.data.path().join("vectors.usearch"), b"").unwrap();

    let engine = bed.engine();
    let report = engine.verify_integrity().unwrap();
    assert!(report.is_clean(), "heal should have rebuilt: {report:?}");

    let after: Vec<String> = query(&engine, "lighthouses")
        .into_iter()
        .map(|r| r.path)
        .collect();
    assert_eq!(before, after);

    engine.shutdown(true).unwrap();
}

#[test]
fn cache_identical_queries_and_invalidation() {
    let bed = TestBed::new();
    bed.write("a.txt", "cached query target text");
    let engine = bed.engine();
    engine.ingest("a.txt", Priority::Normal, false).unwrap();
    wait_indexed(&engine, "a.txt");

    let req = SearchRequest {
        query: "cached target".into(),
        top_k: 5,
        threshold: None,
        decompose: true,
        rerank: false,
    };
    let first = engine.query(&req).unwrap();
    let second = engine.query(&req).unwrap();
    // byte-identical: the same Arc comes back from the cache
    assert!(Arc::ptr_eq(&first, &second));

    // any mutation invalidates wholesale
    engine.delete_document("a.txt").unwrap();
    let third = engine.query(&req).unwrap();
    assert!(!Arc::ptr_eq(&first, &third));
    assert!(third.iter().all(|r| r.path != "a.txt"));

    engine.shutdown(true).unwrap();
}

#[test]
fn delete_document_removes_everything() {
    let bed = TestBed::new();
    bed.write("gone.txt", "document that will be deleted");
    let engine = bed.engine();
    engine.ingest("gone.txt", Priority::Normal, false).unwrap();
    wait_indexed(&engine, "gone.txt");

    let out = engine.delete_document("gone.txt").unwrap();
    assert!(out.document_deleted);
    assert_eq!(out.chunks_deleted, 1);
    assert!(matches!(
        engine.get_document("gone.txt"),
        Err(EngineError::NotFound(_))
    ));
    assert!(matches!(
        engine.delete_document("gone.txt"),
        Err(EngineError::NotFound(_))
    ));

    let health = engine.health().unwrap();
    assert_eq!(health.document_count, 0);
    assert_eq!(health.chunk_count, 0);

    engine.shutdown(true).unwrap();
}

#[test]
fn rejected_binary_is_quarantined() {
    let bed = TestBed::new();
    let evil = bed.root.path().join("evil.txt");
    std::fs::write(&evil, [b'o', b'k', 0u8, b'x']).unwrap();
    let engine = bed.engine();

    engine.ingest("evil.txt", Priority::Normal, false).unwrap();
    assert!(wait_until(Duration::from_secs(10), || !evil.exists()));

    let quarantined = bed
        .root
        .path()
        .join(".lodestone-quarantine")
        .join("evil.txt");
    assert!(quarantined.exists());
    assert!(matches!(
        engine.get_document("evil.txt"),
        Err(EngineError::NotFound(_))
    ));

    engine.shutdown(true).unwrap();
}

#[test]
fn unhandled_extension_is_rejected_permanently() {
    let bed = TestBed::new();
    // xyz is not claimed by any extractor; ingest it explicitly
    bed.write("blob.xyz", "no extractor claims this");
    let engine = bed.engine();
    let mut events = engine.subscribe_events();

    engine.ingest("blob.xyz", Priority::Normal, false).unwrap();
    loop {
        match events.blocking_recv().unwrap() {
            lodestone::events::EngineEvent::DocumentRejected { path, .. } => {
                assert_eq!(path, "blob.xyz");
                break;
            }
            _ => {}
        }
    }

    // rejection is terminal: nothing left for the heal pass to retry
    assert!(matches!(
        engine.get_document("blob.xyz"),
        Err(EngineError::NotFound(_))
    ));
    let report = engine.verify_integrity().unwrap();
    assert!(report.is_clean(), "rejected file must not dirty the store: {report:?}");
    let requeue = engine.reindex_failed_documents(None, true).unwrap();
    assert_eq!(requeue.documents_queued, 0);

    engine.shutdown(true).unwrap();
}

#[test]
fn watcher_indexes_new_files() {
    let bed = TestBed::new();
    let mut config = bed.config();
    config.watcher_debounce_ms = 150;
    let engine = Arc::new(Engine::from_config(config).unwrap());
    engine.start().unwrap();

    bed.write("watched.md", "# Watched\nfile picked up by the watcher");

    assert!(
        wait_until(Duration::from_secs(15), || engine
            .get_document("watched.md")
            .is_ok()),
        "watcher never indexed the file"
    );

    let results = query(&engine, "picked up watcher");
    assert_eq!(results[0].path, "watched.md");

    engine.shutdown(true).unwrap();
}

#[test]
fn reindex_document_requeues_high() {
    let bed = TestBed::new();
    bed.write("re.txt", "original body of text");
    let engine = bed.engine();
    engine.ingest("re.txt", Priority::Normal, false).unwrap();
    wait_indexed(&engine, "re.txt");

    bed.write("re.txt", "replacement body of text entirely new");
    let out = engine.reindex_document("re.txt").unwrap();
    assert!(out.queued);
    assert!(out.deletion.document_deleted);
    assert_eq!(out.priority, Priority::High);

    wait_indexed(&engine, "re.txt");
    let results = query(&engine, "replacement body");
    assert_eq!(results[0].path, "re.txt");
    assert!(results[0].content.contains("replacement"));

    engine.shutdown(true).unwrap();
}

#[test]
fn markdown_graph_neighbors_exposed() {
    let bed = TestBed::new();
    bed.write("vault/a.md", "# A\nlinks to [[vault/b.md]]");
    bed.write("vault/b.md", "# B\nplain note");
    let engine = bed.engine();
    engine.ingest("vault/a.md", Priority::Normal, false).unwrap();
    engine.ingest("vault/b.md", Priority::Normal, false).unwrap();
    wait_indexed(&engine, "vault/a.md");
    wait_indexed(&engine, "vault/b.md");

    let neighbors = engine.graph_neighbors("vault/a.md", 1).unwrap();
    assert!(neighbors.iter().any(|n| n.path == "vault/b.md"));

    engine.shutdown(true).unwrap();
}
