//! Storage stage: the single writer. Commits the embedded document through
//! the repository (generation swap + FTS + k-NN), completes the progress
//! row, invalidates the query cache and releases the queue entry.

use std::sync::Arc;

use tracing::{info, warn};

use crate::events::EngineEvent;
use crate::types::EmbeddedDocument;

use super::coordinator::Shared;

pub(crate) fn store_document(shared: &Arc<Shared>, doc: EmbeddedDocument) {
    let path = doc.doc.path.clone();
    let hash = doc.doc.hash.clone();
    let method = doc.doc.extraction_method.clone();
    let chunk_count = doc.doc.chunks.len();

    let commit = shared.repo.commit_document(&doc).and_then(|_| {
        shared.db.progress_complete(&path, &hash, &method)
    });

    match commit {
        Ok(()) => {
            shared.cache.clear();
            info!(path, chunks = chunk_count, "document indexed");
            let _ = shared.events.send(EngineEvent::DocumentIndexed {
                path: path.clone(),
                chunks: chunk_count,
            });
        }
        Err(e) => {
            warn!(path, error = %e, "storage commit failed");
            if let Err(pe) = shared.db.progress_fail(&path, &e.to_string()) {
                warn!(path, error = %pe, "failed to record failure in progress store");
            }
            let _ = shared.events.send(EngineEvent::DocumentFailed {
                path: path.clone(),
                error: e.to_string(),
            });
        }
    }

    shared.queue.mark_done(&path);
}
