//! Extraction stage: queue item → validated, extracted, chunked document.
//!
//! Skip/fail decisions terminate the item here (progress updated, queue
//! released); successful extraction flows downstream with the queue entry
//! still held so the path stays deduplicated until the commit.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::chunker::ChunkConfig;
use crate::error::EngineResult;
use crate::events::EngineEvent;
use crate::extract::markdown;
use crate::fingerprint;
use crate::types::{ExtractedDocument, ProcessingStatus, QueueItem};
use crate::validate::{Severity, Verdict, quarantine};

use super::coordinator::Shared;

/// Handle one queue item. Returns the extracted document when it should
/// continue down the pipeline; None when the item terminated at this stage
/// (already indexed, rejected, failed, deleted).
pub(crate) fn process_item(
    shared: &Arc<Shared>,
    item: &QueueItem,
) -> EngineResult<Option<ExtractedDocument>> {
    let path = item.path.as_str();
    let abs = shared.root_abs.join(path);

    // A watcher remove event (or any vanished file) resolves to deletion.
    if !abs.exists() {
        if shared.db.document_by_path(path)?.is_some() {
            let out = shared.repo.delete_document(path)?;
            shared.cache.clear();
            info!(path, chunks = out.chunks_deleted, "file gone, document deleted");
            let _ = shared.events.send(EngineEvent::DocumentDeleted {
                path: path.to_string(),
            });
        } else {
            shared.db.progress_delete(path)?;
        }
        shared.queue.mark_done(path);
        return Ok(None);
    }

    let hash = fingerprint::hash_file(&abs)?;

    if !item.force
        && let Some(progress) = shared.db.progress_get(path)?
        && progress.status == ProcessingStatus::Completed
        && progress.hash == hash
    {
        debug!(path, "already indexed, skipping");
        shared.queue.mark_done(path);
        return Ok(None);
    }

    shared.db.progress_start(path, &hash)?;

    match shared.validator.validate(&abs)? {
        Verdict::Accept => {}
        Verdict::Warn(note) => {
            warn!(path, note, "validator warning, continuing");
        }
        Verdict::Reject { reason, severity } => {
            shared.db.progress_reject(path, &hash, &reason)?;
            if severity == Severity::Critical {
                match quarantine(&shared.root_abs, &abs, path) {
                    Ok(dest) => info!(path, dest = %dest.display(), "file quarantined"),
                    Err(e) => warn!(path, error = %e, "quarantine failed, file left in place"),
                }
            }
            info!(path, reason, "file rejected by validator");
            let _ = shared.events.send(EngineEvent::DocumentRejected {
                path: path.to_string(),
                reason,
            });
            shared.queue.mark_done(path);
            return Ok(None);
        }
    }

    let Some((extractor, chunker)) = shared.registry.for_path(&abs) else {
        // permanent outcome: rejected rows are never re-enqueued by the
        // heal pass, unlike failed ones
        let reason = "no extractor registered for this extension";
        shared.db.progress_reject(path, &hash, reason)?;
        info!(path, reason, "file rejected");
        let _ = shared.events.send(EngineEvent::DocumentRejected {
            path: path.to_string(),
            reason: reason.to_string(),
        });
        shared.queue.mark_done(path);
        return Ok(None);
    };

    // Extraction gets one retry through the extractor's repair path.
    let pages = match extractor.extract(&abs) {
        Ok(pages) => pages,
        Err(first_err) => match extractor.repair(&abs) {
            Some(Ok(pages)) => {
                info!(path, "extraction succeeded after repair pass");
                pages
            }
            Some(Err(repair_err)) => {
                shared.db.progress_fail(path, &repair_err.to_string())?;
                warn!(path, error = %repair_err, "extraction failed after repair");
                shared.queue.mark_done(path);
                return Ok(None);
            }
            None => {
                shared.db.progress_fail(path, &first_err.to_string())?;
                warn!(path, error = %first_err, "extraction failed");
                shared.queue.mark_done(path);
                return Ok(None);
            }
        },
    };

    let cfg = ChunkConfig {
        max_tokens: shared.config.chunk_max_tokens,
        overlap_tokens: shared.config.chunk_overlap_tokens,
    };
    let chunks = chunker.chunk(&pages, &cfg);

    let ext = crate::extract::ExtractorRegistry::extension_of(&abs);
    let note = if matches!(ext.as_str(), "md" | "mdx") {
        let raw = std::fs::read_to_string(&abs).unwrap_or_default();
        Some(markdown::note_payload(&abs, &raw))
    } else {
        None
    };

    debug!(path, chunks = chunks.len(), method = extractor.method(), "extracted");
    Ok(Some(ExtractedDocument {
        path: path.to_string(),
        abs_path: abs,
        hash,
        extraction_method: extractor.method().to_string(),
        chunks,
        note,
    }))
}
