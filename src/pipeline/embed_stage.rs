//! Embedding stage: batched embedding of extracted chunks.
//!
//! Chunks are flattened, split into `embed_batch_size` batches and embedded
//! through the black-box `Embedder`; chunk↔vector alignment is positional.
//! A document fails whole — nothing is partially persisted.

use std::sync::Arc;

use crate::error::{EngineError, EngineResult};
use crate::types::{EmbeddedDocument, ExtractedDocument};

use super::coordinator::Shared;

pub(crate) fn embed_document(
    shared: &Arc<Shared>,
    doc: ExtractedDocument,
) -> EngineResult<EmbeddedDocument> {
    let texts: Vec<String> = doc.chunks.iter().map(|c| c.text.clone()).collect();
    let mut vectors: Vec<Vec<f32>> = Vec::with_capacity(texts.len());

    let batch_size = shared.config.embed_batch_size.max(1);
    for batch in texts.chunks(batch_size) {
        let embedded = shared.embedder.embed(batch)?;
        if embedded.len() != batch.len() {
            return Err(EngineError::Embedding(format!(
                "{}: embedder returned {} vectors for a batch of {}",
                doc.path,
                embedded.len(),
                batch.len()
            )));
        }
        vectors.extend(embedded);
    }

    Ok(EmbeddedDocument { doc, vectors })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ChunkMetadata, ExtractedChunk};

    fn doc(n: usize) -> ExtractedDocument {
        ExtractedDocument {
            path: "a.md".into(),
            abs_path: "a.md".into(),
            hash: "h".into(),
            extraction_method: "text".into(),
            chunks: (0..n)
                .map(|i| ExtractedChunk {
                    text: format!("chunk number {i}"),
                    ordinal: i,
                    page: None,
                    metadata: ChunkMetadata::default(),
                })
                .collect(),
            note: None,
        }
    }

    #[test]
    fn vectors_align_with_chunks_across_batches() {
        let shared = Shared::for_tests(3); // batch size 3
        let embedded = embed_document(&shared, doc(8)).unwrap();
        assert_eq!(embedded.vectors.len(), 8);

        // alignment: embedding each text individually gives the same vector
        for (chunk, vector) in embedded.doc.chunks.iter().zip(&embedded.vectors) {
            let single = shared
                .embedder
                .embed(std::slice::from_ref(&chunk.text))
                .unwrap();
            assert_eq!(&single[0], vector);
        }
    }

    #[test]
    fn zero_chunk_document_embeds_to_nothing() {
        let shared = Shared::for_tests(4);
        let embedded = embed_document(&shared, doc(0)).unwrap();
        assert!(embedded.vectors.is_empty());
    }
}
