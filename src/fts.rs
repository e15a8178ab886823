//! Full-text index over chunks (tantivy, BM25-Okapi with the default
//! k1=1.2 / b=0.75). One tantivy document per chunk; content is tokenized
//! with the default lowercase word-break tokenizer, no stopword removal.
//! Hydration happens from sqlite — only ids, scores and the source path
//! (needed for title boosting) come back from here.

use std::path::Path;

use parking_lot::Mutex;
use tantivy::collector::TopDocs;
use tantivy::query::QueryParser;
use tantivy::schema::{
    FAST, Field, INDEXED, STORED, STRING, Schema, TEXT, Value,
};
use tantivy::{Index, IndexReader, IndexWriter, ReloadPolicy, TantivyDocument, Term};
use tracing::info;

use crate::error::{EngineError, EngineResult};
use crate::store::Db;
use crate::types::{ChunkId, DocumentId};

const WRITER_BUDGET_BYTES: usize = 50_000_000;

#[derive(Debug, Clone)]
pub struct FtsHit {
    pub chunk_id: ChunkId,
    pub score: f32,
    pub path: String,
}

#[derive(Clone)]
struct FtsSchema {
    chunk_id: Field,
    document_id: Field,
    content: Field,
    path: Field,
}

impl FtsSchema {
    fn build() -> (Self, Schema) {
        let mut builder = Schema::builder();
        let chunk_id = builder.add_u64_field("chunk_id", INDEXED | STORED | FAST);
        let document_id = builder.add_u64_field("document_id", INDEXED | STORED);
        let content = builder.add_text_field("content", TEXT);
        let path = builder.add_text_field("path", STRING | STORED);
        (
            Self {
                chunk_id,
                document_id,
                content,
                path,
            },
            builder.build(),
        )
    }
}

pub struct FtsIndex {
    index: Index,
    reader: IndexReader,
    writer: Mutex<IndexWriter>,
    schema: FtsSchema,
}

impl FtsIndex {
    pub fn open(dir: &Path) -> EngineResult<Self> {
        std::fs::create_dir_all(dir)?;
        let (schema, tantivy_schema) = FtsSchema::build();

        let index = if dir.join("meta.json").exists() {
            Index::open_in_dir(dir)?
        } else {
            Index::create_in_dir(dir, tantivy_schema)?
        };

        let writer = index.writer(WRITER_BUDGET_BYTES)?;
        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()?;

        Ok(Self {
            index,
            reader,
            writer: Mutex::new(writer),
            schema,
        })
    }

    /// Stage chunk documents for the next `commit`.
    pub fn add_chunks(
        &self,
        entries: &[(ChunkId, DocumentId, String, String)],
    ) -> EngineResult<()> {
        let writer = self.writer.lock();
        for (chunk_id, document_id, content, path) in entries {
            let mut doc = TantivyDocument::new();
            doc.add_u64(self.schema.chunk_id, *chunk_id as u64);
            doc.add_u64(self.schema.document_id, *document_id as u64);
            doc.add_text(self.schema.content, content);
            doc.add_text(self.schema.path, path);
            writer.add_document(doc)?;
        }
        Ok(())
    }

    /// Stage deletions for the next `commit`.
    pub fn delete_chunks(&self, ids: &[ChunkId]) -> EngineResult<()> {
        let writer = self.writer.lock();
        for id in ids {
            writer.delete_term(Term::from_field_u64(self.schema.chunk_id, *id as u64));
        }
        Ok(())
    }

    /// Make staged changes visible to searches.
    pub fn commit(&self) -> EngineResult<()> {
        self.writer.lock().commit()?;
        self.reader.reload()?;
        Ok(())
    }

    /// BM25 keyword search. Query syntax errors are tolerated (lenient
    /// parse); an unparseable query yields an empty result, not an error.
    pub fn search(&self, query: &str, k: usize) -> EngineResult<Vec<FtsHit>> {
        let searcher = self.reader.searcher();
        let parser = QueryParser::for_index(&self.index, vec![self.schema.content]);
        let (parsed, _errors) = parser.parse_query_lenient(query);

        let top = searcher.search(&parsed, &TopDocs::with_limit(k.max(1)))?;
        let mut hits = Vec::with_capacity(top.len());
        for (score, addr) in top {
            let doc: TantivyDocument = searcher.doc(addr)?;
            let chunk_id = doc
                .get_first(self.schema.chunk_id)
                .and_then(|v| v.as_u64())
                .ok_or_else(|| EngineError::Search("fts doc missing chunk_id".into()))?;
            let path = doc
                .get_first(self.schema.path)
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string();
            hits.push(FtsHit {
                chunk_id: chunk_id as ChunkId,
                score,
                path,
            });
        }
        Ok(hits)
    }

    pub fn num_docs(&self) -> u64 {
        self.reader.searcher().num_docs()
    }

    /// Drop everything and re-index every chunk from the store.
    pub fn rebuild_from_chunks(&self, db: &Db) -> EngineResult<usize> {
        {
            let mut writer = self.writer.lock();
            writer.delete_all_documents()?;
            writer.commit()?;
        }

        let mut batch: Vec<(ChunkId, DocumentId, String, String)> = Vec::new();
        db.for_each_chunk(|chunk_id, document_id, content, path| {
            batch.push((chunk_id, document_id, content, path));
        })?;
        let count = batch.len();
        self.add_chunks(&batch)?;
        self.commit()?;

        info!(count, "fts index rebuilt from chunks table");
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_tmp() -> (tempfile::TempDir, FtsIndex) {
        let dir = tempfile::tempdir().unwrap();
        let fts = FtsIndex::open(dir.path()).unwrap();
        (dir, fts)
    }

    #[test]
    fn index_and_search() {
        let (_dir, fts) = open_tmp();
        fts.add_chunks(&[
            (1, 1, "the quick brown fox jumps".into(), "animals.md".into()),
            (2, 1, "rust borrow checker ownership".into(), "rust.md".into()),
        ])
        .unwrap();
        fts.commit().unwrap();

        let hits = fts.search("quick fox", 5).unwrap();
        assert_eq!(hits[0].chunk_id, 1);
        assert_eq!(hits[0].path, "animals.md");

        let hits = fts.search("ownership", 5).unwrap();
        assert_eq!(hits[0].chunk_id, 2);
    }

    #[test]
    fn delete_removes_from_results() {
        let (_dir, fts) = open_tmp();
        fts.add_chunks(&[(1, 1, "alpha beta".into(), "a.md".into())])
            .unwrap();
        fts.commit().unwrap();
        assert_eq!(fts.search("alpha", 5).unwrap().len(), 1);

        fts.delete_chunks(&[1]).unwrap();
        fts.commit().unwrap();
        assert_eq!(fts.search("alpha", 5).unwrap().len(), 0);
        assert_eq!(fts.num_docs(), 0);
    }

    #[test]
    fn unparseable_query_is_tolerated() {
        let (_dir, fts) = open_tmp();
        fts.add_chunks(&[(1, 1, "content here".into(), "a.md".into())])
            .unwrap();
        fts.commit().unwrap();
        // unbalanced quote would be a parse error in strict mode
        let hits = fts.search("\"content", 5).unwrap();
        assert!(hits.len() <= 1);
    }

    #[test]
    fn rebuild_from_store() {
        let (_dir, fts) = open_tmp();
        let db = Db::open_in_memory().unwrap();
        db.with_conn(|c| {
            c.execute(
                "INSERT INTO documents(id, path, hash, extraction_method, indexed_at, chunk_count)
                 VALUES (1, 'notes/x.md', 'h', 'markdown', 0, 1)",
                [],
            )?;
            c.execute(
                "INSERT INTO chunks(id, document_id, ordinal, content)
                 VALUES (42, 1, 0, 'semantic search engine')",
                [],
            )?;
            Ok(())
        })
        .unwrap();

        let n = fts.rebuild_from_chunks(&db).unwrap();
        assert_eq!(n, 1);
        let hits = fts.search("semantic", 5).unwrap();
        assert_eq!(hits[0].chunk_id, 42);
        assert_eq!(hits[0].path, "notes/x.md");
    }
}
