//! Hybrid retrieval: vector similarity + BM25 keyword search fused with
//! reciprocal-rank fusion.
//!
//! Per query: embed → k-NN candidates; BM25 → keyword candidates with a
//! title boost for filename matches; both ranked lists (plus the lists of
//! any decomposed sub-queries) are fused with RRF. The raw RRF mass is
//! normalized by the maximum attainable mass so fused scores live in [0,1]
//! (rank 1 in every contributing list ⇒ 1.0).
//!
//! Degradation: if the vector branch fails the keyword list alone is fused;
//! if the keyword branch fails, vector alone; only when every branch of
//! every query fails does the search return an error.

use std::collections::HashMap;
use std::sync::Arc;

use regex::Regex;
use std::sync::LazyLock;
use tracing::warn;

use crate::embed::Embedder;
use crate::error::{EngineError, EngineResult};
use crate::fts::FtsIndex;
use crate::rerank::Reranker;
use crate::store::Db;
use crate::types::{ChunkId, SearchResult};
use crate::vector::VectorIndex;

#[derive(Debug, Clone)]
pub struct HybridConfig {
    pub candidate_multiplier: usize,
    pub min_candidates: usize,
    pub rrf_k: usize,
    pub title_boost: f32,
    pub rerank_candidates: usize,
    /// Search-quality knob forwarded to the vector index (expansion_search).
    pub search_quality: Option<usize>,
}

impl Default for HybridConfig {
    fn default() -> Self {
        Self {
            candidate_multiplier: 4,
            min_candidates: 20,
            rrf_k: 20,
            title_boost: 1.5,
            rerank_candidates: 20,
            search_quality: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub query: String,
    pub top_k: usize,
    pub threshold: Option<f32>,
    pub decompose: bool,
    pub rerank: bool,
}

pub struct HybridSearcher {
    db: Arc<Db>,
    fts: Arc<FtsIndex>,
    vectors: Arc<VectorIndex>,
    embedder: Arc<dyn Embedder>,
    reranker: Option<Arc<dyn Reranker>>,
    cfg: HybridConfig,
}

impl HybridSearcher {
    pub fn new(
        db: Arc<Db>,
        fts: Arc<FtsIndex>,
        vectors: Arc<VectorIndex>,
        embedder: Arc<dyn Embedder>,
        reranker: Option<Arc<dyn Reranker>>,
        cfg: HybridConfig,
    ) -> Self {
        Self {
            db,
            fts,
            vectors,
            embedder,
            reranker,
            cfg,
        }
    }

    pub fn search(&self, req: &SearchRequest) -> EngineResult<Vec<SearchResult>> {
        let top_k = req.top_k.max(1);
        let k = (top_k * self.cfg.candidate_multiplier).max(self.cfg.min_candidates);

        let mut queries = vec![req.query.clone()];
        if req.decompose {
            queries.extend(decompose(&req.query));
        }

        let mut lists: Vec<Vec<ChunkId>> = Vec::new();
        let mut branches_attempted = 0usize;
        let mut branches_failed = 0usize;

        for q in &queries {
            branches_attempted += 1;
            match self.vector_branch(q, k) {
                Ok(ids) => {
                    if !ids.is_empty() {
                        lists.push(ids);
                    }
                }
                Err(e) => {
                    branches_failed += 1;
                    warn!(query = %q, error = %e, "vector branch failed, degrading to keyword-only");
                }
            }

            branches_attempted += 1;
            match self.keyword_branch(q, k) {
                Ok(ids) => {
                    if !ids.is_empty() {
                        lists.push(ids);
                    }
                }
                Err(e) => {
                    branches_failed += 1;
                    warn!(query = %q, error = %e, "keyword branch failed, degrading to vector-only");
                }
            }
        }

        if branches_failed == branches_attempted {
            return Err(EngineError::Search(
                "both vector and keyword search are unavailable".into(),
            ));
        }
        if lists.is_empty() {
            return Ok(Vec::new());
        }

        let mut fused = rrf_fuse(&lists, self.cfg.rrf_k);

        if let Some(threshold) = req.threshold {
            fused.retain(|(_, score)| *score >= threshold);
        }

        // Hydrate enough candidates for reranking + final shaping.
        let hydrate_n = if req.rerank && self.reranker.is_some() {
            top_k.max(self.cfg.rerank_candidates)
        } else {
            top_k
        };
        let candidate_ids: Vec<ChunkId> =
            fused.iter().take(hydrate_n).map(|(id, _)| *id).collect();
        let hydrated = self.db.hydrate_chunks(&candidate_ids)?;
        let by_id: HashMap<ChunkId, _> =
            hydrated.into_iter().map(|c| (c.chunk_id, c)).collect();

        let mut results: Vec<SearchResult> = fused
            .iter()
            .take(hydrate_n)
            .filter_map(|(id, score)| {
                by_id.get(id).map(|c| SearchResult {
                    content: c.content.clone(),
                    path: c.path.clone(),
                    page: c.page,
                    score: *score,
                    rerank_score: None,
                    chunk_id: *id,
                })
            })
            .collect();

        if req.rerank {
            if let Some(reranker) = &self.reranker {
                let contents: Vec<&str> =
                    results.iter().map(|r| r.content.as_str()).collect();
                match reranker.rerank(&req.query, &contents) {
                    Ok(scores) if scores.len() == results.len() => {
                        for (r, s) in results.iter_mut().zip(scores) {
                            r.rerank_score = Some(s);
                        }
                        results.sort_by(|a, b| {
                            b.rerank_score
                                .partial_cmp(&a.rerank_score)
                                .unwrap_or(std::cmp::Ordering::Equal)
                        });
                    }
                    Ok(_) => warn!("reranker returned misaligned scores, keeping RRF order"),
                    Err(e) => warn!(error = %e, "reranker failed, keeping RRF order"),
                }
            }
        }

        results.truncate(top_k);
        Ok(results)
    }

    fn vector_branch(&self, query: &str, k: usize) -> EngineResult<Vec<ChunkId>> {
        let embedding = self.embedder.embed_query(query)?;
        let hits = self
            .vectors
            .search(&embedding, k, self.cfg.search_quality)?;
        // hits arrive distance-ascending; similarity = 1 − cosine distance
        Ok(hits.into_iter().map(|(id, _dist)| id).collect())
    }

    fn keyword_branch(&self, query: &str, k: usize) -> EngineResult<Vec<ChunkId>> {
        let mut hits = self.fts.search(query, k)?;

        // Title boost: candidates whose file base name contains a query
        // token get their BM25 score multiplied before re-ranking.
        let tokens: Vec<String> = query
            .to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| t.len() > 1)
            .map(|t| t.to_string())
            .collect();
        for hit in &mut hits {
            let basename = std::path::Path::new(&hit.path)
                .file_stem()
                .unwrap_or_default()
                .to_string_lossy()
                .to_lowercase();
            if tokens.iter().any(|t| basename.contains(t.as_str())) {
                hit.score *= self.cfg.title_boost;
            }
        }
        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        Ok(hits.into_iter().map(|h| h.chunk_id).collect())
    }
}

/// Reciprocal-rank fusion over ranked id lists, normalized to [0,1].
/// `rrf = Σ_i 1/(k + rank_i)` with 1-based ranks, absent lists omitted; the
/// sum is divided by `lists × 1/(k+1)`, the mass of a rank-1 hit in every
/// list. Result is sorted score-descending, ties broken by chunk id.
pub fn rrf_fuse(lists: &[Vec<ChunkId>], k: usize) -> Vec<(ChunkId, f32)> {
    let mut scores: HashMap<ChunkId, f32> = HashMap::new();
    for list in lists {
        for (rank0, id) in list.iter().enumerate() {
            *scores.entry(*id).or_default() += 1.0 / (k as f32 + rank0 as f32 + 1.0);
        }
    }

    let max_mass = lists.len() as f32 / (k as f32 + 1.0);
    let mut out: Vec<(ChunkId, f32)> = scores
        .into_iter()
        .map(|(id, s)| (id, if max_mass > 0.0 { s / max_mass } else { 0.0 }))
        .collect();
    out.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.cmp(&b.0))
    });
    out
}

static CONJUNCTION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\s+(?:and|vs\.?|versus)\s+").unwrap());

/// Split a conjunctive query ("X and Y", "X vs Y") into sub-queries.
/// Returns an empty vec when the query has no useful conjunction.
pub fn decompose(query: &str) -> Vec<String> {
    if !CONJUNCTION.is_match(query) {
        return Vec::new();
    }
    let parts: Vec<String> = CONJUNCTION
        .split(query)
        .map(|p| p.trim().to_string())
        .filter(|p| p.split_whitespace().count() >= 1 && p.len() >= 3)
        .collect();
    if parts.len() >= 2 { parts } else { Vec::new() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embed::HashingEmbedder;
    use crate::repository::Repository;
    use crate::types::{ChunkMetadata, EmbeddedDocument, ExtractedChunk, ExtractedDocument};

    #[test]
    fn rrf_rank_one_in_every_list_scores_one() {
        let fused = rrf_fuse(&[vec![7, 2, 3], vec![7, 3, 2]], 20);
        assert_eq!(fused[0].0, 7);
        assert!((fused[0].1 - 1.0).abs() < 1e-6);
        assert!(fused.iter().all(|(_, s)| *s <= 1.0 + 1e-6));
    }

    #[test]
    fn rrf_prefers_agreement_over_single_list() {
        // 5 is mid-rank in both lists; 1 and 9 lead one list each
        let fused = rrf_fuse(&[vec![1, 5, 3], vec![9, 5, 4]], 20);
        let score_of = |id: ChunkId| fused.iter().find(|(i, _)| *i == id).unwrap().1;
        assert!(score_of(5) > score_of(3));
        assert!(score_of(5) > score_of(4));
    }

    #[test]
    fn rrf_ties_break_deterministically() {
        let a = rrf_fuse(&[vec![3, 1], vec![1, 3]], 20);
        let b = rrf_fuse(&[vec![3, 1], vec![1, 3]], 20);
        assert_eq!(
            a.iter().map(|(i, _)| *i).collect::<Vec<_>>(),
            b.iter().map(|(i, _)| *i).collect::<Vec<_>>()
        );
    }

    #[test]
    fn decompose_splits_conjunctions() {
        assert_eq!(
            decompose("tokio runtime vs async-std"),
            vec!["tokio runtime", "async-std"]
        );
        assert_eq!(
            decompose("ownership and borrowing"),
            vec!["ownership", "borrowing"]
        );
        assert!(decompose("plain query").is_empty());
        // "android" must not split on the embedded "and"
        assert!(decompose("android development").is_empty());
    }

    // -- end-to-end over a small committed corpus ---------------------------

    const DIM: usize = HashingEmbedder::DEFAULT_DIM;

    struct Fixture {
        _dir: tempfile::TempDir,
        searcher: HybridSearcher,
    }

    fn fixture(docs: &[(&str, &[&str])]) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(Db::open_in_memory().unwrap());
        let fts = Arc::new(FtsIndex::open(&dir.path().join("fts")).unwrap());
        let vectors =
            Arc::new(VectorIndex::open(&dir.path().join("v.usearch"), DIM, 64).unwrap());
        let embedder = Arc::new(HashingEmbedder::default());
        let repo = Repository::new(db.clone(), fts.clone(), vectors.clone());

        for (path, texts) in docs {
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
            let texts_owned: Vec<String> = texts.iter().map(|t| t.to_string()).collect();
            let vecs = embedder.embed(&texts_owned).unwrap();
            repo.commit_document(&EmbeddedDocument {
                doc: ExtractedDocument {
                    path: path.to_string(),
                    abs_path: path.into(),
                    hash: format!("h-{path}"),
                    extraction_method: "text".into(),
                    chunks,
                    note: None,
                },
                vectors: vecs,
            })
            .unwrap();
        }

        let searcher = HybridSearcher::new(
            db,
            fts,
            vectors,
            embedder,
            Some(Arc::new(crate::rerank::TermOverlapReranker)),
            HybridConfig::default(),
        );
        Fixture {
            _dir: dir,
            searcher,
        }
    }

    fn req(query: &str) -> SearchRequest {
        SearchRequest {
            query: query.into(),
            top_k: 5,
            threshold: None,
            decompose: true,
            rerank: false,
        }
    }

    #[test]
    fn round_trip_single_chunk() {
        let f = fixture(&[
            ("fox.md", &["the quick brown fox jumps over the lazy dog"][..]),
            ("other.md", &["completely unrelated cooking recipe"][..]),
        ]);
        let results = f
            .searcher
            .search(&req("the quick brown fox jumps over the lazy dog"))
            .unwrap();
        assert_eq!(results[0].path, "fox.md");
        assert!(results[0].score >= 0.8, "score was {}", results[0].score);
    }

    #[test]
    fn partial_query_ranks_target_first() {
        let f = fixture(&[
            ("fox.md", &["the quick brown fox jumps over the lazy dog"][..]),
            ("rust.md", &["the rust borrow checker enforces ownership"][..]),
        ]);
        let results = f.searcher.search(&req("quick fox")).unwrap();
        assert_eq!(results[0].path, "fox.md");
        assert!(results[0].score > 0.5);
    }

    #[test]
    fn threshold_filters_low_scores() {
        let f = fixture(&[
            ("fox.md", &["the quick brown fox"][..]),
            ("far.md", &["entirely different subject matter"][..]),
        ]);
        let mut r = req("quick brown fox");
        r.threshold = Some(0.9);
        let results = f.searcher.search(&r).unwrap();
        assert!(results.iter().all(|x| x.score >= 0.9));
        assert!(results.iter().any(|x| x.path == "fox.md"));
    }

    #[test]
    fn rerank_attaches_scores() {
        let f = fixture(&[
            ("a.md", &["rust ownership model details"][..]),
            ("b.md", &["unrelated gardening notes"][..]),
        ]);
        let mut r = req("rust ownership");
        r.rerank = true;
        let results = f.searcher.search(&r).unwrap();
        assert!(results[0].rerank_score.is_some());
        assert_eq!(results[0].path, "a.md");
    }

    #[test]
    fn empty_store_returns_empty() {
        let f = fixture(&[]);
        assert!(f.searcher.search(&req("anything")).unwrap().is_empty());
    }
}
