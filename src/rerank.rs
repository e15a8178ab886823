//! Optional post-retrieval reranking.
//!
//! The contract is narrow: candidates in, one score per candidate out, order
//! preserved. A cross-encoder can be plugged through the same trait; the
//! shipped implementation is a lexical term-overlap scorer.

use std::collections::HashSet;
use std::sync::Arc;

use crate::error::{EngineError, EngineResult};

pub trait Reranker: Send + Sync {
    fn name(&self) -> &str;

    /// Score each candidate against the query. `result.len()` equals
    /// `candidates.len()`; higher is more relevant.
    fn rerank(&self, query: &str, candidates: &[&str]) -> EngineResult<Vec<f32>>;
}

/// Fraction of query terms present in the candidate, with a small length
/// penalty so tiny snippets cannot win on a single shared token.
pub struct TermOverlapReranker;

fn terms(text: &str) -> HashSet<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() > 1)
        .map(|t| t.to_string())
        .collect()
}

impl Reranker for TermOverlapReranker {
    fn name(&self) -> &str {
        "term-overlap"
    }

    fn rerank(&self, query: &str, candidates: &[&str]) -> EngineResult<Vec<f32>> {
        let query_terms = terms(query);
        if query_terms.is_empty() {
            return Ok(vec![0.0; candidates.len()]);
        }
        Ok(candidates
            .iter()
            .map(|c| {
                let cand_terms = terms(c);
                let overlap = query_terms.intersection(&cand_terms).count() as f32;
                let coverage = overlap / query_terms.len() as f32;
                // dampen one-token candidates
                let length_factor = (cand_terms.len() as f32 / (cand_terms.len() as f32 + 2.0))
                    .min(1.0);
                coverage * length_factor
            })
            .collect())
    }
}

/// Construct the configured reranker, if any.
pub fn from_config(kind: &str) -> EngineResult<Option<Arc<dyn Reranker>>> {
    match kind {
        "none" | "" => Ok(None),
        "overlap" => Ok(Some(Arc::new(TermOverlapReranker))),
        other => Err(EngineError::BadRequest(format!(
            "unknown reranker '{other}' (expected 'none' or 'overlap')"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_overlap_beats_partial() {
        let r = TermOverlapReranker;
        let scores = r
            .rerank(
                "rust borrow checker",
                &[
                    "the rust borrow checker explained in detail",
                    "rust is a systems language",
                    "gardening tips for spring",
                ],
            )
            .unwrap();
        assert!(scores[0] > scores[1]);
        assert!(scores[1] > scores[2]);
        assert_eq!(scores[2], 0.0);
    }

    #[test]
    fn output_aligned_to_input() {
        let r = TermOverlapReranker;
        let scores = r.rerank("query", &["a", "b", "c"]).unwrap();
        assert_eq!(scores.len(), 3);
    }
}
