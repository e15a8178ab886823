//! Query execution: validation → cache lookup → hybrid search → cache
//! store. The executor's only state is the cache.

use std::sync::Arc;

use crate::config::MAX_SEARCH_QUERY_LENGTH;
use crate::error::{EngineError, EngineResult};

use super::cache::QueryCache;
use super::hybrid::{HybridSearcher, SearchRequest};
use crate::types::SearchResult;

pub struct QueryExecutor {
    searcher: Arc<HybridSearcher>,
    cache: Arc<QueryCache>,
}

impl QueryExecutor {
    pub fn new(searcher: Arc<HybridSearcher>, cache: Arc<QueryCache>) -> Self {
        Self { searcher, cache }
    }

    pub fn cache(&self) -> &Arc<QueryCache> {
        &self.cache
    }

    pub fn execute(&self, req: &SearchRequest) -> EngineResult<Arc<Vec<SearchResult>>> {
        if req.query.trim().is_empty() {
            return Err(EngineError::BadRequest(
                "search query must not be empty".into(),
            ));
        }
        if req.query.len() > MAX_SEARCH_QUERY_LENGTH {
            return Err(EngineError::BadRequest(format!(
                "search query too long ({} chars, max {})",
                req.query.len(),
                MAX_SEARCH_QUERY_LENGTH
            )));
        }
        if req.top_k == 0 || req.top_k > 1000 {
            return Err(EngineError::BadRequest(format!(
                "top_k must be in 1..=1000, got {}",
                req.top_k
            )));
        }

        if let Some(hit) = self.cache.get(&req.query, req.top_k, req.threshold) {
            return Ok(hit);
        }

        let results = Arc::new(self.searcher.search(req)?);
        self.cache
            .put(&req.query, req.top_k, req.threshold, results.clone());
        Ok(results)
    }
}
