pub mod cache;
pub mod executor;
pub mod hybrid;

pub use cache::QueryCache;
pub use executor::QueryExecutor;
pub use hybrid::{HybridConfig, HybridSearcher, SearchRequest};
