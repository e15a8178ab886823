use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Maximum allowed length for search queries (characters).
pub const MAX_SEARCH_QUERY_LENGTH: usize = 1000;

/// Directory name (under the watched root) where critically rejected files
/// are moved. Always excluded from watching and scanning.
pub const QUARANTINE_DIR_NAME: &str = ".lodestone-quarantine";

/// Canonical list of file extensions the ingestion pipeline accepts.
/// The watcher, the startup backfill scan and the extractor registry all use
/// this single list so they never diverge. An extension is admitted here
/// only when a shipped extractor handles it; binary formats (PDF, DOCX,
/// EPUB) join the list together with their `Extractor` registration.
pub const SUPPORTED_EXTENSIONS: &[&str] = &[
    // Documents
    "md", "mdx", "txt", "rst",
    // Notebooks
    "ipynb",
    // Source code
    "rs", "py", "go", "java", "c", "cpp", "h", "hpp", "cs", "rb", "php",
    "swift", "kt", "scala", "ts", "tsx", "js", "jsx",
    // Data / config
    "json", "yaml", "yml", "toml", "xml", "csv",
    // Query / schema
    "sql", "graphql",
    // Shell
    "sh", "bash", "zsh",
];

/// Check whether a file extension (without leading dot, lowercase) is in the
/// shared supported-extensions list.
pub fn is_supported_extension(ext: &str) -> bool {
    SUPPORTED_EXTENSIONS.contains(&ext)
}

/// Path components that are never ingested, whatever the extension.
pub const EXCLUDED_COMPONENTS: &[&str] = &[
    ".git",
    "node_modules",
    "target",
    "__pycache__",
    ".obsidian",
    ".trash",
    QUARANTINE_DIR_NAME,
];

/// Suffixes editors leave behind for in-flight saves; never worth indexing.
pub const TEMP_FILE_SUFFIXES: &[&str] = &["~", ".swp", ".swx", ".tmp", ".part", ".crdownload"];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Watched root directory. All canonical paths are constrained to it.
    pub root_dir: PathBuf,
    /// Where the sqlite db, tantivy index and usearch file live.
    pub data_dir: PathBuf,
    pub listen_addr: String,

    pub max_file_size_bytes: u64,
    /// Quiet window before a changed path is emitted (default 10 s).
    pub watcher_debounce_ms: u64,

    pub chunk_workers: usize,
    pub embed_workers: usize,
    pub embed_batch_size: usize,
    /// Token budget per chunk for the default chunker.
    pub chunk_max_tokens: usize,
    pub chunk_overlap_tokens: usize,

    pub queue_capacity: usize,
    /// Bounded capacity of each inter-stage channel.
    pub stage_channel_capacity: usize,

    /// Seconds between background flushes of the vector index. Never flushed
    /// per write; the vectors table is the recovery source of truth.
    pub vector_flush_interval_secs: u64,
    /// HNSW expansion_search. Calibrated, not the library default.
    pub search_expansion: usize,

    pub candidate_multiplier: usize,
    pub min_candidates: usize,
    pub rrf_k: usize,
    pub title_boost: f32,
    pub rerank_candidates: usize,
    pub query_cache_capacity: usize,

    /// Governs empty-document deletion during the startup heal pass.
    pub auto_self_heal: bool,
    /// Walk the root at startup and enqueue anything not yet indexed.
    pub backfill_on_start: bool,

    /// Which embedder the factory constructs: "qwen3" or "hashing".
    pub embedder: String,
    /// Which reranker the factory constructs: "none" or "overlap".
    pub reranker: String,
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl EngineConfig {
    pub fn from_env() -> Self {
        let port = std::env::var("LODESTONE_PORT").unwrap_or_else(|_| "9464".to_string());

        let root_dir = std::env::var("LODESTONE_ROOT")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("."));

        let data_dir = std::env::var("LODESTONE_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                dirs::data_local_dir()
                    .map(|d| d.join("lodestone"))
                    .unwrap_or_else(|| PathBuf::from(".lodestone-data"))
            });

        Self {
            root_dir,
            data_dir,
            listen_addr: format!("127.0.0.1:{}", port),
            max_file_size_bytes: env_parse("LODESTONE_MAX_FILE_SIZE", 50 * 1024 * 1024),
            watcher_debounce_ms: env_parse("LODESTONE_DEBOUNCE_MS", 10_000),
            chunk_workers: env_parse("LODESTONE_CHUNK_WORKERS", 2),
            embed_workers: env_parse("LODESTONE_EMBED_WORKERS", 2),
            embed_batch_size: env_parse("LODESTONE_EMBED_BATCH", 32),
            chunk_max_tokens: env_parse("LODESTONE_CHUNK_MAX_TOKENS", 512),
            chunk_overlap_tokens: env_parse("LODESTONE_CHUNK_OVERLAP", 48),
            queue_capacity: env_parse("LODESTONE_QUEUE_CAPACITY", 4096),
            stage_channel_capacity: env_parse("LODESTONE_STAGE_CHANNEL_CAPACITY", 8),
            vector_flush_interval_secs: env_parse("LODESTONE_FLUSH_INTERVAL_SECS", 300),
            search_expansion: env_parse("LODESTONE_SEARCH_EXPANSION", 128),
            candidate_multiplier: env_parse("LODESTONE_CANDIDATE_MULTIPLIER", 4),
            min_candidates: env_parse("LODESTONE_MIN_CANDIDATES", 20),
            rrf_k: env_parse("LODESTONE_RRF_K", 20),
            title_boost: env_parse::<f32>("LODESTONE_TITLE_BOOST", 1.5).clamp(1.0, 3.0),
            rerank_candidates: env_parse("LODESTONE_RERANK_CANDIDATES", 20),
            query_cache_capacity: env_parse("LODESTONE_QUERY_CACHE_CAPACITY", 100),
            auto_self_heal: env_parse("LODESTONE_AUTO_SELF_HEAL", true),
            backfill_on_start: env_parse("LODESTONE_BACKFILL_ON_START", true),
            embedder: std::env::var("LODESTONE_EMBEDDER").unwrap_or_else(|_| "qwen3".into()),
            reranker: std::env::var("LODESTONE_RERANKER").unwrap_or_else(|_| "none".into()),
        }
    }

    /// A config suitable for tests and embedded use: everything under
    /// `data_dir`, hashing embedder, no backfill, fast debounce.
    pub fn for_root(root_dir: PathBuf, data_dir: PathBuf) -> Self {
        Self {
            root_dir,
            data_dir,
            listen_addr: "127.0.0.1:0".into(),
            max_file_size_bytes: 50 * 1024 * 1024,
            watcher_debounce_ms: 200,
            chunk_workers: 1,
            embed_workers: 1,
            embed_batch_size: 32,
            chunk_max_tokens: 512,
            chunk_overlap_tokens: 48,
            queue_capacity: 4096,
            stage_channel_capacity: 8,
            vector_flush_interval_secs: 300,
            search_expansion: 128,
            candidate_multiplier: 4,
            min_candidates: 20,
            rrf_k: 20,
            title_boost: 1.5,
            rerank_candidates: 20,
            query_cache_capacity: 100,
            auto_self_heal: true,
            backfill_on_start: false,
            embedder: "hashing".into(),
            reranker: "none".into(),
        }
    }

    pub fn quarantine_dir(&self) -> PathBuf {
        self.root_dir.join(QUARANTINE_DIR_NAME)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn supported_extension_lookup() {
        assert!(is_supported_extension("md"));
        assert!(is_supported_extension("ipynb"));
        assert!(!is_supported_extension("exe"));
    }

    #[test]
    fn title_boost_clamped() {
        // SAFETY: test-local env mutation
        unsafe { std::env::set_var("LODESTONE_TITLE_BOOST", "9.0") };
        let cfg = EngineConfig::from_env();
        assert!(cfg.title_boost <= 3.0);
        unsafe { std::env::remove_var("LODESTONE_TITLE_BOOST") };
    }
}
