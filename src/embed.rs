//! Embedding backends.
//!
//! `Embedder` is the black-box contract the pipeline depends on: a batch of
//! texts in, unit vectors of a fixed dimension out, output aligned to input
//! by position.
//!
//! Two implementations ship:
//! - `Qwen3Embedder` — Qwen3-Embedding-0.6B via fastembed's candle backend
//!   (pure Rust, no ONNX), lazily initialized on first use. Production
//!   default.
//! - `HashingEmbedder` — deterministic feature-hashing bag-of-words.
//!   Offline fallback and the test vehicle; no model download, stable
//!   across runs and platforms.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use candle_core::{DType, Device};
use fastembed::Qwen3TextEmbedding;
use tracing::info;

use crate::error::{EngineError, EngineResult};

pub trait Embedder: Send + Sync {
    fn model_name(&self) -> &str;

    /// Output dimension, fixed at construction time.
    fn dimension(&self) -> usize;

    /// Embed a batch. `result.len() == texts.len()`, order preserved,
    /// every vector unit-normalized with `dimension()` components.
    fn embed(&self, texts: &[String]) -> EngineResult<Vec<Vec<f32>>>;

    /// Embed a single query string.
    fn embed_query(&self, query: &str) -> EngineResult<Vec<f32>> {
        self.embed(std::slice::from_ref(&query.to_string()))?
            .into_iter()
            .next()
            .ok_or_else(|| EngineError::Embedding("embedder returned no vector".into()))
    }
}

// ---------------------------------------------------------------------------
// Qwen3 (fastembed / candle)
// ---------------------------------------------------------------------------

/// Embedding dimension of Qwen3-Embedding-0.6B (`config.hidden_size`).
const QWEN3_DIM: usize = 1024;
const QWEN3_REPO_ID: &str = "Qwen/Qwen3-Embedding-0.6B";
/// Qwen3 supports 32K tokens; 8192 balances quality and CPU memory.
const QWEN3_MAX_LENGTH: usize = 8192;

pub struct Qwen3Embedder {
    /// Wrapped in Mutex because `embed()` takes `&self` but the tokenizer is
    /// not Sync.
    model: Mutex<Option<Qwen3TextEmbedding>>,
    initialized: AtomicBool,
}

impl Qwen3Embedder {
    pub fn new() -> Self {
        Self {
            model: Mutex::new(None),
            initialized: AtomicBool::new(false),
        }
    }

    /// Lazily load the model (downloads from HuggingFace Hub on first use).
    fn ensure_model(&self) -> EngineResult<()> {
        if self.initialized.load(Ordering::Acquire) {
            return Ok(());
        }

        let mut guard = self
            .model
            .lock()
            .map_err(|e| EngineError::Embedding(format!("model lock poisoned: {e}")))?;
        if guard.is_some() {
            self.initialized.store(true, Ordering::Release);
            return Ok(());
        }

        info!(
            repo = QWEN3_REPO_ID,
            dim = QWEN3_DIM,
            max_len = QWEN3_MAX_LENGTH,
            "initializing Qwen3 embedding model"
        );

        let model = Qwen3TextEmbedding::from_hf(
            QWEN3_REPO_ID,
            &Device::Cpu,
            DType::F32,
            QWEN3_MAX_LENGTH,
        )
        .map_err(|e| EngineError::Embedding(format!("failed to init Qwen3 model: {e}")))?;

        let actual_dim = model.config().hidden_size;
        if actual_dim != QWEN3_DIM {
            return Err(EngineError::Embedding(format!(
                "model dimension mismatch: expected {QWEN3_DIM}, got {actual_dim}"
            )));
        }

        *guard = Some(model);
        self.initialized.store(true, Ordering::Release);
        info!("Qwen3 embedding model ready ({QWEN3_DIM}d, candle CPU)");
        Ok(())
    }
}

impl Default for Qwen3Embedder {
    fn default() -> Self {
        Self::new()
    }
}

impl Embedder for Qwen3Embedder {
    fn model_name(&self) -> &str {
        QWEN3_REPO_ID
    }

    fn dimension(&self) -> usize {
        QWEN3_DIM
    }

    fn embed(&self, texts: &[String]) -> EngineResult<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        self.ensure_model()?;
        let guard = self
            .model
            .lock()
            .map_err(|e| EngineError::Embedding(format!("model lock poisoned: {e}")))?;
        let model = guard
            .as_ref()
            .ok_or_else(|| EngineError::Embedding("model not initialized".into()))?;

        let vectors = model
            .embed(texts)
            .map_err(|e| EngineError::Embedding(e.to_string()))?;
        if vectors.len() != texts.len() {
            return Err(EngineError::Embedding(format!(
                "embedder returned {} vectors for {} texts",
                vectors.len(),
                texts.len()
            )));
        }
        Ok(vectors)
    }

    fn embed_query(&self, query: &str) -> EngineResult<Vec<f32>> {
        // Qwen3-Embedding is instruction-aware: queries carry an instruct
        // prefix, documents are embedded raw.
        let instructed = format!(
            "Instruct: Retrieve passages relevant to the query\nQuery: {query}"
        );
        self.embed(std::slice::from_ref(&instructed))?
            .into_iter()
            .next()
            .ok_or_else(|| EngineError::Embedding("embedder returned no vector".into()))
    }
}

// ---------------------------------------------------------------------------
// Hashing embedder
// ---------------------------------------------------------------------------

/// Feature-hashing bag-of-words: each lowercase alphanumeric token is hashed
/// (FNV-1a, stable everywhere) into one of `dim` buckets; the bucket vector
/// is L2-normalized. Texts sharing tokens land near each other, which is all
/// the retrieval tests and the offline fallback need.
pub struct HashingEmbedder {
    dim: usize,
}

impl HashingEmbedder {
    pub const DEFAULT_DIM: usize = 256;

    pub fn new(dim: usize) -> Self {
        Self { dim: dim.max(8) }
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(Self::DEFAULT_DIM)
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for b in bytes {
        hash ^= *b as u64;
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

impl Embedder for HashingEmbedder {
    fn model_name(&self) -> &str {
        "hashing-bow"
    }

    fn dimension(&self) -> usize {
        self.dim
    }

    fn embed(&self, texts: &[String]) -> EngineResult<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            let mut v = vec![0.0f32; self.dim];
            for token in text
                .to_lowercase()
                .split(|c: char| !c.is_alphanumeric())
                .filter(|t| !t.is_empty())
            {
                let h = fnv1a(token.as_bytes());
                let bucket = (h % self.dim as u64) as usize;
                // sign from a second hash bit reduces bucket collisions
                let sign = if (h >> 63) == 0 { 1.0 } else { -1.0 };
                v[bucket] += sign;
            }
            let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
            if norm > 0.0 {
                for x in &mut v {
                    *x /= norm;
                }
            }
            out.push(v);
        }
        Ok(out)
    }
}

/// Construct the configured embedder.
pub fn from_config(kind: &str) -> EngineResult<Arc<dyn Embedder>> {
    match kind {
        "qwen3" => Ok(Arc::new(Qwen3Embedder::new())),
        "hashing" => Ok(Arc::new(HashingEmbedder::default())),
        other => Err(EngineError::BadRequest(format!(
            "unknown embedder '{other}' (expected 'qwen3' or 'hashing')"
        ))),
    }
}
