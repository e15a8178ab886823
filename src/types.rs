use std::path::PathBuf;

use serde::{Deserialize, Serialize};

pub type DocumentId = i64;
pub type ChunkId = i64;

/// Queue priority band. Lower numeric value dequeues first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Priority {
    Urgent = 0,
    High = 1,
    Normal = 2,
    Low = 3,
}

impl Priority {
    pub const COUNT: usize = 4;

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(i: usize) -> Self {
        match i {
            0 => Priority::Urgent,
            1 => Priority::High,
            2 => Priority::Normal,
            _ => Priority::Low,
        }
    }
}

/// An ingestion request as it travels through the queue.
#[derive(Debug, Clone)]
pub struct QueueItem {
    /// Canonical path (see `fingerprint::canonicalize`).
    pub path: String,
    pub priority: Priority,
    pub force: bool,
    pub enqueued_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStatus {
    Pending,
    InProgress,
    Completed,
    Rejected,
    Failed,
}

impl ProcessingStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ProcessingStatus::Pending => "pending",
            ProcessingStatus::InProgress => "in_progress",
            ProcessingStatus::Completed => "completed",
            ProcessingStatus::Rejected => "rejected",
            ProcessingStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "pending" => ProcessingStatus::Pending,
            "in_progress" => ProcessingStatus::InProgress,
            "completed" => ProcessingStatus::Completed,
            "rejected" => ProcessingStatus::Rejected,
            "failed" => ProcessingStatus::Failed,
            _ => return None,
        })
    }
}

/// Structural metadata attached to a chunk, serialized as JSON in the store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    /// Outgoing wikilink targets (Obsidian).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub links: Vec<String>,
    /// Header trail leading to this chunk, outermost first.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub headers: Vec<String>,
}

impl ChunkMetadata {
    pub fn is_empty(&self) -> bool {
        self.tags.is_empty() && self.links.is_empty() && self.headers.is_empty()
    }
}

/// One extracted page: text plus its page number when the format has pages.
#[derive(Debug, Clone)]
pub struct Page {
    pub text: String,
    pub number: Option<u32>,
}

/// A chunk as produced by a `Chunker`, before embedding.
#[derive(Debug, Clone)]
pub struct ExtractedChunk {
    pub text: String,
    pub ordinal: usize,
    pub page: Option<u32>,
    pub metadata: ChunkMetadata,
}

/// Output of the extraction stage.
#[derive(Debug, Clone)]
pub struct ExtractedDocument {
    pub path: String,
    pub abs_path: PathBuf,
    pub hash: String,
    pub extraction_method: String,
    pub chunks: Vec<ExtractedChunk>,
    /// Graph payload for Markdown notes; None for everything else.
    pub note: Option<NotePayload>,
}

/// Extraction stage output augmented with per-chunk vectors, aligned by
/// position.
#[derive(Debug, Clone)]
pub struct EmbeddedDocument {
    pub doc: ExtractedDocument,
    pub vectors: Vec<Vec<f32>>,
}

/// Obsidian note attributes carried from the Markdown extractor to the
/// graph store.
#[derive(Debug, Clone, Default)]
pub struct NotePayload {
    pub title: String,
    pub links: Vec<String>,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub content: String,
    pub path: String,
    pub page: Option<u32>,
    /// Fused RRF score, normalized to [0, 1].
    pub score: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rerank_score: Option<f32>,
    pub chunk_id: ChunkId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentSummary {
    pub id: DocumentId,
    pub path: String,
    pub chunk_count: i64,
    pub indexed_at: i64,
    pub extraction_method: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentInfo {
    #[serde(flatten)]
    pub summary: DocumentSummary,
    pub hash: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProgressRow {
    pub path: String,
    pub hash: String,
    pub status: ProcessingStatus,
    pub extraction_method: String,
    pub started_at: i64,
    pub completed_at: Option<i64>,
    pub error_message: Option<String>,
}
