//! Events broadcast to observers (status route, logs, tests).

use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data")]
pub enum EngineEvent {
    #[serde(rename = "document_indexed")]
    DocumentIndexed { path: String, chunks: usize },
    #[serde(rename = "document_failed")]
    DocumentFailed { path: String, error: String },
    #[serde(rename = "document_deleted")]
    DocumentDeleted { path: String },
    #[serde(rename = "document_rejected")]
    DocumentRejected { path: String, reason: String },
    #[serde(rename = "queue_paused")]
    QueuePaused,
    #[serde(rename = "queue_resumed")]
    QueueResumed,
    #[serde(rename = "queue_cleared")]
    QueueCleared { removed: usize },
    #[serde(rename = "heal_completed")]
    HealCompleted { actions: usize },
}
