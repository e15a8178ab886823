use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Already indexed: {0}")]
    AlreadyIndexed(String),

    #[error("Rejected by validator: {reason}")]
    Rejected { reason: String, critical: bool },

    #[error("Path escapes watched root: {0}")]
    PathEscapesRoot(String),

    #[error("Extraction failed for {path}: {reason}")]
    Extraction { path: String, reason: String },

    #[error("Embedding failed: {0}")]
    Embedding(String),

    #[error("Vector index corruption: {0}")]
    IndexCorruption(String),

    #[error("Search error: {0}")]
    Search(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Store error: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("FTS error: {0}")]
    Fts(#[from] tantivy::TantivyError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for EngineError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            EngineError::NotFound(_) => (StatusCode::NOT_FOUND, self.to_string()),
            EngineError::AlreadyIndexed(_) => (StatusCode::OK, self.to_string()),
            EngineError::Rejected { .. } => (StatusCode::UNPROCESSABLE_ENTITY, self.to_string()),
            EngineError::PathEscapesRoot(_) => (StatusCode::FORBIDDEN, self.to_string()),
            EngineError::BadRequest(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            EngineError::Serde(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            EngineError::Cancelled => (StatusCode::SERVICE_UNAVAILABLE, self.to_string()),
            EngineError::Internal(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_string(),
            ),
            _ => (StatusCode::INTERNAL_SERVER_ERROR, self.to_string()),
        };

        let body = json!({
            "error": message,
            "status": status.as_u16(),
        });

        (status, Json(body)).into_response()
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
