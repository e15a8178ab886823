//! Maintenance routes: integrity verification, orphan cleanup and index
//! rebuilds, all supporting dry-run.

use axum::Json;
use axum::extract::State;
use serde::Deserialize;
use serde_json::{Value, json};

use crate::error::{EngineError, EngineResult};

use super::control::AppState;

#[derive(Deserialize, Default)]
pub struct DryRunBody {
    #[serde(default)]
    pub dry_run: bool,
}

pub async fn verify_integrity(State(engine): State<AppState>) -> EngineResult<Json<Value>> {
    let report = tokio::task::spawn_blocking(move || engine.verify_integrity())
        .await
        .map_err(|e| EngineError::Internal(anyhow::anyhow!("verify task failed: {e}")))??;
    Ok(Json(json!(report)))
}

pub async fn cleanup_orphans(
    State(engine): State<AppState>,
    Json(body): Json<DryRunBody>,
) -> EngineResult<Json<Value>> {
    let out = tokio::task::spawn_blocking(move || engine.cleanup_orphans(body.dry_run))
        .await
        .map_err(|e| EngineError::Internal(anyhow::anyhow!("cleanup task failed: {e}")))??;
    Ok(Json(json!(out)))
}

pub async fn rebuild_vector_index(
    State(engine): State<AppState>,
    Json(body): Json<DryRunBody>,
) -> EngineResult<Json<Value>> {
    let out = tokio::task::spawn_blocking(move || engine.rebuild_vector_index(body.dry_run))
        .await
        .map_err(|e| EngineError::Internal(anyhow::anyhow!("rebuild task failed: {e}")))??;
    Ok(Json(json!(out)))
}

pub async fn rebuild_fts_index(
    State(engine): State<AppState>,
    Json(body): Json<DryRunBody>,
) -> EngineResult<Json<Value>> {
    let out = tokio::task::spawn_blocking(move || engine.rebuild_fts_index(body.dry_run))
        .await
        .map_err(|e| EngineError::Internal(anyhow::anyhow!("rebuild task failed: {e}")))??;
    Ok(Json(json!(out)))
}

pub async fn repair_indexes(
    State(engine): State<AppState>,
    Json(body): Json<DryRunBody>,
) -> EngineResult<Json<Value>> {
    let out = tokio::task::spawn_blocking(move || engine.repair_indexes(body.dry_run))
        .await
        .map_err(|e| EngineError::Internal(anyhow::anyhow!("repair task failed: {e}")))??;
    Ok(Json(json!(out)))
}

#[derive(Deserialize, Default)]
pub struct ReindexFailedBody {
    pub issue_types: Option<Vec<String>>,
    #[serde(default)]
    pub dry_run: bool,
}

pub async fn reindex_failed(
    State(engine): State<AppState>,
    Json(body): Json<ReindexFailedBody>,
) -> EngineResult<Json<Value>> {
    let out = tokio::task::spawn_blocking(move || {
        engine.reindex_failed_documents(body.issue_types.as_deref(), body.dry_run)
    })
    .await
    .map_err(|e| EngineError::Internal(anyhow::anyhow!("reindex task failed: {e}")))??;
    Ok(Json(json!(out)))
}
