//! Ingest, query, queue control, status and document routes — a thin JSON
//! adapter over `Engine`. Blocking engine calls cross into the sync world
//! via `spawn_blocking`.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Query, State};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::engine::Engine;
use crate::error::{EngineError, EngineResult};
use crate::search::SearchRequest;
use crate::types::Priority;

pub type AppState = Arc<Engine>;

#[derive(Deserialize)]
pub struct IngestBody {
    pub path: String,
    #[serde(default = "default_priority")]
    pub priority: Priority,
    #[serde(default)]
    pub force: bool,
}

fn default_priority() -> Priority {
    Priority::Normal
}

pub async fn ingest(
    State(engine): State<AppState>,
    Json(body): Json<IngestBody>,
) -> EngineResult<Json<Value>> {
    let outcome = tokio::task::spawn_blocking(move || {
        engine.ingest(&body.path, body.priority, body.force)
    })
    .await
    .map_err(|e| EngineError::Internal(anyhow::anyhow!("ingest task failed: {e}")))??;
    Ok(Json(json!(outcome)))
}

#[derive(Deserialize)]
pub struct QueryBody {
    pub query: String,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default)]
    pub threshold: Option<f32>,
    #[serde(default = "default_true")]
    pub decompose: bool,
    #[serde(default)]
    pub rerank: bool,
}

fn default_top_k() -> usize {
    5
}

fn default_true() -> bool {
    true
}

pub async fn query(
    State(engine): State<AppState>,
    Json(body): Json<QueryBody>,
) -> EngineResult<Json<Value>> {
    let req = SearchRequest {
        query: body.query,
        top_k: body.top_k,
        threshold: body.threshold,
        decompose: body.decompose,
        rerank: body.rerank,
    };
    let results = tokio::task::spawn_blocking(move || engine.query(&req))
        .await
        .map_err(|e| EngineError::Internal(anyhow::anyhow!("query task failed: {e}")))??;
    Ok(Json(json!({ "results": *results })))
}

pub async fn pause(State(engine): State<AppState>) -> Json<Value> {
    Json(json!(engine.pause()))
}

pub async fn resume(State(engine): State<AppState>) -> Json<Value> {
    Json(json!(engine.resume()))
}

pub async fn clear(State(engine): State<AppState>) -> Json<Value> {
    Json(json!(engine.clear()))
}

pub async fn status(State(engine): State<AppState>) -> Json<Value> {
    Json(json!(engine.status()))
}

pub async fn engine_health(State(engine): State<AppState>) -> EngineResult<Json<Value>> {
    let health = tokio::task::spawn_blocking(move || engine.health())
        .await
        .map_err(|e| EngineError::Internal(anyhow::anyhow!("health task failed: {e}")))??;
    Ok(Json(json!(health)))
}

#[derive(Deserialize)]
pub struct ListQuery {
    pub pattern: Option<String>,
}

pub async fn list_documents(
    State(engine): State<AppState>,
    Query(params): Query<ListQuery>,
) -> EngineResult<Json<Value>> {
    let docs = tokio::task::spawn_blocking(move || {
        engine.list_documents(params.pattern.as_deref())
    })
    .await
    .map_err(|e| EngineError::Internal(anyhow::anyhow!("list task failed: {e}")))??;
    Ok(Json(json!({ "documents": docs })))
}

#[derive(Deserialize)]
pub struct PathQuery {
    pub path: String,
}

pub async fn get_document(
    State(engine): State<AppState>,
    Query(params): Query<PathQuery>,
) -> EngineResult<Json<Value>> {
    let doc = tokio::task::spawn_blocking(move || engine.get_document(&params.path))
        .await
        .map_err(|e| EngineError::Internal(anyhow::anyhow!("get task failed: {e}")))??;
    Ok(Json(json!(doc)))
}

pub async fn delete_document(
    State(engine): State<AppState>,
    Query(params): Query<PathQuery>,
) -> EngineResult<Json<Value>> {
    let out = tokio::task::spawn_blocking(move || engine.delete_document(&params.path))
        .await
        .map_err(|e| EngineError::Internal(anyhow::anyhow!("delete task failed: {e}")))??;
    Ok(Json(json!(out)))
}

pub async fn reindex_document(
    State(engine): State<AppState>,
    Json(body): Json<PathQuery>,
) -> EngineResult<Json<Value>> {
    let out = tokio::task::spawn_blocking(move || engine.reindex_document(&body.path))
        .await
        .map_err(|e| EngineError::Internal(anyhow::anyhow!("reindex task failed: {e}")))??;
    Ok(Json(json!(out)))
}

#[derive(Deserialize)]
pub struct NeighborsQuery {
    pub path: String,
    #[serde(default = "default_hops")]
    pub hops: usize,
}

fn default_hops() -> usize {
    2
}

pub async fn graph_neighbors(
    State(engine): State<AppState>,
    Query(params): Query<NeighborsQuery>,
) -> EngineResult<Json<Value>> {
    let neighbors =
        tokio::task::spawn_blocking(move || engine.graph_neighbors(&params.path, params.hops))
            .await
            .map_err(|e| EngineError::Internal(anyhow::anyhow!("graph task failed: {e}")))??;
    Ok(Json(json!({ "neighbors": neighbors })))
}
