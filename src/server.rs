//! HTTP adapter. The transport is deliberately thin: every route delegates
//! to one `Engine` operation.

use std::sync::Arc;

use axum::{
    Router,
    routing::{delete, get, post},
};
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::engine::Engine;
use crate::routes;

pub fn create_app(engine: Arc<Engine>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(routes::health::health_check))
        .route("/shutdown", post(routes::health::shutdown_handler))
        // ingestion + query
        .route("/api/ingest", post(routes::control::ingest))
        .route("/api/query", post(routes::control::query))
        // queue control + introspection
        .route("/api/pause", post(routes::control::pause))
        .route("/api/resume", post(routes::control::resume))
        .route("/api/clear", post(routes::control::clear))
        .route("/api/status", get(routes::control::status))
        .route("/api/health", get(routes::control::engine_health))
        // documents
        .route("/api/documents", get(routes::control::list_documents))
        .route("/api/document", get(routes::control::get_document))
        .route("/api/document", delete(routes::control::delete_document))
        .route("/api/document/reindex", post(routes::control::reindex_document))
        .route("/api/graph/neighbors", get(routes::control::graph_neighbors))
        // maintenance
        .route("/api/maintenance/verify", post(routes::maintenance::verify_integrity))
        .route(
            "/api/maintenance/cleanup-orphans",
            post(routes::maintenance::cleanup_orphans),
        )
        .route(
            "/api/maintenance/rebuild-vector-index",
            post(routes::maintenance::rebuild_vector_index),
        )
        .route(
            "/api/maintenance/rebuild-fts-index",
            post(routes::maintenance::rebuild_fts_index),
        )
        .route(
            "/api/maintenance/repair-indexes",
            post(routes::maintenance::repair_indexes),
        )
        .route(
            "/api/maintenance/reindex-failed",
            post(routes::maintenance::reindex_failed),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(cors)
        .with_state(engine)
}
