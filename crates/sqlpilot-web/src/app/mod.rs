use std::sync::Arc;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::http::header;
use axum::routing::{get, post};
use sqlpilot_db::{ActiveDatabase, DatabaseFileStore, QueryExecutor, ResultStreamer};
use tower_http::cors::{Any, CorsLayer};

use crate::api::db::{api_clear, api_download, api_reset, api_schema, api_upload};
use crate::api::health::api_health;
use crate::api::query::{api_export, api_run};
use crate::config::WebConfig;

#[derive(Clone)]
pub struct AppState {
    pub store: DatabaseFileStore,
    pub executor: QueryExecutor,
    pub streamer: ResultStreamer,
    pub config: Arc<WebConfig>,
}

impl AppState {
    /// Wires every component to one shared [`ActiveDatabase`].
    pub fn new(config: WebConfig) -> Self {
        let active = ActiveDatabase::new();
        Self {
            store: DatabaseFileStore::new(config.upload_dir.clone(), Arc::clone(&active)),
            executor: QueryExecutor::new(Arc::clone(&active)),
            streamer: ResultStreamer::new(active),
            config: Arc::new(config),
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    let upload_limit = state.config.max_upload_bytes;
    let cors = state.config.cors_origin.clone().map(|origin| {
        CorsLayer::new()
            .allow_origin(origin)
            .allow_methods(Any)
            .allow_headers([header::CONTENT_TYPE])
            .expose_headers([header::CONTENT_DISPOSITION])
    });

    let router = Router::new()
        .route("/api/health", get(api_health))
        .route(
            "/api/db/upload",
            post(api_upload).layer(DefaultBodyLimit::max(upload_limit)),
        )
        .route("/api/db/schema", get(api_schema))
        .route("/api/db/reset", post(api_reset))
        .route("/api/db/clear", post(api_clear))
        .route("/api/db/download", get(api_download))
        .route("/api/queries/run", post(api_run))
        .route("/api/queries/export/{format}", get(api_export));

    match cors {
        Some(cors) => router.layer(cors).with_state(state),
        None => router.with_state(state),
    }
}
