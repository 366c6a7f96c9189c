//! REST API for the query backend
//!
//! Thin HTTP layer translating query parameters into typed operations.
//! Input errors are rejected with 422 before anything is enqueued;
//! computation and protocol failures map to 500.

pub mod handlers;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use serde_json::json;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use corq_common::config::SketchConfig;
use corq_common::error::Error;

use crate::cache::FileCache;
use crate::dispatch::Dispatcher;
use crate::partitions::PartitionSet;
use crate::qgen::QueryGenerator;
use crate::reorder::ReorderCalculator;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<Dispatcher>,
    pub partitions: Arc<PartitionSet>,
    pub reorder: Arc<ReorderCalculator>,
    pub qgen: Arc<dyn QueryGenerator>,
    pub cache: Option<Arc<FileCache>>,
    /// Directory holding per-corpus data files (`<registry_dir>/<id>.json`)
    pub registry_dir: String,
    pub sketch: SketchConfig,
}

impl AppState {
    /// Resolve a corpus identifier to its data file path. Identifiers are
    /// plain names; anything path-like is rejected before use.
    pub fn corpus_path(&self, corpus_id: &str) -> Result<String, Error> {
        if corpus_id.is_empty() || corpus_id.contains('/') || corpus_id.contains("..") {
            return Err(Error::InvalidInput(format!(
                "invalid corpus identifier: {}",
                corpus_id
            )));
        }
        Ok(format!("{}/{}.json", self.registry_dir, corpus_id))
    }
}

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .nest(
            "/api/v1",
            Router::new()
                .route("/corpora/:corpus_id/freqs", get(handlers::freq_distrib))
                .route(
                    "/corpora/:corpus_id/term-frequency",
                    get(handlers::term_frequency),
                )
                .route(
                    "/corpora/:corpus_id/collocations",
                    get(handlers::collocations),
                ),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Health check endpoint
async fn health_check(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "module": "corq-api",
        "version": env!("CARGO_PKG_VERSION"),
        "registry_dir": state.registry_dir,
    }))
}

/// Error wrapper translating the shared error enum into HTTP responses
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self.0 {
            Error::InvalidInput(_) => StatusCode::UNPROCESSABLE_ENTITY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}
