//! Catalog routes and the blocking calls into the core behind them.
//!
//! Scanning and SQLite access block, so every call into the archivist runs on
//! the blocking thread pool.

use super::{HandlerError, HandlerResult};
use crate::server::AppState;
use archivist_core::{CatalogEntry, ScanReport};
use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::info;

/// Query string of `GET /models`.
#[derive(Debug, Default, Deserialize)]
pub struct ModelsQuery {
    /// Run a full pass before listing
    #[serde(default)]
    pub rescan: bool,
    #[serde(default)]
    pub tags: bool,
    #[serde(default)]
    pub components: bool,
}

pub(crate) async fn run_scan(state: &Arc<AppState>) -> HandlerResult<ScanReport> {
    let archivist = Arc::clone(&state.archivist);
    let report = tokio::task::spawn_blocking(move || archivist.reconcile_all()).await??;
    info!(
        "Scan {} finished with {} issues",
        report.scan_id,
        report.issues.len()
    );
    Ok(report)
}

pub(crate) async fn list_models(
    state: &Arc<AppState>,
    include_tags: bool,
    include_components: bool,
) -> HandlerResult<Vec<CatalogEntry>> {
    let archivist = Arc::clone(&state.archivist);
    let models = tokio::task::spawn_blocking(move || {
        archivist.list_models(include_tags, include_components)
    })
    .await??;
    Ok(models)
}

pub(crate) async fn get_model(
    state: &Arc<AppState>,
    hash: String,
) -> HandlerResult<Option<CatalogEntry>> {
    let archivist = Arc::clone(&state.archivist);
    let model = tokio::task::spawn_blocking(move || archivist.get_model(&hash)).await??;
    Ok(model)
}

pub(crate) async fn clear_errors(state: &Arc<AppState>, model_id: i64) -> HandlerResult<()> {
    let archivist = Arc::clone(&state.archivist);
    tokio::task::spawn_blocking(move || archivist.clear_errors(model_id)).await??;
    Ok(())
}

/// `GET /models?rescan=&tags=&components=`
pub async fn handle_list_models(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ModelsQuery>,
) -> HandlerResult<Json<Vec<CatalogEntry>>> {
    if query.rescan {
        run_scan(&state).await?;
    }
    let models = list_models(&state, query.tags, query.components).await?;
    Ok(Json(models))
}

/// `GET /models/:hash`
pub async fn handle_get_model(
    State(state): State<Arc<AppState>>,
    Path(hash): Path<String>,
) -> HandlerResult<Json<CatalogEntry>> {
    match get_model(&state, hash.clone()).await? {
        Some(model) => Ok(Json(model)),
        None => Err(HandlerError::NotFound(format!("model {}", hash))),
    }
}

/// `POST /scan`
pub async fn handle_scan(State(state): State<Arc<AppState>>) -> HandlerResult<Json<ScanReport>> {
    Ok(Json(run_scan(&state).await?))
}
