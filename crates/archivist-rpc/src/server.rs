//! HTTP server implementation using Axum.

use crate::handlers::{
    handle_get_model, handle_health, handle_list_models, handle_rpc, handle_scan,
};
use archivist_core::Archivist;
use axum::{
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

/// Application state shared across handlers.
pub struct AppState {
    pub archivist: Arc<Archivist>,
}

/// Build the router with every route and layer.
pub fn router(archivist: Arc<Archivist>) -> Router {
    let state = Arc::new(AppState { archivist });

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/models", get(handle_list_models))
        .route("/models/:hash", get(handle_get_model))
        .route("/scan", post(handle_scan))
        .route("/rpc", post(handle_rpc))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
        .with_state(state)
}

/// Start the HTTP server.
///
/// Returns the actual address the server is bound to (useful when port=0).
pub async fn start_server(
    archivist: Arc<Archivist>,
    host: &str,
    port: u16,
) -> anyhow::Result<SocketAddr> {
    let app = router(archivist);

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let actual_addr = listener.local_addr()?;

    info!("Server listening on {}", actual_addr);

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("Server error: {}", e);
        }
    });

    Ok(actual_addr)
}
