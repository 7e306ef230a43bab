//! Axum HTTP server for the REST API

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{routing::get, Router};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::controller::Reconciler;
use crate::{Error, Result};

use super::handlers;

/// Metrics endpoint handler
#[cfg(feature = "metrics")]
async fn metrics_handler() -> std::result::Result<String, axum::http::StatusCode> {
    crate::controller::metrics::encode_text()
        .map_err(|_| axum::http::StatusCode::INTERNAL_SERVER_ERROR)
}

/// Routes served by [`run_server`]
pub fn router(reconciler: Arc<Reconciler>) -> Router {
    let app = Router::new()
        .route("/health", get(handlers::health))
        .route("/api/v1/applications", get(handlers::list_applications))
        .route("/api/v1/applications/{name}", get(handlers::get_application));

    #[cfg(feature = "metrics")]
    let app = app.route("/metrics", get(metrics_handler));

    app.layer(TraceLayer::new_for_http()).with_state(reconciler)
}

/// Run the REST API server until the process exits
pub async fn run_server(reconciler: Arc<Reconciler>, addr: SocketAddr) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| Error::ConfigError(format!("Failed to bind to {}: {}", addr, e)))?;
    info!("REST API server listening on {}", addr);

    axum::serve(listener, router(reconciler))
        .await
        .map_err(Error::IoError)?;

    Ok(())
}
