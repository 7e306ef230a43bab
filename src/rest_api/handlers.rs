//! HTTP handlers for the REST API

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use tracing::instrument;

use crate::controller::Reconciler;

use super::dto::{
    ApplicationListResponse, ApplicationStatusResponse, ErrorResponse, HealthResponse,
};

/// Health check endpoint
#[instrument(skip(reconciler))]
pub async fn health(State(reconciler): State<Arc<Reconciler>>) -> Json<HealthResponse> {
    let state = reconciler.state();
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        tracked_applications: state.len().await,
        paused_applications: state.paused_count().await,
    })
}

/// List every tracked application, ordered by name
#[instrument(skip(reconciler))]
pub async fn list_applications(
    State(reconciler): State<Arc<Reconciler>>,
) -> Json<ApplicationListResponse> {
    let items: Vec<ApplicationStatusResponse> = reconciler
        .state()
        .entries()
        .await
        .into_iter()
        .map(|(name, state)| ApplicationStatusResponse { name, state })
        .collect();

    let total = items.len();
    Json(ApplicationListResponse { items, total })
}

/// Get the tracked state of one application
#[instrument(skip(reconciler), fields(name = %name))]
pub async fn get_application(
    State(reconciler): State<Arc<Reconciler>>,
    Path(name): Path<String>,
) -> Result<Json<ApplicationStatusResponse>, (StatusCode, Json<ErrorResponse>)> {
    match reconciler.state().get(&name).await {
        Some(state) => Ok(Json(ApplicationStatusResponse { name, state })),
        None => Err((
            StatusCode::NOT_FOUND,
            Json(ErrorResponse::new(
                "not_found",
                &format!("Application {} is not tracked", name),
            )),
        )),
    }
}
