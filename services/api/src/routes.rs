use crate::infra::{AppDistributionService, AppState};
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::Extension;
use axum::Json;
use cv_distribution::distribution::{distribution_router, InMemoryDistributionStore, WorkItem};
use cv_distribution::error::AppError;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Deserialize)]
pub(crate) struct IntakeRequest {
    pub(crate) items: Vec<WorkItem>,
}

pub(crate) fn with_distribution_routes(
    service: Arc<AppDistributionService>,
    store: Arc<InMemoryDistributionStore>,
) -> axum::Router {
    distribution_router(service)
        .route("/api/v1/items", axum::routing::post(intake_endpoint))
        .layer(Extension(store))
        .route("/health", axum::routing::get(healthcheck))
        .route("/ready", axum::routing::get(readiness_endpoint))
        .route("/metrics", axum::routing::get(metrics_endpoint))
}

/// Queue new candidate records for the next automatic run.
pub(crate) async fn intake_endpoint(
    Extension(store): Extension<Arc<InMemoryDistributionStore>>,
    Json(payload): Json<IntakeRequest>,
) -> Result<impl IntoResponse, AppError> {
    let queued = store
        .enqueue(payload.items)
        .map_err(|err| AppError::Distribution(err.into()))?;
    info!(queued, "work items queued");
    Ok((StatusCode::ACCEPTED, Json(json!({ "queued": queued }))))
}

pub(crate) async fn healthcheck() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

pub(crate) async fn readiness_endpoint(Extension(state): Extension<AppState>) -> impl IntoResponse {
    let ready = state.readiness.load(std::sync::atomic::Ordering::Acquire);
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let payload = if ready {
        json!({ "status": "ready" })
    } else {
        json!({ "status": "initializing" })
    };

    (status, Json(payload))
}

pub(crate) async fn metrics_endpoint(Extension(state): Extension<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
}
