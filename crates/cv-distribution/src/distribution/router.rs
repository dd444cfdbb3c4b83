use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use serde_json::json;

use super::repository::{DistributionRecorder, RuleStore, WorkItemSource};
use super::service::{
    AllocationRequest, DistributionService, DistributionServiceError, ManualAssignment, Removal,
};

/// Router builder exposing the distribution endpoints.
pub fn distribution_router<R, S, D>(service: Arc<DistributionService<R, S, D>>) -> Router
where
    R: RuleStore + 'static,
    S: WorkItemSource + 'static,
    D: DistributionRecorder + 'static,
{
    Router::new()
        .route(
            "/api/v1/distribution/auto",
            post(auto_distribute_handler::<R, S, D>),
        )
        .route("/api/v1/distribution/assign", post(assign_handler::<R, S, D>))
        .route("/api/v1/distribution/remove", post(remove_handler::<R, S, D>))
        .route("/api/v1/distribution/stats", get(stats_handler::<R, S, D>))
        .route("/api/v1/distribution/rules", get(rules_handler::<R, S, D>))
        .with_state(service)
}

pub(crate) async fn auto_distribute_handler<R, S, D>(
    State(service): State<Arc<DistributionService<R, S, D>>>,
    axum::Json(request): axum::Json<AllocationRequest>,
) -> Response
where
    R: RuleStore + 'static,
    S: WorkItemSource + 'static,
    D: DistributionRecorder + 'static,
{
    match service.run(request) {
        Ok(report) => (StatusCode::OK, axum::Json(report)).into_response(),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn assign_handler<R, S, D>(
    State(service): State<Arc<DistributionService<R, S, D>>>,
    axum::Json(assignment): axum::Json<ManualAssignment>,
) -> Response
where
    R: RuleStore + 'static,
    S: WorkItemSource + 'static,
    D: DistributionRecorder + 'static,
{
    match service.assign(assignment) {
        Ok(receipt) => (StatusCode::OK, axum::Json(receipt)).into_response(),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn remove_handler<R, S, D>(
    State(service): State<Arc<DistributionService<R, S, D>>>,
    axum::Json(removal): axum::Json<Removal>,
) -> Response
where
    R: RuleStore + 'static,
    S: WorkItemSource + 'static,
    D: DistributionRecorder + 'static,
{
    match service.remove(removal) {
        Ok(receipt) => (StatusCode::OK, axum::Json(receipt)).into_response(),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn stats_handler<R, S, D>(
    State(service): State<Arc<DistributionService<R, S, D>>>,
) -> Response
where
    R: RuleStore + 'static,
    S: WorkItemSource + 'static,
    D: DistributionRecorder + 'static,
{
    match service.stats() {
        Ok(stats) => (StatusCode::OK, axum::Json(stats)).into_response(),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn rules_handler<R, S, D>(
    State(service): State<Arc<DistributionService<R, S, D>>>,
) -> Response
where
    R: RuleStore + 'static,
    S: WorkItemSource + 'static,
    D: DistributionRecorder + 'static,
{
    match service.rules() {
        Ok(rules) => {
            let payload = json!({ "rules": rules });
            (StatusCode::OK, axum::Json(payload)).into_response()
        }
        Err(error) => error_response(DistributionServiceError::Rules(error)),
    }
}

fn error_response(error: DistributionServiceError) -> Response {
    let status = match &error {
        DistributionServiceError::UnknownChannel(_) => StatusCode::NOT_FOUND,
        other if other.is_rejection() => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    let payload = json!({
        "error": error.to_string(),
    });
    (status, axum::Json(payload)).into_response()
}
