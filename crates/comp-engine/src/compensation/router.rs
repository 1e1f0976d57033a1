use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use serde_json::json;

use super::plan::{Plan, RuleSetId};
use super::repository::{CalculationRepository, EntityId, PeriodId, RepositoryError, TenantId};
use super::service::{CalculationError, CalculationService};

/// Body of a batch calculation request.
#[derive(Debug, Clone, Deserialize)]
pub struct CalculationRequest {
    pub rule_set_id: String,
    pub period_id: String,
}

/// Router builder exposing batch calculation, entity explanation and plan validation.
pub fn calculation_router<R>(service: Arc<CalculationService<R>>) -> Router
where
    R: CalculationRepository + 'static,
{
    Router::new()
        .route(
            "/api/v1/tenants/:tenant_id/calculations",
            post(run_handler::<R>),
        )
        .route(
            "/api/v1/tenants/:tenant_id/calculations/:rule_set_id/:period_id/entities/:entity_id",
            get(explain_handler::<R>),
        )
        .route("/api/v1/plans/validate", post(validate_handler::<R>))
        .with_state(service)
}

pub(crate) async fn run_handler<R>(
    State(service): State<Arc<CalculationService<R>>>,
    Path(tenant_id): Path<String>,
    axum::Json(request): axum::Json<CalculationRequest>,
) -> Response
where
    R: CalculationRepository + 'static,
{
    let outcome = service
        .run_calculation(
            &TenantId(tenant_id),
            &RuleSetId(request.rule_set_id),
            &PeriodId(request.period_id),
        )
        .await;

    match outcome {
        Ok(run) => (StatusCode::OK, axum::Json(run)).into_response(),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn explain_handler<R>(
    State(service): State<Arc<CalculationService<R>>>,
    Path((tenant_id, rule_set_id, period_id, entity_id)): Path<(String, String, String, String)>,
) -> Response
where
    R: CalculationRepository + 'static,
{
    let outcome = service.explain_entity(
        &TenantId(tenant_id),
        &RuleSetId(rule_set_id),
        &PeriodId(period_id),
        &EntityId(entity_id),
    );

    match outcome {
        Ok(result) => {
            let payload = json!({
                "narrative": result.narrative(),
                "result": result,
            });
            (StatusCode::OK, axum::Json(payload)).into_response()
        }
        Err(error) => error_response(error),
    }
}

pub(crate) async fn validate_handler<R>(
    State(service): State<Arc<CalculationService<R>>>,
    axum::Json(plan): axum::Json<Plan>,
) -> Response
where
    R: CalculationRepository + 'static,
{
    let report = service.validate_plan(&plan);
    let payload = json!({
        "valid": !report.has_errors(),
        "issues": report.issues,
    });
    (StatusCode::OK, axum::Json(payload)).into_response()
}

pub(crate) fn status_for(error: &CalculationError) -> StatusCode {
    match error {
        CalculationError::PlanNotFound { .. }
        | CalculationError::EntityNotFound { .. }
        | CalculationError::Repository(RepositoryError::NotFound) => StatusCode::NOT_FOUND,
        CalculationError::PlanInvalid { .. } | CalculationError::NotEligible(_) => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        CalculationError::BatchTimeout => StatusCode::GATEWAY_TIMEOUT,
        CalculationError::Repository(RepositoryError::Unavailable(_)) => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        CalculationError::Evaluation(_) | CalculationError::WorkerFailed(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

pub(crate) fn error_response(error: CalculationError) -> Response {
    let status = status_for(&error);
    let mut payload = json!({
        "code": error.code(),
        "error": error.to_string(),
    });

    match &error {
        CalculationError::PlanInvalid { issues, .. } => {
            payload["issues"] = json!(issues);
        }
        CalculationError::NotEligible(failure) => {
            payload["mismatches"] = json!(failure.mismatches);
        }
        _ => {}
    }

    (status, axum::Json(payload)).into_response()
}
