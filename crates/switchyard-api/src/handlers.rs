//! REST API handlers for rollout and traffic control.
//!
//! Error mapping is uniform: unknown service or plan is 404, an active-plan
//! conflict or refused cutover is 409, an impossible budget is 422, and
//! store failures are 500.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use tracing::info;

use switchyard_rollout::RolloutError;
use switchyard_state::{InstanceRecord, RolloutRecord, ServiceSpec};
use switchyard_traffic::TrafficError;

use crate::ApiState;

/// Response wrapper for all endpoints.
#[derive(serde::Serialize)]
struct ApiResponse<T: serde::Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: serde::Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

fn api_error(msg: &str, status: StatusCode) -> impl IntoResponse {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }),
    )
}

fn rollout_error_response(e: RolloutError) -> axum::response::Response {
    let status = match &e {
        RolloutError::ServiceNotFound(_) | RolloutError::PlanNotFound(_) => StatusCode::NOT_FOUND,
        RolloutError::RolloutConflict(_) => StatusCode::CONFLICT,
        RolloutError::InvalidBudget => StatusCode::UNPROCESSABLE_ENTITY,
        RolloutError::State(_) | RolloutError::Manager(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    api_error(&e.to_string(), status).into_response()
}

fn traffic_error_response(e: TrafficError) -> axum::response::Response {
    let status = match &e {
        TrafficError::ServiceNotFound(_) => StatusCode::NOT_FOUND,
        TrafficError::NoHealthyTarget { .. } => StatusCode::CONFLICT,
        TrafficError::State(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    api_error(&e.to_string(), status).into_response()
}

/// Aggregated view of one service for operators.
#[derive(serde::Serialize)]
pub struct ServiceStatus {
    pub spec: ServiceSpec,
    pub instances: Vec<InstanceRecord>,
    /// Instance ids currently eligible for traffic.
    pub admitted: Vec<String>,
    pub available: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_rollout: Option<RolloutRecord>,
}

/// GET /api/v1/services
pub async fn list_services(State(state): State<ApiState>) -> impl IntoResponse {
    match state.store.list_services() {
        Ok(services) => ApiResponse::ok(services).into_response(),
        Err(e) => api_error(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response(),
    }
}

/// GET /api/v1/services/:name/status
pub async fn service_status(
    State(state): State<ApiState>,
    Path(name): Path<String>,
) -> impl IntoResponse {
    let spec = match state.store.get_service(&name) {
        Ok(Some(spec)) => spec,
        Ok(None) => return api_error("service not found", StatusCode::NOT_FOUND).into_response(),
        Err(e) => {
            return api_error(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response()
        }
    };

    let instances = match state.store.list_instances_for_service(&name) {
        Ok(records) => records,
        Err(e) => {
            return api_error(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response()
        }
    };

    let active_rollout = match state.store.active_rollout_for_service(&name) {
        Ok(plan) => plan,
        Err(e) => {
            return api_error(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response()
        }
    };

    let snapshot = state.traffic.admitted(&name);
    let available = instances.iter().filter(|r| r.is_available()).count() as u32;

    ApiResponse::ok(ServiceStatus {
        spec,
        instances,
        admitted: snapshot.instances.iter().cloned().collect(),
        available,
        active_rollout,
    })
    .into_response()
}

/// Request body to start a rollout.
#[derive(serde::Deserialize)]
pub struct StartRolloutRequest {
    pub new_version: String,
    #[serde(default)]
    pub max_unavailable: u32,
    #[serde(default = "default_surge")]
    pub max_surge: u32,
}

fn default_surge() -> u32 {
    1
}

/// POST /api/v1/services/:name/rollouts
pub async fn start_rollout(
    State(state): State<ApiState>,
    Path(name): Path<String>,
    Json(req): Json<StartRolloutRequest>,
) -> impl IntoResponse {
    match state
        .engine
        .start_rollout(&name, &req.new_version, req.max_unavailable, req.max_surge)
        .await
    {
        Ok(plan_id) => {
            info!(service = %name, plan = %plan_id, new_version = %req.new_version, "rollout requested");
            let plan = match state.store.get_rollout(&plan_id) {
                Ok(Some(plan)) => plan,
                Ok(None) => {
                    return api_error("plan vanished", StatusCode::INTERNAL_SERVER_ERROR)
                        .into_response()
                }
                Err(e) => {
                    return api_error(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR)
                        .into_response()
                }
            };
            (StatusCode::CREATED, ApiResponse::ok(plan)).into_response()
        }
        Err(e) => rollout_error_response(e),
    }
}

/// GET /api/v1/rollouts
pub async fn list_rollouts(State(state): State<ApiState>) -> impl IntoResponse {
    match state.store.list_rollouts() {
        Ok(plans) => ApiResponse::ok(plans).into_response(),
        Err(e) => api_error(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response(),
    }
}

/// GET /api/v1/rollouts/:id
pub async fn get_rollout(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.store.get_rollout(&id) {
        Ok(Some(plan)) => ApiResponse::ok(plan).into_response(),
        Ok(None) => api_error("rollout plan not found", StatusCode::NOT_FOUND).into_response(),
        Err(e) => api_error(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response(),
    }
}

/// Request body for abort; the reason lands in the plan's final phase.
#[derive(serde::Deserialize, Default)]
pub struct AbortRequest {
    #[serde(default)]
    pub reason: Option<String>,
}

/// POST /api/v1/rollouts/:id/abort
pub async fn abort_rollout(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    body: Option<Json<AbortRequest>>,
) -> impl IntoResponse {
    let reason = body
        .and_then(|Json(req)| req.reason)
        .unwrap_or_else(|| "operator request".to_string());

    match state.engine.abort(&id, &reason).await {
        Ok(()) => {
            info!(plan = %id, %reason, "abort requested");
            match state.store.get_rollout(&id) {
                Ok(Some(plan)) => ApiResponse::ok(plan).into_response(),
                Ok(None) => {
                    api_error("rollout plan not found", StatusCode::NOT_FOUND).into_response()
                }
                Err(e) => {
                    api_error(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response()
                }
            }
        }
        Err(e) => rollout_error_response(e),
    }
}

/// Request body to switch the active traffic group.
#[derive(serde::Deserialize)]
pub struct SwitchRequest {
    pub group: String,
}

/// POST /api/v1/services/:name/switch
pub async fn switch_traffic(
    State(state): State<ApiState>,
    Path(name): Path<String>,
    Json(req): Json<SwitchRequest>,
) -> impl IntoResponse {
    match state.traffic.switch_to(&name, &req.group) {
        Ok(outcome) => {
            let snapshot = state.traffic.admitted(&name);
            ApiResponse::ok(serde_json::json!({
                "outcome": outcome,
                "group": req.group,
                "admitted": snapshot.instances,
            }))
            .into_response()
        }
        Err(e) => traffic_error_response(e),
    }
}
