//! switchyard-api — REST API for Switchyard.
//!
//! Provides axum route handlers for operator control of rollouts and
//! traffic switches, plus read-only service status.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/api/v1/services` | List all services |
//! | GET | `/api/v1/services/:name/status` | Service status: instances, health, admission, rollout |
//! | POST | `/api/v1/services/:name/rollouts` | Start a rollout |
//! | POST | `/api/v1/services/:name/switch` | Switch the active traffic group |
//! | GET | `/api/v1/rollouts` | List rollout plans |
//! | GET | `/api/v1/rollouts/:id` | Get one rollout plan |
//! | POST | `/api/v1/rollouts/:id/abort` | Abort a rollout plan |

pub mod handlers;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use switchyard_rollout::RolloutEngine;
use switchyard_state::StateStore;
use switchyard_traffic::TrafficController;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub store: StateStore,
    pub engine: Arc<RolloutEngine>,
    pub traffic: TrafficController,
}

/// Build the complete API router.
pub fn build_router(state: ApiState) -> Router {
    let api_routes = Router::new()
        .route("/services", get(handlers::list_services))
        .route("/services/{name}/status", get(handlers::service_status))
        .route("/services/{name}/rollouts", post(handlers::start_rollout))
        .route("/services/{name}/switch", post(handlers::switch_traffic))
        .route("/rollouts", get(handlers::list_rollouts))
        .route("/rollouts/{id}", get(handlers::get_rollout))
        .route("/rollouts/{id}/abort", post(handlers::abort_rollout))
        .with_state(state);

    Router::new().nest("/api/v1", api_routes)
}
