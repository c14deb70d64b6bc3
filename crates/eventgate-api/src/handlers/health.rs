//! Liveness and readiness probes

use axum::{extract::State, http::StatusCode, Json};
use eventgate_client::GateState;

use crate::{models::HealthResponse, AppState};

#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse)
    ),
    tag = "health"
)]
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

/// Readiness probe. Ready once the producer has connected to the broker.
#[utoipa::path(
    get,
    path = "/ready",
    responses(
        (status = 200, description = "Producer connected", body = HealthResponse),
        (status = 503, description = "Producer still connecting or failed")
    ),
    tag = "health"
)]
pub async fn readiness_check(
    State(state): State<AppState>,
) -> Result<Json<HealthResponse>, StatusCode> {
    match state.producer.readiness().state() {
        GateState::Ready => Ok(Json(HealthResponse {
            status: "ready".to_string(),
        })),
        GateState::Pending => Err(StatusCode::SERVICE_UNAVAILABLE),
        GateState::Failed(reason) => {
            tracing::warn!(reason = %reason, "Readiness check failed: producer unavailable");
            Err(StatusCode::SERVICE_UNAVAILABLE)
        }
    }
}
