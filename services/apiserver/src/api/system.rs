//! Health probe handler.
//!
//! # Key invariants and assumptions
//! - Health checks must be fast and side-effect free.
use crate::api::error::ApiError;
use crate::api::types::HealthStatus;
use crate::app::AppState;
use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;

/// Probe the backend; `503` while it cannot be reached.
pub(crate) async fn healthz(State(state): State<AppState>) -> Result<Json<HealthStatus>, ApiError> {
    if let Err(err) = state.storage.health().await {
        tracing::warn!(error = %err, "health check failed");
        return Err(ApiError::new(
            StatusCode::SERVICE_UNAVAILABLE,
            "ServiceUnavailable",
            "storage unavailable",
        ));
    }
    Ok(Json(HealthStatus {
        status: "ok".to_string(),
        backend: state.storage.backend_name().to_string(),
        durable: state.storage.is_durable(),
    }))
}
