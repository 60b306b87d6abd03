use crate::api::AppState;
use crate::database;
use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde_json::{json, Value};

pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok", "service": env!("CARGO_PKG_NAME") }))
}

pub async fn live() -> StatusCode {
    StatusCode::OK
}

/// Readiness gates on the database; a failed ping returns 503 so the
/// orchestrator stops routing traffic here.
pub async fn ready(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    match database::health_check(&state.pool).await {
        Ok(()) => (StatusCode::OK, Json(json!({ "status": "ready" }))),
        Err(err) => {
            tracing::warn!(error = %err, "readiness check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "status": "unavailable" })),
            )
        }
    }
}
