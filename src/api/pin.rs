use crate::api::{require_merchant, AppState};
use crate::error::AppError;
use crate::middleware::error::success_response;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::Response;
use axum::Json;
use serde::Deserialize;
use serde_json::json;

#[derive(Debug, Deserialize)]
pub struct PinRequest {
    pub pin: String,
}

#[derive(Debug, Deserialize)]
pub struct UpdatePinRequest {
    pub current_pin: String,
    pub new_pin: String,
}

pub async fn set_pin(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<PinRequest>,
) -> Result<Response, AppError> {
    let merchant = require_merchant(&state, &headers).await?;
    state.pin_gate.set(&merchant, &request.pin).await?;
    Ok(success_response(
        StatusCode::CREATED,
        json!({ "pin_set": true }),
    ))
}

pub async fn update_pin(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<UpdatePinRequest>,
) -> Result<Response, AppError> {
    let merchant = require_merchant(&state, &headers).await?;
    state
        .pin_gate
        .update(&merchant, &request.current_pin, &request.new_pin)
        .await?;
    Ok(success_response(
        StatusCode::OK,
        json!({ "pin_updated": true }),
    ))
}

pub async fn revoke_pin(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<PinRequest>,
) -> Result<Response, AppError> {
    let merchant = require_merchant(&state, &headers).await?;
    state.pin_gate.revoke(&merchant, &request.pin).await?;
    Ok(success_response(
        StatusCode::OK,
        json!({ "pin_revoked": true }),
    ))
}

/// Reports the validation outcome instead of failing the request: a wrong
/// PIN is a 200 with `valid: false` and the remaining attempt budget.
pub async fn validate_pin(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<PinRequest>,
) -> Result<Response, AppError> {
    let merchant = require_merchant(&state, &headers).await?;
    let report = state.pin_gate.validate(&merchant, &request.pin).await?;
    Ok(success_response(StatusCode::OK, report))
}
