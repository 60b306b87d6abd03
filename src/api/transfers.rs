use crate::api::{require_merchant, AppState};
use crate::error::AppError;
use crate::middleware::error::success_response;
use crate::services::transfer::TransferRequest;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::Response;
use axum::Json;
use rust_decimal::Decimal;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct CreateTransferRequest {
    pub recipient: String,
    pub amount: Decimal,
    #[serde(default)]
    pub pin: Option<String>,
    #[serde(default)]
    pub request_id: Option<String>,
}

pub async fn create_transfer(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<CreateTransferRequest>,
) -> Result<Response, AppError> {
    let merchant = require_merchant(&state, &headers).await?;

    let receipt = state
        .transfers
        .transfer(
            &merchant,
            TransferRequest {
                recipient: request.recipient,
                amount: request.amount,
                pin: request.pin,
                request_id: request.request_id,
            },
        )
        .await?;

    let status = if receipt.from_cache {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };
    Ok(success_response(status, receipt))
}
