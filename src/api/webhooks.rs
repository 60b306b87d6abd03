//! Inbound settlement webhook
//!
//! The body is taken raw so the HMAC check covers the exact bytes the
//! provider signed. Applied transitions and discarded duplicates both
//! acknowledge with 200 so the provider stops redelivering.

use crate::api::{AppState, WEBHOOK_SIGNATURE_HEADER};
use crate::error::AppError;
use crate::middleware::error::success_response;
use crate::services::status_reconciler::ReconcileOutcome;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::Response;
use serde_json::json;

pub async fn handle_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, AppError> {
    let signature = headers
        .get(WEBHOOK_SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok());

    let outcome = state.reconciler.process_event(&body, signature).await?;

    let data = match outcome {
        ReconcileOutcome::Applied {
            transaction_number,
            new_status,
        } => json!({
            "result": "applied",
            "transaction_number": transaction_number,
            "status": new_status.as_str(),
        }),
        ReconcileOutcome::Discarded {
            transaction_number,
            current_status,
        } => json!({
            "result": "discarded",
            "transaction_number": transaction_number,
            "status": current_status.as_str(),
        }),
    };

    Ok(success_response(StatusCode::OK, data))
}
