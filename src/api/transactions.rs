use crate::api::{require_merchant, AppState};
use crate::database::transaction_repository::{TransactionKind, TransactionRecord};
use crate::error::{AppError, AppErrorKind, ValidationError};
use crate::middleware::error::success_response;
use crate::services::transaction_factory::CreateTransactionInput;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::Response;
use axum::Json;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct CreateTransactionRequest {
    pub amount: Decimal,
    pub currency: String,
    #[serde(default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub preferred_token_id: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct RegenerateRequest {
    #[serde(default)]
    pub preferred_token_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct TransactionResponse {
    pub id: Uuid,
    pub transaction_number: String,
    pub payment_id: String,
    pub payment_payload: serde_json::Value,
    pub status: String,
    pub amount_usd: Decimal,
    pub display_currency: String,
    pub display_amount: Decimal,
    pub expires_at: Option<DateTime<Utc>>,
}

impl From<TransactionRecord> for TransactionResponse {
    fn from(record: TransactionRecord) -> Self {
        Self {
            id: record.id,
            transaction_number: record.transaction_number,
            payment_id: record.payment_id,
            payment_payload: record.payment_payload,
            status: record.status,
            amount_usd: record.amount_usd,
            display_currency: record.display_currency,
            display_amount: record.display_amount,
            expires_at: record.expires_at,
        }
    }
}

pub async fn create_transaction(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<CreateTransactionRequest>,
) -> Result<Response, AppError> {
    let merchant = require_merchant(&state, &headers).await?;

    let kind = match request.kind.as_deref() {
        None | Some("order") => TransactionKind::Order,
        Some("deposit") => TransactionKind::Deposit,
        Some(other) => {
            return Err(AppError::new(AppErrorKind::Validation(
                ValidationError::MalformedPayload {
                    reason: format!("'{}' is not a valid transaction kind", other),
                },
            )))
        }
    };

    let created = state
        .factory
        .create_transaction(
            &merchant,
            CreateTransactionInput {
                amount: request.amount,
                currency: request.currency,
                description: request.description,
                preferred_token_id: request.preferred_token_id,
            },
            kind,
        )
        .await?;

    Ok(success_response(
        StatusCode::CREATED,
        TransactionResponse::from(created.record),
    ))
}

pub async fn regenerate_payment_link(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    Json(request): Json<RegenerateRequest>,
) -> Result<Response, AppError> {
    let merchant = require_merchant(&state, &headers).await?;

    let regenerated = state
        .factory
        .regenerate_payment_link(&merchant, id, request.preferred_token_id)
        .await?;

    Ok(success_response(
        StatusCode::OK,
        TransactionResponse::from(regenerated.record),
    ))
}
