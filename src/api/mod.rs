//! HTTP surface
//!
//! Handlers stay thin: extract, resolve the merchant, call a service, wrap
//! the result. Merchant identity comes from the `x-merchant-id` header;
//! token verification mechanics live outside this service.

pub mod health;
pub mod pin;
pub mod transactions;
pub mod transfers;
pub mod webhooks;

use crate::database::merchant_repository::Merchant;
use crate::error::{AppError, AppErrorKind, NotFoundError, ValidationError};
use crate::services::pin_gate::PinGate;
use crate::services::ports::MerchantStore;
use crate::services::status_reconciler::StatusReconciler;
use crate::services::transaction_factory::TransactionFactory;
use crate::services::transfer::TransferService;
use axum::http::HeaderMap;
use axum::routing::{delete, get, post, put};
use axum::Router;
use sqlx::PgPool;
use std::sync::Arc;
use uuid::Uuid;

pub const MERCHANT_ID_HEADER: &str = "x-merchant-id";
pub const WEBHOOK_SIGNATURE_HEADER: &str = "x-webhook-signature";

#[derive(Clone)]
pub struct AppState {
    pub merchants: Arc<dyn MerchantStore>,
    pub factory: Arc<TransactionFactory>,
    pub reconciler: Arc<StatusReconciler>,
    pub pin_gate: Arc<PinGate>,
    pub transfers: Arc<TransferService>,
    pub pool: PgPool,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/transactions", post(transactions::create_transaction))
        .route(
            "/api/transactions/{id}/regenerate-payment",
            post(transactions::regenerate_payment_link),
        )
        .route("/webhook", post(webhooks::handle_webhook))
        .route("/api/pin", post(pin::set_pin))
        .route("/api/pin", put(pin::update_pin))
        .route("/api/pin", delete(pin::revoke_pin))
        .route("/api/pin/validate", post(pin::validate_pin))
        .route("/api/transfers", post(transfers::create_transfer))
        .route("/health", get(health::health))
        .route("/health/live", get(health::live))
        .route("/health/ready", get(health::ready))
        .with_state(state)
}

/// Resolve the calling merchant from the `x-merchant-id` header.
pub async fn require_merchant(state: &AppState, headers: &HeaderMap) -> Result<Merchant, AppError> {
    let raw = headers
        .get(MERCHANT_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| {
            AppError::new(AppErrorKind::Validation(ValidationError::MissingField {
                field: MERCHANT_ID_HEADER.to_string(),
            }))
        })?;

    let merchant_id = Uuid::parse_str(raw).map_err(|_| {
        AppError::new(AppErrorKind::Validation(ValidationError::MalformedPayload {
            reason: format!("'{}' is not a valid merchant id", raw),
        }))
    })?;

    state
        .merchants
        .find(merchant_id)
        .await
        .map_err(AppError::from)?
        .ok_or_else(|| {
            AppError::new(AppErrorKind::NotFound(NotFoundError::Merchant {
                merchant_id: merchant_id.to_string(),
            }))
        })
}
