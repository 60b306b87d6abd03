//! PIN-gated, idempotent fund transfers
//!
//! The custody raw-sign call is the side effect being protected: it runs
//! at most once per idempotency key. Retries with the same key replay the
//! original receipt, concurrent duplicates are told to retry, and a failed
//! signing releases the key so a later retry executes again.

use crate::cache::idempotency::{Begin, IdempotencyCache};
use crate::cache::rate_limit::{RateLimitDecision, RateLimiter};
use crate::database::merchant_repository::Merchant;
use crate::error::{
    AppError, AppErrorKind, ExternalServiceError, InvalidStateError, RateLimitError, SecurityError,
};
use crate::payments::custody::SigningProvider;
use crate::payments::error::PaymentError;
use crate::services::pin_gate::{PinError, PinGate};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

pub const TRANSFER_ENDPOINT: &str = "transfers";

#[derive(Debug, Error)]
pub enum TransferError {
    #[error("rate limit exceeded, retry in {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("a PIN is required for transfers on this account")]
    PinRequired,

    #[error("invalid amount: {reason}")]
    InvalidAmount { reason: String },

    #[error("an identical transfer is already executing")]
    DuplicateInFlight,

    #[error(transparent)]
    Pin(#[from] PinError),

    #[error("custody signing failed: {0}")]
    Signing(#[from] PaymentError),
}

impl From<TransferError> for AppError {
    fn from(err: TransferError) -> Self {
        match err {
            TransferError::RateLimited { retry_after_secs } => {
                AppError::new(AppErrorKind::RateLimit(RateLimitError {
                    endpoint: TRANSFER_ENDPOINT.to_string(),
                    retry_after_secs,
                }))
            }
            TransferError::PinRequired => {
                AppError::new(AppErrorKind::Security(SecurityError::PinRequired))
            }
            TransferError::InvalidAmount { reason } => AppError::new(AppErrorKind::Validation(
                crate::error::ValidationError::InvalidAmount {
                    amount: String::new(),
                    reason,
                },
            )),
            TransferError::DuplicateInFlight => {
                AppError::new(AppErrorKind::InvalidState(InvalidStateError {
                    operation: "transfer".to_string(),
                    current_status: "in_flight".to_string(),
                }))
            }
            TransferError::Pin(err) => err.into(),
            TransferError::Signing(err) => {
                let retryable = err.is_retryable();
                AppError::new(AppErrorKind::External(ExternalServiceError::Custody {
                    message: err.to_string(),
                    retryable,
                }))
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct TransferRequest {
    pub recipient: String,
    pub amount: Decimal,
    pub pin: Option<String>,
    /// Explicit idempotency key; derived from the request contents when
    /// absent.
    pub request_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TransferReceipt {
    pub transfer_id: Uuid,
    pub recipient: String,
    pub amount: Decimal,
    pub signature: String,
    pub signed_at: DateTime<Utc>,
    /// True when this receipt was replayed from the idempotency cache.
    pub from_cache: bool,
}

pub struct TransferService {
    signer: Arc<dyn SigningProvider>,
    pin_gate: Arc<PinGate>,
    idempotency: Arc<IdempotencyCache<TransferReceipt>>,
    limiter: Arc<RateLimiter>,
}

impl TransferService {
    pub fn new(
        signer: Arc<dyn SigningProvider>,
        pin_gate: Arc<PinGate>,
        idempotency: Arc<IdempotencyCache<TransferReceipt>>,
        limiter: Arc<RateLimiter>,
    ) -> Self {
        Self {
            signer,
            pin_gate,
            idempotency,
            limiter,
        }
    }

    pub async fn transfer(
        &self,
        merchant: &Merchant,
        request: TransferRequest,
    ) -> Result<TransferReceipt, TransferError> {
        let subject = merchant.id.to_string();

        if let RateLimitDecision::Limited { retry_after } =
            self.limiter.check(&subject, TRANSFER_ENDPOINT).await
        {
            return Err(TransferError::RateLimited {
                retry_after_secs: retry_after.as_secs().max(1),
            });
        }

        if request.amount <= Decimal::ZERO {
            return Err(TransferError::InvalidAmount {
                reason: "amount must be positive".to_string(),
            });
        }

        if merchant.is_pin_blocked() {
            return Err(PinError::Blocked.into());
        }

        // The PIN check happens before any side effect. Merchants without
        // a PIN configured pass through; the gate only applies once set.
        if merchant.has_pin() {
            let pin = request.pin.as_deref().ok_or(TransferError::PinRequired)?;
            let report = self.pin_gate.validate(merchant, pin).await?;
            if report.is_blocked {
                return Err(PinError::Blocked.into());
            }
            if !report.valid {
                return Err(PinError::Invalid {
                    attempts_remaining: report.attempts_remaining,
                }
                .into());
            }
        }

        let amount = request.amount.to_string();
        let digest = transfer_digest(&subject, &request.recipient, &amount);
        // The derived key is built from the content being signed; the raw
        // PIN never enters any hash but its own.
        let key = request.request_id.clone().unwrap_or_else(|| {
            IdempotencyCache::<TransferReceipt>::fingerprint(
                &subject,
                &request.recipient,
                &amount,
                &digest,
            )
        });

        match self.idempotency.begin(&key, &subject).await {
            Begin::Replay(receipt) => {
                info!(
                    merchant_id = %merchant.id,
                    transfer_id = %receipt.transfer_id,
                    "transfer replayed from idempotency cache"
                );
                return Ok(TransferReceipt {
                    from_cache: true,
                    ..receipt
                });
            }
            Begin::InFlight => return Err(TransferError::DuplicateInFlight),
            Begin::Execute => {}
        }

        let signature = match self
            .signer
            .raw_sign(&merchant.webhook_token, &digest)
            .await
        {
            Ok(signature) => signature,
            Err(err) => {
                warn!(merchant_id = %merchant.id, error = %err, "custody signing failed");
                self.idempotency.release(&key).await;
                return Err(TransferError::Signing(err));
            }
        };

        let receipt = TransferReceipt {
            transfer_id: Uuid::new_v4(),
            recipient: request.recipient,
            amount: request.amount,
            signature,
            signed_at: Utc::now(),
            from_cache: false,
        };
        self.idempotency.store(&key, &subject, receipt.clone()).await;

        info!(
            merchant_id = %merchant.id,
            transfer_id = %receipt.transfer_id,
            amount = %receipt.amount,
            "transfer signed"
        );

        Ok(receipt)
    }
}

fn transfer_digest(subject: &str, recipient: &str, amount: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(subject.as_bytes());
    hasher.update(b"\x1f");
    hasher.update(recipient.as_bytes());
    hasher.update(b"\x1f");
    hasher.update(amount.as_bytes());
    hex::encode(hasher.finalize())
}
