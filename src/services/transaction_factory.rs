//! Transaction creation and payment-link regeneration
//!
//! Creation runs a fixed gate sequence before any row is written: account
//! status, amount validation, currency conversion, minimum check, token
//! resolution, then the provider call. The PENDING row is only inserted
//! after the provider succeeds, so a failure at any gate leaves no
//! partial record behind.

use crate::cache::currency::{CurrencyError, CurrencyRateCache};
use crate::config::LimitsConfig;
use crate::database::error::DatabaseError;
use crate::database::merchant_repository::Merchant;
use crate::database::transaction_repository::{
    NewTransaction, PaymentLinkUpdate, TransactionKind, TransactionRecord, TransactionStatus,
};
use crate::error::{
    AppError, AppErrorKind, ExternalServiceError, InvalidStateError, NotFoundError,
    ValidationError,
};
use crate::payments::error::PaymentError;
use crate::payments::provider::PaymentLinkProvider;
use crate::payments::types::CreateLinkRequest;
use crate::services::ports::{TokenCatalog, TransactionStore};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rand::Rng;
use rust_decimal::Decimal;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum FactoryError {
    #[error("merchant account is blocked")]
    AccountBlocked,

    #[error("invalid amount '{amount}': {reason}")]
    InvalidAmount { amount: String, reason: String },

    #[error("unknown currency: {0}")]
    UnknownCurrency(String),

    #[error("converted amount {amount_usd} USD is below the minimum {minimum} USD")]
    BelowMinimum { amount_usd: Decimal, minimum: Decimal },

    #[error("unknown token: {0}")]
    UnknownToken(String),

    #[error("merchant has no usable default settlement token")]
    InvalidDefaultToken { merchant_id: Uuid },

    #[error("transaction not found")]
    NotFound { transaction_id: Uuid },

    #[error("transaction is '{current_status}', payment link can only be regenerated while pending")]
    NotPending { current_status: String },

    #[error("rate source failure: {0}")]
    RateSource(String),

    #[error(transparent)]
    Provider(#[from] PaymentError),

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

impl From<CurrencyError> for FactoryError {
    fn from(err: CurrencyError) -> Self {
        match err {
            CurrencyError::UnknownCurrency(code) => FactoryError::UnknownCurrency(code),
            CurrencyError::Source(message) => FactoryError::RateSource(message),
        }
    }
}

impl From<FactoryError> for AppError {
    fn from(err: FactoryError) -> Self {
        match err {
            FactoryError::AccountBlocked => AppError::new(AppErrorKind::Security(
                crate::error::SecurityError::PinBlocked,
            )),
            FactoryError::InvalidAmount { amount, reason } => AppError::new(
                AppErrorKind::Validation(ValidationError::InvalidAmount { amount, reason }),
            ),
            FactoryError::UnknownCurrency(currency) => AppError::new(AppErrorKind::Validation(
                ValidationError::UnknownCurrency { currency },
            )),
            FactoryError::BelowMinimum { amount_usd, minimum } => {
                AppError::new(AppErrorKind::Validation(ValidationError::AmountBelowMinimum {
                    amount_usd: amount_usd.to_string(),
                    minimum: minimum.to_string(),
                }))
            }
            FactoryError::UnknownToken(token_id) => AppError::new(AppErrorKind::Validation(
                ValidationError::UnknownToken { token_id },
            )),
            FactoryError::InvalidDefaultToken { merchant_id } => {
                AppError::new(AppErrorKind::Validation(ValidationError::InvalidDefaultToken {
                    merchant_id: merchant_id.to_string(),
                }))
            }
            FactoryError::NotFound { transaction_id } => AppError::new(AppErrorKind::NotFound(
                NotFoundError::Transaction {
                    reference: transaction_id.to_string(),
                },
            )),
            FactoryError::NotPending { current_status } => {
                AppError::new(AppErrorKind::InvalidState(InvalidStateError {
                    operation: "regenerate_payment_link".to_string(),
                    current_status,
                }))
            }
            FactoryError::RateSource(message) => AppError::new(AppErrorKind::Infrastructure(
                crate::error::InfrastructureError::Database {
                    message,
                    retryable: true,
                },
            )),
            FactoryError::Provider(err) => {
                let retryable = err.is_retryable();
                AppError::new(AppErrorKind::External(ExternalServiceError::PaymentProvider {
                    message: err.to_string(),
                    retryable,
                }))
            }
            FactoryError::Database(err) => err.into(),
        }
    }
}

/// Request to create an order or a deposit.
#[derive(Debug, Clone)]
pub struct CreateTransactionInput {
    pub amount: Decimal,
    pub currency: String,
    pub description: Option<String>,
    /// Orders may override the merchant's default settlement token.
    pub preferred_token_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CreatedTransaction {
    pub record: TransactionRecord,
}

pub struct TransactionFactory {
    store: Arc<dyn TransactionStore>,
    tokens: Arc<dyn TokenCatalog>,
    provider: Arc<dyn PaymentLinkProvider>,
    rates: Arc<CurrencyRateCache>,
    limits: LimitsConfig,
}

impl TransactionFactory {
    pub fn new(
        store: Arc<dyn TransactionStore>,
        tokens: Arc<dyn TokenCatalog>,
        provider: Arc<dyn PaymentLinkProvider>,
        rates: Arc<CurrencyRateCache>,
        limits: LimitsConfig,
    ) -> Self {
        Self {
            store,
            tokens,
            provider,
            rates,
            limits,
        }
    }

    pub async fn create_transaction(
        &self,
        merchant: &Merchant,
        input: CreateTransactionInput,
        kind: TransactionKind,
    ) -> Result<CreatedTransaction, FactoryError> {
        if merchant.is_pin_blocked() {
            return Err(FactoryError::AccountBlocked);
        }

        if input.amount <= Decimal::ZERO {
            return Err(FactoryError::InvalidAmount {
                amount: input.amount.to_string(),
                reason: "amount must be positive".to_string(),
            });
        }

        let amount_usd = self.rates.convert(&input.currency, input.amount).await?;

        if amount_usd < self.limits.min_transaction_usd {
            return Err(FactoryError::BelowMinimum {
                amount_usd,
                minimum: self.limits.min_transaction_usd,
            });
        }

        let preferred = match kind {
            TransactionKind::Order => input.preferred_token_id.as_deref(),
            TransactionKind::Deposit => None,
        };
        let token = self.resolve_token(merchant, preferred).await?;

        let now = Utc::now();
        let transaction_number = generate_transaction_number(kind, now);
        let expires_at = match kind {
            TransactionKind::Order => {
                Some(now + ChronoDuration::minutes(self.limits.order_expiry_minutes))
            }
            TransactionKind::Deposit => None,
        };

        // External call before persistence: nothing is written unless the
        // provider produced a link.
        let link = self
            .provider
            .create_payment_link(&CreateLinkRequest {
                destination_address: merchant.webhook_token.clone(),
                chain_id: token.chain_id.clone(),
                token_id: token.id.clone(),
                amount_usd,
                transaction_number: transaction_number.clone(),
                merchant_token: merchant.webhook_token.clone(),
            })
            .await?;

        let record = self
            .store
            .insert(NewTransaction {
                merchant_id: merchant.id,
                kind,
                transaction_number: transaction_number.clone(),
                payment_id: link.payment_id,
                payment_payload: link.payload,
                amount_usd,
                display_currency: input.currency.trim().to_uppercase(),
                display_amount: input.amount,
                description: input.description,
                chain_id: token.chain_id,
                token_id: token.id,
                destination_address: merchant.webhook_token.clone(),
                expires_at,
            })
            .await
            .map_err(|err| {
                if matches!(err, DatabaseError::UniqueViolation { .. }) {
                    warn!(
                        transaction_number = %transaction_number,
                        "transaction number collision, caller should retry"
                    );
                }
                err
            })?;

        info!(
            merchant_id = %merchant.id,
            transaction_number = %record.transaction_number,
            kind = %kind,
            amount_usd = %amount_usd,
            "transaction created"
        );

        Ok(CreatedTransaction { record })
    }

    /// Replace the payment link of a still-pending transaction.
    ///
    /// The stored status is checked before the provider call and again by
    /// the conditional update, so no external call is made for a settled
    /// transaction and a race between the two checks cannot overwrite a
    /// non-pending row.
    pub async fn regenerate_payment_link(
        &self,
        merchant: &Merchant,
        transaction_id: Uuid,
        new_preferred_token: Option<String>,
    ) -> Result<CreatedTransaction, FactoryError> {
        if merchant.is_pin_blocked() {
            return Err(FactoryError::AccountBlocked);
        }

        let record = self
            .store
            .find_for_merchant(merchant.id, transaction_id)
            .await?
            .ok_or(FactoryError::NotFound { transaction_id })?;

        if record.status() != TransactionStatus::Pending {
            return Err(FactoryError::NotPending {
                current_status: record.status,
            });
        }

        let token = match new_preferred_token.as_deref() {
            Some(token_id) => self
                .tokens
                .find_token(token_id)
                .await?
                .ok_or_else(|| FactoryError::UnknownToken(token_id.to_string()))?,
            None => self
                .tokens
                .find_token(&record.token_id)
                .await?
                .ok_or_else(|| FactoryError::UnknownToken(record.token_id.clone()))?,
        };

        let expires_at = match record.kind() {
            TransactionKind::Order => {
                Some(Utc::now() + ChronoDuration::minutes(self.limits.order_expiry_minutes))
            }
            TransactionKind::Deposit => None,
        };

        // The USD snapshot from creation is reused; the display amount is
        // never re-converted.
        let link = self
            .provider
            .create_payment_link(&CreateLinkRequest {
                destination_address: record.destination_address.clone(),
                chain_id: token.chain_id.clone(),
                token_id: token.id.clone(),
                amount_usd: record.amount_usd,
                transaction_number: record.transaction_number.clone(),
                merchant_token: merchant.webhook_token.clone(),
            })
            .await?;

        let updated = self
            .store
            .update_payment_link(
                record.id,
                PaymentLinkUpdate {
                    payment_id: link.payment_id,
                    payment_payload: link.payload,
                    chain_id: token.chain_id,
                    token_id: token.id,
                    expires_at,
                },
            )
            .await?
            .ok_or_else(|| FactoryError::NotPending {
                // Status advanced between the read and the conditional write.
                current_status: "no longer pending".to_string(),
            })?;

        info!(
            merchant_id = %merchant.id,
            transaction_number = %updated.transaction_number,
            payment_id = %updated.payment_id,
            "payment link regenerated"
        );

        Ok(CreatedTransaction { record: updated })
    }

    /// The merchant's default token must resolve even when an explicit
    /// preference overrides it; a broken default is a merchant
    /// misconfiguration and is reported as such.
    async fn resolve_token(
        &self,
        merchant: &Merchant,
        preferred: Option<&str>,
    ) -> Result<crate::database::token_repository::Token, FactoryError> {
        let default_id =
            merchant
                .default_token_id
                .as_deref()
                .ok_or(FactoryError::InvalidDefaultToken {
                    merchant_id: merchant.id,
                })?;

        let default = self
            .tokens
            .find_token(default_id)
            .await?
            .ok_or(FactoryError::InvalidDefaultToken {
                merchant_id: merchant.id,
            })?;

        match preferred {
            Some(token_id) => self
                .tokens
                .find_token(token_id)
                .await?
                .ok_or_else(|| FactoryError::UnknownToken(token_id.to_string())),
            None => Ok(default),
        }
    }
}

const NUMBER_SUFFIX_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const NUMBER_SUFFIX_LEN: usize = 8;

/// `ORD-YYYYMMDD-XXXXXXXX` for orders, `DEP-YYYYMMDD-XXXXXXXX` for
/// deposits. Uniqueness is enforced by the database; a collision surfaces
/// as a retryable unique violation.
pub fn generate_transaction_number(kind: TransactionKind, now: DateTime<Utc>) -> String {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..NUMBER_SUFFIX_LEN)
        .map(|_| NUMBER_SUFFIX_ALPHABET[rng.gen_range(0..NUMBER_SUFFIX_ALPHABET.len())] as char)
        .collect();

    let prefix = match kind {
        TransactionKind::Order => "ORD",
        TransactionKind::Deposit => "DEP",
    };
    format!("{}-{}-{}", prefix, now.format("%Y%m%d"), suffix)
}
