//! Webhook-driven status reconciliation
//!
//! Provider deliveries are at-least-once and unordered. Each event maps to
//! a target status; the target is applied only when its rank is strictly
//! above the stored rank, in a single conditional update. Duplicates and
//! late out-of-order echoes are discarded and acknowledged as successes so
//! the provider stops redelivering them.

use crate::config::{PaymentProviderConfig, SecurityConfig};
use crate::database::audit_repository::AuditEntry;
use crate::database::error::DatabaseError;
use crate::database::transaction_repository::{
    SettlementFacts, TransactionRecord, TransactionStatus,
};
use crate::error::{AppError, AppErrorKind, NotFoundError, SecurityError, ValidationError};
use crate::payments::types::WebhookEnvelope;
use crate::payments::utils::{secure_eq, verify_hmac_sha512_hex};
use crate::services::notification::{NotificationEvent, Notifier};
use crate::services::ports::{AuditSink, TransactionStore};
use chrono::Utc;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("webhook signature rejected")]
    Unauthorized,

    #[error("webhook timestamp outside tolerance")]
    StaleTimestamp,

    #[error("malformed webhook payload: {0}")]
    Malformed(String),

    #[error("unknown event type: {0}")]
    UnknownEvent(String),

    #[error("no transaction matches number {0}")]
    UnknownTransaction(String),

    #[error("merchant token does not match the stored destination")]
    TokenMismatch,

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

impl From<ReconcileError> for AppError {
    fn from(err: ReconcileError) -> Self {
        match err {
            // Signature, timestamp and token failures all collapse to a
            // detail-free 401.
            ReconcileError::Unauthorized
            | ReconcileError::StaleTimestamp
            | ReconcileError::TokenMismatch => {
                AppError::new(AppErrorKind::Security(SecurityError::WebhookUnauthorized))
            }
            ReconcileError::Malformed(reason) => AppError::new(AppErrorKind::Validation(
                ValidationError::MalformedPayload { reason },
            )),
            ReconcileError::UnknownEvent(event) => AppError::new(AppErrorKind::Validation(
                ValidationError::UnknownEventType { event },
            )),
            ReconcileError::UnknownTransaction(reference) => AppError::new(
                AppErrorKind::NotFound(NotFoundError::Transaction { reference }),
            ),
            ReconcileError::Database(err) => err.into(),
        }
    }
}

/// What happened to the delivery. Both variants are acknowledged with 200.
#[derive(Debug, Clone)]
pub enum ReconcileOutcome {
    Applied {
        transaction_number: String,
        new_status: TransactionStatus,
    },
    /// Duplicate or stale event; the stored status was not touched.
    Discarded {
        transaction_number: String,
        current_status: TransactionStatus,
    },
}

pub struct StatusReconciler {
    store: Arc<dyn TransactionStore>,
    audit: Arc<dyn AuditSink>,
    notifier: Arc<dyn Notifier>,
    webhook_secret: Option<String>,
    timestamp_tolerance_secs: i64,
}

impl StatusReconciler {
    pub fn new(
        store: Arc<dyn TransactionStore>,
        audit: Arc<dyn AuditSink>,
        notifier: Arc<dyn Notifier>,
        provider: &PaymentProviderConfig,
        security: &SecurityConfig,
    ) -> Self {
        Self {
            store,
            audit,
            notifier,
            webhook_secret: provider.webhook_secret.clone(),
            timestamp_tolerance_secs: security.webhook_timestamp_tolerance_secs,
        }
    }

    pub async fn process_event(
        &self,
        raw_body: &[u8],
        signature: Option<&str>,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        // 1. Authenticate over the raw body, before any parsing.
        match &self.webhook_secret {
            Some(secret) => {
                let signature = signature.ok_or(ReconcileError::Unauthorized)?;
                if !verify_hmac_sha512_hex(raw_body, secret, signature) {
                    warn!("webhook signature verification failed");
                    return Err(ReconcileError::Unauthorized);
                }
            }
            None => {
                debug!("no webhook secret configured, skipping signature verification");
            }
        }

        // 2. Shape validation.
        let envelope: WebhookEnvelope = serde_json::from_slice(raw_body)
            .map_err(|e| ReconcileError::Malformed(e.to_string()))?;

        // 3. Optional replay window on signed timestamps.
        if let Some(timestamp) = envelope.timestamp {
            let skew = (Utc::now().timestamp() - timestamp).abs();
            if skew > self.timestamp_tolerance_secs {
                warn!(skew_secs = skew, "webhook timestamp outside tolerance");
                return Err(ReconcileError::StaleTimestamp);
            }
        }

        // 4. Event mapping.
        let target = target_status(&envelope.event)
            .ok_or_else(|| ReconcileError::UnknownEvent(envelope.event.clone()))?;

        // 5. Lookup: the order namespace is tried before the deposit one.
        let number = envelope.payment.metadata.order_number.clone();
        let record = match self.store.find_order_by_number(&number).await? {
            Some(record) => record,
            None => self
                .store
                .find_deposit_by_number(&number)
                .await?
                .ok_or_else(|| ReconcileError::UnknownTransaction(number.clone()))?,
        };

        // 6. The echoed merchant token must match the stored destination.
        if !secure_eq(
            envelope.payment.metadata.merchant_token.as_bytes(),
            record.destination_address.as_bytes(),
        ) {
            warn!(
                transaction_number = %record.transaction_number,
                "webhook merchant token mismatch"
            );
            return Err(ReconcileError::TokenMismatch);
        }

        // 7. Rank compare and conditional apply.
        if target.rank() <= record.status_rank {
            info!(
                transaction_number = %record.transaction_number,
                event = %envelope.event,
                current_status = %record.status,
                "stale or duplicate event discarded"
            );
            return Ok(ReconcileOutcome::Discarded {
                current_status: record.status(),
                transaction_number: record.transaction_number,
            });
        }

        let payload: serde_json::Value = serde_json::from_slice(raw_body)
            .map_err(|e| ReconcileError::Malformed(e.to_string()))?;
        let facts = SettlementFacts {
            source_chain: envelope.payment.payinchainid.clone(),
            source_token: envelope.payment.payintokenaddress.clone(),
            source_amount: envelope.payment.metadata.actual_amount,
            source_tx_hash: envelope.payment.metadata.transaction_hash.clone(),
        };

        let updated = match self
            .store
            .apply_transition(record.id, target, &payload, &facts)
            .await?
        {
            Some(updated) => updated,
            None => {
                // A concurrent delivery won the race; the stored rank is
                // already at or past the target.
                info!(
                    transaction_number = %record.transaction_number,
                    event = %envelope.event,
                    "event lost conditional update race, discarded"
                );
                return Ok(ReconcileOutcome::Discarded {
                    current_status: record.status(),
                    transaction_number: record.transaction_number,
                });
            }
        };

        info!(
            transaction_number = %updated.transaction_number,
            old_status = %record.status,
            new_status = %updated.status,
            event = %envelope.event,
            "status transition applied"
        );

        self.record_audit(&record, &updated, &facts).await;
        self.notify_if_settled(&updated, target);

        Ok(ReconcileOutcome::Applied {
            transaction_number: updated.transaction_number,
            new_status: target,
        })
    }

    async fn record_audit(
        &self,
        before: &TransactionRecord,
        after: &TransactionRecord,
        facts: &SettlementFacts,
    ) {
        let entry = AuditEntry {
            transaction_id: after.id,
            transaction_number: after.transaction_number.clone(),
            kind: after.kind.clone(),
            old_status: before.status.clone(),
            new_status: after.status.clone(),
            facts: facts.clone(),
            recorded_at: Utc::now(),
        };

        if let Err(err) = self.audit.append(entry).await {
            warn!(
                transaction_number = %after.transaction_number,
                error = %err,
                "audit append failed, transition already applied"
            );
        }
    }

    /// Delivery runs on a detached task so the webhook acknowledgement
    /// never waits on it.
    fn notify_if_settled(&self, record: &TransactionRecord, status: TransactionStatus) {
        let event = match status {
            TransactionStatus::Completed => NotificationEvent::PaymentCompleted {
                transaction_number: record.transaction_number.clone(),
                amount_usd: record.amount_usd,
            },
            TransactionStatus::Failed => NotificationEvent::PaymentFailed {
                transaction_number: record.transaction_number.clone(),
            },
            _ => return,
        };

        let notifier = self.notifier.clone();
        let merchant_id = record.merchant_id;
        tokio::spawn(async move {
            notifier.notify(merchant_id, event).await;
        });
    }
}

/// Provider event → target status. `payment.completed` is a legacy alias
/// some provider versions still emit.
fn target_status(event: &str) -> Option<TransactionStatus> {
    match event {
        "payment_started" => Some(TransactionStatus::Processing),
        "payment_completed" | "payment.completed" => Some(TransactionStatus::Completed),
        "payment_bounced" => Some(TransactionStatus::Discrepancy),
        "payment_refunded" => Some(TransactionStatus::Failed),
        _ => None,
    }
}
