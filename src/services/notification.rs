//! Fire-and-forget merchant notifications
//!
//! Delivery is out of scope for this service; the default implementation
//! logs the event. Callers never block on delivery and a failed
//! notification never fails the triggering operation.

use async_trait::async_trait;
use rust_decimal::Decimal;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub enum NotificationEvent {
    PaymentCompleted {
        transaction_number: String,
        amount_usd: Decimal,
    },
    PaymentFailed {
        transaction_number: String,
    },
    OrderExpired {
        transaction_number: String,
    },
}

impl NotificationEvent {
    pub fn name(&self) -> &'static str {
        match self {
            NotificationEvent::PaymentCompleted { .. } => "payment_completed",
            NotificationEvent::PaymentFailed { .. } => "payment_failed",
            NotificationEvent::OrderExpired { .. } => "order_expired",
        }
    }

    pub fn transaction_number(&self) -> &str {
        match self {
            NotificationEvent::PaymentCompleted {
                transaction_number, ..
            }
            | NotificationEvent::PaymentFailed { transaction_number }
            | NotificationEvent::OrderExpired { transaction_number } => transaction_number,
        }
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, merchant_id: Uuid, event: NotificationEvent);
}

/// Logs the event instead of delivering it.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, merchant_id: Uuid, event: NotificationEvent) {
        tracing::info!(
            merchant_id = %merchant_id,
            event = event.name(),
            transaction_number = %event.transaction_number(),
            "merchant notification"
        );
    }
}
