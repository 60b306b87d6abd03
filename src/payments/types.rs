//! Wire types for the payment-link provider

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Outbound create-link request.
///
/// `transaction_number` is the provider-side correlation key: it comes back
/// as `orderNumber` in webhook metadata. `merchant_token` is echoed back
/// the same way and is checked against the stored destination address when
/// reconciling.
#[derive(Debug, Clone, Serialize)]
pub struct CreateLinkRequest {
    pub destination_address: String,
    pub chain_id: String,
    pub token_id: String,
    pub amount_usd: Decimal,
    pub transaction_number: String,
    pub merchant_token: String,
}

/// Provider response: an opaque payment id plus an echo of the inputs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentLink {
    pub payment_id: String,
    /// Verbatim provider response, stored for audit/debug.
    pub payload: JsonValue,
}

/// Inbound webhook envelope.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEnvelope {
    pub event: String,
    #[serde(default)]
    pub timestamp: Option<i64>,
    pub payment: WebhookPayment,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookPayment {
    pub id: String,
    #[serde(default)]
    pub status: Option<String>,
    pub metadata: WebhookMetadata,
    #[serde(default)]
    pub payinchainid: Option<String>,
    #[serde(default)]
    pub payintokenaddress: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookMetadata {
    #[serde(rename = "orderNumber")]
    pub order_number: String,
    #[serde(rename = "merchantToken")]
    pub merchant_token: String,
    #[serde(default)]
    pub transaction_hash: Option<String>,
    #[serde(default)]
    pub actual_amount: Option<Decimal>,
}
