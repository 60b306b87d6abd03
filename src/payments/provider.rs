//! Payment-link provider client
//!
//! The provider issues hosted payment links; settlement progress comes
//! back asynchronously on the webhook endpoint.

use crate::config::PaymentProviderConfig;
use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::types::{CreateLinkRequest, PaymentLink};
use crate::payments::utils::PaymentHttpClient;
use async_trait::async_trait;
use serde_json::Value as JsonValue;
use std::time::Duration;
use tracing::info;

/// Seam for the outbound payment-link provider. Production uses
/// [`HttpPaymentLinkProvider`]; tests substitute in-memory fakes.
#[async_trait]
pub trait PaymentLinkProvider: Send + Sync {
    async fn create_payment_link(&self, request: &CreateLinkRequest) -> PaymentResult<PaymentLink>;
}

pub struct HttpPaymentLinkProvider {
    client: PaymentHttpClient,
    base_url: String,
    api_key: String,
}

impl HttpPaymentLinkProvider {
    pub fn new(config: &PaymentProviderConfig) -> PaymentResult<Self> {
        let client = PaymentHttpClient::new(
            Duration::from_secs(config.request_timeout),
            config.max_retries,
        )?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        })
    }
}

#[async_trait]
impl PaymentLinkProvider for HttpPaymentLinkProvider {
    async fn create_payment_link(&self, request: &CreateLinkRequest) -> PaymentResult<PaymentLink> {
        let url = format!("{}/v1/payment-links", self.base_url);
        let body = serde_json::json!({
            "destinationAddress": request.destination_address,
            "chainId": request.chain_id,
            "tokenId": request.token_id,
            "amountUsd": request.amount_usd,
            "metadata": {
                "orderNumber": request.transaction_number,
                "merchantToken": request.merchant_token,
            },
        });

        let payload: JsonValue = self.client.post_json(&url, &self.api_key, &body).await?;

        let payment_id = payload
            .get("id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| PaymentError::InvalidResponse {
                message: "provider response missing payment id".to_string(),
            })?
            .to_string();

        info!(
            payment_id = %payment_id,
            transaction_number = %request.transaction_number,
            "payment link created"
        );

        Ok(PaymentLink {
            payment_id,
            payload,
        })
    }
}
