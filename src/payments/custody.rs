//! Custodial signing boundary
//!
//! PIN-gated transfers hand a transfer digest to the custody service,
//! which signs with the merchant's managed key and returns the raw
//! signature. Idempotency around this call is handled by the transfer
//! service; this client performs exactly one signing attempt per call
//! (transport retries excepted).

use crate::config::PaymentProviderConfig;
use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::utils::PaymentHttpClient;
use async_trait::async_trait;
use serde_json::Value as JsonValue;
use std::time::Duration;

/// Seam for the custodial signer. Production uses [`HttpSigningProvider`];
/// tests substitute in-memory fakes.
#[async_trait]
pub trait SigningProvider: Send + Sync {
    /// Sign `digest` (hex) with the custody key held for `merchant_token`.
    async fn raw_sign(&self, merchant_token: &str, digest: &str) -> PaymentResult<String>;
}

pub struct HttpSigningProvider {
    client: PaymentHttpClient,
    base_url: String,
    api_key: String,
}

impl HttpSigningProvider {
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
impl SigningProvider for HttpSigningProvider {
    async fn raw_sign(&self, merchant_token: &str, digest: &str) -> PaymentResult<String> {
        let url = format!("{}/v1/custody/sign", self.base_url);
        let body = serde_json::json!({
            "merchantToken": merchant_token,
            "digest": digest,
        });

        let payload: JsonValue = self.client.post_json(&url, &self.api_key, &body).await?;

        payload
            .get("signature")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| PaymentError::InvalidResponse {
                message: "custody response missing signature".to_string(),
            })
    }
}
