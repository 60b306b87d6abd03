//! In-memory implementations of the persistence and provider seams,
//! shared by the integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use merchpay_backend::cache::currency::{CurrencyError, RateSource};
use merchpay_backend::database::audit_repository::AuditEntry;
use merchpay_backend::database::error::DatabaseError;
use merchpay_backend::database::merchant_repository::{
    Merchant, PinState, ACCOUNT_ACTIVE, ACCOUNT_PIN_BLOCKED,
};
use merchpay_backend::database::token_repository::Token;
use merchpay_backend::database::transaction_repository::{
    NewTransaction, PaymentLinkUpdate, SettlementFacts, TransactionRecord, TransactionStatus,
};
use merchpay_backend::payments::error::{PaymentError, PaymentResult};
use merchpay_backend::payments::provider::PaymentLinkProvider;
use merchpay_backend::payments::types::{CreateLinkRequest, PaymentLink};
use merchpay_backend::payments::custody::SigningProvider;
use merchpay_backend::services::notification::{NotificationEvent, Notifier};
use merchpay_backend::services::ports::{AuditSink, MerchantStore, TokenCatalog, TransactionStore};
use rust_decimal::Decimal;
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use uuid::Uuid;

pub fn make_merchant(webhook_token: &str, default_token_id: Option<&str>) -> Merchant {
    Merchant {
        id: Uuid::new_v4(),
        display_name: "Test Merchant".to_string(),
        account_status: ACCOUNT_ACTIVE.to_string(),
        default_currency: "USD".to_string(),
        default_token_id: default_token_id.map(|s| s.to_string()),
        webhook_token: webhook_token.to_string(),
        pin_hash: None,
        pin_salt: None,
        pin_attempts: 0,
        pin_blocked_at: None,
        pin_last_attempt_at: None,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

#[derive(Default)]
pub struct InMemoryTransactionStore {
    rows: Mutex<Vec<TransactionRecord>>,
}

impl InMemoryTransactionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn all(&self) -> Vec<TransactionRecord> {
        self.rows.lock().unwrap().clone()
    }

    pub fn get(&self, id: Uuid) -> Option<TransactionRecord> {
        self.rows.lock().unwrap().iter().find(|r| r.id == id).cloned()
    }

    pub fn len(&self) -> usize {
        self.rows.lock().unwrap().len()
    }
}

#[async_trait]
impl TransactionStore for InMemoryTransactionStore {
    async fn insert(&self, tx: NewTransaction) -> Result<TransactionRecord, DatabaseError> {
        let mut rows = self.rows.lock().unwrap();
        if rows
            .iter()
            .any(|r| r.kind == tx.kind.as_str() && r.transaction_number == tx.transaction_number)
        {
            return Err(DatabaseError::UniqueViolation {
                constraint: "transactions_kind_number_key".to_string(),
            });
        }

        let now = Utc::now();
        let record = TransactionRecord {
            id: Uuid::new_v4(),
            merchant_id: tx.merchant_id,
            kind: tx.kind.as_str().to_string(),
            transaction_number: tx.transaction_number,
            payment_id: tx.payment_id,
            payment_payload: tx.payment_payload,
            amount_usd: tx.amount_usd,
            display_currency: tx.display_currency,
            display_amount: tx.display_amount,
            description: tx.description,
            chain_id: tx.chain_id,
            token_id: tx.token_id,
            destination_address: tx.destination_address,
            status: TransactionStatus::Pending.as_str().to_string(),
            status_rank: TransactionStatus::Pending.rank(),
            expires_at: tx.expires_at,
            last_event_payload: None,
            source_chain: None,
            source_token: None,
            source_amount: None,
            source_tx_hash: None,
            created_at: now,
            updated_at: now,
        };
        rows.push(record.clone());
        Ok(record)
    }

    async fn find_order_by_number(
        &self,
        number: &str,
    ) -> Result<Option<TransactionRecord>, DatabaseError> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .iter()
            .find(|r| r.kind == "order" && r.transaction_number == number)
            .cloned())
    }

    async fn find_deposit_by_number(
        &self,
        number: &str,
    ) -> Result<Option<TransactionRecord>, DatabaseError> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .iter()
            .find(|r| r.kind == "deposit" && r.transaction_number == number)
            .cloned())
    }

    async fn find_for_merchant(
        &self,
        merchant_id: Uuid,
        id: Uuid,
    ) -> Result<Option<TransactionRecord>, DatabaseError> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .iter()
            .find(|r| r.merchant_id == merchant_id && r.id == id)
            .cloned())
    }

    async fn update_payment_link(
        &self,
        id: Uuid,
        update: PaymentLinkUpdate,
    ) -> Result<Option<TransactionRecord>, DatabaseError> {
        let mut rows = self.rows.lock().unwrap();
        let Some(row) = rows
            .iter_mut()
            .find(|r| r.id == id && r.status == TransactionStatus::Pending.as_str())
        else {
            return Ok(None);
        };

        row.payment_id = update.payment_id;
        row.payment_payload = update.payment_payload;
        row.chain_id = update.chain_id;
        row.token_id = update.token_id;
        row.expires_at = update.expires_at;
        row.updated_at = Utc::now();
        Ok(Some(row.clone()))
    }

    async fn apply_transition(
        &self,
        id: Uuid,
        target: TransactionStatus,
        payload: &serde_json::Value,
        facts: &SettlementFacts,
    ) -> Result<Option<TransactionRecord>, DatabaseError> {
        let mut rows = self.rows.lock().unwrap();
        let Some(row) = rows
            .iter_mut()
            .find(|r| r.id == id && r.status_rank < target.rank())
        else {
            return Ok(None);
        };

        row.status = target.as_str().to_string();
        row.status_rank = target.rank();
        row.last_event_payload = Some(payload.clone());
        if facts.source_chain.is_some() {
            row.source_chain = facts.source_chain.clone();
        }
        if facts.source_token.is_some() {
            row.source_token = facts.source_token.clone();
        }
        if facts.source_amount.is_some() {
            row.source_amount = facts.source_amount;
        }
        if facts.source_tx_hash.is_some() {
            row.source_tx_hash = facts.source_tx_hash.clone();
        }
        row.updated_at = Utc::now();
        Ok(Some(row.clone()))
    }

    async fn expire_overdue_orders(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<TransactionRecord>, DatabaseError> {
        let mut rows = self.rows.lock().unwrap();
        let mut expired = Vec::new();
        for row in rows.iter_mut() {
            if row.kind == "order"
                && row.status == TransactionStatus::Pending.as_str()
                && row.expires_at.is_some_and(|at| at <= now)
            {
                row.status = TransactionStatus::Expired.as_str().to_string();
                row.status_rank = TransactionStatus::Expired.rank();
                row.updated_at = now;
                expired.push(row.clone());
            }
        }
        Ok(expired)
    }
}

#[derive(Default)]
pub struct InMemoryMerchantStore {
    merchants: Mutex<HashMap<Uuid, Merchant>>,
}

impl InMemoryMerchantStore {
    pub fn with(merchant: Merchant) -> Self {
        let store = Self::default();
        store
            .merchants
            .lock()
            .unwrap()
            .insert(merchant.id, merchant);
        store
    }

    pub fn get(&self, id: Uuid) -> Merchant {
        self.merchants.lock().unwrap().get(&id).cloned().unwrap()
    }
}

#[async_trait]
impl MerchantStore for InMemoryMerchantStore {
    async fn find(&self, merchant_id: Uuid) -> Result<Option<Merchant>, DatabaseError> {
        Ok(self.merchants.lock().unwrap().get(&merchant_id).cloned())
    }

    async fn update_pin_state(
        &self,
        merchant_id: Uuid,
        state: PinState,
    ) -> Result<Merchant, DatabaseError> {
        let mut merchants = self.merchants.lock().unwrap();
        let merchant = merchants.get_mut(&merchant_id).ok_or(DatabaseError::NotFound)?;
        merchant.pin_hash = state.pin_hash;
        merchant.pin_salt = state.pin_salt;
        merchant.pin_attempts = state.pin_attempts;
        merchant.pin_blocked_at = state.pin_blocked_at;
        merchant.pin_last_attempt_at = state.pin_last_attempt_at;
        merchant.updated_at = Utc::now();
        Ok(merchant.clone())
    }

    async fn block_account(
        &self,
        merchant_id: Uuid,
        blocked_at: DateTime<Utc>,
    ) -> Result<Merchant, DatabaseError> {
        let mut merchants = self.merchants.lock().unwrap();
        let merchant = merchants.get_mut(&merchant_id).ok_or(DatabaseError::NotFound)?;
        merchant.account_status = ACCOUNT_PIN_BLOCKED.to_string();
        merchant.pin_blocked_at = Some(blocked_at);
        merchant.updated_at = Utc::now();
        Ok(merchant.clone())
    }
}

pub struct StaticTokenCatalog {
    tokens: HashMap<String, Token>,
}

impl StaticTokenCatalog {
    pub fn with_tokens(ids: &[&str]) -> Self {
        Self {
            tokens: ids
                .iter()
                .map(|id| {
                    (
                        id.to_string(),
                        Token {
                            id: id.to_string(),
                            chain_id: "base".to_string(),
                            symbol: "USDC".to_string(),
                            contract_address: Some("0xusdc".to_string()),
                            enabled: true,
                        },
                    )
                })
                .collect(),
        }
    }
}

#[async_trait]
impl TokenCatalog for StaticTokenCatalog {
    async fn find_token(&self, token_id: &str) -> Result<Option<Token>, DatabaseError> {
        Ok(self.tokens.get(token_id).cloned())
    }
}

/// Counts provider calls; can be told to fail.
#[derive(Default)]
pub struct RecordingProvider {
    calls: AtomicUsize,
    fail: AtomicBool,
}

impl RecordingProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl PaymentLinkProvider for RecordingProvider {
    async fn create_payment_link(&self, request: &CreateLinkRequest) -> PaymentResult<PaymentLink> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail.load(Ordering::SeqCst) {
            return Err(PaymentError::ProviderError {
                message: "provider unavailable".to_string(),
                provider_code: Some("503".to_string()),
                retryable: true,
            });
        }
        Ok(PaymentLink {
            payment_id: format!("pay-{}", call),
            payload: json!({
                "id": format!("pay-{}", call),
                "orderNumber": request.transaction_number,
            }),
        })
    }
}

/// Counts signing calls; can be told to fail.
#[derive(Default)]
pub struct RecordingSigner {
    calls: AtomicUsize,
    fail: AtomicBool,
}

impl RecordingSigner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl SigningProvider for RecordingSigner {
    async fn raw_sign(&self, _merchant_token: &str, digest: &str) -> PaymentResult<String> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail.load(Ordering::SeqCst) {
            return Err(PaymentError::NetworkError {
                message: "custody unreachable".to_string(),
            });
        }
        Ok(format!("sig-{}-{}", call, &digest[..8]))
    }
}

pub struct StaticRateSource {
    rates: HashMap<String, Decimal>,
    calls: AtomicUsize,
}

impl StaticRateSource {
    pub fn with_rates(pairs: &[(&str, &str)]) -> Self {
        Self {
            rates: pairs
                .iter()
                .map(|(code, rate)| (code.to_string(), rate.parse().unwrap()))
                .collect(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RateSource for StaticRateSource {
    async fn usd_rate(&self, code: &str) -> Result<Option<Decimal>, CurrencyError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.rates.get(code).copied())
    }
}

#[derive(Default)]
pub struct CollectingAudit {
    entries: Mutex<Vec<AuditEntry>>,
}

impl CollectingAudit {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries.lock().unwrap().clone()
    }
}

#[async_trait]
impl AuditSink for CollectingAudit {
    async fn append(&self, entry: AuditEntry) -> Result<(), DatabaseError> {
        self.entries.lock().unwrap().push(entry);
        Ok(())
    }
}

#[derive(Default)]
pub struct CollectingNotifier {
    events: Mutex<Vec<(Uuid, String)>>,
}

impl CollectingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<(Uuid, String)> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for CollectingNotifier {
    async fn notify(&self, merchant_id: Uuid, event: NotificationEvent) {
        self.events
            .lock()
            .unwrap()
            .push((merchant_id, event.name().to_string()));
    }
}
