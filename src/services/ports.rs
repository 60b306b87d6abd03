//! Persistence seams for the service layer
//!
//! Services talk to narrow async traits instead of concrete repositories.
//! The Postgres repositories implement them in production; tests use
//! in-memory fakes.

use crate::database::audit_repository::{AuditEntry, AuditRepository};
use crate::database::error::DatabaseError;
use crate::database::merchant_repository::{Merchant, MerchantRepository, PinState};
use crate::database::token_repository::{Token, TokenRepository};
use crate::database::transaction_repository::{
    NewTransaction, PaymentLinkUpdate, SettlementFacts, TransactionRecord, TransactionRepository,
    TransactionStatus,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

#[async_trait]
pub trait TransactionStore: Send + Sync {
    async fn insert(&self, tx: NewTransaction) -> Result<TransactionRecord, DatabaseError>;
    async fn find_order_by_number(
        &self,
        number: &str,
    ) -> Result<Option<TransactionRecord>, DatabaseError>;
    async fn find_deposit_by_number(
        &self,
        number: &str,
    ) -> Result<Option<TransactionRecord>, DatabaseError>;
    async fn find_for_merchant(
        &self,
        merchant_id: Uuid,
        id: Uuid,
    ) -> Result<Option<TransactionRecord>, DatabaseError>;
    async fn update_payment_link(
        &self,
        id: Uuid,
        update: PaymentLinkUpdate,
    ) -> Result<Option<TransactionRecord>, DatabaseError>;
    /// Conditional status write: applies only when the stored rank is
    /// strictly below the target's. `None` means no row changed.
    async fn apply_transition(
        &self,
        id: Uuid,
        target: TransactionStatus,
        payload: &serde_json::Value,
        facts: &SettlementFacts,
    ) -> Result<Option<TransactionRecord>, DatabaseError>;
    async fn expire_overdue_orders(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<TransactionRecord>, DatabaseError>;
}

#[async_trait]
pub trait MerchantStore: Send + Sync {
    async fn find(&self, merchant_id: Uuid) -> Result<Option<Merchant>, DatabaseError>;
    async fn update_pin_state(
        &self,
        merchant_id: Uuid,
        state: PinState,
    ) -> Result<Merchant, DatabaseError>;
    async fn block_account(
        &self,
        merchant_id: Uuid,
        blocked_at: DateTime<Utc>,
    ) -> Result<Merchant, DatabaseError>;
}

#[async_trait]
pub trait TokenCatalog: Send + Sync {
    async fn find_token(&self, token_id: &str) -> Result<Option<Token>, DatabaseError>;
}

#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn append(&self, entry: AuditEntry) -> Result<(), DatabaseError>;
}

#[async_trait]
impl TransactionStore for TransactionRepository {
    async fn insert(&self, tx: NewTransaction) -> Result<TransactionRecord, DatabaseError> {
        TransactionRepository::insert(self, tx).await
    }

    async fn find_order_by_number(
        &self,
        number: &str,
    ) -> Result<Option<TransactionRecord>, DatabaseError> {
        TransactionRepository::find_order_by_number(self, number).await
    }

    async fn find_deposit_by_number(
        &self,
        number: &str,
    ) -> Result<Option<TransactionRecord>, DatabaseError> {
        TransactionRepository::find_deposit_by_number(self, number).await
    }

    async fn find_for_merchant(
        &self,
        merchant_id: Uuid,
        id: Uuid,
    ) -> Result<Option<TransactionRecord>, DatabaseError> {
        TransactionRepository::find_for_merchant(self, merchant_id, id).await
    }

    async fn update_payment_link(
        &self,
        id: Uuid,
        update: PaymentLinkUpdate,
    ) -> Result<Option<TransactionRecord>, DatabaseError> {
        TransactionRepository::update_payment_link(self, id, update).await
    }

    async fn apply_transition(
        &self,
        id: Uuid,
        target: TransactionStatus,
        payload: &serde_json::Value,
        facts: &SettlementFacts,
    ) -> Result<Option<TransactionRecord>, DatabaseError> {
        TransactionRepository::apply_transition(self, id, target, payload, facts).await
    }

    async fn expire_overdue_orders(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<TransactionRecord>, DatabaseError> {
        TransactionRepository::expire_overdue_orders(self, now).await
    }
}

#[async_trait]
impl MerchantStore for MerchantRepository {
    async fn find(&self, merchant_id: Uuid) -> Result<Option<Merchant>, DatabaseError> {
        MerchantRepository::find(self, merchant_id).await
    }

    async fn update_pin_state(
        &self,
        merchant_id: Uuid,
        state: PinState,
    ) -> Result<Merchant, DatabaseError> {
        MerchantRepository::update_pin_state(self, merchant_id, state).await
    }

    async fn block_account(
        &self,
        merchant_id: Uuid,
        blocked_at: DateTime<Utc>,
    ) -> Result<Merchant, DatabaseError> {
        MerchantRepository::block_for_pin(self, merchant_id, blocked_at).await
    }
}

#[async_trait]
impl TokenCatalog for TokenRepository {
    async fn find_token(&self, token_id: &str) -> Result<Option<Token>, DatabaseError> {
        TokenRepository::find_token(self, token_id).await
    }
}

#[async_trait]
impl AuditSink for AuditRepository {
    async fn append(&self, entry: AuditEntry) -> Result<(), DatabaseError> {
        AuditRepository::append(self, entry).await
    }
}
