//! Transaction persistence (orders and deposits)
//!
//! A transaction is created once with status `pending` and only ever moves
//! forward through the status hierarchy. The rank check and the status
//! write are combined into one conditional UPDATE so two processes handling
//! near-simultaneous deliveries for the same transaction number cannot
//! regress the status.

use crate::database::error::DatabaseError;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use std::fmt;
use uuid::Uuid;

/// Orders carry a customer-facing description and an expiry; deposits do not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    Order,
    Deposit,
}

impl TransactionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionKind::Order => "order",
            TransactionKind::Deposit => "deposit",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "order" => Some(TransactionKind::Order),
            "deposit" => Some(TransactionKind::Deposit),
            _ => None,
        }
    }
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Transaction status hierarchy.
///
/// The rank of a transaction's status is non-decreasing over its lifetime;
/// every rank-2 status is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Expired,
    Discrepancy,
}

impl TransactionStatus {
    pub fn rank(&self) -> i16 {
        match self {
            TransactionStatus::Pending => 0,
            TransactionStatus::Processing => 1,
            TransactionStatus::Completed
            | TransactionStatus::Failed
            | TransactionStatus::Expired
            | TransactionStatus::Discrepancy => 2,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.rank() >= 2
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "pending",
            TransactionStatus::Processing => "processing",
            TransactionStatus::Completed => "completed",
            TransactionStatus::Failed => "failed",
            TransactionStatus::Expired => "expired",
            TransactionStatus::Discrepancy => "discrepancy",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(TransactionStatus::Pending),
            "processing" => Some(TransactionStatus::Processing),
            "completed" => Some(TransactionStatus::Completed),
            "failed" => Some(TransactionStatus::Failed),
            "expired" => Some(TransactionStatus::Expired),
            "discrepancy" => Some(TransactionStatus::Discrepancy),
            _ => None,
        }
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Settlement facts copied verbatim from the last applied settlement event.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SettlementFacts {
    pub source_chain: Option<String>,
    pub source_token: Option<String>,
    pub source_amount: Option<Decimal>,
    pub source_tx_hash: Option<String>,
}

/// Transaction entity
#[derive(Debug, Clone, FromRow)]
pub struct TransactionRecord {
    pub id: Uuid,
    pub merchant_id: Uuid,
    pub kind: String,
    pub transaction_number: String,
    pub payment_id: String,
    pub payment_payload: serde_json::Value,
    pub amount_usd: Decimal,
    pub display_currency: String,
    pub display_amount: Decimal,
    pub description: Option<String>,
    pub chain_id: String,
    pub token_id: String,
    pub destination_address: String,
    pub status: String,
    pub status_rank: i16,
    pub expires_at: Option<DateTime<Utc>>,
    pub last_event_payload: Option<serde_json::Value>,
    pub source_chain: Option<String>,
    pub source_token: Option<String>,
    pub source_amount: Option<Decimal>,
    pub source_tx_hash: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TransactionRecord {
    pub fn status(&self) -> TransactionStatus {
        TransactionStatus::parse(&self.status).unwrap_or(TransactionStatus::Pending)
    }

    pub fn kind(&self) -> TransactionKind {
        TransactionKind::parse(&self.kind).unwrap_or(TransactionKind::Order)
    }
}

/// Input for a new `pending` transaction row.
#[derive(Debug, Clone)]
pub struct NewTransaction {
    pub merchant_id: Uuid,
    pub kind: TransactionKind,
    pub transaction_number: String,
    pub payment_id: String,
    pub payment_payload: serde_json::Value,
    pub amount_usd: Decimal,
    pub display_currency: String,
    pub display_amount: Decimal,
    pub description: Option<String>,
    pub chain_id: String,
    pub token_id: String,
    pub destination_address: String,
    pub expires_at: Option<DateTime<Utc>>,
}

/// In-place payment-link refresh for a still-pending transaction.
#[derive(Debug, Clone)]
pub struct PaymentLinkUpdate {
    pub payment_id: String,
    pub payment_payload: serde_json::Value,
    pub chain_id: String,
    pub token_id: String,
    pub expires_at: Option<DateTime<Utc>>,
}

const RETURNING_COLUMNS: &str = "RETURNING id, merchant_id, kind, transaction_number, payment_id, \
     payment_payload, amount_usd, display_currency, display_amount, description, chain_id, \
     token_id, destination_address, status, status_rank, expires_at, last_event_payload, \
     source_chain, source_token, source_amount, source_tx_hash, created_at, updated_at";

/// Repository for orders and deposits
pub struct TransactionRepository {
    pool: PgPool,
}

impl TransactionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn insert(&self, tx: NewTransaction) -> Result<TransactionRecord, DatabaseError> {
        let sql = format!(
            "INSERT INTO transactions \
             (merchant_id, kind, transaction_number, payment_id, payment_payload, amount_usd, \
              display_currency, display_amount, description, chain_id, token_id, \
              destination_address, status, status_rank, expires_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15) \
             {RETURNING_COLUMNS}"
        );

        sqlx::query_as::<_, TransactionRecord>(&sql)
            .bind(tx.merchant_id)
            .bind(tx.kind.as_str())
            .bind(&tx.transaction_number)
            .bind(&tx.payment_id)
            .bind(&tx.payment_payload)
            .bind(tx.amount_usd)
            .bind(&tx.display_currency)
            .bind(tx.display_amount)
            .bind(&tx.description)
            .bind(&tx.chain_id)
            .bind(&tx.token_id)
            .bind(&tx.destination_address)
            .bind(TransactionStatus::Pending.as_str())
            .bind(TransactionStatus::Pending.rank())
            .bind(tx.expires_at)
            .fetch_one(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)
    }

    async fn find_by_number(
        &self,
        kind: TransactionKind,
        number: &str,
    ) -> Result<Option<TransactionRecord>, DatabaseError> {
        sqlx::query_as::<_, TransactionRecord>(
            "SELECT * FROM transactions WHERE kind = $1 AND transaction_number = $2",
        )
        .bind(kind.as_str())
        .bind(number)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    pub async fn find_order_by_number(
        &self,
        number: &str,
    ) -> Result<Option<TransactionRecord>, DatabaseError> {
        self.find_by_number(TransactionKind::Order, number).await
    }

    pub async fn find_deposit_by_number(
        &self,
        number: &str,
    ) -> Result<Option<TransactionRecord>, DatabaseError> {
        self.find_by_number(TransactionKind::Deposit, number).await
    }

    pub async fn find_for_merchant(
        &self,
        merchant_id: Uuid,
        id: Uuid,
    ) -> Result<Option<TransactionRecord>, DatabaseError> {
        sqlx::query_as::<_, TransactionRecord>(
            "SELECT * FROM transactions WHERE merchant_id = $1 AND id = $2",
        )
        .bind(merchant_id)
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    /// Replace the payment link of a pending transaction in place.
    ///
    /// The status filter makes the pending-only guard hold even if the
    /// status advanced between the caller's read and this write.
    pub async fn update_payment_link(
        &self,
        id: Uuid,
        update: PaymentLinkUpdate,
    ) -> Result<Option<TransactionRecord>, DatabaseError> {
        let sql = format!(
            "UPDATE transactions \
             SET payment_id = $2, payment_payload = $3, chain_id = $4, token_id = $5, \
                 expires_at = $6, status = $7, status_rank = $8, updated_at = NOW() \
             WHERE id = $1 AND status = $7 \
             {RETURNING_COLUMNS}"
        );

        sqlx::query_as::<_, TransactionRecord>(&sql)
            .bind(id)
            .bind(&update.payment_id)
            .bind(&update.payment_payload)
            .bind(&update.chain_id)
            .bind(&update.token_id)
            .bind(update.expires_at)
            .bind(TransactionStatus::Pending.as_str())
            .bind(TransactionStatus::Pending.rank())
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)
    }

    /// Apply a status transition only if the stored rank is strictly lower.
    ///
    /// Returns `None` when no row changed, i.e. the event was stale or a
    /// duplicate. Rank check and write happen in one statement so the
    /// monotonicity invariant holds across concurrent processes.
    pub async fn apply_transition(
        &self,
        id: Uuid,
        target: TransactionStatus,
        payload: &serde_json::Value,
        facts: &SettlementFacts,
    ) -> Result<Option<TransactionRecord>, DatabaseError> {
        let sql = format!(
            "UPDATE transactions \
             SET status = $2, status_rank = $3, last_event_payload = $4, \
                 source_chain = COALESCE($5, source_chain), \
                 source_token = COALESCE($6, source_token), \
                 source_amount = COALESCE($7, source_amount), \
                 source_tx_hash = COALESCE($8, source_tx_hash), \
                 updated_at = NOW() \
             WHERE id = $1 AND status_rank < $3 \
             {RETURNING_COLUMNS}"
        );

        sqlx::query_as::<_, TransactionRecord>(&sql)
            .bind(id)
            .bind(target.as_str())
            .bind(target.rank())
            .bind(payload)
            .bind(&facts.source_chain)
            .bind(&facts.source_token)
            .bind(facts.source_amount)
            .bind(&facts.source_tx_hash)
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)
    }

    /// Expire overdue pending orders; returns the expired records.
    pub async fn expire_overdue_orders(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<TransactionRecord>, DatabaseError> {
        let sql = format!(
            "UPDATE transactions \
             SET status = $1, status_rank = $2, updated_at = NOW() \
             WHERE kind = 'order' AND status = 'pending' AND expires_at IS NOT NULL \
               AND expires_at <= $3 \
             {RETURNING_COLUMNS}"
        );

        sqlx::query_as::<_, TransactionRecord>(&sql)
            .bind(TransactionStatus::Expired.as_str())
            .bind(TransactionStatus::Expired.rank())
            .bind(now)
            .fetch_all(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)
    }
}
