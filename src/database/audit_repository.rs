//! Append-only audit log for status transitions
//!
//! Written best-effort after a transition applies; a failed append is
//! logged by the caller and never fails the webhook response.

use crate::database::error::DatabaseError;
use crate::database::transaction_repository::SettlementFacts;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub transaction_id: Uuid,
    pub transaction_number: String,
    pub kind: String,
    pub old_status: String,
    pub new_status: String,
    pub facts: SettlementFacts,
    pub recorded_at: DateTime<Utc>,
}

pub struct AuditRepository {
    pool: PgPool,
}

impl AuditRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn append(&self, entry: AuditEntry) -> Result<(), DatabaseError> {
        sqlx::query(
            "INSERT INTO transaction_audit_log \
             (transaction_id, transaction_number, kind, old_status, new_status, \
              source_chain, source_token, source_amount, source_tx_hash, recorded_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
        )
        .bind(entry.transaction_id)
        .bind(&entry.transaction_number)
        .bind(&entry.kind)
        .bind(&entry.old_status)
        .bind(&entry.new_status)
        .bind(&entry.facts.source_chain)
        .bind(&entry.facts.source_token)
        .bind(entry.facts.source_amount)
        .bind(&entry.facts.source_tx_hash)
        .bind(entry.recorded_at)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        Ok(())
    }
}
