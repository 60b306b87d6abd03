//! Merchant persistence, including PIN state
//!
//! PIN columns are only ever mutated through the PIN gate; account status
//! flips to `pin_blocked` when the bounded attempt counter is exhausted and
//! only an out-of-band administrative action restores it.

use crate::database::error::DatabaseError;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

pub const ACCOUNT_ACTIVE: &str = "active";
pub const ACCOUNT_PIN_BLOCKED: &str = "pin_blocked";

/// Merchant entity
#[derive(Debug, Clone, FromRow)]
pub struct Merchant {
    pub id: Uuid,
    pub display_name: String,
    pub account_status: String,
    pub default_currency: String,
    pub default_token_id: Option<String>,
    /// Merchant-identifying token passed to the payment provider and echoed
    /// back inside webhook payloads.
    pub webhook_token: String,
    pub pin_hash: Option<String>,
    pub pin_salt: Option<String>,
    pub pin_attempts: i32,
    pub pin_blocked_at: Option<DateTime<Utc>>,
    pub pin_last_attempt_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Merchant {
    pub fn is_pin_blocked(&self) -> bool {
        self.account_status == ACCOUNT_PIN_BLOCKED
    }

    pub fn has_pin(&self) -> bool {
        self.pin_hash.is_some()
    }
}

/// Full PIN state written back after a gate operation.
#[derive(Debug, Clone, Default)]
pub struct PinState {
    pub pin_hash: Option<String>,
    pub pin_salt: Option<String>,
    pub pin_attempts: i32,
    pub pin_blocked_at: Option<DateTime<Utc>>,
    pub pin_last_attempt_at: Option<DateTime<Utc>>,
}

const RETURNING_COLUMNS: &str = "RETURNING id, display_name, account_status, default_currency, \
     default_token_id, webhook_token, pin_hash, pin_salt, pin_attempts, pin_blocked_at, \
     pin_last_attempt_at, created_at, updated_at";

/// Repository for merchants
pub struct MerchantRepository {
    pool: PgPool,
}

impl MerchantRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn find(&self, merchant_id: Uuid) -> Result<Option<Merchant>, DatabaseError> {
        sqlx::query_as::<_, Merchant>("SELECT * FROM merchants WHERE id = $1")
            .bind(merchant_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)
    }

    pub async fn update_pin_state(
        &self,
        merchant_id: Uuid,
        state: PinState,
    ) -> Result<Merchant, DatabaseError> {
        let sql = format!(
            "UPDATE merchants \
             SET pin_hash = $2, pin_salt = $3, pin_attempts = $4, pin_blocked_at = $5, \
                 pin_last_attempt_at = $6, updated_at = NOW() \
             WHERE id = $1 \
             {RETURNING_COLUMNS}"
        );

        sqlx::query_as::<_, Merchant>(&sql)
            .bind(merchant_id)
            .bind(&state.pin_hash)
            .bind(&state.pin_salt)
            .bind(state.pin_attempts)
            .bind(state.pin_blocked_at)
            .bind(state.pin_last_attempt_at)
            .fetch_one(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)
    }

    /// Flip the account to `pin_blocked` and stamp the block time.
    pub async fn block_for_pin(
        &self,
        merchant_id: Uuid,
        blocked_at: DateTime<Utc>,
    ) -> Result<Merchant, DatabaseError> {
        let sql = format!(
            "UPDATE merchants \
             SET account_status = $2, pin_blocked_at = $3, updated_at = NOW() \
             WHERE id = $1 \
             {RETURNING_COLUMNS}"
        );

        sqlx::query_as::<_, Merchant>(&sql)
            .bind(merchant_id)
            .bind(ACCOUNT_PIN_BLOCKED)
            .bind(blocked_at)
            .fetch_one(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)
    }
}
