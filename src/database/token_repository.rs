//! Token/chain catalog access

use crate::database::error::DatabaseError;
use sqlx::{FromRow, PgPool};

/// Settlement token catalog entry
#[derive(Debug, Clone, FromRow)]
pub struct Token {
    pub id: String,
    pub chain_id: String,
    pub symbol: String,
    pub contract_address: Option<String>,
    pub enabled: bool,
}

pub struct TokenRepository {
    pool: PgPool,
}

impl TokenRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn find_token(&self, token_id: &str) -> Result<Option<Token>, DatabaseError> {
        sqlx::query_as::<_, Token>(
            "SELECT id, chain_id, symbol, contract_address, enabled \
             FROM tokens WHERE id = $1 AND enabled = TRUE",
        )
        .bind(token_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }
}
