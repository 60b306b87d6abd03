//! Currency table access
//!
//! Authoritative USD rates keyed by currency code. The currency-rate cache
//! sits in front of this repository; any cache-layer failure falls through
//! to these reads.

use crate::cache::currency::{CurrencyError, RateSource};
use crate::database::error::DatabaseError;
use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::{FromRow, PgPool};

#[derive(Debug, Clone, FromRow)]
pub struct CurrencyRow {
    pub code: String,
    pub usd_rate: Decimal,
}

pub struct CurrencyRepository {
    pool: PgPool,
}

impl CurrencyRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn usd_rate(&self, code: &str) -> Result<Option<Decimal>, DatabaseError> {
        let row =
            sqlx::query_as::<_, CurrencyRow>("SELECT code, usd_rate FROM currencies WHERE code = $1")
                .bind(code)
                .fetch_optional(&self.pool)
                .await
                .map_err(DatabaseError::from_sqlx)?;

        Ok(row.map(|r| r.usd_rate))
    }
}

#[async_trait]
impl RateSource for CurrencyRepository {
    async fn usd_rate(&self, code: &str) -> Result<Option<Decimal>, CurrencyError> {
        CurrencyRepository::usd_rate(self, code)
            .await
            .map_err(|e| CurrencyError::Source(e.to_string()))
    }
}
