//! Database error classification
//!
//! Wraps sqlx errors with enough structure for callers to tell retryable
//! faults (connection loss, pool exhaustion, unique-constraint races) apart
//! from permanent ones.

use crate::error::{AppError, AppErrorKind, InfrastructureError};

#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("row not found")]
    NotFound,

    #[error("unique constraint violated: {constraint}")]
    UniqueViolation { constraint: String },

    #[error("connection error: {message}")]
    Connection { message: String },

    #[error("query error: {message}")]
    Query { message: String },
}

impl DatabaseError {
    pub fn from_sqlx(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => DatabaseError::NotFound,
            sqlx::Error::Database(db_err) => {
                if db_err.is_unique_violation() {
                    DatabaseError::UniqueViolation {
                        constraint: db_err.constraint().unwrap_or("unknown").to_string(),
                    }
                } else {
                    DatabaseError::Query {
                        message: db_err.to_string(),
                    }
                }
            }
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                DatabaseError::Connection {
                    message: err.to_string(),
                }
            }
            other => DatabaseError::Query {
                message: other.to_string(),
            },
        }
    }

    /// Unique violations are retryable from the caller's point of view:
    /// a regenerated transaction number will almost certainly not collide.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DatabaseError::Connection { .. } | DatabaseError::UniqueViolation { .. }
        )
    }
}

impl From<DatabaseError> for AppError {
    fn from(err: DatabaseError) -> Self {
        let retryable = err.is_retryable();
        AppError::new(AppErrorKind::Infrastructure(InfrastructureError::Database {
            message: err.to_string(),
            retryable,
        }))
    }
}
