use crate::error::{AppError, AppErrorKind, ExternalServiceError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PaymentError {
    #[error("network error: {message}")]
    NetworkError { message: String },

    #[error("provider error: {message}")]
    ProviderError {
        message: String,
        provider_code: Option<String>,
        retryable: bool,
    },

    #[error("provider rate limit exceeded")]
    RateLimited { retry_after_seconds: Option<u64> },

    #[error("invalid provider response: {message}")]
    InvalidResponse { message: String },
}

impl PaymentError {
    pub fn is_retryable(&self) -> bool {
        match self {
            PaymentError::NetworkError { .. } | PaymentError::RateLimited { .. } => true,
            PaymentError::ProviderError { retryable, .. } => *retryable,
            PaymentError::InvalidResponse { .. } => false,
        }
    }
}

impl From<PaymentError> for AppError {
    fn from(err: PaymentError) -> Self {
        let retryable = err.is_retryable();
        AppError::new(AppErrorKind::External(
            ExternalServiceError::PaymentProvider {
                message: err.to_string(),
                retryable,
            },
        ))
    }
}

pub type PaymentResult<T> = Result<T, PaymentError>;
