//! Unified error handling for the merchpay backend
//!
//! Every component error converts into [`AppError`], which carries the HTTP
//! status mapping, a machine-readable error code for clients, and a
//! user-facing message that never leaks internal detail.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Machine-readable error codes for client handling
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum ErrorCode {
    // Client errors (4xx)
    #[serde(rename = "VALIDATION_ERROR")]
    ValidationError,
    #[serde(rename = "NOT_FOUND")]
    NotFound,
    #[serde(rename = "INVALID_STATE")]
    InvalidState,
    #[serde(rename = "PIN_REQUIRED")]
    PinRequired,
    #[serde(rename = "PIN_INVALID")]
    PinInvalid,
    #[serde(rename = "PIN_BLOCKED")]
    PinBlocked,
    #[serde(rename = "RATE_LIMITED")]
    RateLimited,
    #[serde(rename = "WEBHOOK_UNAUTHORIZED")]
    WebhookUnauthorized,

    // Infrastructure errors (5xx)
    #[serde(rename = "DATABASE_ERROR")]
    DatabaseError,
    #[serde(rename = "CONFIGURATION_ERROR")]
    ConfigurationError,

    // External collaborators (502/504)
    #[serde(rename = "PAYMENT_PROVIDER_ERROR")]
    PaymentProviderError,
    #[serde(rename = "CUSTODY_PROVIDER_ERROR")]
    CustodyProviderError,

    // Generic
    #[serde(rename = "INTERNAL_ERROR")]
    InternalError,
}

/// Malformed or out-of-range input, detected before any side effect
#[derive(Debug, Clone)]
pub enum ValidationError {
    /// Display currency is not in the currency table
    UnknownCurrency { currency: String },
    /// Converted USD amount is below the configured minimum
    AmountBelowMinimum { amount_usd: String, minimum: String },
    /// Amount failed to parse or is non-positive
    InvalidAmount { amount: String, reason: String },
    /// Requested settlement token id does not exist
    UnknownToken { token_id: String },
    /// Merchant's configured default token is invalid
    InvalidDefaultToken { merchant_id: String },
    /// Webhook payload failed shape validation
    MalformedPayload { reason: String },
    /// Webhook event type is not one the reconciler understands
    UnknownEventType { event: String },
    /// Required field missing from the request body
    MissingField { field: String },
}

/// Unknown merchant or transaction
#[derive(Debug, Clone)]
pub enum NotFoundError {
    Merchant { merchant_id: String },
    Transaction { reference: String },
}

/// Operation not legal for the record's current status
#[derive(Debug, Clone)]
pub struct InvalidStateError {
    pub operation: String,
    pub current_status: String,
}

/// PIN gate and webhook authentication failures
#[derive(Debug, Clone)]
pub enum SecurityError {
    /// A PIN is set for this merchant but the request carried none
    PinRequired,
    /// PIN mismatch; attempts_remaining reported to the caller
    PinInvalid { attempts_remaining: u32 },
    /// Account is PIN-blocked; only an administrative action can restore it
    PinBlocked,
    /// PIN already set / not set for the requested operation
    PinStateConflict { reason: String },
    /// PIN failed format validation (fixed length, numeric)
    PinFormat,
    /// Webhook signature or timestamp rejected; no detail leaked
    WebhookUnauthorized,
}

/// Payment-link or custody provider failure, surfaced without retry
#[derive(Debug, Clone)]
pub enum ExternalServiceError {
    PaymentProvider { message: String, retryable: bool },
    Custody { message: String, retryable: bool },
}

/// Fixed-window throttle tripped
#[derive(Debug, Clone)]
pub struct RateLimitError {
    pub endpoint: String,
    pub retry_after_secs: u64,
}

/// Database, cache or configuration fault
#[derive(Debug, Clone)]
pub enum InfrastructureError {
    Database { message: String, retryable: bool },
    Configuration { message: String },
}

/// Unified application error
#[derive(Debug, Clone)]
pub struct AppError {
    pub kind: AppErrorKind,
    pub request_id: Option<String>,
    pub context: Option<String>,
}

#[derive(Debug, Clone)]
pub enum AppErrorKind {
    Validation(ValidationError),
    NotFound(NotFoundError),
    InvalidState(InvalidStateError),
    Security(SecurityError),
    External(ExternalServiceError),
    RateLimit(RateLimitError),
    Infrastructure(InfrastructureError),
    Internal { message: String },
}

impl AppError {
    pub fn new(kind: AppErrorKind) -> Self {
        Self {
            kind,
            request_id: None,
            context: None,
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(AppErrorKind::Internal {
            message: message.into(),
        })
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    /// Map error to HTTP status code
    pub fn status_code(&self) -> u16 {
        match &self.kind {
            AppErrorKind::Validation(_) => 400,
            AppErrorKind::NotFound(_) => 404,
            AppErrorKind::InvalidState(_) => 422,
            AppErrorKind::Security(err) => match err {
                SecurityError::PinRequired => 400,
                SecurityError::PinInvalid { .. } => 401,
                SecurityError::PinBlocked => 403,
                SecurityError::PinStateConflict { .. } => 400,
                SecurityError::PinFormat => 400,
                SecurityError::WebhookUnauthorized => 401,
            },
            AppErrorKind::External(err) => match err {
                ExternalServiceError::PaymentProvider { .. } => 502,
                ExternalServiceError::Custody { .. } => 502,
            },
            AppErrorKind::RateLimit(_) => 429,
            AppErrorKind::Infrastructure(_) => 500,
            AppErrorKind::Internal { .. } => 500,
        }
    }

    /// Error code for client handling
    pub fn error_code(&self) -> ErrorCode {
        match &self.kind {
            AppErrorKind::Validation(_) => ErrorCode::ValidationError,
            AppErrorKind::NotFound(_) => ErrorCode::NotFound,
            AppErrorKind::InvalidState(_) => ErrorCode::InvalidState,
            AppErrorKind::Security(err) => match err {
                SecurityError::PinRequired => ErrorCode::PinRequired,
                SecurityError::PinInvalid { .. } => ErrorCode::PinInvalid,
                SecurityError::PinBlocked => ErrorCode::PinBlocked,
                SecurityError::PinStateConflict { .. } => ErrorCode::ValidationError,
                SecurityError::PinFormat => ErrorCode::ValidationError,
                SecurityError::WebhookUnauthorized => ErrorCode::WebhookUnauthorized,
            },
            AppErrorKind::External(err) => match err {
                ExternalServiceError::PaymentProvider { .. } => ErrorCode::PaymentProviderError,
                ExternalServiceError::Custody { .. } => ErrorCode::CustodyProviderError,
            },
            AppErrorKind::RateLimit(_) => ErrorCode::RateLimited,
            AppErrorKind::Infrastructure(err) => match err {
                InfrastructureError::Database { .. } => ErrorCode::DatabaseError,
                InfrastructureError::Configuration { .. } => ErrorCode::ConfigurationError,
            },
            AppErrorKind::Internal { .. } => ErrorCode::InternalError,
        }
    }

    /// User-facing message; external and infrastructure detail stays in logs
    pub fn user_message(&self) -> String {
        match &self.kind {
            AppErrorKind::Validation(err) => match err {
                ValidationError::UnknownCurrency { currency } => {
                    format!("Unknown currency '{}'", currency)
                }
                ValidationError::AmountBelowMinimum {
                    amount_usd,
                    minimum,
                } => format!(
                    "Converted amount {} USD is below the minimum of {} USD",
                    amount_usd, minimum
                ),
                ValidationError::InvalidAmount { amount, reason } => {
                    format!("Invalid amount '{}': {}", amount, reason)
                }
                ValidationError::UnknownToken { token_id } => {
                    format!("Token '{}' does not exist", token_id)
                }
                ValidationError::InvalidDefaultToken { .. } => {
                    "Merchant default settlement token is not configured correctly".to_string()
                }
                ValidationError::MalformedPayload { reason } => {
                    format!("Malformed payload: {}", reason)
                }
                ValidationError::UnknownEventType { event } => {
                    format!("Unknown event type '{}'", event)
                }
                ValidationError::MissingField { field } => {
                    format!("Required field '{}' is missing", field)
                }
            },
            AppErrorKind::NotFound(err) => match err {
                NotFoundError::Merchant { .. } => "Merchant not found".to_string(),
                NotFoundError::Transaction { reference } => {
                    format!("Transaction '{}' not found", reference)
                }
            },
            AppErrorKind::InvalidState(err) => format!(
                "Operation '{}' is not allowed while the transaction is '{}'",
                err.operation, err.current_status
            ),
            AppErrorKind::Security(err) => match err {
                SecurityError::PinRequired => "A PIN is required for this operation".to_string(),
                SecurityError::PinInvalid { attempts_remaining } => {
                    format!("Invalid PIN. {} attempt(s) remaining", attempts_remaining)
                }
                SecurityError::PinBlocked => {
                    "Account is blocked after too many failed PIN attempts".to_string()
                }
                SecurityError::PinStateConflict { reason } => reason.clone(),
                SecurityError::PinFormat => "PIN must be exactly 6 digits".to_string(),
                SecurityError::WebhookUnauthorized => "Unauthorized".to_string(),
            },
            AppErrorKind::External(_) => {
                "An upstream provider failed to process the request. Please try again later"
                    .to_string()
            }
            AppErrorKind::RateLimit(err) => format!(
                "Too many requests. Please retry in {} seconds",
                err.retry_after_secs
            ),
            AppErrorKind::Infrastructure(_) | AppErrorKind::Internal { .. } => {
                "Service temporarily unavailable. Please try again later".to_string()
            }
        }
    }

    /// Whether the caller may usefully retry the whole operation
    pub fn is_retryable(&self) -> bool {
        match &self.kind {
            AppErrorKind::Validation(_)
            | AppErrorKind::NotFound(_)
            | AppErrorKind::InvalidState(_)
            | AppErrorKind::Security(_) => false,
            AppErrorKind::External(err) => match err {
                ExternalServiceError::PaymentProvider { retryable, .. } => *retryable,
                ExternalServiceError::Custody { retryable, .. } => *retryable,
            },
            AppErrorKind::RateLimit(_) => true,
            AppErrorKind::Infrastructure(err) => match err {
                InfrastructureError::Database { retryable, .. } => *retryable,
                InfrastructureError::Configuration { .. } => false,
            },
            AppErrorKind::Internal { .. } => false,
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.user_message())
    }
}

impl std::error::Error for AppError {}

/// Result type for operations that can fail with AppError
pub type AppResult<T> = Result<T, AppError>;
