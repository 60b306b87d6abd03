//! PIN gate for sensitive merchant operations
//!
//! The PIN is exactly six ASCII digits, stored as hex(SHA-256(salt || pin))
//! with a random per-merchant salt. Failed validations consume a bounded
//! attempt budget; exhausting it flips the account to `pin_blocked`, and
//! nothing in this service ever unblocks an account.

use crate::database::error::DatabaseError;
use crate::database::merchant_repository::{Merchant, PinState};
use crate::error::{AppError, AppErrorKind, SecurityError};
use crate::payments::utils::secure_eq;
use crate::services::ports::MerchantStore;
use chrono::Utc;
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum PinError {
    #[error("PIN must be exactly 6 digits")]
    Format,

    #[error("no PIN is set for this merchant")]
    NotSet,

    #[error("a PIN is already set for this merchant")]
    AlreadySet,

    #[error("account is blocked after too many failed PIN attempts")]
    Blocked,

    #[error("invalid PIN, {attempts_remaining} attempt(s) remaining")]
    Invalid { attempts_remaining: u32 },

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

impl From<PinError> for AppError {
    fn from(err: PinError) -> Self {
        match err {
            PinError::Format => AppError::new(AppErrorKind::Security(SecurityError::PinFormat)),
            PinError::NotSet => AppError::new(AppErrorKind::Security(
                SecurityError::PinStateConflict {
                    reason: "No PIN is set for this merchant".to_string(),
                },
            )),
            PinError::AlreadySet => AppError::new(AppErrorKind::Security(
                SecurityError::PinStateConflict {
                    reason: "A PIN is already set; use update instead".to_string(),
                },
            )),
            PinError::Blocked => AppError::new(AppErrorKind::Security(SecurityError::PinBlocked)),
            PinError::Invalid { attempts_remaining } => AppError::new(AppErrorKind::Security(
                SecurityError::PinInvalid { attempts_remaining },
            )),
            PinError::Database(err) => err.into(),
        }
    }
}

/// Outcome of a PIN validation, reported to the caller in full.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub attempts_remaining: u32,
    pub is_blocked: bool,
}

pub struct PinGate {
    merchants: Arc<dyn MerchantStore>,
    max_attempts: u32,
}

impl PinGate {
    pub fn new(merchants: Arc<dyn MerchantStore>, max_attempts: u32) -> Self {
        Self {
            merchants,
            max_attempts,
        }
    }

    /// Set an initial PIN. Fails when one is already set.
    pub async fn set(&self, merchant: &Merchant, pin: &str) -> Result<(), PinError> {
        if merchant.is_pin_blocked() {
            return Err(PinError::Blocked);
        }
        if merchant.has_pin() {
            return Err(PinError::AlreadySet);
        }
        check_format(pin)?;

        self.write_pin(merchant, pin).await?;
        info!(merchant_id = %merchant.id, "PIN set");
        Ok(())
    }

    /// Replace the PIN. The current PIN must validate first; a failed
    /// validation here counts against the attempt budget like any other.
    pub async fn update(
        &self,
        merchant: &Merchant,
        current_pin: &str,
        new_pin: &str,
    ) -> Result<(), PinError> {
        if !merchant.has_pin() {
            return Err(PinError::NotSet);
        }
        check_format(new_pin)?;
        self.require_valid(merchant, current_pin).await?;

        self.write_pin(merchant, new_pin).await?;
        info!(merchant_id = %merchant.id, "PIN updated");
        Ok(())
    }

    /// Remove the PIN. The current PIN must validate first.
    pub async fn revoke(&self, merchant: &Merchant, current_pin: &str) -> Result<(), PinError> {
        if !merchant.has_pin() {
            return Err(PinError::NotSet);
        }
        self.require_valid(merchant, current_pin).await?;

        self.merchants
            .update_pin_state(merchant.id, PinState::default())
            .await?;
        info!(merchant_id = %merchant.id, "PIN revoked");
        Ok(())
    }

    /// Validate a PIN attempt.
    ///
    /// A merchant with no PIN configured trivially passes: the gate only
    /// applies once a PIN is set. A wrong PIN increments the attempt
    /// counter and, on the last allowed attempt, blocks the account. A
    /// correct PIN resets the counter. On an already-blocked account
    /// neither the hash nor the counter is touched.
    pub async fn validate(
        &self,
        merchant: &Merchant,
        pin: &str,
    ) -> Result<ValidationReport, PinError> {
        if merchant.is_pin_blocked() {
            return Ok(ValidationReport {
                valid: false,
                attempts_remaining: 0,
                is_blocked: true,
            });
        }

        let (hash, salt) = match (&merchant.pin_hash, &merchant.pin_salt) {
            (Some(hash), Some(salt)) => (hash, salt),
            _ => {
                return Ok(ValidationReport {
                    valid: true,
                    attempts_remaining: self.max_attempts,
                    is_blocked: false,
                })
            }
        };
        check_format(pin)?;

        let now = Utc::now();
        if secure_eq(hash_pin(salt, pin).as_bytes(), hash.as_bytes()) {
            self.merchants
                .update_pin_state(
                    merchant.id,
                    PinState {
                        pin_hash: merchant.pin_hash.clone(),
                        pin_salt: merchant.pin_salt.clone(),
                        pin_attempts: 0,
                        pin_blocked_at: None,
                        pin_last_attempt_at: None,
                    },
                )
                .await?;

            return Ok(ValidationReport {
                valid: true,
                attempts_remaining: self.max_attempts,
                is_blocked: false,
            });
        }

        let attempts = merchant.pin_attempts.max(0) as u32 + 1;
        if attempts >= self.max_attempts {
            self.merchants
                .update_pin_state(
                    merchant.id,
                    PinState {
                        pin_hash: merchant.pin_hash.clone(),
                        pin_salt: merchant.pin_salt.clone(),
                        pin_attempts: attempts as i32,
                        pin_blocked_at: Some(now),
                        pin_last_attempt_at: Some(now),
                    },
                )
                .await?;
            self.merchants.block_account(merchant.id, now).await?;

            warn!(
                merchant_id = %merchant.id,
                attempts = attempts,
                "PIN attempt budget exhausted, account blocked"
            );
            return Ok(ValidationReport {
                valid: false,
                attempts_remaining: 0,
                is_blocked: true,
            });
        }

        self.merchants
            .update_pin_state(
                merchant.id,
                PinState {
                    pin_hash: merchant.pin_hash.clone(),
                    pin_salt: merchant.pin_salt.clone(),
                    pin_attempts: attempts as i32,
                    pin_blocked_at: None,
                    pin_last_attempt_at: Some(now),
                },
            )
            .await?;

        Ok(ValidationReport {
            valid: false,
            attempts_remaining: self.max_attempts - attempts,
            is_blocked: false,
        })
    }

    async fn require_valid(&self, merchant: &Merchant, pin: &str) -> Result<(), PinError> {
        let report = self.validate(merchant, pin).await?;
        if report.is_blocked {
            return Err(PinError::Blocked);
        }
        if !report.valid {
            return Err(PinError::Invalid {
                attempts_remaining: report.attempts_remaining,
            });
        }
        Ok(())
    }

    async fn write_pin(&self, merchant: &Merchant, pin: &str) -> Result<(), PinError> {
        let salt = generate_salt();
        let state = PinState {
            pin_hash: Some(hash_pin(&salt, pin)),
            pin_salt: Some(salt),
            pin_attempts: 0,
            pin_blocked_at: None,
            pin_last_attempt_at: None,
        };
        self.merchants.update_pin_state(merchant.id, state).await?;
        Ok(())
    }
}

fn check_format(pin: &str) -> Result<(), PinError> {
    if pin.len() != 6 || !pin.bytes().all(|b| b.is_ascii_digit()) {
        return Err(PinError::Format);
    }
    Ok(())
}

fn hash_pin(salt: &str, pin: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(pin.as_bytes());
    hex::encode(hasher.finalize())
}

fn generate_salt() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}
