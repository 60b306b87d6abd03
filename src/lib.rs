//! Merchant payment backend
//!
//! Creates payment-link transactions (orders and deposits), reconciles
//! their status from provider webhooks, and guards sensitive operations
//! behind a merchant PIN with bounded attempts.

pub mod api;
pub mod cache;
pub mod config;
pub mod database;
pub mod error;
pub mod logging;
pub mod middleware;
pub mod payments;
pub mod services;
