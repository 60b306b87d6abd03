//! External payment-provider boundary
//!
//! Outbound payment-link creation, the custodial signing hook used by
//! PIN-gated transfers, and the wire types for the provider's inbound
//! settlement webhooks.

pub mod custody;
pub mod error;
pub mod provider;
pub mod types;
pub mod utils;
