//! Behavioral core: transaction creation, webhook reconciliation, the PIN
//! gate and PIN-gated transfers.

pub mod notification;
pub mod pin_gate;
pub mod ports;
pub mod status_reconciler;
pub mod transaction_factory;
pub mod transfer;
