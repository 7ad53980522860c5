//! Application layer containing the core business logic orchestration.
//!
//! `PurchaseEngine` is the primary entry point for purchases;
//! `DepositService` runs the payment confirmation loop. Both consume the
//! port traits from `domain::ports`, so storage and the two external
//! collaborators stay swappable.

pub mod deposit;
pub mod gateway;
pub mod issuer;
pub mod ledger;
pub mod purchase;
