//! Fulfillment core for selling externally provisioned proxy access
//! against a prepaid balance.
//!
//! The hard parts live in `application`: moving money atomically,
//! claiming exactly one owner per provisioned unit while purchases race,
//! and confirming payments against a poll-only processor.

pub mod application;
pub mod config;
pub mod domain;
pub mod error;
pub mod infrastructure;
pub mod interfaces;
