use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;

use crate::domain::account::{Amount, UserAccount, UserId};
use crate::domain::claim::{Claim, ClaimOutcome, NewClaim};
use crate::domain::invoice::{CreatedInvoice, InvoiceStatus};
use crate::domain::order::{LocationCode, RentalPeriod, ResourceKind, ResourceRecord};
use crate::error::Result;

#[async_trait]
pub trait AccountStore: Send + Sync {
    async fn store(&self, account: UserAccount) -> Result<()>;
    async fn get(&self, user_id: UserId) -> Result<Option<UserAccount>>;
    async fn all(&self) -> Result<Vec<UserAccount>>;
}

#[async_trait]
pub trait ClaimStore: Send + Sync {
    /// Inserts `claim` unless its external key is already owned. The
    /// uniqueness check and insert are atomic inside the store.
    async fn try_claim(&self, claim: NewClaim) -> Result<ClaimOutcome>;
    /// Active claims of `user_id`, most recent purchase first.
    async fn list_active(&self, user_id: UserId) -> Result<Vec<Claim>>;
    async fn get(&self, claim_id: u64, user_id: UserId) -> Result<Option<Claim>>;
    /// Flips active claims whose validity window passed to `Expired`;
    /// returns how many rows changed.
    async fn expire_overdue(&self, now: DateTime<Utc>) -> Result<usize>;
}

/// Durable, gap-tolerant monotonic counter for identifier issuance.
/// Concurrent calls never observe the same value.
#[async_trait]
pub trait CounterStore: Send + Sync {
    async fn next(&self) -> Result<u64>;
}

/// Raw order response from the provisioning collaborator. Shapes vary:
/// either field may be missing on any given call.
#[derive(Debug, Clone, PartialEq)]
pub struct RawOrder {
    pub order_ref: Option<String>,
    pub candidate_keys: Vec<String>,
}

/// The external provisioning API, as thin as the wire contract itself.
/// Business-level "no price" is `Ok(None)`, never an `Err`.
#[async_trait]
pub trait ProvisioningApi: Send + Sync {
    async fn fetch_price(
        &self,
        kind: ResourceKind,
        location: &LocationCode,
        period: RentalPeriod,
    ) -> Result<Option<Decimal>>;

    async fn place_order(
        &self,
        kind: ResourceKind,
        location: &LocationCode,
        period: RentalPeriod,
        quantity: u32,
    ) -> Result<RawOrder>;

    async fn list_provisioned(&self, kind: ResourceKind) -> Result<Vec<ResourceRecord>>;
}

/// The external payment processor.
#[async_trait]
pub trait PaymentApi: Send + Sync {
    async fn create_invoice(&self, amount: Amount, reference: &str) -> Result<CreatedInvoice>;
    async fn invoice_status(&self, invoice_id: &str) -> Result<InvoiceStatus>;
}

pub type AccountStoreBox = Box<dyn AccountStore>;
pub type ClaimStoreBox = Box<dyn ClaimStore>;
pub type CounterStoreBox = Box<dyn CounterStore>;
pub type ProvisioningApiBox = Box<dyn ProvisioningApi>;
/// Shared, because each invoice watcher task holds its own handle.
pub type PaymentApiArc = Arc<dyn PaymentApi>;
