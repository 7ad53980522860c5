use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;

use crate::domain::account::{UserAccount, UserId};
use crate::domain::claim::{Claim, ClaimOutcome, ClaimStatus, NewClaim};
use crate::domain::ports::{AccountStore, ClaimStore, CounterStore};
use crate::error::{FulfillmentError, Result};

/// A thread-safe in-memory store for user accounts.
///
/// Uses `Arc<RwLock<HashMap>>` to allow shared concurrent access. Ideal
/// for testing or single-process deployments without persistence.
#[derive(Default, Clone)]
pub struct InMemoryAccountStore {
    accounts: Arc<RwLock<HashMap<UserId, UserAccount>>>,
}

impl InMemoryAccountStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AccountStore for InMemoryAccountStore {
    async fn store(&self, account: UserAccount) -> Result<()> {
        let mut accounts = self.accounts.write().await;
        accounts.insert(account.user_id, account);
        Ok(())
    }

    async fn get(&self, user_id: UserId) -> Result<Option<UserAccount>> {
        let accounts = self.accounts.read().await;
        Ok(accounts.get(&user_id).cloned())
    }

    async fn all(&self) -> Result<Vec<UserAccount>> {
        let accounts = self.accounts.read().await;
        Ok(accounts.values().cloned().collect())
    }
}

#[derive(Default)]
struct ClaimTable {
    next_id: u64,
    rows: BTreeMap<u64, Claim>,
    /// Uniqueness index on the external key. This is the storage-layer
    /// guarantee that two users can never own the same unit; application
    /// race windows above it are expected and survivable.
    by_key: HashMap<String, u64>,
    by_public_id: HashSet<String>,
}

/// A thread-safe in-memory claim store.
///
/// The external-key uniqueness check and the row insert happen under one
/// write lock, so racing `try_claim` calls on the same key serialize and
/// exactly one wins.
#[derive(Default, Clone)]
pub struct InMemoryClaimStore {
    table: Arc<RwLock<ClaimTable>>,
}

impl InMemoryClaimStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ClaimStore for InMemoryClaimStore {
    async fn try_claim(&self, claim: NewClaim) -> Result<ClaimOutcome> {
        let mut table = self.table.write().await;

        if let Some(existing_id) = table.by_key.get(&claim.external_key) {
            let owner = table.rows[existing_id].user_id;
            return Ok(ClaimOutcome::AlreadyClaimed { owner });
        }
        if table.by_public_id.contains(&claim.public_id.0) {
            return Err(FulfillmentError::Validation(format!(
                "duplicate public identifier: {}",
                claim.public_id
            )));
        }

        table.next_id += 1;
        let key = claim.external_key.clone();
        let row = Claim {
            id: table.next_id,
            public_id: claim.public_id,
            external_key: Some(claim.external_key),
            user_id: claim.user_id,
            order_ref: claim.order_ref,
            conn: claim.conn,
            active_from: claim.active_from,
            active_until: claim.active_until,
            status: ClaimStatus::Active,
            created_at: Utc::now(),
            purchased_at: claim.purchased_at,
        };
        table.by_key.insert(key, row.id);
        table.by_public_id.insert(row.public_id.0.clone());
        table.rows.insert(row.id, row.clone());
        Ok(ClaimOutcome::Claimed(row))
    }

    async fn list_active(&self, user_id: UserId) -> Result<Vec<Claim>> {
        let table = self.table.read().await;
        let mut claims: Vec<_> = table
            .rows
            .values()
            .filter(|c| c.user_id == user_id && matches!(c.status, ClaimStatus::Active))
            .cloned()
            .collect();
        claims.sort_by(|a, b| b.purchased_at.cmp(&a.purchased_at));
        Ok(claims)
    }

    async fn get(&self, claim_id: u64, user_id: UserId) -> Result<Option<Claim>> {
        let table = self.table.read().await;
        Ok(table
            .rows
            .get(&claim_id)
            .filter(|c| c.user_id == user_id)
            .cloned())
    }

    async fn expire_overdue(&self, now: DateTime<Utc>) -> Result<usize> {
        let mut table = self.table.write().await;
        let mut changed = 0;
        for claim in table.rows.values_mut() {
            if claim.is_overdue(now) {
                claim.status = ClaimStatus::Expired;
                changed += 1;
            }
        }
        Ok(changed)
    }
}

/// Process-local monotonic counter for identifier issuance. `Clone`
/// shares the underlying counter.
#[derive(Default, Clone)]
pub struct InMemoryCounter {
    value: Arc<AtomicU64>,
}

impl InMemoryCounter {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CounterStore for InMemoryCounter {
    async fn next(&self) -> Result<u64> {
        Ok(self.value.fetch_add(1, Ordering::Relaxed) + 1)
    }
}
