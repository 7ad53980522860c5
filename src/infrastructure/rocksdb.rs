use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rocksdb::{ColumnFamilyDescriptor, DB, Options, WriteBatch};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::domain::account::{UserAccount, UserId};
use crate::domain::claim::{Claim, ClaimOutcome, ClaimStatus, NewClaim};
use crate::domain::ports::{AccountStore, ClaimStore, CounterStore};
use crate::error::{Result, storage_err};

/// Column Family for account rows.
pub const CF_ACCOUNTS: &str = "accounts";
/// Column Family for claim rows.
pub const CF_CLAIMS: &str = "claims";
/// Column Family mapping external resource key -> claim id. This index
/// is what makes the exactly-once claim guarantee a storage property.
pub const CF_CLAIM_KEYS: &str = "claim_keys";
/// Column Family for counters (issuer counter, next claim id).
pub const CF_META: &str = "meta";

const META_ISSUER_COUNTER: &[u8] = b"issuer_counter";
const META_NEXT_CLAIM_ID: &[u8] = b"next_claim_id";

/// A persistent store implementation using RocksDB.
///
/// Serves the account, claim and counter ports from one database using
/// separate Column Families. `Clone` shares the underlying `Arc<DB>`.
/// Claim inserts and counter bumps serialize on a single writer lock so
/// the check-then-write sections stay atomic.
#[derive(Clone)]
pub struct RocksDbStore {
    db: Arc<DB>,
    write_lock: Arc<Mutex<()>>,
}

impl RocksDbStore {
    /// Opens or creates a RocksDB instance at the specified path,
    /// ensuring the required column families exist.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cfs = [CF_ACCOUNTS, CF_CLAIMS, CF_CLAIM_KEYS, CF_META]
            .into_iter()
            .map(|name| ColumnFamilyDescriptor::new(name, Options::default()))
            .collect::<Vec<_>>();

        let db = DB::open_cf_descriptors(&opts, path, cfs).map_err(storage_err)?;

        Ok(Self {
            db: Arc::new(db),
            write_lock: Arc::new(Mutex::new(())),
        })
    }

    fn cf(&self, name: &str) -> Result<&rocksdb::ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| storage_err(format!("column family not found: {name}")))
    }

    fn read_counter(&self, key: &[u8]) -> Result<u64> {
        let cf = self.cf(CF_META)?;
        let current = self.db.get_cf(cf, key).map_err(storage_err)?;
        Ok(current
            .map(|bytes| {
                let mut buf = [0u8; 8];
                buf.copy_from_slice(&bytes);
                u64::from_be_bytes(buf)
            })
            .unwrap_or(0))
    }

    fn bump_counter(&self, key: &[u8]) -> Result<u64> {
        let next = self.read_counter(key)? + 1;
        let cf = self.cf(CF_META)?;
        self.db
            .put_cf(cf, key, next.to_be_bytes())
            .map_err(storage_err)?;
        Ok(next)
    }
}

#[async_trait]
impl AccountStore for RocksDbStore {
    async fn store(&self, account: UserAccount) -> Result<()> {
        let cf = self.cf(CF_ACCOUNTS)?;
        let key = account.user_id.to_be_bytes();
        let value = serde_json::to_vec(&account).map_err(storage_err)?;
        self.db.put_cf(cf, key, value).map_err(storage_err)?;
        Ok(())
    }

    async fn get(&self, user_id: UserId) -> Result<Option<UserAccount>> {
        let cf = self.cf(CF_ACCOUNTS)?;
        match self.db.get_cf(cf, user_id.to_be_bytes()).map_err(storage_err)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes).map_err(storage_err)?)),
            None => Ok(None),
        }
    }

    async fn all(&self) -> Result<Vec<UserAccount>> {
        let cf = self.cf(CF_ACCOUNTS)?;
        let mut accounts = Vec::new();
        for item in self.db.iterator_cf(cf, rocksdb::IteratorMode::Start) {
            let (_key, value) = item.map_err(storage_err)?;
            accounts.push(serde_json::from_slice(&value).map_err(storage_err)?);
        }
        Ok(accounts)
    }
}

#[async_trait]
impl ClaimStore for RocksDbStore {
    async fn try_claim(&self, claim: NewClaim) -> Result<ClaimOutcome> {
        let _guard = self.write_lock.lock().await;

        let keys_cf = self.cf(CF_CLAIM_KEYS)?;
        if let Some(existing) = self
            .db
            .get_cf(keys_cf, claim.external_key.as_bytes())
            .map_err(storage_err)?
        {
            let mut buf = [0u8; 8];
            buf.copy_from_slice(&existing);
            let claim_id = u64::from_be_bytes(buf);

            let claims_cf = self.cf(CF_CLAIMS)?;
            let row = self
                .db
                .get_cf(claims_cf, claim_id.to_be_bytes())
                .map_err(storage_err)?
                .ok_or_else(|| storage_err("claim key index points at missing row"))?;
            let owner: Claim = serde_json::from_slice(&row).map_err(storage_err)?;
            return Ok(ClaimOutcome::AlreadyClaimed {
                owner: owner.user_id,
            });
        }

        let id = self.bump_counter(META_NEXT_CLAIM_ID)?;
        let row = Claim {
            id,
            public_id: claim.public_id,
            external_key: Some(claim.external_key.clone()),
            user_id: claim.user_id,
            order_ref: claim.order_ref,
            conn: claim.conn,
            active_from: claim.active_from,
            active_until: claim.active_until,
            status: ClaimStatus::Active,
            created_at: Utc::now(),
            purchased_at: claim.purchased_at,
        };

        // Row and key index land together or not at all.
        let claims_cf = self.cf(CF_CLAIMS)?;
        let mut batch = WriteBatch::default();
        batch.put_cf(
            claims_cf,
            id.to_be_bytes(),
            serde_json::to_vec(&row).map_err(storage_err)?,
        );
        batch.put_cf(keys_cf, claim.external_key.as_bytes(), id.to_be_bytes());
        self.db.write(batch).map_err(storage_err)?;

        Ok(ClaimOutcome::Claimed(row))
    }

    async fn list_active(&self, user_id: UserId) -> Result<Vec<Claim>> {
        let cf = self.cf(CF_CLAIMS)?;
        let mut claims = Vec::new();
        for item in self.db.iterator_cf(cf, rocksdb::IteratorMode::Start) {
            let (_key, value) = item.map_err(storage_err)?;
            let claim: Claim = serde_json::from_slice(&value).map_err(storage_err)?;
            if claim.user_id == user_id && matches!(claim.status, ClaimStatus::Active) {
                claims.push(claim);
            }
        }
        claims.sort_by(|a, b| b.purchased_at.cmp(&a.purchased_at));
        Ok(claims)
    }

    async fn get(&self, claim_id: u64, user_id: UserId) -> Result<Option<Claim>> {
        let cf = self.cf(CF_CLAIMS)?;
        match self.db.get_cf(cf, claim_id.to_be_bytes()).map_err(storage_err)? {
            Some(bytes) => {
                let claim: Claim = serde_json::from_slice(&bytes).map_err(storage_err)?;
                Ok(Some(claim).filter(|c| c.user_id == user_id))
            }
            None => Ok(None),
        }
    }

    async fn expire_overdue(&self, now: DateTime<Utc>) -> Result<usize> {
        let _guard = self.write_lock.lock().await;

        let cf = self.cf(CF_CLAIMS)?;
        let mut changed = 0;
        let mut batch = WriteBatch::default();
        for item in self.db.iterator_cf(cf, rocksdb::IteratorMode::Start) {
            let (key, value) = item.map_err(storage_err)?;
            let mut claim: Claim = serde_json::from_slice(&value).map_err(storage_err)?;
            if claim.is_overdue(now) {
                claim.status = ClaimStatus::Expired;
                batch.put_cf(cf, key, serde_json::to_vec(&claim).map_err(storage_err)?);
                changed += 1;
            }
        }
        if changed > 0 {
            self.db.write(batch).map_err(storage_err)?;
        }
        Ok(changed)
    }
}

#[async_trait]
impl CounterStore for RocksDbStore {
    async fn next(&self) -> Result<u64> {
        let _guard = self.write_lock.lock().await;
        self.bump_counter(META_ISSUER_COUNTER)
    }
}
