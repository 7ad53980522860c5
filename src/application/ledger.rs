use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

use crate::domain::account::{Amount, Balance, UserAccount, UserId};
use crate::domain::ports::AccountStoreBox;
use crate::error::Result;

/// Atomic debit/credit primitives over the account store.
///
/// Every mutating operation takes the per-user lock, re-reads the row,
/// applies the change and writes it back before releasing — so a balance
/// read used for a debit decision can never go stale under a concurrent
/// mutation of the same user. Unknown users are registered at zero on
/// first touch.
pub struct BalanceLedger {
    accounts: AccountStoreBox,
    locks: Mutex<HashMap<UserId, Arc<Mutex<()>>>>,
}

impl BalanceLedger {
    pub fn new(accounts: AccountStoreBox) -> Self {
        Self {
            accounts,
            locks: Mutex::new(HashMap::new()),
        }
    }

    async fn user_lock(&self, user_id: UserId) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        Arc::clone(locks.entry(user_id).or_default())
    }

    async fn load_or_register(&self, user_id: UserId) -> Result<UserAccount> {
        Ok(self
            .accounts
            .get(user_id)
            .await?
            .unwrap_or_else(|| UserAccount::new(user_id)))
    }

    /// Removes `amount` from the balance. Fails with `InsufficientFunds`
    /// without touching the row; never produces a negative balance.
    pub async fn debit(&self, user_id: UserId, amount: Amount) -> Result<Balance> {
        let lock = self.user_lock(user_id).await;
        let _guard = lock.lock().await;

        let mut account = self.load_or_register(user_id).await?;
        account.debit(amount)?;
        self.accounts.store(account.clone()).await?;
        debug!(user_id, %amount, balance = %account.balance, "debited");
        Ok(account.balance)
    }

    /// Adds `amount` to the balance, registering the user if needed.
    pub async fn credit(&self, user_id: UserId, amount: Amount) -> Result<Balance> {
        let lock = self.user_lock(user_id).await;
        let _guard = lock.lock().await;

        let mut account = self.load_or_register(user_id).await?;
        account.credit(amount);
        self.accounts.store(account.clone()).await?;
        debug!(user_id, %amount, balance = %account.balance, "credited");
        Ok(account.balance)
    }

    pub async fn balance(&self, user_id: UserId) -> Result<Balance> {
        Ok(self.load_or_register(user_id).await?.balance)
    }

    pub async fn purchased(&self, user_id: UserId) -> Result<u32> {
        Ok(self.load_or_register(user_id).await?.purchased)
    }

    pub async fn increment_purchased(&self, user_id: UserId, n: u32) -> Result<()> {
        let lock = self.user_lock(user_id).await;
        let _guard = lock.lock().await;

        let mut account = self.load_or_register(user_id).await?;
        account.record_purchase(n);
        self.accounts.store(account).await?;
        Ok(())
    }
}
