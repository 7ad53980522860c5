use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::application::ledger::BalanceLedger;
use crate::config::InvoicePolicy;
use crate::domain::account::{Amount, Balance, UserId};
use crate::domain::invoice::{DepositInvoice, InvoiceStatus, StartedDeposit};
use crate::domain::ports::PaymentApiArc;
use crate::error::Result;

/// Terminal state of one invoice watcher.
#[derive(Debug, Clone, PartialEq)]
pub enum DepositOutcome {
    Credited { amount: Amount, new_balance: Balance },
    Expired,
    Cancelled,
}

struct PendingDeposit {
    invoice: DepositInvoice,
    stop: Arc<AtomicBool>,
    task: JoinHandle<DepositOutcome>,
}

/// The payment confirmation loop.
///
/// One watcher task per pending invoice polls the payment collaborator on
/// a fixed interval, bounded by a wall-clock budget and a
/// consecutive-error budget. A paid invoice credits the ledger exactly
/// once; anything else never credits. At most one pending deposit per
/// user: starting a new one cancels the previous watcher explicitly.
pub struct DepositService {
    ledger: Arc<BalanceLedger>,
    payments: PaymentApiArc,
    policy: InvoicePolicy,
    pending: Mutex<HashMap<UserId, PendingDeposit>>,
}

impl DepositService {
    pub fn new(ledger: Arc<BalanceLedger>, payments: PaymentApiArc, policy: InvoicePolicy) -> Self {
        Self {
            ledger,
            payments,
            policy,
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Creates an invoice and spawns its watcher, replacing (and
    /// cancelling) any previous pending deposit for this user.
    pub async fn start_deposit(&self, user_id: UserId, amount: Amount) -> Result<StartedDeposit> {
        let reference = format!("deposit:{user_id}");
        let created = self.payments.create_invoice(amount, &reference).await?;

        let stop = Arc::new(AtomicBool::new(false));
        let task = tokio::spawn(watch_invoice(
            Arc::clone(&self.ledger),
            Arc::clone(&self.payments),
            self.policy.clone(),
            user_id,
            created.invoice_id.clone(),
            amount,
            Arc::clone(&stop),
        ));

        let invoice = DepositInvoice {
            invoice_id: created.invoice_id.clone(),
            user_id,
            amount,
            pay_url: created.pay_url.clone(),
            created_at: chrono::Utc::now(),
        };
        let previous = {
            let mut pending = self.pending.lock().await;
            pending.insert(user_id, PendingDeposit { invoice, stop, task })
        };
        if let Some(previous) = previous {
            info!(user_id, invoice_id = %previous.invoice.invoice_id, "replacing pending deposit");
            previous.stop.store(true, Ordering::Relaxed);
            previous.task.abort();
        }

        info!(user_id, invoice_id = %created.invoice_id, %amount, "deposit started");
        Ok(StartedDeposit {
            invoice_id: created.invoice_id,
            pay_url: created.pay_url,
        })
    }

    /// Cancels the pending deposit, if any. No balance mutation.
    pub async fn cancel_deposit(&self, user_id: UserId) -> bool {
        let removed = self.pending.lock().await.remove(&user_id);
        match removed {
            Some(entry) => {
                entry.stop.store(true, Ordering::Relaxed);
                entry.task.abort();
                info!(user_id, invoice_id = %entry.invoice.invoice_id, "deposit cancelled");
                true
            }
            None => false,
        }
    }

    /// The invoice still being watched for `user_id`, if any.
    ///
    /// Watchers are reaped lazily: a finished task no longer counts as
    /// pending even while its map entry lingers.
    pub async fn pending_invoice(&self, user_id: UserId) -> Option<DepositInvoice> {
        let pending = self.pending.lock().await;
        pending
            .get(&user_id)
            .filter(|entry| !entry.task.is_finished())
            .map(|entry| entry.invoice.clone())
    }

    /// Awaits the watcher's terminal state and clears the session entry.
    /// Returns `None` when no deposit is pending.
    pub async fn finish(&self, user_id: UserId) -> Option<DepositOutcome> {
        let entry = self.pending.lock().await.remove(&user_id)?;
        match entry.task.await {
            Ok(outcome) => Some(outcome),
            // Aborted mid-replace; the successor owns the session now.
            Err(_) => Some(DepositOutcome::Cancelled),
        }
    }
}

/// One invoice's polling loop. Runs until a terminal state.
async fn watch_invoice(
    ledger: Arc<BalanceLedger>,
    payments: PaymentApiArc,
    policy: InvoicePolicy,
    user_id: UserId,
    invoice_id: String,
    amount: Amount,
    stop: Arc<AtomicBool>,
) -> DepositOutcome {
    let deadline = Instant::now() + policy.max_wait();
    let mut consecutive_errors = 0u32;
    // Guards re-entry: the ledger is credited at most once per invoice
    // even if paid is observed on consecutive ticks.
    let mut credited = false;

    loop {
        if stop.load(Ordering::Relaxed) {
            debug!(user_id, %invoice_id, "invoice watcher stopped");
            return DepositOutcome::Cancelled;
        }

        match payments.invoice_status(&invoice_id).await {
            Ok(InvoiceStatus::Paid { .. }) if !credited => {
                credited = true;
                match ledger.credit(user_id, amount).await {
                    Ok(new_balance) => {
                        info!(user_id, %invoice_id, %amount, %new_balance, "invoice paid; balance credited");
                        return DepositOutcome::Credited {
                            amount,
                            new_balance,
                        };
                    }
                    Err(e) => {
                        warn!(user_id, %invoice_id, error = %e, "credit failed after payment; needs manual reconciliation");
                        return DepositOutcome::Expired;
                    }
                }
            }
            // Paid observed again after the credit already happened:
            // nothing left to do but leave the loop.
            Ok(InvoiceStatus::Paid { .. }) => {
                return DepositOutcome::Expired;
            }
            Ok(InvoiceStatus::Expired) => {
                info!(user_id, %invoice_id, "invoice expired");
                return DepositOutcome::Expired;
            }
            Ok(InvoiceStatus::Pending) => {
                consecutive_errors = 0;
            }
            Err(e) => {
                consecutive_errors += 1;
                warn!(user_id, %invoice_id, consecutive_errors, error = %e, "invoice status lookup failed");
                if consecutive_errors >= policy.status_error_budget {
                    warn!(user_id, %invoice_id, "status error budget exhausted; treating invoice as expired");
                    return DepositOutcome::Expired;
                }
            }
        }

        if Instant::now() >= deadline {
            info!(user_id, %invoice_id, "invoice wait budget exhausted");
            return DepositOutcome::Expired;
        }
        tokio::time::sleep(policy.poll_interval()).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::in_memory::InMemoryAccountStore;
    use crate::infrastructure::simulated::SimulatedPayments;
    use rust_decimal_macros::dec;

    fn service(payments: SimulatedPayments, policy: InvoicePolicy) -> DepositService {
        let ledger = Arc::new(BalanceLedger::new(Box::new(InMemoryAccountStore::new())));
        DepositService::new(ledger, Arc::new(payments), policy)
    }

    fn fast_policy() -> InvoicePolicy {
        InvoicePolicy {
            poll_interval_ms: 5,
            max_wait_ms: 2_000,
            status_error_budget: 3,
        }
    }

    #[tokio::test]
    async fn test_paid_invoice_credits_once() {
        let service = service(SimulatedPayments::paying_after(2), fast_policy());
        let amount = Amount::new(dec!(25)).unwrap();

        service.start_deposit(7, amount).await.unwrap();
        let outcome = service.finish(7).await.unwrap();

        assert_eq!(
            outcome,
            DepositOutcome::Credited {
                amount,
                new_balance: Balance::new(dec!(25)),
            }
        );
        assert_eq!(service.ledger.balance(7).await.unwrap(), Balance::new(dec!(25)));
    }

    #[tokio::test]
    async fn test_expired_invoice_never_credits() {
        let service = service(SimulatedPayments::expiring_after(1), fast_policy());
        service
            .start_deposit(7, Amount::new(dec!(25)).unwrap())
            .await
            .unwrap();

        let outcome = service.finish(7).await.unwrap();

        assert_eq!(outcome, DepositOutcome::Expired);
        assert_eq!(service.ledger.balance(7).await.unwrap(), Balance::ZERO);
    }

    #[tokio::test]
    async fn test_lookup_error_budget_expires_invoice() {
        let service = service(SimulatedPayments::always_failing(), fast_policy());
        service
            .start_deposit(7, Amount::new(dec!(25)).unwrap())
            .await
            .unwrap();

        let outcome = service.finish(7).await.unwrap();

        assert_eq!(outcome, DepositOutcome::Expired);
        assert_eq!(service.ledger.balance(7).await.unwrap(), Balance::ZERO);
    }

    #[tokio::test]
    async fn test_new_deposit_replaces_previous() {
        let service = service(SimulatedPayments::paying_after(50), fast_policy());

        let first = service
            .start_deposit(7, Amount::new(dec!(10)).unwrap())
            .await
            .unwrap();
        let second = service
            .start_deposit(7, Amount::new(dec!(20)).unwrap())
            .await
            .unwrap();

        assert_ne!(first.invoice_id, second.invoice_id);
        assert_eq!(
            service.pending_invoice(7).await.map(|i| i.invoice_id),
            Some(second.invoice_id)
        );
    }

    #[tokio::test]
    async fn test_cancel_clears_pending() {
        let service = service(SimulatedPayments::paying_after(50), fast_policy());
        service
            .start_deposit(7, Amount::new(dec!(10)).unwrap())
            .await
            .unwrap();

        assert!(service.cancel_deposit(7).await);
        assert_eq!(service.pending_invoice(7).await, None);
        assert!(!service.cancel_deposit(7).await);
    }
}
