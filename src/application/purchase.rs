use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::application::gateway::{CandidateMatcher, ProvisioningGateway};
use crate::application::issuer::IdentifierIssuer;
use crate::application::ledger::BalanceLedger;
use crate::config::QuotePolicy;
use crate::domain::account::{Amount, Balance, UserId};
use crate::domain::claim::{Claim, ClaimOutcome, NewClaim};
use crate::domain::order::{
    LocationCode, PurchaseRequest, Quote, RentalPeriod, ResourceKind, ResourceRecord,
};
use crate::domain::ports::ClaimStoreBox;
use crate::error::{FulfillmentError, Result};

/// Terminal success states of a purchase attempt.
///
/// Partial fulfillment counts as success: the external order cannot be
/// un-made once placed, so delivering what was claimed beats rolling
/// everything back. The shortfall is refunded, never silently kept.
#[derive(Debug, Clone, PartialEq)]
pub enum Settlement {
    Settled,
    PartiallySettled { requested: u32, delivered: u32 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct PurchaseReceipt {
    pub settlement: Settlement,
    pub claims: Vec<Claim>,
    pub total_charged: Decimal,
    pub new_balance: Balance,
}

/// The purchase state machine: quote, debit, order, await credentials,
/// claim, settle.
///
/// One logical transaction per call. The debit happens before any
/// external call and is compensated by a credit-back on every path that
/// cannot deliver; purchases by the same user are serialized so no two
/// of them can decide against the same balance view.
pub struct PurchaseEngine {
    ledger: Arc<BalanceLedger>,
    claims: ClaimStoreBox,
    gateway: ProvisioningGateway,
    issuer: IdentifierIssuer,
    quote_policy: QuotePolicy,
    purchase_locks: Mutex<HashMap<UserId, Arc<Mutex<()>>>>,
}

impl PurchaseEngine {
    pub fn new(
        ledger: Arc<BalanceLedger>,
        claims: ClaimStoreBox,
        gateway: ProvisioningGateway,
        issuer: IdentifierIssuer,
        quote_policy: QuotePolicy,
    ) -> Self {
        Self {
            ledger,
            claims,
            gateway,
            issuer,
            quote_policy,
            purchase_locks: Mutex::new(HashMap::new()),
        }
    }

    pub async fn quote_purchase(
        &self,
        kind: ResourceKind,
        location: &LocationCode,
        period: RentalPeriod,
        quantity: u32,
    ) -> Result<Quote> {
        self.gateway.quote(kind, location, period, quantity).await
    }

    pub async fn get_balance(&self, user_id: UserId) -> Result<Balance> {
        self.ledger.balance(user_id).await
    }

    pub async fn list_claims(&self, user_id: UserId) -> Result<Vec<Claim>> {
        self.claims.list_active(user_id).await
    }

    pub async fn get_claim(&self, claim_id: u64, user_id: UserId) -> Result<Option<Claim>> {
        self.claims.get(claim_id, user_id).await
    }

    /// Flips overdue claims to expired; returns how many changed.
    pub async fn expire_overdue_claims(&self) -> Result<usize> {
        self.claims.expire_overdue(Utc::now()).await
    }

    /// Executes one purchase as a single logical transaction.
    pub async fn execute_purchase(
        &self,
        user_id: UserId,
        request: PurchaseRequest,
    ) -> Result<PurchaseReceipt> {
        if request.quantity == 0 {
            return Err(FulfillmentError::Validation(
                "quantity must be at least 1".to_string(),
            ));
        }

        // Serializes purchases per user: the balance view a debit decides
        // on stays locked against sibling purchases until this attempt
        // commits or compensates.
        let lock = self.purchase_lock(user_id).await;
        let _guard = lock.lock().await;

        // Quoting.
        let quote = self.resolve_quote(&request).await?;
        let total = Amount::new(quote.total)?;

        // Debiting. Fails before any external spend.
        self.ledger.debit(user_id, total).await?;
        info!(user_id, total = %quote.total, quantity = request.quantity, "balance debited");

        // Ordering. A failure here must not keep the debit.
        let order = match self
            .gateway
            .order(request.kind, &request.location, request.period, request.quantity)
            .await
        {
            Ok(order) => order,
            Err(e) => {
                warn!(user_id, error = %e, "order failed; refunding debit");
                self.refund(user_id, quote.total).await?;
                return Err(e);
            }
        };

        // Awaiting credentials.
        let matcher = CandidateMatcher::from_order(&order);
        let records = self
            .gateway
            .await_credentials(request.kind, request.quantity as usize, &matcher)
            .await?;

        // Claiming.
        let (claimed, issuer_failed) = self
            .claim_candidates(user_id, &request, &order.order_ref, records)
            .await?;

        self.settle(user_id, request.quantity, quote, claimed, issuer_failed)
            .await
    }

    async fn purchase_lock(&self, user_id: UserId) -> Arc<Mutex<()>> {
        let mut locks = self.purchase_locks.lock().await;
        Arc::clone(locks.entry(user_id).or_default())
    }

    async fn resolve_quote(&self, request: &PurchaseRequest) -> Result<Quote> {
        if let Some(quote) = &request.quote {
            if quote.covers(request, Utc::now(), self.quote_policy.ttl()) {
                debug!("reusing previously shown quote");
                return Ok(quote.clone());
            }
            debug!("previously shown quote stale or mismatched; recomputing");
        }
        self.gateway
            .quote(request.kind, &request.location, request.period, request.quantity)
            .await
    }

    /// Attempts to claim candidates until the requested quantity is
    /// satisfied. Candidates owned by someone else are skipped; ones
    /// already owned by this user signal idempotent re-entry and are
    /// skipped silently. Returns the committed claims and whether the
    /// identifier issuer gave out mid-run.
    async fn claim_candidates(
        &self,
        user_id: UserId,
        request: &PurchaseRequest,
        order_ref: &Option<String>,
        records: Vec<ResourceRecord>,
    ) -> Result<(Vec<Claim>, bool)> {
        let mut claimed = Vec::new();
        let purchased_at = Utc::now();

        for record in records {
            if claimed.len() as u32 >= request.quantity {
                break;
            }

            let public_id = match self.issuer.next().await {
                Ok(id) => id,
                Err(e) => {
                    error!(user_id, error = %e, "identifier issuance failed mid-claim");
                    return Ok((claimed, true));
                }
            };

            let new_claim = NewClaim {
                user_id,
                public_id,
                external_key: record.external_key.clone(),
                order_ref: record.order_ref.clone().or_else(|| order_ref.clone()),
                conn: record.conn.clone(),
                active_from: record.active_from.or(Some(purchased_at)),
                active_until: record
                    .active_until
                    .or_else(|| Some(purchased_at + Duration::days(i64::from(request.period.days())))),
                purchased_at,
            };

            match self.claims.try_claim(new_claim).await? {
                ClaimOutcome::Claimed(claim) => {
                    debug!(user_id, key = %record.external_key, public_id = %claim.public_id, "claimed");
                    claimed.push(claim);
                }
                ClaimOutcome::AlreadyClaimed { owner } if owner == user_id => {
                    debug!(user_id, key = %record.external_key, "already owned; skipping");
                }
                ClaimOutcome::AlreadyClaimed { owner } => {
                    debug!(
                        user_id,
                        owner, key = %record.external_key, "candidate lost to another owner; skipping"
                    );
                }
            }
        }

        Ok((claimed, false))
    }

    /// Terminal bookkeeping: full settlement, partial settlement with a
    /// shortfall refund, or a full rollback of the debit when nothing
    /// was delivered.
    async fn settle(
        &self,
        user_id: UserId,
        requested: u32,
        quote: Quote,
        claimed: Vec<Claim>,
        issuer_failed: bool,
    ) -> Result<PurchaseReceipt> {
        let delivered = claimed.len() as u32;

        if delivered == 0 {
            warn!(user_id, "no claims committed; rolling back debit");
            self.refund(user_id, quote.total).await?;
            return Err(if issuer_failed {
                FulfillmentError::CounterUnavailable
            } else {
                FulfillmentError::CredentialsNotFound {
                    attempts: self.gateway.retry_policy().credential_attempts,
                }
            });
        }

        self.ledger.increment_purchased(user_id, delivered).await?;

        let settlement = if delivered < requested {
            let shortfall = quote.unit_price * Decimal::from(requested - delivered);
            warn!(
                user_id,
                requested, delivered, shortfall = %shortfall, "partial settlement; refunding shortfall"
            );
            self.refund(user_id, shortfall).await?;
            Settlement::PartiallySettled {
                requested,
                delivered,
            }
        } else {
            Settlement::Settled
        };

        let new_balance = self.ledger.balance(user_id).await?;
        let total_charged = quote.unit_price * Decimal::from(delivered);
        info!(user_id, delivered, total_charged = %total_charged, "purchase settled");

        Ok(PurchaseReceipt {
            settlement,
            claims: claimed,
            total_charged,
            new_balance,
        })
    }

    /// Compensating credit. A failure here means money is in limbo, so it
    /// is logged for manual reconciliation before the error propagates.
    async fn refund(&self, user_id: UserId, amount: Decimal) -> Result<()> {
        match self.ledger.credit(user_id, Amount::new(amount)?).await {
            Ok(_) => Ok(()),
            Err(e) => {
                error!(user_id, %amount, error = %e, "refund failed; needs manual reconciliation");
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FulfillmentConfig, IssuerConfig, MarkupSchedule, RetryPolicy};
    use crate::infrastructure::in_memory::{
        InMemoryAccountStore, InMemoryClaimStore, InMemoryCounter,
    };
    use crate::infrastructure::simulated::SimulatedProvisioner;
    use rust_decimal_macros::dec;

    fn engine_with(provisioner: SimulatedProvisioner) -> (Arc<BalanceLedger>, PurchaseEngine) {
        let config = FulfillmentConfig {
            markup: MarkupSchedule {
                day: dec!(0),
                week: dec!(0),
                month: dec!(0),
            },
            retry: RetryPolicy {
                quote_attempts: 2,
                credential_attempts: 3,
                credential_delay_ms: 1,
            },
            ..FulfillmentConfig::default()
        };
        let ledger = Arc::new(BalanceLedger::new(Box::new(InMemoryAccountStore::new())));
        let engine = PurchaseEngine::new(
            Arc::clone(&ledger),
            Box::new(InMemoryClaimStore::new()),
            ProvisioningGateway::new(
                Box::new(provisioner),
                config.markup.clone(),
                config.retry.clone(),
            ),
            IdentifierIssuer::new(IssuerConfig::default(), Box::new(InMemoryCounter::new())),
            config.quote.clone(),
        );
        (ledger, engine)
    }

    fn request(quantity: u32) -> PurchaseRequest {
        PurchaseRequest {
            kind: ResourceKind::Shared,
            location: LocationCode("us".to_string()),
            period: RentalPeriod::Day,
            quantity,
            quote: None,
        }
    }

    async fn fund(ledger: &BalanceLedger, user: UserId, amount: Decimal) {
        ledger.credit(user, Amount::new(amount).unwrap()).await.unwrap();
    }

    #[tokio::test]
    async fn test_fresh_candidates_settle_in_full() {
        // Unit price: 10/day, zero markup.
        let (ledger, engine) = engine_with(SimulatedProvisioner::new(dec!(10)));
        fund(&ledger, 1, dec!(50)).await;

        let receipt = engine.execute_purchase(1, request(3)).await.unwrap();

        assert_eq!(receipt.settlement, Settlement::Settled);
        assert_eq!(receipt.claims.len(), 3);
        assert_eq!(receipt.total_charged, dec!(30.00));
        assert_eq!(receipt.new_balance, Balance::new(dec!(20.00)));
        assert_eq!(ledger.purchased(1).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_insufficient_funds_aborts_before_external_calls() {
        let provisioner = SimulatedProvisioner::new(dec!(10));
        let probe = provisioner.probe();
        let (ledger, engine) = engine_with(provisioner);
        fund(&ledger, 1, dec!(5)).await;

        let err = engine.execute_purchase(1, request(1)).await.unwrap_err();

        assert!(matches!(err, FulfillmentError::InsufficientFunds { .. }));
        assert_eq!(ledger.balance(1).await.unwrap(), Balance::new(dec!(5)));
        assert_eq!(probe.orders_placed(), 0);
    }

    #[tokio::test]
    async fn test_order_failure_refunds_debit() {
        let provisioner = SimulatedProvisioner::new(dec!(10)).failing_orders();
        let (ledger, engine) = engine_with(provisioner);
        fund(&ledger, 1, dec!(50)).await;

        let err = engine.execute_purchase(1, request(2)).await.unwrap_err();

        assert!(matches!(err, FulfillmentError::ProvisioningFailed(_)));
        assert_eq!(ledger.balance(1).await.unwrap(), Balance::new(dec!(50)));
    }

    #[tokio::test]
    async fn test_no_price_aborts_without_debit() {
        let (ledger, engine) = engine_with(SimulatedProvisioner::without_prices());
        fund(&ledger, 1, dec!(50)).await;

        let err = engine.execute_purchase(1, request(1)).await.unwrap_err();

        assert!(matches!(err, FulfillmentError::PriceUnavailable));
        assert_eq!(ledger.balance(1).await.unwrap(), Balance::new(dec!(50)));
    }

    #[tokio::test]
    async fn test_stale_quote_is_recomputed() {
        let (ledger, engine) = engine_with(SimulatedProvisioner::new(dec!(10)));
        fund(&ledger, 1, dec!(50)).await;

        let mut req = request(1);
        let mut stale = engine
            .quote_purchase(req.kind, &req.location, req.period, 1)
            .await
            .unwrap();
        // Tamper: a stale quote with a wrong price must not be honored.
        stale.unit_price = dec!(1);
        stale.total = dec!(1);
        stale.quoted_at = Utc::now() - chrono::Duration::hours(1);
        req.quote = Some(stale);

        let receipt = engine.execute_purchase(1, req).await.unwrap();
        assert_eq!(receipt.total_charged, dec!(10.00));
    }
}
