#![allow(dead_code)]

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;

use proxyvend::application::gateway::ProvisioningGateway;
use proxyvend::application::issuer::IdentifierIssuer;
use proxyvend::application::ledger::BalanceLedger;
use proxyvend::application::purchase::PurchaseEngine;
use proxyvend::config::FulfillmentConfig;
use proxyvend::domain::account::{Amount, UserId};
use proxyvend::domain::order::{LocationCode, PurchaseRequest, RentalPeriod, ResourceKind};
use proxyvend::domain::ports::CounterStoreBox;
use proxyvend::infrastructure::in_memory::{
    InMemoryAccountStore, InMemoryClaimStore, InMemoryCounter,
};
use proxyvend::infrastructure::simulated::SimulatedProvisioner;

/// Test fixture wiring a purchase engine to in-memory storage and a
/// simulated provisioner, with budgets tightened for fast runs.
pub struct TestCore {
    pub ledger: Arc<BalanceLedger>,
    pub engine: Arc<PurchaseEngine>,
    pub claims: InMemoryClaimStore,
}

pub struct CoreBuilder {
    provisioner: SimulatedProvisioner,
    config: FulfillmentConfig,
    counter: CounterStoreBox,
    claims: InMemoryClaimStore,
}

impl CoreBuilder {
    pub fn new(provisioner: SimulatedProvisioner) -> Self {
        let mut config = FulfillmentConfig::default();
        // Zero markup keeps scenario arithmetic exact.
        config.markup.day = dec!(0);
        config.markup.week = dec!(0);
        config.markup.month = dec!(0);
        config.retry.quote_attempts = 2;
        config.retry.credential_attempts = 3;
        config.retry.credential_delay_ms = 1;

        Self {
            provisioner,
            config,
            counter: Box::new(InMemoryCounter::new()),
            claims: InMemoryClaimStore::new(),
        }
    }

    pub fn with_config(mut self, tweak: impl FnOnce(&mut FulfillmentConfig)) -> Self {
        tweak(&mut self.config);
        self
    }

    pub fn with_counter(mut self, counter: CounterStoreBox) -> Self {
        self.counter = counter;
        self
    }

    /// Shares the claim store with a previously built core, so two
    /// engines race against the same claims table.
    pub fn with_claims(mut self, claims: InMemoryClaimStore) -> Self {
        self.claims = claims;
        self
    }

    pub fn build(self) -> TestCore {
        let ledger = Arc::new(BalanceLedger::new(Box::new(InMemoryAccountStore::new())));
        let gateway = ProvisioningGateway::new(
            Box::new(self.provisioner),
            self.config.markup.clone(),
            self.config.retry.clone(),
        );
        let issuer = IdentifierIssuer::new(self.config.issuer.clone(), self.counter);
        let engine = Arc::new(PurchaseEngine::new(
            Arc::clone(&ledger),
            Box::new(self.claims.clone()),
            gateway,
            issuer,
            self.config.quote.clone(),
        ));
        TestCore {
            ledger,
            engine,
            claims: self.claims,
        }
    }
}

impl TestCore {
    pub async fn fund(&self, user: UserId, amount: Decimal) {
        self.ledger
            .credit(user, Amount::new(amount).unwrap())
            .await
            .unwrap();
    }

    pub async fn balance(&self, user: UserId) -> Decimal {
        self.ledger.balance(user).await.unwrap().value()
    }
}

/// A one-day shared proxy request, the cheapest shape for scenarios.
pub fn day_request(quantity: u32) -> PurchaseRequest {
    PurchaseRequest {
        kind: ResourceKind::Shared,
        location: LocationCode("us".to_string()),
        period: RentalPeriod::Day,
        quantity,
        quote: None,
    }
}
