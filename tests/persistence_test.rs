#![cfg(feature = "storage-rocksdb")]

use rust_decimal_macros::dec;
use std::sync::Arc;
use tempfile::tempdir;

use proxyvend::application::gateway::ProvisioningGateway;
use proxyvend::application::issuer::IdentifierIssuer;
use proxyvend::application::ledger::BalanceLedger;
use proxyvend::application::purchase::{PurchaseEngine, Settlement};
use proxyvend::config::FulfillmentConfig;
use proxyvend::domain::account::{Amount, Balance};
use proxyvend::domain::order::{LocationCode, PurchaseRequest, RentalPeriod, ResourceKind};
use proxyvend::domain::ports::ClaimStore;
use proxyvend::infrastructure::rocksdb::RocksDbStore;
use proxyvend::infrastructure::simulated::SimulatedProvisioner;

fn engine_over(store: RocksDbStore) -> (Arc<BalanceLedger>, PurchaseEngine) {
    let mut config = FulfillmentConfig::default();
    config.markup.day = dec!(0);
    config.retry.credential_attempts = 3;
    config.retry.credential_delay_ms = 1;

    let ledger = Arc::new(BalanceLedger::new(Box::new(store.clone())));
    let engine = PurchaseEngine::new(
        Arc::clone(&ledger),
        Box::new(store.clone()),
        ProvisioningGateway::new(
            Box::new(SimulatedProvisioner::new(dec!(10))),
            config.markup.clone(),
            config.retry.clone(),
        ),
        IdentifierIssuer::new(config.issuer.clone(), Box::new(store)),
        config.quote.clone(),
    );
    (ledger, engine)
}

fn day_request(quantity: u32) -> PurchaseRequest {
    PurchaseRequest {
        kind: ResourceKind::Shared,
        location: LocationCode("us".to_string()),
        period: RentalPeriod::Day,
        quantity,
        quote: None,
    }
}

// A settled purchase survives a process restart: balance, claims and
// the issuer counter all read back from disk.
#[tokio::test]
async fn test_purchase_state_survives_reopen() {
    let dir = tempdir().unwrap();

    {
        let store = RocksDbStore::open(dir.path()).unwrap();
        let (ledger, engine) = engine_over(store);
        ledger.credit(1, Amount::new(dec!(50)).unwrap()).await.unwrap();

        let receipt = engine.execute_purchase(1, day_request(2)).await.unwrap();
        assert_eq!(receipt.settlement, Settlement::Settled);
        assert_eq!(receipt.new_balance, Balance::new(dec!(30.00)));
    }

    let store = RocksDbStore::open(dir.path()).unwrap();
    let (ledger, engine) = engine_over(store.clone());

    assert_eq!(ledger.balance(1).await.unwrap(), Balance::new(dec!(30.00)));
    assert_eq!(ledger.purchased(1).await.unwrap(), 2);

    let claims = engine.list_claims(1).await.unwrap();
    assert_eq!(claims.len(), 2);
    assert!(claims.iter().all(|c| c.public_id.0.starts_with("PRX-")));

    // The reopened issuer continues past the persisted counter instead
    // of reusing identifiers.
    let next = proxyvend::application::issuer::IdentifierIssuer::new(
        proxyvend::config::IssuerConfig::default(),
        Box::new(store),
    )
    .next()
    .await
    .unwrap();
    assert_eq!(next.0, "PRX-000003");
}

// The claim-key uniqueness constraint is durable, not per-process.
#[tokio::test]
async fn test_claim_key_conflict_across_restart() {
    use chrono::Utc;
    use proxyvend::domain::claim::{ClaimOutcome, ConnectionInfo, NewClaim, PublicId};

    let dir = tempdir().unwrap();
    let new_claim = |user: u64, public: &str| NewClaim {
        user_id: user,
        public_id: PublicId(public.to_string()),
        external_key: "k1".to_string(),
        order_ref: None,
        conn: ConnectionInfo {
            host: "198.51.100.4".to_string(),
            port: 8080,
            socks_port: None,
            username: "u".to_string(),
            password: "p".to_string(),
        },
        active_from: None,
        active_until: None,
        purchased_at: Utc::now(),
    };

    {
        let store = RocksDbStore::open(dir.path()).unwrap();
        let outcome = store.try_claim(new_claim(1, "PRX-000001")).await.unwrap();
        assert!(matches!(outcome, ClaimOutcome::Claimed(_)));
    }

    let store = RocksDbStore::open(dir.path()).unwrap();
    let outcome = store.try_claim(new_claim(2, "PRX-000002")).await.unwrap();
    assert_eq!(outcome, ClaimOutcome::AlreadyClaimed { owner: 1 });
}
