use clap::{Parser, Subcommand};
use miette::{IntoDiagnostic, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::io;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use proxyvend::application::deposit::{DepositOutcome, DepositService};
use proxyvend::application::gateway::ProvisioningGateway;
use proxyvend::application::issuer::IdentifierIssuer;
use proxyvend::application::ledger::BalanceLedger;
use proxyvend::application::purchase::{PurchaseEngine, PurchaseReceipt, Settlement};
use proxyvend::config::{FulfillmentConfig, InvoicePolicy};
use proxyvend::domain::account::Amount;
use proxyvend::domain::order::{LocationCode, PurchaseRequest, RentalPeriod, ResourceKind};
use proxyvend::domain::ports::{AccountStoreBox, ClaimStoreBox, CounterStoreBox};
use proxyvend::infrastructure::in_memory::{
    InMemoryAccountStore, InMemoryClaimStore, InMemoryCounter,
};
use proxyvend::infrastructure::simulated::{SimulatedPayments, SimulatedProvisioner};
use proxyvend::interfaces::csv::claim_writer::ClaimWriter;

/// Demo/ops harness around the fulfillment core. The external
/// collaborators are simulated; storage is in-memory unless a database
/// path is given.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to persistent database (optional). If provided, uses RocksDB.
    #[arg(long)]
    db_path: Option<PathBuf>,

    /// JSON file overriding the default fulfillment configuration.
    #[arg(long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Credit a user's balance directly.
    Fund {
        #[arg(long)]
        user: u64,
        #[arg(long)]
        amount: String,
    },
    /// Show a user's balance and purchased-unit count.
    Balance {
        #[arg(long)]
        user: u64,
    },
    /// Price a prospective purchase.
    Quote {
        #[arg(long, default_value = "shared")]
        kind: String,
        #[arg(long, default_value = "us")]
        location: String,
        #[arg(long, default_value = "month")]
        period: String,
        #[arg(long, default_value_t = 1)]
        qty: u32,
    },
    /// Execute a purchase.
    Buy {
        #[arg(long)]
        user: u64,
        #[arg(long, default_value = "shared")]
        kind: String,
        #[arg(long, default_value = "us")]
        location: String,
        #[arg(long, default_value = "month")]
        period: String,
        #[arg(long, default_value_t = 1)]
        qty: u32,
    },
    /// List a user's active claims as CSV.
    Claims {
        #[arg(long)]
        user: u64,
    },
    /// Run a deposit round-trip against the simulated payment processor.
    Deposit {
        #[arg(long)]
        user: u64,
        #[arg(long)]
        amount: String,
    },
    /// Funded end-to-end walkthrough: fund, quote, buy, list claims.
    Demo {
        #[arg(long, default_value_t = 1)]
        user: u64,
        #[arg(long, default_value = "100")]
        amount: String,
        #[arg(long, default_value_t = 3)]
        qty: u32,
    },
}

struct Core {
    ledger: Arc<BalanceLedger>,
    engine: PurchaseEngine,
}

fn build_core(cli: &Cli, config: &FulfillmentConfig) -> Result<Core> {
    let (accounts, claims, counter): (AccountStoreBox, ClaimStoreBox, CounterStoreBox) =
        match &cli.db_path {
            #[cfg(feature = "storage-rocksdb")]
            Some(path) => {
                let store =
                    proxyvend::infrastructure::rocksdb::RocksDbStore::open(path).into_diagnostic()?;
                (
                    Box::new(store.clone()),
                    Box::new(store.clone()),
                    Box::new(store),
                )
            }
            #[cfg(not(feature = "storage-rocksdb"))]
            Some(_) => {
                miette::bail!("--db-path requires the storage-rocksdb feature");
            }
            None => (
                Box::new(InMemoryAccountStore::new()),
                Box::new(InMemoryClaimStore::new()),
                Box::new(InMemoryCounter::new()),
            ),
        };

    let ledger = Arc::new(BalanceLedger::new(accounts));
    let gateway = ProvisioningGateway::new(
        Box::new(SimulatedProvisioner::new(dec!(0.50))),
        config.markup.clone(),
        config.retry.clone(),
    );
    let issuer = IdentifierIssuer::new(config.issuer.clone(), counter);
    let engine = PurchaseEngine::new(
        Arc::clone(&ledger),
        claims,
        gateway,
        issuer,
        config.quote.clone(),
    );

    Ok(Core { ledger, engine })
}

fn load_config(path: &Option<PathBuf>) -> Result<FulfillmentConfig> {
    match path {
        Some(path) => {
            let raw = std::fs::read_to_string(path).into_diagnostic()?;
            serde_json::from_str(&raw).into_diagnostic()
        }
        None => Ok(FulfillmentConfig::default()),
    }
}

fn parse_amount(raw: &str) -> Result<Amount> {
    let value = Decimal::from_str(raw).into_diagnostic()?;
    Amount::new(value).into_diagnostic()
}

fn print_receipt(receipt: &PurchaseReceipt) -> Result<()> {
    match receipt.settlement {
        Settlement::Settled => println!("settled: {} claim(s)", receipt.claims.len()),
        Settlement::PartiallySettled {
            requested,
            delivered,
        } => println!("partially settled: {delivered} of {requested} claim(s)"),
    }
    println!("charged: {}", receipt.total_charged);
    println!("balance: {}", receipt.new_balance);

    let stdout = io::stdout();
    ClaimWriter::new(stdout.lock())
        .write_claims(&receipt.claims)
        .into_diagnostic()
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli.config)?;
    let core = build_core(&cli, &config)?;

    match &cli.command {
        Command::Fund { user, amount } => {
            let balance = core
                .ledger
                .credit(*user, parse_amount(amount)?)
                .await
                .into_diagnostic()?;
            println!("balance: {balance}");
        }
        Command::Balance { user } => {
            let balance = core.ledger.balance(*user).await.into_diagnostic()?;
            let purchased = core.ledger.purchased(*user).await.into_diagnostic()?;
            println!("balance: {balance}");
            println!("purchased: {purchased}");
        }
        Command::Quote {
            kind,
            location,
            period,
            qty,
        } => {
            let quote = core
                .engine
                .quote_purchase(
                    ResourceKind::from_str(kind).into_diagnostic()?,
                    &LocationCode::from_str(location).into_diagnostic()?,
                    RentalPeriod::from_str(period).into_diagnostic()?,
                    *qty,
                )
                .await
                .into_diagnostic()?;
            println!(
                "quote: {} x {} = {} ({}, {}, {})",
                quote.quantity, quote.unit_price, quote.total, quote.kind, quote.location, quote.period
            );
        }
        Command::Buy {
            user,
            kind,
            location,
            period,
            qty,
        } => {
            let request = PurchaseRequest {
                kind: ResourceKind::from_str(kind).into_diagnostic()?,
                location: LocationCode::from_str(location).into_diagnostic()?,
                period: RentalPeriod::from_str(period).into_diagnostic()?,
                quantity: *qty,
                quote: None,
            };
            let receipt = core
                .engine
                .execute_purchase(*user, request)
                .await
                .into_diagnostic()?;
            print_receipt(&receipt)?;
        }
        Command::Claims { user } => {
            core.engine.expire_overdue_claims().await.into_diagnostic()?;
            let claims = core.engine.list_claims(*user).await.into_diagnostic()?;
            let stdout = io::stdout();
            ClaimWriter::new(stdout.lock())
                .write_claims(&claims)
                .into_diagnostic()?;
        }
        Command::Deposit { user, amount } => {
            let deposits = DepositService::new(
                Arc::clone(&core.ledger),
                Arc::new(SimulatedPayments::paying_after(2)),
                InvoicePolicy {
                    poll_interval_ms: 50,
                    ..config.invoice.clone()
                },
            );
            let started = deposits
                .start_deposit(*user, parse_amount(amount)?)
                .await
                .into_diagnostic()?;
            println!("invoice: {} ({})", started.invoice_id, started.pay_url);

            match deposits.finish(*user).await {
                Some(DepositOutcome::Credited {
                    amount,
                    new_balance,
                }) => println!("credited: {amount}, balance: {new_balance}"),
                Some(DepositOutcome::Expired) => println!("invoice expired"),
                Some(DepositOutcome::Cancelled) | None => println!("deposit cancelled"),
            }
        }
        Command::Demo { user, amount, qty } => {
            let balance = core
                .ledger
                .credit(*user, parse_amount(amount)?)
                .await
                .into_diagnostic()?;
            println!("funded: {balance}");

            let kind = ResourceKind::Shared;
            let location = LocationCode("us".to_string());
            let period = RentalPeriod::Month;
            let quote = core
                .engine
                .quote_purchase(kind, &location, period, *qty)
                .await
                .into_diagnostic()?;
            println!("quote: {} x {} = {}", quote.quantity, quote.unit_price, quote.total);

            let receipt = core
                .engine
                .execute_purchase(
                    *user,
                    PurchaseRequest {
                        kind,
                        location,
                        period,
                        quantity: *qty,
                        quote: Some(quote),
                    },
                )
                .await
                .into_diagnostic()?;
            print_receipt(&receipt)?;
        }
    }

    Ok(())
}
