use async_trait::async_trait;
use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use tokio::sync::Mutex;

use crate::domain::account::Amount;
use crate::domain::claim::ConnectionInfo;
use crate::domain::invoice::{CreatedInvoice, InvoiceStatus};
use crate::domain::order::{LocationCode, RentalPeriod, ResourceKind, ResourceRecord};
use crate::domain::ports::{PaymentApi, ProvisioningApi, RawOrder};
use crate::error::{FulfillmentError, Result, storage_err};

/// Which correlation signal the simulated provider discloses, mirroring
/// the real collaborator's inconsistent response shapes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Disclosure {
    /// Orders return the final keys synchronously.
    Keys,
    /// No keys up front, but records carry the order reference.
    OrderRef,
    /// No usable signal at all; only the latest-N fallback can match.
    Neither,
}

#[derive(Default)]
struct ProviderState {
    next_order: u64,
    next_unit: u32,
    visible: Vec<ResourceRecord>,
    /// Records that appear only once `list_calls` reaches the threshold,
    /// simulating the upstream's activation latency.
    staged: Vec<(u32, ResourceRecord)>,
    list_calls: u32,
}

#[derive(Default)]
struct ProviderCounters {
    orders_placed: AtomicU32,
    list_calls: AtomicU32,
}

/// Read-only view of provider activity for assertions.
#[derive(Clone)]
pub struct ProvisionerProbe {
    counters: Arc<ProviderCounters>,
}

impl ProvisionerProbe {
    pub fn orders_placed(&self) -> u32 {
        self.counters.orders_placed.load(Ordering::Relaxed)
    }

    pub fn list_calls(&self) -> u32 {
        self.counters.list_calls.load(Ordering::Relaxed)
    }
}

/// Deterministic in-process stand-in for the provisioning collaborator.
///
/// The knobs reproduce the upstream behaviors the gateway has to
/// survive: activation latency, missing correlation signals, shared
/// candidate pools, outages, and missing prices.
#[derive(Clone)]
pub struct SimulatedProvisioner {
    state: Arc<Mutex<ProviderState>>,
    counters: Arc<ProviderCounters>,
    price_per_day: Option<Decimal>,
    activation_rounds: u32,
    disclosure: Disclosure,
    fail_orders: bool,
    withhold_records: bool,
    shared_pool: Option<Vec<String>>,
}

impl SimulatedProvisioner {
    pub fn new(price_per_day: Decimal) -> Self {
        Self {
            state: Arc::new(Mutex::new(ProviderState::default())),
            counters: Arc::new(ProviderCounters::default()),
            price_per_day: Some(price_per_day),
            activation_rounds: 0,
            disclosure: Disclosure::Keys,
            fail_orders: false,
            withhold_records: false,
            shared_pool: None,
        }
    }

    /// A provider that never quotes a usable price.
    pub fn without_prices() -> Self {
        let mut provider = Self::new(Decimal::ONE);
        provider.price_per_day = None;
        provider
    }

    pub fn with_activation_rounds(mut self, rounds: u32) -> Self {
        self.activation_rounds = rounds;
        self
    }

    pub fn with_disclosure(mut self, disclosure: Disclosure) -> Self {
        self.disclosure = disclosure;
        self
    }

    pub fn failing_orders(mut self) -> Self {
        self.fail_orders = true;
        self
    }

    /// Orders are accepted but no record ever shows up.
    pub fn withholding_records(mut self) -> Self {
        self.withhold_records = true;
        self
    }

    /// Every order answers with the same fixed candidate keys, and the
    /// matching records exist up front — the provider-race shape where
    /// two concurrent buyers are pointed at the same units.
    pub fn with_shared_pool(mut self, keys: &[&str]) -> Self {
        self.shared_pool = Some(keys.iter().map(|k| k.to_string()).collect());
        self
    }

    pub fn probe(&self) -> ProvisionerProbe {
        ProvisionerProbe {
            counters: Arc::clone(&self.counters),
        }
    }

    fn make_record(unit: u32, order_ref: Option<String>, period: RentalPeriod) -> ResourceRecord {
        let now = Utc::now();
        ResourceRecord {
            external_key: format!("203.0.113.{}:{}", unit % 250 + 1, 8000 + unit),
            order_ref,
            conn: ConnectionInfo {
                host: format!("203.0.113.{}", unit % 250 + 1),
                port: (8000 + unit) as u16,
                socks_port: Some((18000 + unit) as u16),
                username: format!("user{unit}"),
                password: format!("pw{unit:04}"),
            },
            active_from: Some(now),
            active_until: Some(now + Duration::days(i64::from(period.days()))),
            created_at: Some(now),
        }
    }

    async fn seed_pool(&self, keys: &[String], period: RentalPeriod) {
        let mut state = self.state.lock().await;
        for key in keys {
            if state.visible.iter().any(|r| r.external_key == *key) {
                continue;
            }
            state.next_unit += 1;
            let mut record = Self::make_record(state.next_unit, None, period);
            record.external_key = key.clone();
            state.visible.push(record);
        }
    }
}

#[async_trait]
impl ProvisioningApi for SimulatedProvisioner {
    async fn fetch_price(
        &self,
        _kind: ResourceKind,
        _location: &LocationCode,
        period: RentalPeriod,
    ) -> Result<Option<Decimal>> {
        Ok(self
            .price_per_day
            .map(|per_day| per_day * Decimal::from(period.days())))
    }

    async fn place_order(
        &self,
        _kind: ResourceKind,
        _location: &LocationCode,
        period: RentalPeriod,
        quantity: u32,
    ) -> Result<RawOrder> {
        if self.fail_orders {
            return Err(storage_err("simulated order outage"));
        }
        self.counters.orders_placed.fetch_add(1, Ordering::Relaxed);

        if let Some(pool) = &self.shared_pool {
            self.seed_pool(pool, period).await;
            return Ok(RawOrder {
                order_ref: None,
                candidate_keys: pool.clone(),
            });
        }

        let mut state = self.state.lock().await;
        state.next_order += 1;
        let order_ref = format!("ord-{}", state.next_order);

        let mut keys = Vec::new();
        for _ in 0..quantity {
            state.next_unit += 1;
            let record_ref = match self.disclosure {
                Disclosure::Neither => None,
                _ => Some(order_ref.clone()),
            };
            let record = Self::make_record(state.next_unit, record_ref, period);
            keys.push(record.external_key.clone());

            if self.withhold_records {
                continue;
            }
            if self.activation_rounds == 0 {
                state.visible.push(record);
            } else {
                let threshold = state.list_calls + self.activation_rounds;
                state.staged.push((threshold, record));
            }
        }

        Ok(RawOrder {
            order_ref: Some(order_ref),
            candidate_keys: match self.disclosure {
                Disclosure::Keys => keys,
                _ => Vec::new(),
            },
        })
    }

    async fn list_provisioned(&self, _kind: ResourceKind) -> Result<Vec<ResourceRecord>> {
        self.counters.list_calls.fetch_add(1, Ordering::Relaxed);
        let mut state = self.state.lock().await;
        state.list_calls += 1;

        let calls = state.list_calls;
        let (ready, waiting): (Vec<_>, Vec<_>) = state
            .staged
            .drain(..)
            .partition(|(threshold, _)| *threshold <= calls);
        state.staged = waiting;
        state.visible.extend(ready.into_iter().map(|(_, r)| r));

        Ok(state.visible.clone())
    }
}

struct InvoiceSim {
    polls: u32,
}

#[derive(Default)]
struct PayState {
    next_id: u64,
    invoices: HashMap<String, InvoiceSim>,
    paid_overrides: HashMap<String, bool>,
}

/// Deterministic stand-in for the payment collaborator. Invoices advance
/// by being polled: after `fail_first` erroring polls, an invoice pays
/// out (or expires) once its poll count crosses the configured line.
#[derive(Clone)]
pub struct SimulatedPayments {
    state: Arc<Mutex<PayState>>,
    pay_after: Option<u32>,
    expire_after: Option<u32>,
    fail_first: u32,
    always_fail: bool,
}

impl SimulatedPayments {
    fn base() -> Self {
        Self {
            state: Arc::new(Mutex::new(PayState::default())),
            pay_after: None,
            expire_after: None,
            fail_first: 0,
            always_fail: false,
        }
    }

    /// Invoices report `paid` from the n-th status poll onward.
    pub fn paying_after(polls: u32) -> Self {
        let mut payments = Self::base();
        payments.pay_after = Some(polls);
        payments
    }

    /// Invoices report `expired` from the n-th status poll onward.
    pub fn expiring_after(polls: u32) -> Self {
        let mut payments = Self::base();
        payments.expire_after = Some(polls);
        payments
    }

    /// Every status lookup fails.
    pub fn always_failing() -> Self {
        let mut payments = Self::base();
        payments.always_fail = true;
        payments
    }

    /// The first `polls` lookups fail before normal behavior resumes.
    pub fn failing_first(mut self, polls: u32) -> Self {
        self.fail_first = polls;
        self
    }

    /// Marks an invoice paid out-of-band, regardless of poll counts.
    pub async fn mark_paid(&self, invoice_id: &str) {
        let mut state = self.state.lock().await;
        state.paid_overrides.insert(invoice_id.to_string(), true);
    }
}

#[async_trait]
impl PaymentApi for SimulatedPayments {
    async fn create_invoice(&self, _amount: Amount, _reference: &str) -> Result<CreatedInvoice> {
        let mut state = self.state.lock().await;
        state.next_id += 1;
        let invoice_id = format!("inv-{}", state.next_id);
        state
            .invoices
            .insert(invoice_id.clone(), InvoiceSim { polls: 0 });
        Ok(CreatedInvoice {
            pay_url: format!("https://pay.test/{invoice_id}"),
            invoice_id,
        })
    }

    async fn invoice_status(&self, invoice_id: &str) -> Result<InvoiceStatus> {
        let mut state = self.state.lock().await;
        if state.paid_overrides.get(invoice_id).copied().unwrap_or(false) {
            return Ok(InvoiceStatus::Paid {
                paid_at: Some(Utc::now()),
            });
        }

        let Some(invoice) = state.invoices.get_mut(invoice_id) else {
            return Err(FulfillmentError::PaymentLookupFailed(format!(
                "unknown invoice: {invoice_id}"
            )));
        };
        invoice.polls += 1;
        let polls = invoice.polls;

        if self.always_fail || polls <= self.fail_first {
            return Err(FulfillmentError::PaymentLookupFailed(
                "simulated lookup outage".to_string(),
            ));
        }
        if let Some(pay_after) = self.pay_after {
            if polls >= pay_after {
                return Ok(InvoiceStatus::Paid {
                    paid_at: Some(Utc::now()),
                });
            }
        }
        if let Some(expire_after) = self.expire_after {
            if polls >= expire_after {
                return Ok(InvoiceStatus::Expired);
            }
        }
        Ok(InvoiceStatus::Pending)
    }
}
