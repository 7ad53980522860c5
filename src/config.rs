use crate::domain::order::RentalPeriod;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;
use std::time::Duration;

/// Markup applied on top of the upstream unit price, in percent, keyed by
/// rental period. Longer commitments get a lower markup.
///
/// Breakpoints live here so callers never hard-code pricing policy.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct MarkupSchedule {
    pub day: Decimal,
    pub week: Decimal,
    pub month: Decimal,
}

impl Default for MarkupSchedule {
    fn default() -> Self {
        Self {
            day: dec!(30),
            week: dec!(25),
            month: dec!(20),
        }
    }
}

impl MarkupSchedule {
    pub fn percent(&self, period: RentalPeriod) -> Decimal {
        match period {
            RentalPeriod::Day => self.day,
            RentalPeriod::Week => self.week,
            RentalPeriod::Month => self.month,
        }
    }

    /// Multiplier form, e.g. 20% -> 1.20.
    pub fn factor(&self, period: RentalPeriod) -> Decimal {
        Decimal::ONE + self.percent(period) / Decimal::ONE_HUNDRED
    }
}

/// Retry budgets for the provisioning gateway.
///
/// The upstream activates orders with unpredictable latency (tens of
/// seconds observed), so credential polling needs a real budget rather
/// than a single fetch.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetryPolicy {
    pub quote_attempts: u32,
    pub credential_attempts: u32,
    pub credential_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            quote_attempts: 3,
            credential_attempts: 10,
            credential_delay_ms: 3000,
        }
    }
}

impl RetryPolicy {
    pub fn credential_delay(&self) -> Duration {
        Duration::from_millis(self.credential_delay_ms)
    }
}

/// Polling policy for deposit invoices.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct InvoicePolicy {
    pub poll_interval_ms: u64,
    /// Hard wall-clock bound on a single invoice watcher.
    pub max_wait_ms: u64,
    /// Consecutive lookup failures tolerated before the invoice is
    /// treated as expired. Inability to determine status never credits.
    pub status_error_budget: u32,
}

impl Default for InvoicePolicy {
    fn default() -> Self {
        Self {
            poll_interval_ms: 5000,
            max_wait_ms: 15 * 60 * 1000,
            status_error_budget: 5,
        }
    }
}

impl InvoicePolicy {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn max_wait(&self) -> Duration {
        Duration::from_millis(self.max_wait_ms)
    }
}

/// Top-level configuration for the fulfillment core.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct FulfillmentConfig {
    pub issuer: IssuerConfig,
    pub markup: MarkupSchedule,
    pub retry: RetryPolicy,
    pub invoice: InvoicePolicy,
    pub quote: QuotePolicy,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct IssuerConfig {
    pub prefix: String,
    pub pad_width: usize,
}

impl Default for IssuerConfig {
    fn default() -> Self {
        Self {
            prefix: "PRX-".to_string(),
            pad_width: 6,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct QuotePolicy {
    /// How long a previously shown quote may be reused before the engine
    /// recomputes it.
    pub ttl_secs: u64,
}

impl Default for QuotePolicy {
    fn default() -> Self {
        Self { ttl_secs: 120 }
    }
}

impl QuotePolicy {
    pub fn ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.ttl_secs as i64)
    }
}
