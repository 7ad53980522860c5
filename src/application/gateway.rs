use chrono::Utc;
use tracing::{debug, warn};

use crate::config::{MarkupSchedule, RetryPolicy};
use crate::domain::order::{
    LocationCode, OrderResult, Quote, RentalPeriod, ResourceKind, ResourceRecord,
};
use crate::domain::ports::ProvisioningApiBox;
use crate::error::{FulfillmentError, Result};

/// Correlation signals available for matching freshly provisioned units
/// back to our order. Either may be absent on any given order.
#[derive(Debug, Clone, Default)]
pub struct CandidateMatcher {
    pub keys: Vec<String>,
    pub order_ref: Option<String>,
}

impl CandidateMatcher {
    pub fn from_order(order: &OrderResult) -> Self {
        Self {
            keys: order.candidate_keys.clone(),
            order_ref: order.order_ref.clone(),
        }
    }

    /// Strict priority ladder: exact candidate keys first, order
    /// reference second. Returns `None` when neither signal matches
    /// anything — the last-resort fallback is the gateway's call to
    /// make, not the matcher's.
    fn select(&self, records: &[ResourceRecord]) -> Option<Vec<ResourceRecord>> {
        if !self.keys.is_empty() {
            let by_key: Vec<_> = records
                .iter()
                .filter(|r| self.keys.iter().any(|k| *k == r.external_key))
                .cloned()
                .collect();
            if !by_key.is_empty() {
                return Some(by_key);
            }
        }

        if let Some(order_ref) = &self.order_ref {
            let by_ref: Vec<_> = records
                .iter()
                .filter(|r| r.order_ref.as_deref() == Some(order_ref.as_str()))
                .cloned()
                .collect();
            if !by_ref.is_empty() {
                return Some(by_ref);
            }
        }

        None
    }
}

/// Retrying client over the external provisioning API.
///
/// Applies the configured markup schedule to quotes, tolerates the
/// upstream's activation latency with a bounded credential-poll budget,
/// and never invents data when the budget runs out.
pub struct ProvisioningGateway {
    api: ProvisioningApiBox,
    markup: MarkupSchedule,
    retry: RetryPolicy,
}

impl ProvisioningGateway {
    pub fn new(api: ProvisioningApiBox, markup: MarkupSchedule, retry: RetryPolicy) -> Self {
        Self { api, markup, retry }
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Computes a marked-up quote.
    ///
    /// An upstream response without a positive numeric price is
    /// `PriceUnavailable` — distinct from a hard API error — and is
    /// retried up to `quote_attempts` times before surfacing.
    pub async fn quote(
        &self,
        kind: ResourceKind,
        location: &LocationCode,
        period: RentalPeriod,
        quantity: u32,
    ) -> Result<Quote> {
        if quantity == 0 {
            return Err(FulfillmentError::Validation(
                "quantity must be at least 1".to_string(),
            ));
        }

        let mut last_err = None;
        for attempt in 1..=self.retry.quote_attempts {
            match self.api.fetch_price(kind, location, period).await {
                Ok(Some(raw)) if raw > rust_decimal::Decimal::ZERO => {
                    let unit_price = (raw * self.markup.factor(period)).round_dp(2);
                    return Ok(Quote {
                        kind,
                        location: location.clone(),
                        period,
                        quantity,
                        unit_price,
                        total: unit_price * rust_decimal::Decimal::from(quantity),
                        quoted_at: Utc::now(),
                    });
                }
                Ok(_) => {
                    debug!(%kind, %location, %period, attempt, "no usable price");
                    last_err = Some(FulfillmentError::PriceUnavailable);
                }
                Err(e) => {
                    warn!(%kind, %location, %period, attempt, error = %e, "price fetch failed");
                    last_err = Some(e);
                }
            }
        }
        Err(last_err.unwrap_or(FulfillmentError::PriceUnavailable))
    }

    /// Places the order. Candidate keys and the order reference are both
    /// optional in the upstream response.
    pub async fn order(
        &self,
        kind: ResourceKind,
        location: &LocationCode,
        period: RentalPeriod,
        quantity: u32,
    ) -> Result<OrderResult> {
        let raw = self
            .api
            .place_order(kind, location, period, quantity)
            .await
            .map_err(|e| FulfillmentError::ProvisioningFailed(e.to_string()))?;
        debug!(
            order_ref = raw.order_ref.as_deref().unwrap_or("-"),
            candidates = raw.candidate_keys.len(),
            "order placed"
        );
        Ok(OrderResult {
            order_ref: raw.order_ref,
            candidate_keys: raw.candidate_keys,
        })
    }

    /// Polls the upstream listing until at least `want` records match the
    /// correlation ladder, or the attempt budget is exhausted.
    ///
    /// After the budget runs out, partial signal-based matches are
    /// returned as-is; with no signal-based match at all, the newest
    /// `want` records are taken as a last resort. That fallback can
    /// assign units another customer is concurrently waiting on, so it
    /// is logged loudly and survives only because the claim store makes
    /// double-allocation impossible.
    pub async fn await_credentials(
        &self,
        kind: ResourceKind,
        want: usize,
        matcher: &CandidateMatcher,
    ) -> Result<Vec<ResourceRecord>> {
        let mut best: Vec<ResourceRecord> = Vec::new();
        let mut last_snapshot: Vec<ResourceRecord> = Vec::new();

        for attempt in 1..=self.retry.credential_attempts {
            match self.api.list_provisioned(kind).await {
                Ok(records) => {
                    last_snapshot = records;
                    if let Some(matched) = matcher.select(&last_snapshot) {
                        if matched.len() >= want {
                            debug!(attempt, matched = matched.len(), "credentials matched");
                            return Ok(matched);
                        }
                        best = matched;
                    }
                }
                Err(e) => {
                    warn!(attempt, error = %e, "credential listing failed");
                }
            }

            if attempt < self.retry.credential_attempts {
                tokio::time::sleep(self.retry.credential_delay()).await;
            }
        }

        if !best.is_empty() {
            warn!(
                matched = best.len(),
                want, "credential budget exhausted with partial match"
            );
            return Ok(best);
        }

        // Last resort: take the newest records. Risky by construction —
        // the upstream gave us no correlation signal to do better with.
        let mut latest = last_snapshot;
        latest.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        latest.truncate(want);
        if !latest.is_empty() {
            warn!(
                taken = latest.len(),
                want, "no correlation signal matched; falling back to newest records"
            );
        }
        Ok(latest)
    }
}
