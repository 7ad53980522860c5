use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::domain::claim::ConnectionInfo;
use crate::error::FulfillmentError;

/// Kind of proxy resource sold by the upstream provider.
#[derive(Debug, Deserialize, Serialize, PartialEq, Eq, Hash, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    Shared,
    Dedicated,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Shared => write!(f, "shared"),
            Self::Dedicated => write!(f, "dedicated"),
        }
    }
}

impl FromStr for ResourceKind {
    type Err = FulfillmentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "shared" => Ok(Self::Shared),
            "dedicated" => Ok(Self::Dedicated),
            other => Err(FulfillmentError::Validation(format!(
                "unknown resource kind: {other}"
            ))),
        }
    }
}

/// Rental period the price and markup are keyed by.
#[derive(Debug, Deserialize, Serialize, PartialEq, Eq, Hash, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum RentalPeriod {
    Day,
    Week,
    Month,
}

impl RentalPeriod {
    pub fn days(&self) -> u32 {
        match self {
            Self::Day => 1,
            Self::Week => 7,
            Self::Month => 30,
        }
    }
}

impl fmt::Display for RentalPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Day => write!(f, "day"),
            Self::Week => write!(f, "week"),
            Self::Month => write!(f, "month"),
        }
    }
}

impl FromStr for RentalPeriod {
    type Err = FulfillmentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "day" => Ok(Self::Day),
            "week" => Ok(Self::Week),
            "month" => Ok(Self::Month),
            other => Err(FulfillmentError::Validation(format!(
                "unknown rental period: {other}"
            ))),
        }
    }
}

/// Two-letter location code understood by the provisioning collaborator.
#[derive(Debug, Deserialize, Serialize, PartialEq, Eq, Hash, Clone)]
#[serde(transparent)]
pub struct LocationCode(pub String);

impl fmt::Display for LocationCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for LocationCode {
    type Err = FulfillmentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(FulfillmentError::Validation(
                "location code must not be empty".to_string(),
            ));
        }
        Ok(Self(s.to_ascii_lowercase()))
    }
}

/// A price computed for a prospective purchase, valid only briefly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub kind: ResourceKind,
    pub location: LocationCode,
    pub period: RentalPeriod,
    pub quantity: u32,
    /// Marked-up price per unit, rounded to cents.
    pub unit_price: Decimal,
    /// `unit_price * quantity`, exact by construction.
    pub total: Decimal,
    pub quoted_at: DateTime<Utc>,
}

impl Quote {
    /// Whether this quote still covers `request` at `now`.
    pub fn covers(&self, request: &PurchaseRequest, now: DateTime<Utc>, ttl: chrono::Duration) -> bool {
        self.kind == request.kind
            && self.location == request.location
            && self.period == request.period
            && self.quantity == request.quantity
            && now - self.quoted_at <= ttl
    }
}

/// What the presentation layer asks the orchestrator to buy.
#[derive(Debug, Clone, PartialEq)]
pub struct PurchaseRequest {
    pub kind: ResourceKind,
    pub location: LocationCode,
    pub period: RentalPeriod,
    pub quantity: u32,
    /// A previously shown quote; reused while still valid.
    pub quote: Option<Quote>,
}

/// Result of placing an order with the provisioning collaborator.
///
/// The upstream is not obligated to return the final resource keys
/// synchronously; `candidate_keys` may be empty and `order_ref` may be
/// absent, which is why credential matching is a ladder, not a lookup.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderResult {
    pub order_ref: Option<String>,
    pub candidate_keys: Vec<String>,
}

/// One provisioned unit as reported by the upstream listing call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceRecord {
    /// The provider-assigned key for this unit; the uniqueness anchor.
    pub external_key: String,
    pub order_ref: Option<String>,
    pub conn: ConnectionInfo,
    pub active_from: Option<DateTime<Utc>>,
    pub active_until: Option<DateTime<Utc>>,
    pub created_at: Option<DateTime<Utc>>,
}
