use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::domain::account::UserId;

/// Issuer-assigned public identifier shown to the user, e.g. `PRX-000042`.
///
/// Unique and immutable once assigned to a claim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PublicId(pub String);

impl fmt::Display for PublicId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum ClaimStatus {
    Active,
    Expired,
    Cancelled,
}

impl fmt::Display for ClaimStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Expired => write!(f, "expired"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Connection attributes of one provisioned unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionInfo {
    pub host: String,
    pub port: u16,
    pub socks_port: Option<u16>,
    pub username: String,
    pub password: String,
}

impl ConnectionInfo {
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// A durable record binding one externally provisioned resource unit to
/// exactly one user.
///
/// The `external_key` is the sole mechanism preventing two users from
/// owning the same unit: the store enforces its uniqueness, not callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claim {
    /// Internal sequential identifier assigned by the store.
    pub id: u64,
    pub public_id: PublicId,
    /// Provider-assigned key. Nullable only before the provider assigns
    /// one; unique across all claims once set.
    pub external_key: Option<String>,
    pub user_id: UserId,
    pub order_ref: Option<String>,
    pub conn: ConnectionInfo,
    pub active_from: Option<DateTime<Utc>>,
    pub active_until: Option<DateTime<Utc>>,
    pub status: ClaimStatus,
    pub created_at: DateTime<Utc>,
    pub purchased_at: DateTime<Utc>,
}

impl Claim {
    /// Whether the validity window has passed at `now`.
    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        matches!(self.status, ClaimStatus::Active)
            && self.active_until.is_some_and(|until| until < now)
    }
}

/// Input to `ClaimStore::try_claim`; the store assigns `id`, `created_at`
/// and the `Active` status.
#[derive(Debug, Clone, PartialEq)]
pub struct NewClaim {
    pub user_id: UserId,
    pub public_id: PublicId,
    pub external_key: String,
    pub order_ref: Option<String>,
    pub conn: ConnectionInfo,
    pub active_from: Option<DateTime<Utc>>,
    pub active_until: Option<DateTime<Utc>>,
    pub purchased_at: DateTime<Utc>,
}

/// Outcome of a claim attempt. A conflicting insert is not an error: it
/// means someone already owns the key, and the caller skips to another
/// candidate (or, when the owner is the caller, is already satisfied).
#[derive(Debug, Clone, PartialEq)]
pub enum ClaimOutcome {
    Claimed(Claim),
    AlreadyClaimed { owner: UserId },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn claim(until: Option<DateTime<Utc>>, status: ClaimStatus) -> Claim {
        Claim {
            id: 1,
            public_id: PublicId("PRX-000001".to_string()),
            external_key: Some("k1".to_string()),
            user_id: 7,
            order_ref: None,
            conn: ConnectionInfo {
                host: "198.51.100.4".to_string(),
                port: 8080,
                socks_port: Some(1080),
                username: "u".to_string(),
                password: "p".to_string(),
            },
            active_from: None,
            active_until: until,
            status,
            created_at: Utc::now(),
            purchased_at: Utc::now(),
        }
    }

    #[test]
    fn test_overdue_requires_past_window() {
        let now = Utc::now();
        let past = claim(Some(now - chrono::Duration::hours(1)), ClaimStatus::Active);
        let future = claim(Some(now + chrono::Duration::hours(1)), ClaimStatus::Active);
        let open_ended = claim(None, ClaimStatus::Active);

        assert!(past.is_overdue(now));
        assert!(!future.is_overdue(now));
        assert!(!open_ended.is_overdue(now));
    }

    #[test]
    fn test_overdue_ignores_terminal_status() {
        let now = Utc::now();
        let cancelled = claim(Some(now - chrono::Duration::hours(1)), ClaimStatus::Cancelled);
        assert!(!cancelled.is_overdue(now));
    }
}
