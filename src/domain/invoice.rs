use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::account::{Amount, UserId};

/// Status reported by the payment collaborator for one invoice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvoiceStatus {
    Pending,
    Paid { paid_at: Option<DateTime<Utc>> },
    Expired,
}

/// Session-scoped deposit invoice state.
///
/// Lives only in the `DepositService` map while the watcher runs; it is
/// reconciled against the ledger on terminal state and then dropped.
#[derive(Debug, Clone, PartialEq)]
pub struct DepositInvoice {
    pub invoice_id: String,
    pub user_id: UserId,
    pub amount: Amount,
    pub pay_url: String,
    pub created_at: DateTime<Utc>,
}

/// Invoice handle returned by `PaymentApi::create_invoice`.
#[derive(Debug, Clone, PartialEq)]
pub struct CreatedInvoice {
    pub invoice_id: String,
    pub pay_url: String,
}

/// What `start_deposit` hands back to the presentation layer.
#[derive(Debug, Clone, PartialEq)]
pub struct StartedDeposit {
    pub invoice_id: String,
    pub pay_url: String,
}
