use rust_decimal::Decimal;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, FulfillmentError>;

/// Errors surfaced by the fulfillment core.
///
/// Losing a claim race is deliberately absent: it is not an error but a
/// `ClaimOutcome` the purchase flow handles by skipping to the next
/// candidate.
#[derive(Error, Debug)]
pub enum FulfillmentError {
    #[error("insufficient funds: need {needed}, available {available}")]
    InsufficientFunds { needed: Decimal, available: Decimal },
    #[error("provisioning service returned no usable price")]
    PriceUnavailable,
    #[error("provisioning order failed: {0}")]
    ProvisioningFailed(String),
    #[error("no matching credentials after {attempts} attempts")]
    CredentialsNotFound { attempts: u32 },
    #[error("payment status lookup failed: {0}")]
    PaymentLookupFailed(String),
    #[error("deposit invoice expired before payment")]
    InvoiceExpired,
    #[error("identifier counter unavailable")]
    CounterUnavailable,
    #[error("storage error: {0}")]
    Storage(String),
    #[error("validation error: {0}")]
    Validation(String),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Maps an adapter-level failure into the storage bucket.
pub fn storage_err(err: impl std::fmt::Display) -> FulfillmentError {
    FulfillmentError::Storage(err.to_string())
}
