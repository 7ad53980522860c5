use tracing::error;

use crate::config::IssuerConfig;
use crate::domain::claim::PublicId;
use crate::domain::ports::CounterStoreBox;
use crate::error::{FulfillmentError, Result};

/// Issues the public identifiers stamped on claims: a fixed prefix plus a
/// zero-padded monotonic counter, e.g. `PRX-000042`.
///
/// The counter source is durable and gap-tolerant: aborted purchases may
/// burn a number, but two calls never observe the same one. Counter
/// unavailability is a hard failure — an identifier minted from anything
/// weaker (timestamps, randomness) can collide and silently break the
/// uniqueness invariant.
pub struct IdentifierIssuer {
    config: IssuerConfig,
    counter: CounterStoreBox,
}

impl IdentifierIssuer {
    pub fn new(config: IssuerConfig, counter: CounterStoreBox) -> Self {
        Self { config, counter }
    }

    pub async fn next(&self) -> Result<PublicId> {
        let n = self.counter.next().await.map_err(|e| {
            error!(error = %e, "identifier counter unavailable");
            FulfillmentError::CounterUnavailable
        })?;
        Ok(PublicId(format!(
            "{}{:0width$}",
            self.config.prefix,
            n,
            width = self.config.pad_width
        )))
    }
}
