use std::io::Write;

use crate::domain::claim::Claim;
use crate::error::Result;

/// Writes claim rows as CSV to any `Write` sink (e.g. stdout).
pub struct ClaimWriter<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> ClaimWriter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            writer: csv::WriterBuilder::new().from_writer(sink),
        }
    }

    pub fn write_claims(&mut self, claims: &[Claim]) -> Result<()> {
        self.writer.write_record([
            "public_id",
            "endpoint",
            "socks_port",
            "username",
            "password",
            "status",
            "active_until",
            "purchased_at",
        ])?;

        for claim in claims {
            let endpoint = claim.conn.endpoint();
            let socks = claim
                .conn
                .socks_port
                .map(|p| p.to_string())
                .unwrap_or_default();
            let status = claim.status.to_string();
            let until = claim
                .active_until
                .map(|t| t.to_rfc3339())
                .unwrap_or_default();
            let purchased = claim.purchased_at.to_rfc3339();
            self.writer.write_record([
                claim.public_id.0.as_str(),
                endpoint.as_str(),
                socks.as_str(),
                claim.conn.username.as_str(),
                claim.conn.password.as_str(),
                status.as_str(),
                until.as_str(),
                purchased.as_str(),
            ])?;
        }
        self.writer.flush()?;
        Ok(())
    }
}
