//! Payload formats for the ingestion endpoint.
//!
//! Each deployment variant expects a slightly different wire schema. A format
//! implements [`PayloadFormat`] to turn a session plus a batch of [`Event`]s
//! into the JSON body posted to the collector; the transport never branches
//! on the schema.

pub mod generic;
pub mod movements;

pub use generic::GenericFormat;
pub use movements::MovementsFormat;

use anyhow::Result;
use trackline_core::{Event, PayloadFormatKind, Session};

/// Strategy turning a batch into the collector's JSON body.
pub trait PayloadFormat: Send + Sync {
    /// Format identifier (e.g. "generic", "movements").
    fn name(&self) -> &str;

    /// Build the request body. `Ok(None)` means the batch carries nothing this
    /// format ships, and no request should be made.
    fn build(&self, ctx: &BatchContext<'_>, events: &[Event]) -> Result<Option<serde_json::Value>>;
}

/// Everything about a flush that is not the events themselves.
#[derive(Debug, Clone, Copy)]
pub struct BatchContext<'a> {
    pub session: &'a Session,
    /// Page the host is showing when the batch leaves.
    pub page_url: &'a str,
    pub user_agent: &'a str,
    pub sent_at_ms: i64,
}

/// Select the format configured for this deployment.
pub fn for_kind(kind: PayloadFormatKind) -> Box<dyn PayloadFormat> {
    match kind {
        PayloadFormatKind::Generic => Box::new(GenericFormat),
        PayloadFormatKind::Movements => Box::new(MovementsFormat),
    }
}
