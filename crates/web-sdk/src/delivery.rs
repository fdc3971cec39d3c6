//! Delivery: serializes a flushed batch with the configured payload format
//! and picks the transmission mode for the transport.

use std::sync::Arc;

use tracing::{debug, error};
use trackline_core::config::default_user_agent;
use trackline_core::{Event, Session, TrackerError};

use crate::clock::{Clock, SystemClock};
use crate::format::{BatchContext, PayloadFormat};
use crate::transport::{DeliveryMode, Transport};

pub struct Delivery {
    format: Box<dyn PayloadFormat>,
    transport: Arc<dyn Transport>,
    clock: Arc<dyn Clock>,
    beacon_on_hide: bool,
    user_agent: String,
}

impl Delivery {
    pub fn new(
        format: Box<dyn PayloadFormat>,
        transport: Arc<dyn Transport>,
        beacon_on_hide: bool,
    ) -> Self {
        Self {
            format,
            transport,
            clock: Arc::new(SystemClock),
            beacon_on_hide,
            user_agent: default_user_agent(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Beacon while the page is hidden or unloading, if the transport has
    /// one; keep-alive otherwise.
    pub fn select_mode(&self, unloading: bool) -> DeliveryMode {
        if unloading && self.beacon_on_hide && self.transport.supports_beacon() {
            DeliveryMode::Beacon
        } else {
            DeliveryMode::KeepAlive
        }
    }

    /// Fire-and-forget. Serialization failures drop the batch.
    pub fn send(&self, session: &Session, page_url: &str, batch: Vec<Event>, unloading: bool) {
        let count = batch.len();
        let ctx = BatchContext {
            session,
            page_url,
            user_agent: &self.user_agent,
            sent_at_ms: self.clock.now_ms(),
        };
        let payload = match self.format.build(&ctx, &batch) {
            Ok(Some(payload)) => payload,
            Ok(None) => {
                debug!(format = self.format.name(), count, "batch produced no payload");
                return;
            }
            Err(e) => {
                let e = TrackerError::from(e);
                metrics::counter!("tracker.delivery.failed").increment(1);
                error!(error = %e, format = self.format.name(), count, "failed to serialize batch, dropped");
                return;
            }
        };

        let mode = self.select_mode(unloading);
        debug!(
            session_id = %session.session_id,
            count,
            mode = mode.as_str(),
            format = self.format.name(),
            "sending batch"
        );
        self.transport.send(payload, mode);
    }

    pub fn format_name(&self) -> &str {
        self.format.name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::format::{GenericFormat, MovementsFormat};
    use crate::transport::CaptureTransport;
    use trackline_core::EventKind;

    fn session() -> Session {
        Session {
            session_id: "sess_d".into(),
            identity: None,
        }
    }

    #[test]
    fn test_mode_selection() {
        let beacon = Arc::new(CaptureTransport::new().with_beacon(true));
        let delivery = Delivery::new(Box::new(GenericFormat), beacon, true);
        assert_eq!(delivery.select_mode(false), DeliveryMode::KeepAlive);
        assert_eq!(delivery.select_mode(true), DeliveryMode::Beacon);

        let plain = Arc::new(CaptureTransport::new());
        let delivery = Delivery::new(Box::new(GenericFormat), plain, true);
        assert_eq!(delivery.select_mode(true), DeliveryMode::KeepAlive);

        let beacon = Arc::new(CaptureTransport::new().with_beacon(true));
        let delivery = Delivery::new(Box::new(GenericFormat), beacon, false);
        assert_eq!(delivery.select_mode(true), DeliveryMode::KeepAlive);
    }

    #[test]
    fn test_send_fills_envelope() {
        let transport = Arc::new(CaptureTransport::new());
        let delivery = Delivery::new(Box::new(GenericFormat), transport.clone(), true)
            .with_clock(Arc::new(ManualClock::new(42_000)))
            .with_user_agent("Mozilla/5.0 (X11; Linux x86_64)");
        assert_eq!(delivery.format_name(), "generic");

        delivery.send(
            &session(),
            "https://example.com/cart",
            vec![Event::new(EventKind::Click, 41_000, "/")],
            false,
        );
        assert_eq!(transport.count(), 1);
        let payload = &transport.payloads()[0];
        assert_eq!(payload["timestamp"], 42_000);
        assert_eq!(payload["url"], "https://example.com/cart");
        assert_eq!(payload["user_agent"], "Mozilla/5.0 (X11; Linux x86_64)");
    }

    #[test]
    fn test_empty_payload_skips_transport() {
        let transport = Arc::new(CaptureTransport::new());
        let delivery = Delivery::new(Box::new(MovementsFormat), transport.clone(), true);
        delivery.send(&session(), "/", vec![Event::new(EventKind::Click, 1, "/")], false);
        assert_eq!(transport.count(), 0);
    }
}
