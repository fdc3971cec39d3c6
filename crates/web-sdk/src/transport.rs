//! Delivery transport: ships serialized batches to the collector endpoint.
//!
//! Sends are fire-and-forget: the pipeline never awaits or inspects the
//! response. Transport-level failures are logged and counted, not retried.
//! In-flight sends are tracked so teardown can wait for them instead of
//! letting the host runtime abort them.

use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::Url;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};
use trackline_core::{TrackerError, TrackerResult};

/// Transmission primitive chosen for a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryMode {
    /// Standard request on a pooled keep-alive connection.
    KeepAlive,
    /// Non-blocking, unload-safe send; preferred while the page is hidden.
    Beacon,
}

impl DeliveryMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryMode::KeepAlive => "keepalive",
            DeliveryMode::Beacon => "beacon",
        }
    }
}

/// Outbound channel to the collector.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Whether an unload-safe beacon-style primitive is available.
    fn supports_beacon(&self) -> bool {
        false
    }

    /// Start sending `payload`. Must not block on the network.
    fn send(&self, payload: serde_json::Value, mode: DeliveryMode);

    /// Wait, up to `deadline`, for sends still in flight. Called once while
    /// the host tears the pipeline down.
    async fn drain(&self, _deadline: Duration) {}
}

/// HTTP transport posting JSON to the collector endpoint.
///
/// Every send runs as its own task, tracked until it finishes so a host can
/// wait for it with [`Transport::drain`] while tearing down.
pub struct HttpTransport {
    client: reqwest::Client,
    endpoint: Url,
    beacon: bool,
    in_flight: Mutex<Vec<JoinHandle<()>>>,
}

impl HttpTransport {
    pub fn new(endpoint: Url, timeout: Duration, beacon: bool) -> TrackerResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .tcp_keepalive(Duration::from_secs(60))
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .map_err(|e| TrackerError::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint,
            beacon,
            in_flight: Mutex::new(Vec::new()),
        })
    }

    /// Number of sends not yet finished.
    pub fn pending(&self) -> usize {
        let mut in_flight = self.in_flight.lock();
        in_flight.retain(|h| !h.is_finished());
        in_flight.len()
    }
}

#[async_trait]
impl Transport for HttpTransport {
    fn supports_beacon(&self) -> bool {
        self.beacon
    }

    fn send(&self, payload: serde_json::Value, mode: DeliveryMode) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            metrics::counter!("tracker.delivery.failed").increment(1);
            error!("no async runtime available, batch dropped");
            return;
        };

        let request = self.client.post(self.endpoint.clone()).json(&payload);
        let endpoint = self.endpoint.clone();
        let handle = runtime.spawn(async move {
            match request.send().await {
                Ok(resp) if resp.status().is_success() => {
                    metrics::counter!("tracker.delivery.sent").increment(1);
                    debug!(status = %resp.status(), mode = mode.as_str(), "batch delivered");
                }
                Ok(resp) => {
                    metrics::counter!("tracker.delivery.failed").increment(1);
                    warn!(
                        status = %resp.status(),
                        endpoint = %endpoint,
                        mode = mode.as_str(),
                        "collector rejected batch"
                    );
                }
                Err(e) => {
                    metrics::counter!("tracker.delivery.failed").increment(1);
                    warn!(error = %e, endpoint = %endpoint, mode = mode.as_str(), "send failed");
                }
            }
        });

        let mut in_flight = self.in_flight.lock();
        in_flight.retain(|h| !h.is_finished());
        in_flight.push(handle);
    }

    async fn drain(&self, deadline: Duration) {
        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.in_flight.lock());
        if handles.is_empty() {
            return;
        }
        let count = handles.len();
        let wait = async {
            for handle in handles {
                if let Err(e) = handle.await {
                    warn!(error = %e, "send task failed");
                }
            }
        };
        if tokio::time::timeout(deadline, wait).await.is_err() {
            warn!(count, ?deadline, "gave up waiting for in-flight sends");
        } else {
            debug!(count, "in-flight sends drained");
        }
    }
}

/// In-memory transport that records every payload, for tests and dry runs.
#[derive(Default)]
pub struct CaptureTransport {
    beacon: bool,
    sent: Mutex<Vec<(serde_json::Value, DeliveryMode)>>,
}

impl CaptureTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_beacon(mut self, beacon: bool) -> Self {
        self.beacon = beacon;
        self
    }

    pub fn payloads(&self) -> Vec<serde_json::Value> {
        self.sent.lock().iter().map(|(p, _)| p.clone()).collect()
    }

    pub fn modes(&self) -> Vec<DeliveryMode> {
        self.sent.lock().iter().map(|(_, m)| *m).collect()
    }

    pub fn count(&self) -> usize {
        self.sent.lock().len()
    }
}

#[async_trait]
impl Transport for CaptureTransport {
    fn supports_beacon(&self) -> bool {
        self.beacon
    }

    fn send(&self, payload: serde_json::Value, mode: DeliveryMode) {
        self.sent.lock().push((payload, mode));
    }
}
