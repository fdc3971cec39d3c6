//! Consent gate: decides whether capture may run.
//!
//! The remote consent service is the source of truth; the locally cached
//! decision is consulted only when the service says no or cannot be reached.
//! When neither allows capture, the gate opens the prompt surface, at most
//! once at a time.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};
use trackline_core::{ConsentState, TrackerError, TrackerResult};

use crate::prompt::{PromptChoice, PromptSurface};
use crate::store::KeyValueStore;

/// Remote authority on whether an identity has consented.
#[async_trait]
pub trait ConsentService: Send + Sync {
    /// `Ok(true)` only for an explicit affirmative answer.
    async fn check(&self, identity: &str) -> TrackerResult<bool>;
}

#[derive(Debug, Serialize)]
struct ConsentRequest<'a> {
    email: &'a str,
}

#[derive(Debug, Deserialize)]
struct ConsentResponse {
    allowed: bool,
}

/// `POST <base>/check-consent` with `{ email }`, expecting `{ allowed: bool }`.
pub struct HttpConsentService {
    client: reqwest::Client,
    url: Url,
}

impl HttpConsentService {
    pub fn new(url: Url, timeout: Duration) -> TrackerResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TrackerError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, url })
    }
}

#[async_trait]
impl ConsentService for HttpConsentService {
    async fn check(&self, identity: &str) -> TrackerResult<bool> {
        let resp = self
            .client
            .post(self.url.clone())
            .json(&ConsentRequest { email: identity })
            .send()
            .await
            .map_err(|e| TrackerError::RemoteUnavailable(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(TrackerError::RemoteStatus {
                status: status.as_u16(),
            });
        }

        let body = resp
            .bytes()
            .await
            .map_err(|e| TrackerError::RemoteUnavailable(e.to_string()))?;
        let parsed: ConsentResponse = serde_json::from_slice(&body)
            .map_err(|e| TrackerError::MalformedResponse(e.to_string()))?;
        Ok(parsed.allowed)
    }
}

/// Consent service with a canned answer, for tests and offline hosts.
pub struct FixedConsent {
    allowed: Option<bool>,
    latency: Duration,
}

impl FixedConsent {
    pub fn allowing() -> Self {
        Self {
            allowed: Some(true),
            latency: Duration::ZERO,
        }
    }

    pub fn denying() -> Self {
        Self {
            allowed: Some(false),
            latency: Duration::ZERO,
        }
    }

    /// Every check fails as if the service were unreachable.
    pub fn unreachable() -> Self {
        Self {
            allowed: None,
            latency: Duration::ZERO,
        }
    }

    /// Suspend each check for `latency` before answering.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }
}

#[async_trait]
impl ConsentService for FixedConsent {
    async fn check(&self, _identity: &str) -> TrackerResult<bool> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        self.allowed
            .ok_or_else(|| TrackerError::RemoteUnavailable("consent service offline".into()))
    }
}

/// Pending answer to a prompt opened by [`ConsentGate::decide`].
#[derive(Debug)]
pub struct PendingChoice(oneshot::Receiver<PromptChoice>);

/// Outcome of [`ConsentGate::decide`].
#[derive(Debug)]
pub enum Decision {
    /// Capture may start.
    Proceed,
    /// Capture must not start this page lifetime.
    Stop,
    /// The user is being asked. `None` when a prompt was already on screen
    /// and this call left it alone.
    Prompt(Option<PendingChoice>),
}

impl Decision {
    pub fn is_proceed(&self) -> bool {
        matches!(self, Decision::Proceed)
    }
}

pub struct ConsentGate {
    service: Arc<dyn ConsentService>,
    store: Arc<dyn KeyValueStore>,
    prompt: Arc<dyn PromptSurface>,
    identity: Option<String>,
    key: String,
    /// Decision for the current page lifetime.
    state: Mutex<ConsentState>,
}

impl ConsentGate {
    pub fn new(
        service: Arc<dyn ConsentService>,
        store: Arc<dyn KeyValueStore>,
        prompt: Arc<dyn PromptSurface>,
        identity: Option<String>,
        key: impl Into<String>,
    ) -> Self {
        Self {
            service,
            store,
            prompt,
            identity,
            key: key.into(),
            state: Mutex::new(ConsentState::Unknown),
        }
    }

    pub fn state(&self) -> ConsentState {
        *self.state.lock()
    }

    /// Locally cached decision from a previous load.
    pub fn cached(&self) -> ConsentState {
        ConsentState::from_stored(self.store.get(&self.key).as_deref())
    }

    /// Decide whether capture may start.
    ///
    /// Once a decision exists for this page lifetime it is returned without
    /// another remote query.
    pub async fn decide(&self) -> Decision {
        if let Some(settled) = self.settled() {
            return settled;
        }

        let remote = match self.identity.as_deref() {
            Some(identity) => {
                debug!(identity, "checking consent with remote service");
                self.service.check(identity).await
            }
            None => Err(TrackerError::RemoteUnavailable(
                "no identity to query consent for".into(),
            )),
        };

        // The user may have answered a prompt while the query was in flight.
        if let Some(settled) = self.settled() {
            debug!("consent settled during remote check");
            return settled;
        }

        match remote {
            Ok(true) => {
                info!("consent verified by remote service");
                self.settle(ConsentState::Accepted)
            }
            Ok(false) => {
                if self.cached() == ConsentState::Declined {
                    info!("consent previously declined on this device");
                    self.settle(ConsentState::Declined)
                } else {
                    self.present()
                }
            }
            Err(e) => {
                metrics::counter!("tracker.consent.fallback").increment(1);
                warn!(error = %e, "consent service unavailable, falling back to local decision");
                if self.cached() == ConsentState::Accepted {
                    self.settle(ConsentState::Accepted)
                } else {
                    self.present()
                }
            }
        }
    }

    /// Wait for the user to answer a prompt opened by [`ConsentGate::decide`].
    pub async fn resolve(&self, pending: PendingChoice) -> Decision {
        match pending.0.await {
            Ok(choice) => self.respond(choice),
            Err(_) => {
                debug!("consent prompt dismissed without an answer");
                self.prompt.close();
                Decision::Stop
            }
        }
    }

    /// Apply the user's answer: persist it, dismiss the prompt, and settle the
    /// decision for the rest of the page lifetime.
    pub fn respond(&self, choice: PromptChoice) -> Decision {
        self.prompt.close();

        if let Some(settled) = self.settled() {
            debug!(?choice, "consent already settled, answer ignored");
            return settled;
        }

        let state = match choice {
            PromptChoice::Accept => ConsentState::Accepted,
            PromptChoice::Decline => ConsentState::Declined,
        };
        if let Some(value) = state.as_stored() {
            if let Err(e) = self.store.set(&self.key, value) {
                warn!(error = %e, "failed to persist consent decision");
            }
        }
        info!(?state, "consent answered by user");
        self.settle(state)
    }

    /// The page-lifetime decision, once there is one.
    fn settled(&self) -> Option<Decision> {
        decision_for(self.state())
    }

    /// Record `state` unless a decision already exists; returns whichever
    /// decision holds afterwards.
    fn settle(&self, state: ConsentState) -> Decision {
        let mut current = self.state.lock();
        if !current.is_decided() {
            *current = state;
        }
        decision_for(*current).unwrap_or(Decision::Stop)
    }

    fn present(&self) -> Decision {
        // Check-and-open under the state lock so concurrent deciders cannot
        // both open the surface, nor open it after the user has answered.
        let state = self.state.lock();
        if let Some(settled) = decision_for(*state) {
            debug!("consent settled, prompt not shown");
            return settled;
        }
        if self.prompt.is_open() {
            debug!("consent prompt already open");
            return Decision::Prompt(None);
        }
        info!("asking user for consent");
        Decision::Prompt(Some(PendingChoice(self.prompt.open())))
    }
}

fn decision_for(state: ConsentState) -> Option<Decision> {
    match state {
        ConsentState::Accepted => Some(Decision::Proceed),
        ConsentState::Declined => Some(Decision::Stop),
        ConsentState::Unknown => None,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::prompt::ScriptedPrompt;
    use crate::store::MemoryStore;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const KEY: &str = "analytics_consent";

    fn gate(
        service: FixedConsent,
        store: MemoryStore,
        prompt: Arc<ScriptedPrompt>,
    ) -> (ConsentGate, Arc<MemoryStore>) {
        let store = Arc::new(store);
        let gate = ConsentGate::new(
            Arc::new(service),
            store.clone(),
            prompt,
            Some("user@test.com".into()),
            KEY,
        );
        (gate, store)
    }

    #[tokio::test]
    async fn test_remote_yes_skips_cache_and_prompt() {
        let prompt = Arc::new(ScriptedPrompt::new());
        let (gate, _) = gate(
            FixedConsent::allowing(),
            MemoryStore::new().with_entry(KEY, "declined"),
            prompt.clone(),
        );

        assert!(gate.decide().await.is_proceed());
        assert_eq!(prompt.times_opened(), 0);
        assert_eq!(gate.state(), ConsentState::Accepted);
    }

    #[tokio::test]
    async fn test_remote_no_with_local_decline_stops() {
        let prompt = Arc::new(ScriptedPrompt::new());
        let (gate, _) = gate(
            FixedConsent::denying(),
            MemoryStore::new().with_entry(KEY, "declined"),
            prompt.clone(),
        );

        assert!(matches!(gate.decide().await, Decision::Stop));
        assert_eq!(prompt.times_opened(), 0);
    }

    #[tokio::test]
    async fn test_remote_no_without_decline_prompts() {
        let prompt = Arc::new(ScriptedPrompt::new());
        let (gate, _) = gate(
            FixedConsent::denying(),
            MemoryStore::new().with_entry(KEY, "accepted"),
            prompt.clone(),
        );

        assert!(matches!(gate.decide().await, Decision::Prompt(Some(_))));
        assert_eq!(prompt.times_opened(), 1);
    }

    #[tokio::test]
    async fn test_offline_with_cached_accept_proceeds() {
        let prompt = Arc::new(ScriptedPrompt::new());
        let (gate, _) = gate(
            FixedConsent::unreachable(),
            MemoryStore::new().with_entry(KEY, "accepted"),
            prompt.clone(),
        );

        assert!(gate.decide().await.is_proceed());
        assert_eq!(prompt.times_opened(), 0);
    }

    #[tokio::test]
    async fn test_offline_prompts_once_for_concurrent_decides() {
        let prompt = Arc::new(ScriptedPrompt::new());
        let (gate, _) = gate(
            FixedConsent::unreachable(),
            MemoryStore::new().with_entry(KEY, "declined"),
            prompt.clone(),
        );

        let (a, b) = tokio::join!(gate.decide(), gate.decide());
        let opened = [&a, &b]
            .iter()
            .filter(|d| matches!(d, Decision::Prompt(Some(_))))
            .count();
        let suppressed = [&a, &b]
            .iter()
            .filter(|d| matches!(d, Decision::Prompt(None)))
            .count();

        assert_eq!(opened, 1);
        assert_eq!(suppressed, 1);
        assert_eq!(prompt.times_opened(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_decline_during_pending_check_suppresses_second_prompt() {
        let prompt = Arc::new(ScriptedPrompt::new());
        let (gate, store) = gate(
            FixedConsent::unreachable().with_latency(Duration::from_millis(100)),
            MemoryStore::new(),
            prompt.clone(),
        );

        let first = async {
            let Decision::Prompt(Some(pending)) = gate.decide().await else {
                panic!("expected prompt");
            };
            tokio::time::sleep(Duration::from_millis(20)).await;
            assert!(prompt.respond(PromptChoice::Decline));
            gate.resolve(pending).await
        };
        let second = async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            gate.decide().await
        };

        let (first, second) = tokio::join!(first, second);
        assert!(matches!(first, Decision::Stop));
        assert!(matches!(second, Decision::Stop));
        assert_eq!(prompt.times_opened(), 1);
        assert!(!prompt.is_open());
        assert_eq!(store.get(KEY).as_deref(), Some("declined"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_remote_yes_cannot_override_decline() {
        let prompt = Arc::new(ScriptedPrompt::new());
        let (gate, _) = gate(
            FixedConsent::allowing().with_latency(Duration::from_millis(100)),
            MemoryStore::new(),
            prompt.clone(),
        );

        let check = gate.decide();
        let answer = async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            gate.respond(PromptChoice::Decline)
        };

        let (decision, answered) = tokio::join!(check, answer);
        assert!(matches!(answered, Decision::Stop));
        assert!(matches!(decision, Decision::Stop));
        assert_eq!(gate.state(), ConsentState::Declined);
    }

    #[tokio::test]
    async fn test_accept_persists_and_proceeds() {
        let prompt = Arc::new(ScriptedPrompt::new());
        let (gate, store) = gate(FixedConsent::unreachable(), MemoryStore::new(), prompt.clone());

        let Decision::Prompt(Some(pending)) = gate.decide().await else {
            panic!("expected prompt");
        };
        assert!(prompt.respond(PromptChoice::Accept));

        assert!(gate.resolve(pending).await.is_proceed());
        assert_eq!(store.get(KEY).as_deref(), Some("accepted"));
        assert!(!prompt.is_open());
    }

    #[tokio::test]
    async fn test_decline_is_terminal_for_page_lifetime() {
        let prompt = Arc::new(ScriptedPrompt::answering(PromptChoice::Decline));
        let (gate, store) = gate(FixedConsent::denying(), MemoryStore::new(), prompt.clone());

        let Decision::Prompt(Some(pending)) = gate.decide().await else {
            panic!("expected prompt");
        };
        assert!(matches!(gate.resolve(pending).await, Decision::Stop));
        assert_eq!(store.get(KEY).as_deref(), Some("declined"));

        // Settled: no second prompt, and a late accept does not overturn it.
        assert!(matches!(gate.decide().await, Decision::Stop));
        assert!(!gate.respond(PromptChoice::Accept).is_proceed());
        assert_eq!(store.get(KEY).as_deref(), Some("declined"));
        assert_eq!(prompt.times_opened(), 1);
    }

    #[tokio::test]
    async fn test_dismissed_prompt_stops_without_persisting() {
        let prompt = Arc::new(ScriptedPrompt::new());
        let (gate, store) = gate(FixedConsent::denying(), MemoryStore::new(), prompt.clone());

        let Decision::Prompt(Some(pending)) = gate.decide().await else {
            panic!("expected prompt");
        };
        prompt.close();
        assert!(matches!(gate.resolve(pending).await, Decision::Stop));
        assert_eq!(store.get(KEY), None);
        assert_eq!(gate.state(), ConsentState::Unknown);
    }

    #[tokio::test]
    async fn test_anonymous_falls_back_to_cache() {
        let store = Arc::new(MemoryStore::new().with_entry(KEY, "accepted"));
        let gate = ConsentGate::new(
            Arc::new(FixedConsent::denying()),
            store,
            Arc::new(ScriptedPrompt::new()),
            None,
            KEY,
        );
        assert!(gate.decide().await.is_proceed());
    }

    #[tokio::test]
    async fn test_http_consent_service() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/check-consent"))
            .and(body_json(serde_json::json!({"email": "user@test.com"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"allowed": true})))
            .mount(&server)
            .await;

        let url = Url::parse(&format!("{}/check-consent", server.uri())).unwrap();
        let service = HttpConsentService::new(url, Duration::from_secs(5)).unwrap();
        assert!(service.check("user@test.com").await.unwrap());
    }

    #[tokio::test]
    async fn test_http_consent_rejects_bad_shape_and_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/shape/check-consent"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"allowed": "yes"})))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/status/check-consent"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let shape = HttpConsentService::new(
            Url::parse(&format!("{}/shape/check-consent", server.uri())).unwrap(),
            Duration::from_secs(5),
        )
        .unwrap();
        assert!(matches!(
            shape.check("user@test.com").await,
            Err(TrackerError::MalformedResponse(_))
        ));

        let status = HttpConsentService::new(
            Url::parse(&format!("{}/status/check-consent", server.uri())).unwrap(),
            Duration::from_secs(5),
        )
        .unwrap();
        assert!(matches!(
            status.check("user@test.com").await,
            Err(TrackerError::RemoteStatus { status: 500 })
        ));
    }
}
