//! Tracker: wires consent, session identity, capture bindings, batching and
//! delivery into one pipeline driven from a single task.
//!
//! All mutable pipeline state lives in [`PipelineState`], owned by the
//! [`Tracker`]. The only suspension points are the consent query and the
//! teardown drain; every enqueue and flush runs synchronously between them,
//! so a flush's snapshot-and-clear cannot interleave with an enqueue.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info};
use trackline_core::{Session, TrackerConfig, TrackerResult};

use crate::bindings::{Capture, CaptureBindings};
use crate::clock::{Clock, SystemClock};
use crate::consent::{ConsentGate, ConsentService, Decision, HttpConsentService};
use crate::delivery::Delivery;
use crate::format;
use crate::prompt::PromptSurface;
use crate::queue::{Batcher, FlushTrigger};
use crate::session::SessionManager;
use crate::source::{RawUiEvent, UiEventSource};
use crate::store::KeyValueStore;
use crate::transport::{HttpTransport, Transport};

/// How long teardown waits for sends still in flight.
const DRAIN_DEADLINE: Duration = Duration::from_secs(2);

/// Everything mutable in the pipeline.
pub struct PipelineState {
    pub session: Option<Session>,
    pub active: bool,
    pub batcher: Batcher,
    pub bindings: CaptureBindings,
}

impl PipelineState {
    pub fn init(config: &TrackerConfig, delivery: Delivery) -> Self {
        Self {
            session: None,
            active: false,
            batcher: Batcher::new(config.batch_size, delivery),
            bindings: CaptureBindings::new(config),
        }
    }

    /// Return to the pre-capture state, discarding anything queued.
    pub fn reset(&mut self) {
        self.session = None;
        self.active = false;
        self.batcher.reset();
        self.bindings.reset_page_view();
    }
}

/// External collaborators of the pipeline.
pub struct TrackerDeps {
    pub clock: Arc<dyn Clock>,
    pub store: Arc<dyn KeyValueStore>,
    pub consent: Arc<dyn ConsentService>,
    pub prompt: Arc<dyn PromptSurface>,
    pub transport: Arc<dyn Transport>,
}

pub struct Tracker {
    config: TrackerConfig,
    clock: Arc<dyn Clock>,
    store: Arc<dyn KeyValueStore>,
    transport: Arc<dyn Transport>,
    gate: ConsentGate,
    sessions: SessionManager,
    state: PipelineState,
}

impl Tracker {
    pub fn new(config: TrackerConfig, deps: TrackerDeps) -> Self {
        let delivery = Delivery::new(
            format::for_kind(config.payload_format),
            deps.transport.clone(),
            config.beacon_on_hide,
        )
        .with_clock(deps.clock.clone())
        .with_user_agent(config.user_agent.clone());

        let gate = ConsentGate::new(
            deps.consent,
            deps.store.clone(),
            deps.prompt,
            config.identity.clone(),
            config.consent_key(),
        );

        Self {
            sessions: SessionManager::new(config.session_key()),
            state: PipelineState::init(&config, delivery),
            clock: deps.clock,
            store: deps.store,
            transport: deps.transport,
            gate,
            config,
        }
    }

    /// Tracker talking HTTP to the endpoints named in `config`.
    pub fn from_config(
        config: TrackerConfig,
        store: Arc<dyn KeyValueStore>,
        prompt: Arc<dyn PromptSurface>,
    ) -> TrackerResult<Self> {
        let consent = HttpConsentService::new(
            config.consent_url()?,
            Duration::from_millis(config.consent_timeout_ms),
        )?;
        let transport = HttpTransport::new(
            config.collector_url()?,
            Duration::from_millis(config.delivery_timeout_ms),
            config.beacon_on_hide,
        )?;

        Ok(Self::new(
            config,
            TrackerDeps {
                clock: Arc::new(SystemClock),
                store,
                consent: Arc::new(consent),
                prompt,
                transport: Arc::new(transport),
            },
        ))
    }

    /// Run the consent gate and, on approval, attach capture bindings to
    /// `source` and record the page view.
    ///
    /// Returns the stream of raw UI events to feed to [`Tracker::run`], or
    /// `None` when capture must not run (declined, prompt unanswered, or
    /// already started).
    pub async fn start<S: UiEventSource + ?Sized>(
        &mut self,
        source: &mut S,
    ) -> Option<mpsc::UnboundedReceiver<RawUiEvent>> {
        if self.state.active {
            debug!("tracking already active");
            return None;
        }

        let decision = match self.gate.decide().await {
            Decision::Prompt(Some(pending)) => self.gate.resolve(pending).await,
            other => other,
        };

        match decision {
            Decision::Proceed => {}
            Decision::Stop => {
                info!("tracking disabled by consent decision");
                return None;
            }
            Decision::Prompt(_) => {
                debug!("consent prompt owned by another caller");
                return None;
            }
        }

        let events = self.state.bindings.attach(source);
        self.activate();
        Some(events)
    }

    fn activate(&mut self) {
        let session = self.sessions.session(
            self.store.as_ref(),
            self.clock.as_ref(),
            self.config.identity.clone(),
        );
        info!(session_id = %session.session_id, "tracking started");

        let page_view = self.state.bindings.page_view(self.clock.now_ms());
        self.state.batcher.set_page_url(&self.state.bindings.page().url);
        self.state.batcher.enqueue(&session, page_view);
        self.state.session = Some(session);
        self.state.active = true;
    }

    /// Normalise and queue one raw UI occurrence. Ignored while inactive.
    pub fn handle(&mut self, raw: RawUiEvent) {
        let PipelineState {
            session: Some(session),
            active: true,
            batcher,
            bindings,
        } = &mut self.state
        else {
            return;
        };

        let captures = bindings.normalize(raw, self.clock.now_ms());
        batcher.set_page_url(&bindings.page().url);
        for capture in captures {
            match capture {
                Capture::Event(event) => batcher.enqueue(session, event),
                Capture::PageHidden => {
                    batcher.set_page_hidden(true);
                    batcher.flush(session, FlushTrigger::Hidden);
                }
                Capture::PageVisible => batcher.set_page_hidden(false),
            }
        }
    }

    /// Flush whatever is queued. Returns true if a batch was handed off.
    pub fn flush(&mut self, trigger: FlushTrigger) -> bool {
        match &self.state.session {
            Some(session) => self.state.batcher.flush(session, trigger),
            None => false,
        }
    }

    /// Drive the pipeline until the UI source closes: feed events through
    /// [`Tracker::handle`] and flush on the periodic timer. Ends with an
    /// unload flush and a bounded wait for every send still in flight.
    pub async fn run(&mut self, mut events: mpsc::UnboundedReceiver<RawUiEvent>) {
        let period = Duration::from_millis(self.config.flush_interval_ms.max(1));
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                maybe = events.recv() => match maybe {
                    Some(raw) => self.handle(raw),
                    None => break,
                },
                _ = ticker.tick() => {
                    self.flush(FlushTrigger::Timer);
                }
            }
        }

        self.shutdown().await;
    }

    /// Page teardown: final flush in unload mode, then wait for outstanding
    /// sends so they survive the host runtime shutting down.
    pub async fn shutdown(&mut self) {
        if self.state.active {
            self.flush(FlushTrigger::Unload);
        }
        self.transport.drain(DRAIN_DEADLINE).await;
        info!(flushes = self.state.batcher.flush_count(), "tracking stopped");
    }

    /// Discard pipeline state so capture can be started afresh.
    pub fn reset(&mut self) {
        self.state.reset();
    }

    pub fn state(&self) -> &PipelineState {
        &self.state
    }

    pub fn gate(&self) -> &ConsentGate {
        &self.gate
    }

    pub fn session(&self) -> Option<&Session> {
        self.state.session.as_ref()
    }

    pub fn is_active(&self) -> bool {
        self.state.active
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }
}
