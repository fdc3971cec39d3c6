#![warn(clippy::unwrap_used)]
//! Consent-gated behavioral capture for web pages: user interactions are
//! normalised into events, batched, and shipped to a collector endpoint.
//!
//! # Modules
//!
//! - [`consent`]: Remote consent check with local fallback and user prompt
//! - [`session`]: Persistent session identifier
//! - [`bindings`]: Normalisation of raw UI signals into tracking events
//! - [`queue`]: Event queue and size/timer/visibility-driven batching
//! - [`format`]: Payload shapes for the collector
//! - [`delivery`] / [`transport`]: Fire-and-forget shipping of batches
//! - [`pipeline`]: The [`Tracker`] wiring everything together
//!
//! Host capabilities (clock, key-value store, UI event source, prompt
//! surface, transport) are traits with in-memory doubles alongside the
//! production implementations.

pub mod bindings;
pub mod clock;
pub mod consent;
pub mod delivery;
pub mod format;
pub mod milestones;
pub mod pipeline;
pub mod prompt;
pub mod queue;
pub mod session;
pub mod source;
pub mod store;
pub mod throttle;
pub mod transport;

pub use bindings::{Capture, CaptureBindings};
pub use clock::{Clock, ManualClock, SystemClock};
pub use consent::{ConsentGate, ConsentService, Decision, FixedConsent, HttpConsentService};
pub use delivery::Delivery;
pub use format::{GenericFormat, MovementsFormat, PayloadFormat};
pub use pipeline::{PipelineState, Tracker, TrackerDeps};
pub use prompt::{PromptChoice, PromptSurface, ScriptedPrompt};
pub use queue::{Batcher, EventQueue, FlushTrigger};
pub use session::SessionManager;
pub use source::{ElementInfo, RawUiEvent, SyntheticSource, UiEventSource, UiSignal};
pub use store::{JsonFileStore, KeyValueStore, MemoryStore};
pub use transport::{CaptureTransport, DeliveryMode, HttpTransport, Transport};
