//! UI event source: the capability through which capture bindings observe
//! the host document. Hosts adapt their event loop to [`UiEventSource`];
//! [`SyntheticSource`] feeds events from code.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::trace;
use trackline_core::PageInfo;

/// Kind of raw signal a listener can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UiSignal {
    Click,
    PointerMove,
    Scroll,
    FocusOut,
    FormSubmit,
    Visibility,
    Navigate,
}

/// Element a click landed on.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElementInfo {
    pub tag: String,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub class: Option<String>,
    /// Whether the element sits inside the consent prompt surface.
    #[serde(default)]
    pub in_prompt: bool,
}

/// Un-normalised UI occurrence as reported by the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "signal", rename_all = "snake_case")]
pub enum RawUiEvent {
    Click {
        x: f64,
        y: f64,
        #[serde(default)]
        target: ElementInfo,
    },
    PointerMove {
        x: f64,
        y: f64,
    },
    Scroll {
        scroll_y: f64,
        viewport_height: f64,
        document_height: f64,
    },
    /// Focus left a form field.
    FocusOut {
        #[serde(default)]
        form_id: Option<String>,
        field: String,
        #[serde(default)]
        has_value: bool,
    },
    FormSubmit {
        form_id: String,
    },
    Visibility {
        hidden: bool,
    },
    /// Client-side navigation to a new page view.
    Navigate {
        url: String,
    },
}

impl RawUiEvent {
    pub fn signal(&self) -> UiSignal {
        match self {
            RawUiEvent::Click { .. } => UiSignal::Click,
            RawUiEvent::PointerMove { .. } => UiSignal::PointerMove,
            RawUiEvent::Scroll { .. } => UiSignal::Scroll,
            RawUiEvent::FocusOut { .. } => UiSignal::FocusOut,
            RawUiEvent::FormSubmit { .. } => UiSignal::FormSubmit,
            RawUiEvent::Visibility { .. } => UiSignal::Visibility,
            RawUiEvent::Navigate { .. } => UiSignal::Navigate,
        }
    }
}

/// Host document as seen by the pipeline.
pub trait UiEventSource {
    /// Current page context.
    fn page(&self) -> PageInfo;

    /// Register interest in `signals`. Matching events are delivered on the
    /// returned receiver until the source closes (page teardown).
    fn subscribe(&mut self, signals: &[UiSignal]) -> mpsc::UnboundedReceiver<RawUiEvent>;
}

/// Source fed from code: tests, replays, and headless hosts.
pub struct SyntheticSource {
    page: PageInfo,
    listeners: Vec<(HashSet<UiSignal>, mpsc::UnboundedSender<RawUiEvent>)>,
}

impl SyntheticSource {
    pub fn new(page: PageInfo) -> Self {
        Self {
            page,
            listeners: Vec::new(),
        }
    }

    /// Dispatch to every listener subscribed to the event's signal. Returns
    /// the number of listeners reached.
    pub fn emit(&self, event: RawUiEvent) -> usize {
        let signal = event.signal();
        let mut delivered = 0;
        for (signals, tx) in &self.listeners {
            if signals.contains(&signal) && tx.send(event.clone()).is_ok() {
                delivered += 1;
            }
        }
        trace!(?signal, delivered, "synthetic ui event dispatched");
        delivered
    }

    /// Tear the page down: listeners see their receivers close.
    pub fn close(&mut self) {
        self.listeners.clear();
    }
}

impl UiEventSource for SyntheticSource {
    fn page(&self) -> PageInfo {
        self.page.clone()
    }

    fn subscribe(&mut self, signals: &[UiSignal]) -> mpsc::UnboundedReceiver<RawUiEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.listeners.push((signals.iter().copied().collect(), tx));
        rx
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_emit_respects_subscriptions() {
        let mut source = SyntheticSource::new(PageInfo::default());
        let mut clicks = source.subscribe(&[UiSignal::Click]);
        assert_eq!(source.emit(RawUiEvent::PointerMove { x: 1.0, y: 2.0 }), 0);
        assert_eq!(
            source.emit(RawUiEvent::Click {
                x: 1.0,
                y: 2.0,
                target: ElementInfo::default(),
            }),
            1
        );
        assert!(matches!(clicks.try_recv().unwrap(), RawUiEvent::Click { .. }));
        assert!(clicks.try_recv().is_err());
    }

    #[test]
    fn test_close_ends_streams() {
        let mut source = SyntheticSource::new(PageInfo::default());
        let mut rx = source.subscribe(&[UiSignal::Visibility]);
        source.close();
        assert!(matches!(
            rx.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        ));
    }

    #[test]
    fn test_replay_line_format() {
        let raw: RawUiEvent = serde_json::from_str(
            r#"{"signal":"click","x":12,"y":40,"target":{"tag":"BUTTON","id":"buy"}}"#,
        )
        .unwrap();
        assert_eq!(
            raw,
            RawUiEvent::Click {
                x: 12.0,
                y: 40.0,
                target: ElementInfo {
                    tag: "BUTTON".into(),
                    id: Some("buy".into()),
                    class: None,
                    in_prompt: false,
                },
            }
        );
    }
}
