//! Capture bindings: subscribe to the host's UI signals and normalise raw
//! occurrences into queue events. High-frequency sources pass through the
//! rate limiter; scroll additionally goes through the milestone tracker.

use std::collections::{BTreeMap, BTreeSet};

use tokio::sync::mpsc;
use tracing::{debug, trace};
use trackline_core::{Event, EventKind, PageInfo, TrackerConfig};

use crate::milestones::{scroll_percent, MilestoneTracker};
use crate::source::{RawUiEvent, UiEventSource, UiSignal};
use crate::throttle::{limit, Limited};

/// Signals the bindings listen to.
pub const CAPTURED_SIGNALS: &[UiSignal] = &[
    UiSignal::Click,
    UiSignal::PointerMove,
    UiSignal::Scroll,
    UiSignal::FocusOut,
    UiSignal::FormSubmit,
    UiSignal::Visibility,
    UiSignal::Navigate,
];

/// Output of normalising one raw UI occurrence.
#[derive(Debug, Clone, PartialEq)]
pub enum Capture {
    Event(Event),
    /// Page-visibility went hidden: flush now.
    PageHidden,
    PageVisible,
}

#[derive(Debug, Default, Clone)]
struct FormTouch {
    last_field: String,
    fields: BTreeSet<String>,
}

/// Per-page-view form interaction, used to detect abandonment.
#[derive(Debug, Default, Clone)]
struct FormActivity {
    touched: BTreeMap<String, FormTouch>,
    submitted: BTreeSet<String>,
    reported: BTreeSet<String>,
}

impl FormActivity {
    fn focus_out(&mut self, form_id: &str, field: &str) {
        let touch = self.touched.entry(form_id.to_string()).or_default();
        touch.last_field = field.to_string();
        touch.fields.insert(field.to_string());
    }

    fn submit(&mut self, form_id: &str) {
        self.submitted.insert(form_id.to_string());
    }

    /// Touched, unsubmitted, not yet reported forms; marks them reported.
    fn abandoned(&mut self) -> Vec<(String, FormTouch)> {
        let mut out = Vec::new();
        for (form_id, touch) in &self.touched {
            if self.submitted.contains(form_id) || self.reported.contains(form_id) {
                continue;
            }
            out.push((form_id.clone(), touch.clone()));
        }
        for (form_id, _) in &out {
            self.reported.insert(form_id.clone());
        }
        out
    }
}

/// Pointer position observed on a page.
struct PointerSample<'a> {
    page: &'a str,
    at: i64,
    x: f64,
    y: f64,
}

fn mouse_move(sample: PointerSample<'_>) -> Event {
    Event::new(EventKind::MouseMove, sample.at, sample.page)
        .with_attr("x", sample.x)
        .with_attr("y", sample.y)
}

/// `(scroll_y, viewport_height, document_height)`
fn scroll_depth((scroll_y, viewport_height, document_height): (f64, f64, f64)) -> u8 {
    scroll_percent(scroll_y, viewport_height, document_height)
}

type PointerHandler = for<'a> fn(PointerSample<'a>) -> Event;
type ScrollHandler = fn((f64, f64, f64)) -> u8;

/// Normalises raw UI occurrences for one page at a time.
pub struct CaptureBindings {
    page: PageInfo,
    pointer: Limited<PointerHandler>,
    scroll: Limited<ScrollHandler>,
    milestones: MilestoneTracker,
    forms: FormActivity,
}

impl CaptureBindings {
    pub fn new(config: &TrackerConfig) -> Self {
        Self {
            page: PageInfo::default(),
            pointer: limit(mouse_move as PointerHandler, config.pointer_throttle_ms),
            scroll: limit(scroll_depth as ScrollHandler, config.scroll_throttle_ms),
            milestones: MilestoneTracker::new(config.scroll_milestones.clone()),
            forms: FormActivity::default(),
        }
    }

    /// Register listeners on the host document.
    pub fn attach<S: UiEventSource + ?Sized>(
        &mut self,
        source: &mut S,
    ) -> mpsc::UnboundedReceiver<RawUiEvent> {
        self.page = source.page();
        debug!(url = %self.page.url, "capture bindings attached");
        source.subscribe(CAPTURED_SIGNALS)
    }

    pub fn page(&self) -> &PageInfo {
        &self.page
    }

    /// `page_view` for the current page, carrying the viewport size.
    pub fn page_view(&self, now_ms: i64) -> Event {
        Event::new(EventKind::PageView, now_ms, self.page.url.clone())
            .with_attr("width", self.page.viewport_width)
            .with_attr("height", self.page.viewport_height)
    }

    pub fn normalize(&mut self, raw: RawUiEvent, now_ms: i64) -> Vec<Capture> {
        match raw {
            RawUiEvent::Click { x, y, target } => {
                if target.in_prompt {
                    trace!("click on consent prompt ignored");
                    return Vec::new();
                }
                vec![Capture::Event(
                    self.event(EventKind::Click, now_ms)
                        .with_attr("x", x)
                        .with_attr("y", y)
                        .with_attr("tag", target.tag)
                        .with_attr("target_id", target.id)
                        .with_attr("target_class", target.class),
                )]
            }
            RawUiEvent::PointerMove { x, y } => {
                let sample = PointerSample {
                    page: &self.page.url,
                    at: now_ms,
                    x,
                    y,
                };
                match self.pointer.call(now_ms, sample) {
                    Some(event) => vec![Capture::Event(event)],
                    None => {
                        metrics::counter!("tracker.events.throttled", "signal" => "pointer")
                            .increment(1);
                        Vec::new()
                    }
                }
            }
            RawUiEvent::Scroll {
                scroll_y,
                viewport_height,
                document_height,
            } => {
                let Some(percent) = self
                    .scroll
                    .call(now_ms, (scroll_y, viewport_height, document_height))
                else {
                    metrics::counter!("tracker.events.throttled", "signal" => "scroll").increment(1);
                    return Vec::new();
                };
                self.milestones
                    .observe(percent)
                    .into_iter()
                    .map(|depth| {
                        Capture::Event(
                            self.event(EventKind::ScrollDepth, now_ms)
                                .with_attr("depth_percentage", depth),
                        )
                    })
                    .collect()
            }
            RawUiEvent::FocusOut {
                form_id,
                field,
                has_value,
            } => {
                if let (Some(form_id), true) = (form_id, has_value) {
                    self.forms.focus_out(&form_id, &field);
                }
                Vec::new()
            }
            RawUiEvent::FormSubmit { form_id } => {
                self.forms.submit(&form_id);
                Vec::new()
            }
            RawUiEvent::Visibility { hidden: true } => {
                let mut out: Vec<Capture> = self
                    .forms
                    .abandoned()
                    .into_iter()
                    .map(|(form_id, touch)| {
                        Capture::Event(
                            self.event(EventKind::FormAbandonment, now_ms)
                                .with_attr("form_id", form_id)
                                .with_attr("last_field", touch.last_field)
                                .with_attr("fields_touched", touch.fields.len() as i64),
                        )
                    })
                    .collect();
                out.push(Capture::PageHidden);
                out
            }
            RawUiEvent::Visibility { hidden: false } => vec![Capture::PageVisible],
            RawUiEvent::Navigate { url } => {
                debug!(from = %self.page.url, to = %url, "page navigation");
                self.page.url = url;
                self.reset_page_view();
                vec![Capture::Event(self.page_view(now_ms))]
            }
        }
    }

    /// Forget per-page-view state: milestones, form activity, throttles.
    pub fn reset_page_view(&mut self) {
        self.milestones.reset();
        self.forms = FormActivity::default();
        self.pointer.reset();
        self.scroll.reset();
    }

    fn event(&self, kind: EventKind, now_ms: i64) -> Event {
        Event::new(kind, now_ms, self.page.url.clone())
    }
}
