//! Shared data model: captured events, consent state, session identity and
//! page context.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Kind tag of a captured event. Open-ended: unknown tags round-trip through
/// [`EventKind::Custom`] without touching the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum EventKind {
    PageView,
    Click,
    MouseMove,
    ScrollDepth,
    FormAbandonment,
    Custom(String),
}

impl EventKind {
    pub fn as_str(&self) -> &str {
        match self {
            EventKind::PageView => "page_view",
            EventKind::Click => "click",
            EventKind::MouseMove => "mousemove",
            EventKind::ScrollDepth => "scroll_depth",
            EventKind::FormAbandonment => "form_abandonment",
            EventKind::Custom(name) => name,
        }
    }
}

impl From<String> for EventKind {
    fn from(s: String) -> Self {
        match s.as_str() {
            "page_view" => EventKind::PageView,
            "click" | "interaction_click" => EventKind::Click,
            "mousemove" => EventKind::MouseMove,
            "scroll_depth" => EventKind::ScrollDepth,
            "form_abandonment" => EventKind::FormAbandonment,
            _ => EventKind::Custom(s),
        }
    }
}

impl From<EventKind> for String {
    fn from(kind: EventKind) -> Self {
        match kind {
            EventKind::Custom(name) => name,
            other => other.as_str().to_string(),
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Primitive attribute value carried by an event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttrValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl From<bool> for AttrValue {
    fn from(v: bool) -> Self {
        AttrValue::Bool(v)
    }
}

impl From<i64> for AttrValue {
    fn from(v: i64) -> Self {
        AttrValue::Int(v)
    }
}

impl From<u32> for AttrValue {
    fn from(v: u32) -> Self {
        AttrValue::Int(i64::from(v))
    }
}

impl From<u8> for AttrValue {
    fn from(v: u8) -> Self {
        AttrValue::Int(i64::from(v))
    }
}

impl From<f64> for AttrValue {
    fn from(v: f64) -> Self {
        AttrValue::Float(v)
    }
}

impl From<&str> for AttrValue {
    fn from(v: &str) -> Self {
        AttrValue::Text(v.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(v: String) -> Self {
        AttrValue::Text(v)
    }
}

impl<T: Into<AttrValue>> From<Option<T>> for AttrValue {
    fn from(v: Option<T>) -> Self {
        v.map_or(AttrValue::Null, Into::into)
    }
}

impl AttrValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            AttrValue::Int(v) => Some(*v as f64),
            AttrValue::Float(v) => Some(*v),
            _ => None,
        }
    }
}

/// One observed occurrence, immutable once handed to the queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub kind: EventKind,
    /// Milliseconds since the Unix epoch, assigned at capture time.
    pub occurred_at: i64,
    /// Page URL at capture time.
    pub context: String,
    #[serde(default)]
    pub attributes: BTreeMap<String, AttrValue>,
}

impl Event {
    pub fn new(kind: EventKind, occurred_at: i64, context: impl Into<String>) -> Self {
        Self {
            kind,
            occurred_at,
            context: context.into(),
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_attr(mut self, key: impl Into<String>, value: impl Into<AttrValue>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn attr(&self, key: &str) -> Option<&AttrValue> {
        self.attributes.get(key)
    }
}

/// Tri-state consent decision. Only `Unknown -> Accepted` and
/// `Unknown -> Declined` are legal transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsentState {
    #[default]
    Unknown,
    Accepted,
    Declined,
}

impl ConsentState {
    /// Value persisted in the key-value store, `None` for `Unknown`.
    pub fn as_stored(&self) -> Option<&'static str> {
        match self {
            ConsentState::Unknown => None,
            ConsentState::Accepted => Some("accepted"),
            ConsentState::Declined => Some("declined"),
        }
    }

    /// Anything other than the two recorded values reads back as `Unknown`.
    pub fn from_stored(value: Option<&str>) -> Self {
        match value {
            Some("accepted") => ConsentState::Accepted,
            Some("declined") => ConsentState::Declined,
            _ => ConsentState::Unknown,
        }
    }

    pub fn is_decided(&self) -> bool {
        !matches!(self, ConsentState::Unknown)
    }
}

/// One browsing session for one identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub identity: Option<String>,
}

/// Page context reported by the UI event source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageInfo {
    pub url: String,
    pub viewport_width: u32,
    pub viewport_height: u32,
}

impl Default for PageInfo {
    fn default() -> Self {
        Self {
            url: "about:blank".into(),
            viewport_width: 0,
            viewport_height: 0,
        }
    }
}
