#![warn(clippy::unwrap_used)]

pub mod config;
pub mod error;
pub mod types;

pub use config::{PayloadFormatKind, TrackerConfig};
pub use error::{TrackerError, TrackerResult};
pub use types::{AttrValue, ConsentState, Event, EventKind, PageInfo, Session};
