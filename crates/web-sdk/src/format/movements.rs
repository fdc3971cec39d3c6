//! Legacy movement schema:
//! `{ session_id, email, movements: [{ x, y, time }], event_type: "batch_mouse_movements" }`.
//!
//! The collector behind this variant only stores pointer movement, so every
//! other event kind is filtered out of the batch.

use anyhow::Result;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::debug;
use trackline_core::{Event, EventKind};

use super::{BatchContext, PayloadFormat};

const EVENT_TYPE: &str = "batch_mouse_movements";

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
struct Movement {
    x: f64,
    y: f64,
    time: i64,
}

/// Ships pointer movements only.
#[derive(Debug, Default, Clone, Copy)]
pub struct MovementsFormat;

impl PayloadFormat for MovementsFormat {
    fn name(&self) -> &str {
        "movements"
    }

    fn build(&self, ctx: &BatchContext<'_>, events: &[Event]) -> Result<Option<Value>> {
        let movements: Vec<Movement> = events
            .iter()
            .filter(|e| e.kind == EventKind::MouseMove)
            .filter_map(|e| {
                Some(Movement {
                    x: e.attr("x")?.as_f64()?,
                    y: e.attr("y")?.as_f64()?,
                    time: e.occurred_at,
                })
            })
            .collect();

        if movements.is_empty() {
            debug!(
                skipped = events.len(),
                "batch has no pointer movements, nothing to send"
            );
            return Ok(None);
        }

        Ok(Some(json!({
            "session_id": ctx.session.session_id,
            "email": ctx.session.identity,
            "movements": movements,
            "event_type": EVENT_TYPE,
        })))
    }
}
