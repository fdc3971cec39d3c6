//! Generic ingestion schema:
//! `{ session_id, email, url, timestamp, user_agent, events: [{ type, timestamp, page, ...attributes }] }`.

use anyhow::Result;
use serde_json::{json, Map, Value};
use tracing::trace;
use trackline_core::Event;

use super::{BatchContext, PayloadFormat};

/// Ships every event, attributes flattened beside the reserved fields.
#[derive(Debug, Default, Clone, Copy)]
pub struct GenericFormat;

impl GenericFormat {
    fn event_json(event: &Event) -> Result<Value> {
        let mut obj = Map::with_capacity(event.attributes.len() + 3);
        for (key, value) in &event.attributes {
            obj.insert(key.clone(), serde_json::to_value(value)?);
        }
        // Reserved fields win over attributes with the same name.
        obj.insert("type".into(), json!(event.kind.as_str()));
        obj.insert("timestamp".into(), json!(event.occurred_at));
        obj.insert("page".into(), json!(event.context));
        Ok(Value::Object(obj))
    }
}

impl PayloadFormat for GenericFormat {
    fn name(&self) -> &str {
        "generic"
    }

    fn build(&self, ctx: &BatchContext<'_>, events: &[Event]) -> Result<Option<Value>> {
        if events.is_empty() {
            return Ok(None);
        }
        let events = events
            .iter()
            .map(Self::event_json)
            .collect::<Result<Vec<_>>>()?;

        trace!(count = events.len(), "generic payload built");

        Ok(Some(json!({
            "session_id": ctx.session.session_id,
            "email": ctx.session.identity,
            "url": ctx.page_url,
            "timestamp": ctx.sent_at_ms,
            "user_agent": ctx.user_agent,
            "events": events,
        })))
    }
}
