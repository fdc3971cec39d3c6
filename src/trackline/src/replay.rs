//! Newline-delimited JSON replay of recorded UI events.

use std::path::Path;

use anyhow::Context;
use tracing::warn;
use trackline_web_sdk::RawUiEvent;

/// Parse one event per line. Blank lines and `#` comments are skipped;
/// malformed lines are logged and skipped.
pub fn parse(text: &str) -> Vec<RawUiEvent> {
    text.lines()
        .enumerate()
        .filter(|(_, line)| {
            let line = line.trim();
            !line.is_empty() && !line.starts_with('#')
        })
        .filter_map(|(idx, line)| match serde_json::from_str(line) {
            Ok(event) => Some(event),
            Err(e) => {
                warn!(line = idx + 1, error = %e, "skipping malformed replay line");
                None
            }
        })
        .collect()
}

pub fn load(path: &Path) -> anyhow::Result<Vec<RawUiEvent>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read replay file {}", path.display()))?;
    Ok(parse(&text))
}
