//! Trackline: replays recorded UI events through the consent-gated tracking
//! pipeline and ships the resulting batches to the configured collector.

mod prompt;
mod replay;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{info, warn};
use trackline_core::{PageInfo, PayloadFormatKind, TrackerConfig};
use trackline_web_sdk::{JsonFileStore, SyntheticSource, Tracker};

use crate::prompt::{ConsentMode, TerminalPrompt};

#[derive(Parser, Debug)]
#[command(name = "trackline")]
#[command(about = "Consent-gated behavioral event capture and batching")]
#[command(version)]
struct Cli {
    /// Newline-delimited JSON UI events to replay
    #[arg(long)]
    replay: PathBuf,

    /// TOML config file (environment variables still apply on top)
    #[arg(long, env = "TRACKLINE_CONFIG")]
    config: Option<PathBuf>,

    /// User identity sent to the consent service and with each batch
    #[arg(long, env = "TRACKLINE__IDENTITY")]
    identity: Option<String>,

    /// Collector endpoint (overrides config)
    #[arg(long, env = "TRACKLINE__COLLECTOR_ENDPOINT")]
    collector: Option<String>,

    /// Payload format (overrides config)
    #[arg(long, value_parser = parse_format)]
    format: Option<PayloadFormatKind>,

    /// Key-value store persisting session id and consent between runs
    #[arg(long, default_value = ".trackline-store.json")]
    store: PathBuf,

    /// How the consent prompt is answered
    #[arg(long, value_enum, default_value_t = ConsentMode::Ask)]
    consent: ConsentMode,

    /// Page URL reported as the event context
    #[arg(long, default_value = "about:blank")]
    url: String,

    /// Viewport size as WIDTHxHEIGHT
    #[arg(long, default_value = "1280x720", value_parser = parse_viewport)]
    viewport: (u32, u32),

    /// Delay between replayed events, in milliseconds
    #[arg(long, default_value_t = 0)]
    pace_ms: u64,

    /// Emit logs as JSON
    #[arg(long, default_value_t = false)]
    json_logs: bool,
}

fn parse_format(s: &str) -> Result<PayloadFormatKind, String> {
    match s {
        "generic" => Ok(PayloadFormatKind::Generic),
        "movements" => Ok(PayloadFormatKind::Movements),
        other => Err(format!("unknown payload format {other:?}")),
    }
}

fn parse_viewport(s: &str) -> Result<(u32, u32), String> {
    let (w, h) = s
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("expected WIDTHxHEIGHT, got {s:?}"))?;
    let width = w.trim().parse().map_err(|e| format!("bad width: {e}"))?;
    let height = h.trim().parse().map_err(|e| format!("bad height: {e}"))?;
    Ok((width, height))
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "trackline=info,trackline_web_sdk=info".into());
    if json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<TrackerConfig> {
    let mut config = match &cli.config {
        Some(path) => TrackerConfig::load_from(path)?,
        None => TrackerConfig::load().unwrap_or_else(|e| {
            warn!(error = %e, "Failed to load config, using defaults");
            TrackerConfig::default()
        }),
    };

    // Apply CLI overrides
    if let Some(identity) = &cli.identity {
        config.identity = Some(identity.clone());
    }
    if let Some(collector) = &cli.collector {
        config.collector_endpoint = collector.clone();
    }
    if let Some(format) = cli.format {
        config.payload_format = format;
    }
    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    let config = load_config(&cli)?;
    info!(
        collector = %config.collector_endpoint,
        identity = config.identity.as_deref().unwrap_or("anonymous"),
        batch_size = config.batch_size,
        flush_interval_ms = config.flush_interval_ms,
        "Configuration loaded"
    );

    let events = replay::load(&cli.replay)?;
    info!(count = events.len(), path = %cli.replay.display(), "Replay loaded");

    let store = Arc::new(JsonFileStore::open(&cli.store)?);
    let prompt = Arc::new(TerminalPrompt::new(cli.consent));
    let mut tracker = Tracker::from_config(config, store, prompt)?;

    let (width, height) = cli.viewport;
    let mut source = SyntheticSource::new(PageInfo {
        url: cli.url.clone(),
        viewport_width: width,
        viewport_height: height,
    });

    let Some(stream) = tracker.start(&mut source).await else {
        info!("Tracking not permitted, nothing to replay");
        return Ok(());
    };

    let pipeline = tokio::spawn(async move {
        tracker.run(stream).await;
        tracker
    });

    for event in events {
        source.emit(event);
        if cli.pace_ms > 0 {
            tokio::time::sleep(Duration::from_millis(cli.pace_ms)).await;
        }
    }
    source.close();

    let tracker = pipeline.await?;
    info!(
        flushes = tracker.state().batcher.flush_count(),
        session_id = tracker.session().map(|s| s.session_id.as_str()).unwrap_or(""),
        "Replay complete"
    );
    Ok(())
}
