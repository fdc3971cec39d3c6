use serde::Deserialize;
use std::path::Path;
use url::Url;

use crate::error::{TrackerError, TrackerResult};

/// Root tracker configuration. Loaded from environment variables
/// with the prefix `TRACKLINE__` and an optional TOML config file.
#[derive(Debug, Clone, Deserialize)]
pub struct TrackerConfig {
    #[serde(default = "default_collector_endpoint")]
    pub collector_endpoint: String,
    #[serde(default = "default_consent_base_url")]
    pub consent_base_url: String,
    /// Externally supplied user/account reference; absent means anonymous.
    #[serde(default)]
    pub identity: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,
    #[serde(default = "default_throttle_ms")]
    pub pointer_throttle_ms: u64,
    #[serde(default = "default_throttle_ms")]
    pub scroll_throttle_ms: u64,
    #[serde(default = "default_scroll_milestones")]
    pub scroll_milestones: Vec<u8>,
    #[serde(default)]
    pub payload_format: PayloadFormatKind,
    #[serde(default = "default_storage_namespace")]
    pub storage_namespace: String,
    #[serde(default = "default_consent_timeout_ms")]
    pub consent_timeout_ms: u64,
    #[serde(default = "default_delivery_timeout_ms")]
    pub delivery_timeout_ms: u64,
    #[serde(default = "default_beacon_on_hide")]
    pub beacon_on_hide: bool,
    /// Client description sent in the generic batch envelope.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

/// Ingestion wire schema, one per deployment variant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadFormatKind {
    /// `{ session_id, email, events: [...] }`
    #[default]
    Generic,
    /// `{ session_id, email, movements: [...], event_type: "batch_mouse_movements" }`
    Movements,
}

// Default functions
fn default_collector_endpoint() -> String {
    "http://localhost:5000/api/sync".to_string()
}
fn default_consent_base_url() -> String {
    "http://localhost:5000".to_string()
}
fn default_batch_size() -> usize {
    5
}
fn default_flush_interval_ms() -> u64 {
    2000
}
fn default_throttle_ms() -> u64 {
    100
}
fn default_scroll_milestones() -> Vec<u8> {
    vec![25, 50, 75, 90]
}
fn default_storage_namespace() -> String {
    "analytics".to_string()
}
fn default_consent_timeout_ms() -> u64 {
    3000
}
fn default_delivery_timeout_ms() -> u64 {
    10_000
}
fn default_beacon_on_hide() -> bool {
    true
}
pub fn default_user_agent() -> String {
    format!("trackline/{}", env!("CARGO_PKG_VERSION"))
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            collector_endpoint: default_collector_endpoint(),
            consent_base_url: default_consent_base_url(),
            identity: None,
            batch_size: default_batch_size(),
            flush_interval_ms: default_flush_interval_ms(),
            pointer_throttle_ms: default_throttle_ms(),
            scroll_throttle_ms: default_throttle_ms(),
            scroll_milestones: default_scroll_milestones(),
            payload_format: PayloadFormatKind::default(),
            storage_namespace: default_storage_namespace(),
            consent_timeout_ms: default_consent_timeout_ms(),
            delivery_timeout_ms: default_delivery_timeout_ms(),
            beacon_on_hide: default_beacon_on_hide(),
            user_agent: default_user_agent(),
        }
    }
}

impl TrackerConfig {
    /// Load configuration from the environment only.
    pub fn load() -> TrackerResult<Self> {
        Self::build(None)
    }

    /// Load configuration from a TOML file, with environment overrides on top.
    pub fn load_from(path: &Path) -> TrackerResult<Self> {
        Self::build(Some(path))
    }

    fn build(path: Option<&Path>) -> TrackerResult<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        let builder = builder.add_source(
            config::Environment::with_prefix("TRACKLINE")
                .separator("__")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("scroll_milestones"),
        );

        let mut cfg: TrackerConfig = builder.build()?.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Check invariants and normalise milestones to ascending unique order.
    pub fn validate(&mut self) -> TrackerResult<()> {
        if self.batch_size == 0 {
            return Err(TrackerError::Config("batch_size must be at least 1".into()));
        }
        if self.flush_interval_ms == 0 {
            return Err(TrackerError::Config(
                "flush_interval_ms must be at least 1".into(),
            ));
        }
        if let Some(bad) = self
            .scroll_milestones
            .iter()
            .find(|m| **m == 0 || **m > 100)
        {
            return Err(TrackerError::Config(format!(
                "scroll milestone {bad} outside 1..=100"
            )));
        }
        self.scroll_milestones.sort_unstable();
        self.scroll_milestones.dedup();

        self.collector_url()?;
        self.consent_url()?;
        Ok(())
    }

    pub fn collector_url(&self) -> TrackerResult<Url> {
        Url::parse(&self.collector_endpoint).map_err(|e| {
            TrackerError::Config(format!(
                "invalid collector_endpoint {:?}: {e}",
                self.collector_endpoint
            ))
        })
    }

    /// `<consent_base_url>/check-consent`
    pub fn consent_url(&self) -> TrackerResult<Url> {
        let base = Url::parse(&self.consent_base_url).map_err(|e| {
            TrackerError::Config(format!(
                "invalid consent_base_url {:?}: {e}",
                self.consent_base_url
            ))
        })?;
        let mut url = base;
        url.path_segments_mut()
            .map_err(|_| TrackerError::Config("consent_base_url cannot be a base".into()))?
            .pop_if_empty()
            .push("check-consent");
        Ok(url)
    }

    /// Storage key for the persisted consent decision.
    pub fn consent_key(&self) -> String {
        format!("{}_consent", self.storage_namespace)
    }

    /// Storage key for the persisted session identifier.
    pub fn session_key(&self) -> String {
        format!("{}_session_id", self.storage_namespace)
    }
}
