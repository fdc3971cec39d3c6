//! Session identity: obtains or mints the session identifier persisted in
//! the key-value store.

use rand::distributions::Alphanumeric;
use rand::Rng;
use tracing::{info, warn};
use trackline_core::Session;

use crate::clock::Clock;
use crate::store::KeyValueStore;

const SESSION_PREFIX: &str = "sess_";
const RANDOM_LEN: usize = 9;

/// Reads the persisted session id or mints and persists a new one.
pub struct SessionManager {
    key: String,
}

impl SessionManager {
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }

    /// Idempotent within one storage lifetime: the first call mints
    /// `sess_<random><now_ms>`, later calls return the stored value.
    pub fn get_or_create_session_id(&self, store: &dyn KeyValueStore, clock: &dyn Clock) -> String {
        if let Some(id) = store.get(&self.key).filter(|id| !id.is_empty()) {
            return id;
        }

        let id = mint_session_id(clock.now_ms());
        if let Err(e) = store.set(&self.key, &id) {
            // Still usable for this page; the next load mints another id.
            warn!(error = %e, "failed to persist session id");
        }
        info!(session_id = %id, "session created");
        id
    }

    pub fn session(
        &self,
        store: &dyn KeyValueStore,
        clock: &dyn Clock,
        identity: Option<String>,
    ) -> Session {
        Session {
            session_id: self.get_or_create_session_id(store, clock),
            identity,
        }
    }
}

fn mint_session_id(now_ms: i64) -> String {
    let random: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(RANDOM_LEN)
        .map(|c| char::from(c).to_ascii_lowercase())
        .collect();
    format!("{SESSION_PREFIX}{random}{now_ms}")
}
