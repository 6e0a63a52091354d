use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, warn};

use autofunnel_core::event::Attribution;

/// Session storage key holding the serialized attribution blob.
pub const LEAD_SOURCE_KEY: &str = "leadSourceData";

pub const DEFAULT_MAX_SESSIONS: usize = 10_000;
pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(24 * 60 * 60);

struct SessionEntry {
    items: HashMap<String, String>,
    last_seen: Instant,
}

/// Per-session string storage, one map of keys per session id.
///
/// Attribution lives under [`LEAD_SOURCE_KEY`] as a JSON blob written once per
/// session; the forwarder reads it back for every event in that session.
///
/// Sessions idle for longer than the TTL are forgotten. When a new session
/// arrives with the store at `max_sessions`, the least recently used one is
/// evicted.
pub struct SessionAttributionStore {
    sessions: Mutex<HashMap<String, SessionEntry>>,
    max_sessions: usize,
    ttl: Duration,
}

/// Coarse campaign summary with the usual fallbacks for direct traffic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UtmSummary {
    pub source: String,
    pub medium: String,
    pub campaign: String,
}

impl Default for SessionAttributionStore {
    fn default() -> Self {
        Self::with_limits(DEFAULT_MAX_SESSIONS, DEFAULT_SESSION_TTL)
    }
}

impl SessionAttributionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limits(max_sessions: usize, ttl: Duration) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            max_sessions: max_sessions.max(1),
            ttl,
        }
    }

    pub fn len(&self) -> usize {
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn is_expired(&self, entry: &SessionEntry, now: Instant) -> bool {
        now.saturating_duration_since(entry.last_seen) >= self.ttl
    }

    /// Live entry for `session_id`, created (evicting if needed) when absent.
    fn session_mut<'a>(
        &self,
        sessions: &'a mut HashMap<String, SessionEntry>,
        session_id: &str,
        now: Instant,
    ) -> &'a mut SessionEntry {
        if sessions
            .get(session_id)
            .is_some_and(|entry| self.is_expired(entry, now))
        {
            sessions.remove(session_id);
        }
        if !sessions.contains_key(session_id) {
            sessions.retain(|_, entry| !self.is_expired(entry, now));
            while sessions.len() >= self.max_sessions {
                let Some(oldest) = sessions
                    .iter()
                    .min_by_key(|(_, entry)| entry.last_seen)
                    .map(|(id, _)| id.clone())
                else {
                    break;
                };
                sessions.remove(&oldest);
                debug!(session_id = %oldest, "Session store full, least recent session evicted");
            }
        }
        let entry = sessions
            .entry(session_id.to_string())
            .or_insert_with(|| SessionEntry {
                items: HashMap::new(),
                last_seen: now,
            });
        entry.last_seen = now;
        entry
    }

    pub fn get_item(&self, session_id: &str, key: &str) -> Option<String> {
        let now = Instant::now();
        let mut sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        if self.is_expired(sessions.get(session_id)?, now) {
            sessions.remove(session_id);
            debug!(session_id, "Session expired");
            return None;
        }
        let entry = sessions.get_mut(session_id)?;
        entry.last_seen = now;
        entry.items.get(key).cloned()
    }

    pub fn set_item(&self, session_id: &str, key: &str, value: String) {
        let mut sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        self.session_mut(&mut sessions, session_id, Instant::now())
            .items
            .insert(key.to_string(), value);
    }

    /// Store attribution for a session unless one was captured already.
    /// Returns whether this call wrote it.
    pub fn capture(&self, session_id: &str, attribution: &Attribution) -> bool {
        let blob = match serde_json::to_string(attribution) {
            Ok(blob) => blob,
            Err(e) => {
                warn!(session_id, error = %e, "Failed to serialize attribution");
                return false;
            }
        };

        let mut sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        let items = &mut self.session_mut(&mut sessions, session_id, Instant::now()).items;
        if items.contains_key(LEAD_SOURCE_KEY) {
            debug!(session_id, "Attribution already captured for session");
            return false;
        }
        items.insert(LEAD_SOURCE_KEY.to_string(), blob);
        true
    }

    /// Attribution for a session. Missing or unreadable blobs yield an empty
    /// attribution.
    pub fn load(&self, session_id: &str) -> Attribution {
        let Some(blob) = self.get_item(session_id, LEAD_SOURCE_KEY) else {
            return Attribution::default();
        };
        match serde_json::from_str(&blob) {
            Ok(attribution) => attribution,
            Err(e) => {
                warn!(session_id, error = %e, "Error parsing stored attribution");
                Attribution::default()
            }
        }
    }

    pub fn utm_summary(&self, session_id: &str) -> Option<UtmSummary> {
        self.get_item(session_id, LEAD_SOURCE_KEY)?;
        let attribution = self.load(session_id);
        Some(UtmSummary {
            source: attribution.utm_source.unwrap_or_else(|| "direct".to_string()),
            medium: attribution.utm_medium.unwrap_or_else(|| "none".to_string()),
            campaign: attribution.utm_campaign.unwrap_or_else(|| "none".to_string()),
        })
    }
}
