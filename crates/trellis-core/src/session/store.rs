//! Session store contract and the in-memory pool

use super::SessionOptions;
use crate::Result;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Default spacing between expired-entry sweeps done by writes
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Session data type alias
pub type SessionData = serde_json::Map<String, serde_json::Value>;

/// Session store trait
///
/// Stores are shared by every request of a pipeline and serialize access
/// internally.
pub trait SessionStore: Send + Sync {
    /// Resolve the client's cookie value to a session id and its data
    fn find_session(&self, cookie: &str) -> Result<Option<(String, SessionData)>>;

    /// Persist `data` under `sid`; returns the cookie value to send back
    fn write_session(&self, sid: &str, data: &SessionData, options: &SessionOptions) -> Result<String>;

    /// Forget `sid`
    fn delete_session(&self, sid: &str) -> Result<()>;
}

struct StoredSession {
    data: SessionData,
    expires: Option<Instant>,
}

impl StoredSession {
    fn is_live(&self, now: Instant) -> bool {
        self.expires.map_or(true, |at| at > now)
    }
}

/// In-memory session pool; the cookie carries only the session id
///
/// Writes also sweep expired entries, at most once per sweep interval.
pub struct MemoryStore {
    sessions: RwLock<HashMap<String, StoredSession>>,
    sweep_interval: Duration,
    last_sweep: Mutex<Instant>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::with_sweep_interval(DEFAULT_SWEEP_INTERVAL)
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sweep_interval(sweep_interval: Duration) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            sweep_interval,
            last_sweep: Mutex::new(Instant::now()),
        }
    }

    /// Clear all sessions
    pub fn clear(&self) {
        self.sessions.write().clear();
    }

    /// Get session count
    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Cleanup expired sessions
    pub fn cleanup(&self) {
        let now = Instant::now();
        self.sessions.write().retain(|_, session| session.is_live(now));
    }
}

impl SessionStore for MemoryStore {
    fn find_session(&self, cookie: &str) -> Result<Option<(String, SessionData)>> {
        let sessions = self.sessions.read();
        Ok(sessions
            .get(cookie)
            .filter(|session| session.is_live(Instant::now()))
            .map(|session| (cookie.to_string(), session.data.clone())))
    }

    fn write_session(&self, sid: &str, data: &SessionData, options: &SessionOptions) -> Result<String> {
        let now = Instant::now();
        let expires = options.expire_after.map(|ttl| now + ttl);
        let mut sessions = self.sessions.write();
        {
            let mut last_sweep = self.last_sweep.lock();
            if now.duration_since(*last_sweep) >= self.sweep_interval {
                *last_sweep = now;
                sessions.retain(|_, session| session.is_live(now));
            }
        }
        sessions.insert(
            sid.to_string(),
            StoredSession {
                data: data.clone(),
                expires,
            },
        );
        Ok(sid.to_string())
    }

    fn delete_session(&self, sid: &str) -> Result<()> {
        self.sessions.write().remove(sid);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_memory_store() {
        let store = MemoryStore::new();
        let mut data = SessionData::new();
        data.insert("user".to_string(), json!("alice"));

        let cookie = store.write_session("session-1", &data, &SessionOptions::default()).unwrap();
        assert_eq!(cookie, "session-1");

        let (sid, found) = store.find_session("session-1").unwrap().unwrap();
        assert_eq!(sid, "session-1");
        assert_eq!(found.get("user"), Some(&json!("alice")));

        store.delete_session("session-1").unwrap();
        assert!(store.find_session("session-1").unwrap().is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn test_expiry() {
        let store = MemoryStore::new();
        let options = SessionOptions {
            expire_after: Some(Duration::ZERO),
            ..SessionOptions::default()
        };
        store.write_session("gone", &SessionData::new(), &options).unwrap();
        assert!(store.find_session("gone").unwrap().is_none());

        store.write_session("kept", &SessionData::new(), &SessionOptions::default()).unwrap();
        store.cleanup();
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_writes_sweep_expired() {
        let store = MemoryStore::with_sweep_interval(Duration::ZERO);
        let short = SessionOptions {
            expire_after: Some(Duration::ZERO),
            ..SessionOptions::default()
        };
        for i in 0..10 {
            store.write_session(&format!("stale-{}", i), &SessionData::new(), &short).unwrap();
        }
        store.write_session("live", &SessionData::new(), &SessionOptions::default()).unwrap();
        assert_eq!(store.len(), 1);
        assert!(store.find_session("live").unwrap().is_some());

        // Within the interval writes leave stale entries for later
        let lazy = MemoryStore::with_sweep_interval(Duration::from_secs(3600));
        lazy.write_session("stale", &SessionData::new(), &short).unwrap();
        lazy.write_session("live", &SessionData::new(), &SessionOptions::default()).unwrap();
        assert_eq!(lazy.len(), 2);
        lazy.cleanup();
        assert_eq!(lazy.len(), 1);
    }
}
