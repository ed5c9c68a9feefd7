use dashmap::DashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// One sticky-session binding: a client-ip or session-id key bound to the
/// backend endpoint ("host:port") it was last routed to.
#[derive(Clone)]
struct StickySession {
    endpoint: Arc<str>,
    last_access: u64,
}

/// Sticky-session table for one upstream group. Lookup tries the configured
/// session-id source first, falling back to client-ip; bind always writes
/// under whichever key produced the lookup miss that triggered the fresh
/// selection — a single, consistent key per session.
pub struct SessionTable {
    sessions: DashMap<String, StickySession>,
    idle_timeout_secs: u64,
}

impl SessionTable {
    pub fn new(idle_timeout_secs: u64) -> Self {
        Self {
            sessions: DashMap::new(),
            idle_timeout_secs,
        }
    }

    /// Return the bound endpoint for `key` if a live (non-expired) session exists.
    pub fn lookup(&self, key: &str) -> Option<Arc<str>> {
        let entry = self.sessions.get(key)?;
        if now_unix_secs().saturating_sub(entry.last_access) <= self.idle_timeout_secs {
            Some(entry.endpoint.clone())
        } else {
            None
        }
    }

    /// Bind `key` to `endpoint`, creating or refreshing the session.
    pub fn bind(&self, key: &str, endpoint: Arc<str>) {
        self.sessions.insert(
            key.to_string(),
            StickySession {
                endpoint,
                last_access: now_unix_secs(),
            },
        );
    }

    /// Refresh the idle clock for an existing session on reuse.
    pub fn touch(&self, key: &str) {
        if let Some(mut entry) = self.sessions.get_mut(key) {
            entry.last_access = now_unix_secs();
        }
    }

    /// Drop every session bound to `endpoint`. Called when a server is
    /// removed from the group so sessions never point at a dead backend.
    pub fn remove_endpoint(&self, endpoint: &str) {
        self.sessions.retain(|_, v| &*v.endpoint != endpoint);
    }

    /// Evict sessions that have been idle longer than the configured timeout.
    pub fn sweep_idle(&self) {
        let now = now_unix_secs();
        let timeout = self.idle_timeout_secs;
        self.sessions
            .retain(|_, v| now.saturating_sub(v.last_access) <= timeout);
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }
}

fn now_unix_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bind_then_lookup_hits() {
        let t = SessionTable::new(300);
        t.bind("1.2.3.4", Arc::from("a:80"));
        assert_eq!(t.lookup("1.2.3.4").as_deref(), Some("a:80"));
    }

    #[test]
    fn test_lookup_miss_for_unknown_key() {
        let t = SessionTable::new(300);
        assert!(t.lookup("nope").is_none());
    }

    #[test]
    fn test_remove_endpoint_drops_bound_sessions() {
        let t = SessionTable::new(300);
        t.bind("1.2.3.4", Arc::from("a:80"));
        t.bind("5.6.7.8", Arc::from("b:80"));
        t.remove_endpoint("a:80");
        assert!(t.lookup("1.2.3.4").is_none());
        assert_eq!(t.lookup("5.6.7.8").as_deref(), Some("b:80"));
    }

    #[test]
    fn test_sweep_idle_keeps_fresh_sessions() {
        let t = SessionTable::new(300);
        t.bind("1.2.3.4", Arc::from("a:80"));
        t.sweep_idle();
        assert_eq!(t.len(), 1);
    }
}
