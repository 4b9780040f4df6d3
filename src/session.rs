//! Session and SessionRegistry: the process-wide table of live sessions.
//!
//! Grounded on `proxy/sessions.rs`'s manager shape (HashMap keyed by id,
//! guarded by a single mutex, counts exposed without cloning the map) and
//! on `core/session_manager.py`'s `SessionManager` (`_sessions` dict plus
//! a parallel `_connections` set, both behind one lock).

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use tokio::sync::Mutex as AsyncMutex;

use crate::base_info::BaseInfo;
use crate::mq::MessageProducer;
use crate::upstream::UpstreamSession;

/// One client's live state: the upstream handle, its context, and the
/// durable-message producer it publishes transcripts through.
///
/// `upstream` is replaced wholesale on a transparent reconnect; every
/// other field is immutable for the session's lifetime. It is guarded by
/// a tokio mutex, not a std one, because the pump holds the lock across
/// `.await` points while talking to the upstream socket.
pub struct Session {
    pub id: String,
    pub base_info: BaseInfo,
    pub upstream: AsyncMutex<Box<dyn UpstreamSession>>,
    pub mq_producer: Arc<dyn MessageProducer>,
}

impl Session {
    pub fn new(
        id: String,
        base_info: BaseInfo,
        upstream: Box<dyn UpstreamSession>,
        mq_producer: Arc<dyn MessageProducer>,
    ) -> Self {
        Self {
            id,
            base_info,
            upstream: AsyncMutex::new(upstream),
            mq_producer,
        }
    }

    /// Swap in a freshly-reconnected upstream handle, preserving
    /// `base_info` and `mq_producer` as the spec requires.
    pub async fn replace_upstream(&self, upstream: Box<dyn UpstreamSession>) {
        *self.upstream.lock().await = upstream;
    }
}

/// Process-wide table of active sessions, mirroring `SessionManager`.
#[derive(Default)]
pub struct SessionRegistry {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    sessions: std::collections::HashMap<String, Arc<Session>>,
    connections: HashSet<String>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, session: Arc<Session>) {
        let mut inner = self.inner.lock().unwrap();
        inner.connections.insert(session.id.clone());
        inner.sessions.insert(session.id.clone(), session);
    }

    pub fn remove(&self, session_id: &str) -> Option<Arc<Session>> {
        let mut inner = self.inner.lock().unwrap();
        inner.connections.remove(session_id);
        inner.sessions.remove(session_id)
    }

    pub fn get(&self, session_id: &str) -> Option<Arc<Session>> {
        self.inner.lock().unwrap().sessions.get(session_id).cloned()
    }

    pub fn active_sessions(&self) -> usize {
        self.inner.lock().unwrap().sessions.len()
    }

    pub fn active_connections(&self) -> usize {
        self.inner.lock().unwrap().connections.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mq::NullMessageProducer;
    use crate::upstream::test_support::FakeUpstreamSession;

    fn test_session(id: &str) -> Arc<Session> {
        Arc::new(Session::new(
            id.to_string(),
            BaseInfo::default(),
            Box::new(FakeUpstreamSession::new()),
            Arc::new(NullMessageProducer),
        ))
    }

    #[test]
    fn add_and_remove_tracks_counts() {
        let registry = SessionRegistry::new();
        registry.add(test_session("s1"));
        assert_eq!(registry.active_sessions(), 1);
        assert_eq!(registry.active_connections(), 1);

        registry.remove("s1");
        assert_eq!(registry.active_sessions(), 0);
        assert_eq!(registry.active_connections(), 0);
    }

    #[test]
    fn get_returns_none_after_removal() {
        let registry = SessionRegistry::new();
        registry.add(test_session("s1"));
        registry.remove("s1");
        assert!(registry.get("s1").is_none());
    }

    #[tokio::test]
    async fn replace_upstream_preserves_base_info() {
        let session = test_session("s1");
        let original_location = session.base_info.location.clone();
        session.replace_upstream(Box::new(FakeUpstreamSession::new())).await;
        assert_eq!(session.base_info.location, original_location);
    }
}
