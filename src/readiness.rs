//! Readiness promises: the handshake bridge between "pool handed us a
//! session" and "the client's upgrade task is ready to hand it off".
//!
//! Grounded on `core/session_future.py`'s module-level
//! `session_futures` map of `asyncio.Future`s keyed by session id; here
//! a oneshot channel stands in for the future.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::oneshot;
use tokio::time::{timeout, Duration};

use crate::session::Session;

/// Default wait for a prepared session before the handshake gives up.
pub const READINESS_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Default)]
pub struct ReadinessRegistry {
    pending: Mutex<HashMap<String, oneshot::Sender<Arc<Session>>>>,
}

impl ReadinessRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new promise for `session_id`, returning the receiver
    /// half the handshake task awaits.
    pub fn create(&self, session_id: String) -> oneshot::Receiver<Arc<Session>> {
        let (tx, rx) = oneshot::channel();
        self.pending.lock().unwrap().insert(session_id, tx);
        rx
    }

    /// Resolve a pending promise once the session's background
    /// preparation task finishes. A no-op if nobody is waiting (the
    /// client already disconnected) or the promise was already resolved.
    pub fn complete(&self, session_id: &str, session: Arc<Session>) {
        if let Some(tx) = self.pending.lock().unwrap().remove(session_id) {
            let _ = tx.send(session);
        }
    }

    /// Drop a promise without resolving it, e.g. on preparation failure.
    pub fn cancel(&self, session_id: &str) {
        self.pending.lock().unwrap().remove(session_id);
    }

    /// Await a promise with the standard readiness timeout.
    pub async fn wait(&self, rx: oneshot::Receiver<Arc<Session>>) -> Option<Arc<Session>> {
        timeout(READINESS_TIMEOUT, rx).await.ok()?.ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base_info::BaseInfo;
    use crate::mq::NullMessageProducer;
    use crate::upstream::test_support::FakeUpstreamSession;

    fn fake_session(id: &str) -> Arc<Session> {
        Arc::new(Session::new(
            id.to_string(),
            BaseInfo::default(),
            Box::new(FakeUpstreamSession::new()),
            Arc::new(NullMessageProducer),
        ))
    }

    #[tokio::test]
    async fn resolves_once_completed() {
        let registry = ReadinessRegistry::new();
        let rx = registry.create("s1".into());
        registry.complete("s1", fake_session("s1"));
        let result = registry.wait(rx).await;
        assert!(result.is_some());
    }

    #[tokio::test]
    async fn completing_unknown_id_is_a_noop() {
        let registry = ReadinessRegistry::new();
        registry.complete("missing", fake_session("missing"));
    }

    #[tokio::test]
    async fn cancel_drops_the_sender_so_recv_errs() {
        let registry = ReadinessRegistry::new();
        let rx = registry.create("s1".into());
        registry.cancel("s1");
        assert!(registry.wait(rx).await.is_none());
    }
}
