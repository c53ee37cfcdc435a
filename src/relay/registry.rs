//! # Session Registry
//!
//! Thread-safe map from session id to the live connection for that session.
//! One shared registry instance is handed by reference to both the transport
//! endpoint (insert on connect, remove on disconnect) and the relay sink
//! (iterate on fan-out); it is never a process-wide global.
//!
//! ## Concurrency:
//! The map sits behind one `RwLock` with short critical sections. Fan-out
//! never iterates under the lock: it takes a snapshot of the entries and
//! sends against the snapshot, so another session can connect or disconnect
//! while deliveries are in flight. A snapshot can therefore contain a
//! connection that is already gone; the sink treats the resulting send
//! failure as a logged no-op.

use crate::error::{AppError, AppResult};
use crate::relay::session::RelaySession;
use crate::relay::{Disconnect, OutboundAudio};
use actix::Recipient;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// A registered connection: exactly one per live session.
#[derive(Clone)]
pub struct RegisteredClient {
    /// Audio delivery handle into the connection actor
    pub audio: Recipient<OutboundAudio>,

    /// Control handle for forced disconnects
    pub control: Recipient<Disconnect>,

    /// The session record owning this connection
    pub session: Arc<RelaySession>,
}

/// Shared session-id to connection map.
#[derive(Clone)]
pub struct SessionRegistry {
    inner: Arc<RwLock<HashMap<String, RegisteredClient>>>,
    max_sessions: usize,
}

impl SessionRegistry {
    pub fn new(max_sessions: usize) -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
            max_sessions,
        }
    }

    /// Register a new session.
    ///
    /// Fails when the id is already taken or the concurrent session cap is
    /// reached; both checks happen under the same write lock as the insert,
    /// so two racing connects cannot both win.
    pub fn insert(&self, id: &str, client: RegisteredClient) -> AppResult<()> {
        let mut sessions = self.inner.write().unwrap();

        if sessions.len() >= self.max_sessions {
            return Err(AppError::SessionLimit(self.max_sessions));
        }
        if sessions.contains_key(id) {
            return Err(AppError::DuplicateSession(id.to_string()));
        }

        sessions.insert(id.to_string(), client);
        Ok(())
    }

    /// Remove a session.
    ///
    /// Idempotent: returns `true` only for the call that actually removed the
    /// entry, so duplicate teardown paths cannot double-count.
    pub fn remove(&self, id: &str) -> bool {
        let mut sessions = self.inner.write().unwrap();
        sessions.remove(id).is_some()
    }

    pub fn get(&self, id: &str) -> Option<RegisteredClient> {
        let sessions = self.inner.read().unwrap();
        sessions.get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        let sessions = self.inner.read().unwrap();
        sessions.contains_key(id)
    }

    pub fn len(&self) -> usize {
        let sessions = self.inner.read().unwrap();
        sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn max_sessions(&self) -> usize {
        self.max_sessions
    }

    /// Snapshot of all registered entries for safe iteration outside the
    /// lock.
    pub fn snapshot(&self) -> Vec<(String, RegisteredClient)> {
        let sessions = self.inner.read().unwrap();
        sessions
            .iter()
            .map(|(id, client)| (id.clone(), client.clone()))
            .collect()
    }

    /// Session records for the health endpoints.
    pub fn sessions(&self) -> Vec<Arc<RelaySession>> {
        let sessions = self.inner.read().unwrap();
        sessions.values().map(|c| c.session.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::languages::{Language, LanguagePair};
    use actix::prelude::*;

    /// Minimal connection actor standing in for a WebSocket client.
    struct NullClient;

    impl Actor for NullClient {
        type Context = Context<Self>;
    }

    impl Handler<OutboundAudio> for NullClient {
        type Result = ();
        fn handle(&mut self, _msg: OutboundAudio, _ctx: &mut Self::Context) {}
    }

    impl Handler<Disconnect> for NullClient {
        type Result = ();
        fn handle(&mut self, _msg: Disconnect, ctx: &mut Self::Context) {
            ctx.stop();
        }
    }

    fn client(id: &str) -> RegisteredClient {
        let addr = NullClient.start();
        RegisteredClient {
            audio: addr.clone().recipient(),
            control: addr.recipient(),
            session: Arc::new(RelaySession::new(
                id.to_string(),
                LanguagePair::new(Language::English, Language::Hindi),
            )),
        }
    }

    #[actix_web::test]
    async fn test_insert_get_remove() {
        let registry = SessionRegistry::new(8);
        registry.insert("a", client("a")).unwrap();
        assert!(registry.contains("a"));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get("a").unwrap().session.id, "a");

        assert!(registry.remove("a"));
        assert!(!registry.contains("a"));
        // Second remove is a no-op, not an error
        assert!(!registry.remove("a"));
    }

    #[actix_web::test]
    async fn test_duplicate_id_rejected() {
        let registry = SessionRegistry::new(8);
        registry.insert("a", client("a")).unwrap();
        match registry.insert("a", client("a")) {
            Err(AppError::DuplicateSession(id)) => assert_eq!(id, "a"),
            other => panic!("Expected DuplicateSession, got {:?}", other.map(|_| ())),
        }
    }

    #[actix_web::test]
    async fn test_session_limit_enforced() {
        let registry = SessionRegistry::new(2);
        registry.insert("a", client("a")).unwrap();
        registry.insert("b", client("b")).unwrap();
        match registry.insert("c", client("c")) {
            Err(AppError::SessionLimit(max)) => assert_eq!(max, 2),
            other => panic!("Expected SessionLimit, got {:?}", other.map(|_| ())),
        }
        // Freeing a slot lets the next connect through
        registry.remove("a");
        assert!(registry.insert("c", client("c")).is_ok());
    }

    #[actix_web::test]
    async fn test_snapshot_is_detached() {
        let registry = SessionRegistry::new(8);
        registry.insert("a", client("a")).unwrap();
        registry.insert("b", client("b")).unwrap();

        let snapshot = registry.snapshot();
        registry.remove("a");

        // The snapshot still holds both entries; the registry does not
        assert_eq!(snapshot.len(), 2);
        assert_eq!(registry.len(), 1);
    }
}
