//! # Audio Relay Sink
//!
//! Fan-out of synthesized audio. The synthesis client calls `write` for every
//! audio frame the cloud returns; the sink dispatches the frame to registered
//! connections and only returns once every delivery has been confirmed by the
//! connection actor, so the synthesis path can never race ahead of the
//! transport.
//!
//! ## Dispatch Policies:
//! - **Unicast**: the frame goes back to the originating session only
//! - **Broadcast**: the frame goes to every other registered session; the
//!   sender never hears itself (unicast is the self-echo mode)
//!
//! ## Failure Semantics:
//! A failed delivery is caught and logged and the write reports 0 bytes
//! written. Callers treat 0 as "no effect" and carry on; one unreachable
//! peer does not end anyone's session. A delivery attempted against an entry
//! that disconnected mid-utterance lands here as an ordinary failed send.

use crate::config::DispatchMode;
use crate::relay::registry::{RegisteredClient, SessionRegistry};
use crate::relay::session::RelaySession;
use crate::relay::OutboundAudio;
use crate::state::AppState;
use actix_web::web::Bytes;
use std::sync::Arc;
use tracing::{debug, warn};

/// Per-session dispatcher for synthesized audio frames.
#[derive(Clone)]
pub struct AudioRelaySink {
    session: Arc<RelaySession>,
    mode: DispatchMode,
    registry: SessionRegistry,
    state: AppState,
}

impl AudioRelaySink {
    pub fn new(
        session: Arc<RelaySession>,
        mode: DispatchMode,
        registry: SessionRegistry,
        state: AppState,
    ) -> Self {
        Self {
            session,
            mode,
            registry,
            state,
        }
    }

    pub fn mode(&self) -> DispatchMode {
        self.mode
    }

    /// Dispatch one synthesized frame.
    ///
    /// Returns the frame length when every attempted delivery succeeded, 0
    /// when any delivery failed or, in unicast mode, when the originating
    /// connection is no longer registered.
    pub async fn write(&self, frame: Bytes) -> usize {
        let len = frame.len();
        let mut failed = false;

        match self.mode {
            DispatchMode::Unicast => match self.registry.get(&self.session.id) {
                Some(client) => {
                    if !self.deliver(&self.session.id, &client, frame).await {
                        failed = true;
                    }
                }
                None => {
                    debug!(
                        session_id = %self.session.id,
                        "Dropping synthesized frame, connection no longer registered"
                    );
                    failed = true;
                }
            },
            DispatchMode::Broadcast => {
                for (peer_id, client) in self.registry.snapshot() {
                    if peer_id == self.session.id {
                        continue;
                    }
                    if !self.deliver(&peer_id, &client, frame.clone()).await {
                        failed = true;
                    }
                }
            }
        }

        if failed {
            self.session.record_relay_failure();
            self.state.record_relay_failure();
            return 0;
        }
        len
    }

    /// Send one frame to one connection and wait for the actor to accept it.
    async fn deliver(&self, peer_id: &str, client: &RegisteredClient, frame: Bytes) -> bool {
        let len = frame.len();
        match client.audio.send(OutboundAudio(frame)).await {
            Ok(()) => {
                self.state.record_relayed_frame(len);
                true
            }
            Err(err) => {
                warn!(
                    session_id = %self.session.id,
                    peer_id = %peer_id,
                    error = %err,
                    "Failed to deliver synthesized frame"
                );
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::languages::{Language, LanguagePair};
    use crate::relay::Disconnect;
    use actix::prelude::*;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Connection stand-in that records every frame it accepts.
    struct FakeClient {
        frames: Arc<Mutex<Vec<Bytes>>>,
    }

    impl Actor for FakeClient {
        type Context = Context<Self>;
    }

    impl Handler<OutboundAudio> for FakeClient {
        type Result = ();
        fn handle(&mut self, msg: OutboundAudio, _ctx: &mut Self::Context) {
            self.frames.lock().unwrap().push(msg.0);
        }
    }

    impl Handler<Disconnect> for FakeClient {
        type Result = ();
        fn handle(&mut self, _msg: Disconnect, ctx: &mut Self::Context) {
            ctx.stop();
        }
    }

    fn session(id: &str) -> Arc<RelaySession> {
        Arc::new(RelaySession::new(
            id.to_string(),
            LanguagePair::new(Language::English, Language::Spanish),
        ))
    }

    fn register(registry: &SessionRegistry, id: &str) -> (Addr<FakeClient>, Arc<Mutex<Vec<Bytes>>>) {
        let frames = Arc::new(Mutex::new(Vec::new()));
        let addr = FakeClient {
            frames: frames.clone(),
        }
        .start();
        registry
            .insert(
                id,
                RegisteredClient {
                    audio: addr.clone().recipient(),
                    control: addr.clone().recipient(),
                    session: session(id),
                },
            )
            .unwrap();
        (addr, frames)
    }

    #[actix_web::test]
    async fn test_unicast_delivers_only_to_sender() {
        let registry = SessionRegistry::new(8);
        let state = AppState::new(AppConfig::default());
        let (_a, frames_a) = register(&registry, "a");
        let (_b, frames_b) = register(&registry, "b");

        let sink = AudioRelaySink::new(session("a"), DispatchMode::Unicast, registry, state);
        let frame = Bytes::from_static(&[1, 2, 3, 4]);
        assert_eq!(sink.write(frame).await, 4);

        assert_eq!(frames_a.lock().unwrap().len(), 1);
        assert!(frames_b.lock().unwrap().is_empty());
    }

    #[actix_web::test]
    async fn test_broadcast_skips_the_sender() {
        let registry = SessionRegistry::new(8);
        let state = AppState::new(AppConfig::default());
        let (_a, frames_a) = register(&registry, "a");
        let (_b, frames_b) = register(&registry, "b");
        let (_c, frames_c) = register(&registry, "c");

        let sink = AudioRelaySink::new(
            session("a"),
            DispatchMode::Broadcast,
            registry,
            state.clone(),
        );
        let frame = Bytes::from_static(&[9, 9, 9, 9]);
        assert_eq!(sink.write(frame).await, 4);

        assert!(frames_a.lock().unwrap().is_empty());
        assert_eq!(frames_b.lock().unwrap().len(), 1);
        assert_eq!(frames_c.lock().unwrap().len(), 1);
        assert_eq!(state.get_metrics_snapshot().frames_relayed, 2);
    }

    #[actix_web::test]
    async fn test_broadcast_with_no_peers_is_a_clean_write() {
        let registry = SessionRegistry::new(8);
        let state = AppState::new(AppConfig::default());
        let (_a, frames_a) = register(&registry, "a");

        let sink = AudioRelaySink::new(session("a"), DispatchMode::Broadcast, registry, state);
        assert_eq!(sink.write(Bytes::from_static(&[0, 0])).await, 2);
        assert!(frames_a.lock().unwrap().is_empty());
    }

    #[actix_web::test]
    async fn test_unicast_vacated_entry_reports_zero() {
        let registry = SessionRegistry::new(8);
        let state = AppState::new(AppConfig::default());

        let sink = AudioRelaySink::new(
            session("gone"),
            DispatchMode::Unicast,
            registry,
            state.clone(),
        );
        assert_eq!(sink.write(Bytes::from_static(&[0, 0])).await, 0);
        assert_eq!(state.get_metrics_snapshot().relay_failures, 1);
    }

    #[actix_web::test]
    async fn test_delivery_to_stopped_connection_fails_without_panic() {
        let registry = SessionRegistry::new(8);
        let state = AppState::new(AppConfig::default());
        let (addr_b, frames_b) = register(&registry, "b");
        let (_c, frames_c) = register(&registry, "c");

        // B's actor goes away but its registry entry lingers, as it does when
        // a peer disconnects while synthesis is in flight.
        addr_b.send(Disconnect {
            reason: "test".to_string(),
        })
        .await
        .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let sink = AudioRelaySink::new(
            session("a"),
            DispatchMode::Broadcast,
            registry,
            state.clone(),
        );
        // Delivery to B fails and is swallowed; C still gets the frame
        assert_eq!(sink.write(Bytes::from_static(&[5, 5])).await, 0);
        assert!(frames_b.lock().unwrap().is_empty());
        assert_eq!(frames_c.lock().unwrap().len(), 1);
        assert_eq!(state.get_metrics_snapshot().relay_failures, 1);
    }
}
