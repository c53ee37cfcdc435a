//! # Relay Session Record
//!
//! Per-session identity, language pair, lifecycle state machine, and
//! counters. One record is created when a connection upgrades and lives until
//! the transport loop exits.
//!
//! ## Session Lifecycle:
//! `Created -> Listening -> (Recognizing* -> Synthesizing)* -> Stopped`
//!
//! - **Created**: connection accepted, pipeline not yet running
//! - **Listening**: pipeline waiting for recognition events
//! - **Recognizing**: an interim (non-final) hypothesis arrived
//! - **Synthesizing**: a finalized utterance is being voiced; the pipeline
//!   holds here until synthesis completes, which is what keeps utterances
//!   strictly sequential
//! - **Stopped**: terminal; reachable from every state, idempotent

use crate::languages::LanguagePair;
use chrono::{DateTime, Utc};
use std::sync::RwLock;

/// Lifecycle state of a relay session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Created,
    Listening,
    Recognizing,
    Synthesizing,
    Stopped,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Created => "created",
            SessionState::Listening => "listening",
            SessionState::Recognizing => "recognizing",
            SessionState::Synthesizing => "synthesizing",
            SessionState::Stopped => "stopped",
        }
    }
}

/// Counters tracked per session.
#[derive(Debug, Default, Clone)]
pub struct SessionCounters {
    /// Raw microphone bytes accepted from the client
    pub audio_bytes_in: u64,

    /// Finalized utterances voiced through synthesis
    pub utterances: u64,

    /// Fan-out deliveries attributed to this session that failed
    pub relay_failures: u64,
}

/// One end-to-end relay session.
///
/// Shared as `Arc<RelaySession>` between the connection actor, the pipeline
/// task, and the relay sink; interior state sits behind its own locks.
#[derive(Debug)]
pub struct RelaySession {
    /// Opaque session key, also the registry key
    pub id: String,

    /// Negotiated speak/listen languages
    pub languages: LanguagePair,

    /// When the connection was accepted
    pub created_at: DateTime<Utc>,

    state: RwLock<SessionState>,
    counters: RwLock<SessionCounters>,
}

impl RelaySession {
    pub fn new(id: String, languages: LanguagePair) -> Self {
        Self {
            id,
            languages,
            created_at: Utc::now(),
            state: RwLock::new(SessionState::Created),
            counters: RwLock::new(SessionCounters::default()),
        }
    }

    pub fn state(&self) -> SessionState {
        *self.state.read().unwrap()
    }

    pub fn is_stopped(&self) -> bool {
        self.state() == SessionState::Stopped
    }

    /// `Created -> Listening`, entered once when the pipeline starts.
    pub fn mark_listening(&self) -> Result<(), String> {
        self.transition(SessionState::Listening, |current| {
            matches!(current, SessionState::Created)
        })
    }

    /// An interim hypothesis arrived. Valid while the pipeline is between
    /// utterances.
    pub fn mark_recognizing(&self) -> Result<(), String> {
        self.transition(SessionState::Recognizing, |current| {
            matches!(current, SessionState::Listening | SessionState::Recognizing)
        })
    }

    /// A finalized utterance is being voiced.
    pub fn mark_synthesizing(&self) -> Result<(), String> {
        self.transition(SessionState::Synthesizing, |current| {
            matches!(
                current,
                SessionState::Listening | SessionState::Recognizing
            )
        })
    }

    /// Synthesis for the current utterance completed; back to listening.
    pub fn utterance_done(&self) -> Result<(), String> {
        {
            let mut counters = self.counters.write().unwrap();
            counters.utterances += 1;
        }
        self.transition(SessionState::Listening, |current| {
            matches!(current, SessionState::Synthesizing)
        })
    }

    /// Terminal transition, valid from every state.
    ///
    /// Returns `true` the first time the session actually stops and `false`
    /// on repeat calls, so both the disconnect handler and an error handler
    /// can call it without tripping over each other.
    pub fn stop(&self) -> bool {
        let mut state = self.state.write().unwrap();
        if *state == SessionState::Stopped {
            return false;
        }
        *state = SessionState::Stopped;
        true
    }

    pub fn record_audio_in(&self, bytes: usize) {
        let mut counters = self.counters.write().unwrap();
        counters.audio_bytes_in += bytes as u64;
    }

    pub fn record_relay_failure(&self) {
        let mut counters = self.counters.write().unwrap();
        counters.relay_failures += 1;
    }

    pub fn counters(&self) -> SessionCounters {
        self.counters.read().unwrap().clone()
    }

    /// Session age in seconds, for the health endpoints.
    pub fn age_seconds(&self) -> i64 {
        Utc::now().signed_duration_since(self.created_at).num_seconds()
    }

    fn transition(
        &self,
        target: SessionState,
        allowed: impl Fn(SessionState) -> bool,
    ) -> Result<(), String> {
        let mut state = self.state.write().unwrap();
        if !allowed(*state) {
            return Err(format!(
                "Cannot move session '{}' from {} to {}",
                self.id,
                state.as_str(),
                target.as_str()
            ));
        }
        *state = target;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::languages::Language;

    fn session() -> RelaySession {
        RelaySession::new(
            "client-1".to_string(),
            LanguagePair::new(Language::English, Language::Spanish),
        )
    }

    #[test]
    fn test_normal_lifecycle() {
        let s = session();
        assert_eq!(s.state(), SessionState::Created);
        s.mark_listening().unwrap();
        s.mark_recognizing().unwrap();
        s.mark_recognizing().unwrap();
        s.mark_synthesizing().unwrap();
        s.utterance_done().unwrap();
        assert_eq!(s.state(), SessionState::Listening);
        // Second utterance without an interim hypothesis first
        s.mark_synthesizing().unwrap();
        s.utterance_done().unwrap();
        assert_eq!(s.counters().utterances, 2);
    }

    #[test]
    fn test_illegal_transitions_rejected() {
        let s = session();
        assert!(s.mark_synthesizing().is_err());
        s.mark_listening().unwrap();
        assert!(s.mark_listening().is_err());
        assert!(s.utterance_done().is_err());
    }

    #[test]
    fn test_stop_is_idempotent() {
        let s = session();
        s.mark_listening().unwrap();
        assert!(s.stop());
        assert!(!s.stop());
        assert!(s.is_stopped());
        // Nothing moves a stopped session
        assert!(s.mark_recognizing().is_err());
    }

    #[test]
    fn test_counters() {
        let s = session();
        s.record_audio_in(320);
        s.record_audio_in(320);
        s.record_relay_failure();
        let counters = s.counters();
        assert_eq!(counters.audio_bytes_in, 640);
        assert_eq!(counters.relay_failures, 1);
    }
}
