//! # Audio Relay Module
//!
//! The moving parts between the transport endpoint and the cloud speech
//! capabilities:
//!
//! ## Key Components:
//! - **Session Registry**: thread-safe map of session id to live connection,
//!   shared by the transport endpoint and the fan-out sink
//! - **Session Record**: per-session language pair, lifecycle state machine,
//!   and counters
//! - **Relay Sink**: fan-out of synthesized audio frames to registered
//!   connections (unicast or broadcast)
//! - **Pipeline**: per-session loop from recognition events to sequential
//!   synthesis
//!
//! One actor per WebSocket connection owns the transport; one tokio task per
//! session owns the pipeline. The registry is the only mutable state shared
//! across sessions.

pub mod pipeline;
pub mod registry;
pub mod session;
pub mod sink;

use actix::prelude::*;
use actix_web::web::Bytes;

/// A synthesized audio frame headed for one client connection.
///
/// Sending this through `Recipient::send` and awaiting the result is the
/// transport completion signal the relay sink relies on: the future resolves
/// once the connection actor has accepted the frame.
#[derive(Message, Clone)]
#[rtype(result = "()")]
pub struct OutboundAudio(pub Bytes);

/// Ask a connection actor to close its socket and shut down.
///
/// Sent by the pipeline when a cloud failure ends the session.
#[derive(Message, Clone)]
#[rtype(result = "()")]
pub struct Disconnect {
    pub reason: String,
}
