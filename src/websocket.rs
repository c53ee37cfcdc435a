//! # WebSocket Transport Endpoint
//!
//! Handles relay connections at `/ws/{client_id}?speak=<locale>&listen=<locale>`.
//!
//! ## Connection Protocol:
//! 1. **Negotiation**: both language selectors are validated against the
//!    catalog before the upgrade; bad values fail with a 400 and no audio is
//!    ever accepted
//! 2. **Setup**: the recognizer connects, the session registers, the pipeline
//!    task starts
//! 3. **Streaming**: every inbound binary frame is raw 16-bit PCM pushed into
//!    the recognizer; synthesized audio arrives as outbound binary frames
//! 4. **Teardown**: close or error stops the recognizer and removes the
//!    registry entry exactly once
//!
//! Each connection is an independent actor; sessions share nothing but the
//! registry.

use crate::audio;
use crate::error::{AppError, AppResult};
use crate::languages::LanguagePair;
use crate::relay::pipeline;
use crate::relay::registry::{RegisteredClient, SessionRegistry};
use crate::relay::session::RelaySession;
use crate::relay::sink::AudioRelaySink;
use crate::relay::{Disconnect, OutboundAudio};
use crate::speech::recognizer::{PushAudioStream, RecognitionEvent, TranslationRecognizer};
use crate::speech::synthesizer::{StreamingSynthesizer, TextToSpeech};
use crate::speech::translator::Translator;
use crate::state::AppState;
use actix::prelude::*;
use actix_web::{web, HttpRequest, HttpResponse, Result as ActixResult};
use actix_web_actors::ws;
use serde::Deserialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// How often the server pings an idle connection.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// How long a connection may stay silent before it is dropped.
const CLIENT_TIMEOUT: Duration = Duration::from_secs(60);

/// Query parameters carried on the upgrade request.
#[derive(Debug, Deserialize)]
pub struct LanguageQuery {
    pub speak: String,
    pub listen: String,
}

/// Validate both language selectors against the catalog.
pub fn parse_language_pair(query: &LanguageQuery) -> AppResult<LanguagePair> {
    Ok(LanguagePair::new(
        query.speak.parse()?,
        query.listen.parse()?,
    ))
}

/// Pipeline pieces built during connection setup, consumed when the actor
/// starts.
struct PipelineParts {
    events: mpsc::Receiver<RecognitionEvent>,
    tts: TextToSpeech,
    translator: Option<Translator>,
}

/// Actor owning one relay connection.
pub struct RelayWebSocket {
    session: Arc<RelaySession>,
    registry: SessionRegistry,
    state: AppState,
    audio_in: PushAudioStream,
    recognizer: Option<TranslationRecognizer>,
    pipeline_parts: Option<PipelineParts>,
    registered: bool,
    last_heartbeat: Instant,
    input_format: audio::AudioFormat,
}

impl RelayWebSocket {
    fn new(
        session: Arc<RelaySession>,
        registry: SessionRegistry,
        state: AppState,
        recognizer: TranslationRecognizer,
        parts: PipelineParts,
        input_format: audio::AudioFormat,
    ) -> Self {
        Self {
            audio_in: recognizer.audio_sink(),
            session,
            registry,
            state,
            recognizer: Some(recognizer),
            pipeline_parts: Some(parts),
            registered: false,
            last_heartbeat: Instant::now(),
            input_format,
        }
    }

    /// Feed one inbound frame into the recognizer.
    fn handle_audio_frame(&mut self, data: web::Bytes, ctx: &mut ws::WebsocketContext<Self>) {
        if let Err(err) = audio::validate_frame(&data) {
            // Logged server-side only; the stream keeps going
            warn!(session_id = %self.session.id, error = %err, "Dropping malformed audio frame");
            return;
        }

        self.session.record_audio_in(data.len());
        debug!(
            session_id = %self.session.id,
            bytes = data.len(),
            duration_ms = self.input_format.frame_duration_ms(data.len()),
            "Inbound audio frame"
        );

        if let Err(err) = self.audio_in.write(data) {
            warn!(session_id = %self.session.id, error = %err, "Recognizer input gone, closing");
            ctx.stop();
        }
    }

    fn start_heartbeat(&self, ctx: &mut ws::WebsocketContext<Self>) {
        ctx.run_interval(HEARTBEAT_INTERVAL, |act, ctx| {
            if Instant::now().duration_since(act.last_heartbeat) > CLIENT_TIMEOUT {
                warn!(session_id = %act.session.id, "Heartbeat timeout, closing connection");
                ctx.stop();
            } else {
                ctx.ping(b"");
            }
        });
    }
}

impl Actor for RelayWebSocket {
    type Context = ws::WebsocketContext<Self>;

    /// Register the session and start its pipeline.
    fn started(&mut self, ctx: &mut Self::Context) {
        let client = RegisteredClient {
            audio: ctx.address().recipient(),
            control: ctx.address().recipient(),
            session: self.session.clone(),
        };

        if let Err(err) = self.registry.insert(&self.session.id, client) {
            // The pre-upgrade checks lost a race; close the fresh socket
            error!(session_id = %self.session.id, error = %err, "Session registration failed");
            ctx.close(Some(ws::CloseReason {
                code: ws::CloseCode::Again,
                description: Some(err.to_string()),
            }));
            ctx.stop();
            return;
        }
        self.registered = true;
        self.state.session_started();
        info!(
            session_id = %self.session.id,
            languages = %self.session.languages,
            "Relay session registered"
        );

        if let Some(parts) = self.pipeline_parts.take() {
            pipeline::spawn(
                self.session.clone(),
                parts.events,
                parts.tts,
                parts.translator,
                self.registry.clone(),
            );
        }

        self.start_heartbeat(ctx);
    }

    /// Tear the session down exactly once, whatever path got us here.
    fn stopped(&mut self, _ctx: &mut Self::Context) {
        if let Some(mut recognizer) = self.recognizer.take() {
            recognizer.stop();
        }

        // Only the connection that actually registered may deregister; a
        // duplicate-id connection must not evict the original's entry.
        if self.registered && self.registry.remove(&self.session.id) {
            self.state.session_ended();
        }
        self.session.stop();

        info!(session_id = %self.session.id, "Relay session closed");
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for RelayWebSocket {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Binary(data)) => {
                self.handle_audio_frame(data, ctx);
            }
            Ok(ws::Message::Text(_)) => {
                // The wire protocol is binary-only
                debug!(session_id = %self.session.id, "Ignoring text frame");
            }
            Ok(ws::Message::Ping(data)) => {
                ctx.pong(&data);
                self.last_heartbeat = Instant::now();
            }
            Ok(ws::Message::Pong(_)) => {
                self.last_heartbeat = Instant::now();
            }
            Ok(ws::Message::Close(reason)) => {
                info!(session_id = %self.session.id, reason = ?reason, "Client closed connection");
                ctx.stop();
            }
            Ok(ws::Message::Continuation(_)) => {
                warn!(session_id = %self.session.id, "Unexpected continuation frame");
            }
            Ok(ws::Message::Nop) => {}
            Err(err) => {
                error!(session_id = %self.session.id, error = %err, "WebSocket protocol error");
                ctx.stop();
            }
        }
    }
}

/// Synthesized audio headed out to this client.
impl Handler<OutboundAudio> for RelayWebSocket {
    type Result = ();

    fn handle(&mut self, msg: OutboundAudio, ctx: &mut Self::Context) {
        ctx.binary(msg.0);
    }
}

/// Forced close requested by the pipeline.
impl Handler<Disconnect> for RelayWebSocket {
    type Result = ();

    fn handle(&mut self, msg: Disconnect, ctx: &mut Self::Context) {
        info!(session_id = %self.session.id, reason = %msg.reason, "Closing session");
        ctx.close(Some(ws::CloseReason {
            code: ws::CloseCode::Error,
            description: Some(msg.reason),
        }));
        ctx.stop();
    }
}

/// WebSocket endpoint with a client-supplied session id.
pub async fn relay_websocket(
    req: HttpRequest,
    stream: web::Payload,
    path: web::Path<String>,
    query: web::Query<LanguageQuery>,
    state: web::Data<AppState>,
    registry: web::Data<SessionRegistry>,
) -> ActixResult<HttpResponse> {
    start_relay(req, stream, path.into_inner(), &query, &state, &registry).await
}

/// WebSocket endpoint that generates a session id.
pub async fn relay_websocket_autoid(
    req: HttpRequest,
    stream: web::Payload,
    query: web::Query<LanguageQuery>,
    state: web::Data<AppState>,
    registry: web::Data<SessionRegistry>,
) -> ActixResult<HttpResponse> {
    let client_id = Uuid::new_v4().to_string();
    start_relay(req, stream, client_id, &query, &state, &registry).await
}

/// Negotiate languages, build the per-session plumbing, and upgrade.
async fn start_relay(
    req: HttpRequest,
    stream: web::Payload,
    client_id: String,
    query: &LanguageQuery,
    state: &web::Data<AppState>,
    registry: &web::Data<SessionRegistry>,
) -> ActixResult<HttpResponse> {
    let languages = parse_language_pair(query)?;
    let config = state.get_config();

    // Client-visible rejections before the upgrade; the registry re-checks
    // both under its lock at registration time.
    if registry.len() >= config.performance.max_concurrent_sessions {
        return Err(AppError::SessionLimit(config.performance.max_concurrent_sessions).into());
    }
    if registry.contains(&client_id) {
        return Err(AppError::DuplicateSession(client_id).into());
    }

    info!(
        client_id = %client_id,
        languages = %languages,
        peer = ?req.connection_info().peer_addr(),
        "New relay connection"
    );

    let mut recognizer = TranslationRecognizer::connect(&config.speech, languages)
        .await
        .map_err(|err| {
            error!(client_id = %client_id, error = %err, "Recognizer setup failed");
            err
        })?;
    let events = recognizer
        .take_events()
        .ok_or_else(|| AppError::Internal("Recognizer events already consumed".to_string()))?;

    let session = Arc::new(RelaySession::new(client_id, languages));
    let sink = AudioRelaySink::new(
        session.clone(),
        config.relay.mode,
        registry.get_ref().clone(),
        state.get_ref().clone(),
    );
    let backend = StreamingSynthesizer::new(
        &config.speech,
        &config.audio,
        languages.listen.voice(),
        sink,
    );
    let tts = TextToSpeech::new(Arc::new(backend));
    let translator = if config.translator.enabled {
        Some(Translator::new(&config.translator))
    } else {
        None
    };

    let websocket = RelayWebSocket::new(
        session,
        registry.get_ref().clone(),
        state.get_ref().clone(),
        recognizer,
        PipelineParts {
            events,
            tts,
            translator,
        },
        audio::AudioFormat::input(config.audio.input_sample_rate),
    );

    ws::start(websocket, &req, stream)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::languages::Language;

    #[test]
    fn test_language_pair_parsing() {
        let query = LanguageQuery {
            speak: "en-US".to_string(),
            listen: "hi-IN".to_string(),
        };
        let pair = parse_language_pair(&query).unwrap();
        assert_eq!(pair.speak, Language::English);
        assert_eq!(pair.listen, Language::Hindi);
    }

    #[test]
    fn test_language_pair_parsing_rejects_unknown_locale() {
        let query = LanguageQuery {
            speak: "en-US".to_string(),
            listen: "de-DE".to_string(),
        };
        match parse_language_pair(&query) {
            Err(AppError::InvalidLanguage(value)) => assert_eq!(value, "de-DE"),
            other => panic!("Expected InvalidLanguage, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_same_language_both_ways_is_allowed() {
        let query = LanguageQuery {
            speak: "es-ES".to_string(),
            listen: "es-ES".to_string(),
        };
        assert!(parse_language_pair(&query).is_ok());
    }
}
