//! # Streaming Translation Recognizer
//!
//! Client for the cloud speech-recognition/translation service. One
//! recognizer is created per session at connect time and stopped when the
//! transport loop exits.
//!
//! ## Data Flow:
//! - Inbound microphone frames are pushed into [`PushAudioStream`], which
//!   feeds the service connection's writer task. The channel is unbounded:
//!   the relay carries no buffering or backpressure policy of its own.
//! - Service messages are decoded by the reader task into
//!   [`RecognitionEvent`]s on a channel the session pipeline consumes.
//!   Dropping the service connection closes the channel, which is how the
//!   pipeline learns the session is over.

use crate::config::SpeechConfig;
use crate::error::{AppError, AppResult};
use crate::languages::{Language, LanguagePair};
use actix_web::web::Bytes;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use std::collections::HashMap;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

/// Capacity of the recognition event channel.
const EVENT_CHANNEL_CAPACITY: usize = 32;

/// A discrete recognition result from the cloud service.
#[derive(Debug, Clone, PartialEq)]
pub struct RecognitionEvent {
    /// Recognized text in the speaker's language
    pub text: String,

    /// Translations keyed by target locale tag
    pub translations: HashMap<String, String>,

    /// Whether this is a finalized utterance or an interim hypothesis
    pub is_final: bool,
}

impl RecognitionEvent {
    /// Pick the translation to voice for a listener.
    ///
    /// Prefers the listener's locale, falls back to whichever translation the
    /// service sent first. An event with no translations yields nothing and
    /// is not voiced.
    pub fn translation_for(&self, listen: Language) -> Option<&str> {
        self.translations
            .get(listen.locale())
            .or_else(|| self.translations.values().next())
            .map(String::as_str)
    }
}

/// Wire format of the service's result stream.
#[derive(Debug, Deserialize)]
struct RecognizerMessage {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: String,
    #[serde(default)]
    translations: HashMap<String, String>,
    #[serde(default)]
    reason: String,
}

/// Input side of the recognizer: raw PCM frames in, no framing.
#[derive(Clone)]
pub struct PushAudioStream {
    tx: mpsc::UnboundedSender<Bytes>,
}

impl PushAudioStream {
    /// Push one inbound frame toward the recognition service.
    ///
    /// Fails only once the recognizer connection is gone.
    pub fn write(&self, frame: Bytes) -> Result<(), String> {
        self.tx
            .send(frame)
            .map_err(|_| "Recognizer audio stream is closed".to_string())
    }
}

/// Per-session connection to the recognition/translation service.
pub struct TranslationRecognizer {
    audio: PushAudioStream,
    events: Option<mpsc::Receiver<RecognitionEvent>>,
    stop: Option<oneshot::Sender<()>>,
}

impl TranslationRecognizer {
    /// Open a recognition stream for one language pair.
    ///
    /// The speak locale selects the recognition language; the listen locale
    /// is registered as the translation target.
    pub async fn connect(config: &SpeechConfig, languages: LanguagePair) -> AppResult<Self> {
        let url = format!(
            "{}?language={}&targets={}",
            config.recognition_url(),
            languages.speak.locale(),
            languages.listen.locale()
        );

        let mut request = url.into_client_request()?;
        request.headers_mut().insert(
            "Ocp-Apim-Subscription-Key",
            HeaderValue::from_str(&config.subscription_key)
                .map_err(|e| AppError::Speech(format!("Invalid subscription key: {}", e)))?,
        );

        let (stream, _response) = connect_async(request).await?;
        debug!(languages = %languages, "Recognizer connected");

        let (ws_tx, ws_rx) = stream.split();
        let (audio_tx, audio_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (stop_tx, stop_rx) = oneshot::channel();

        tokio::spawn(pump_audio(ws_tx, audio_rx, stop_rx));
        tokio::spawn(pump_events(ws_rx, event_tx));

        Ok(Self {
            audio: PushAudioStream { tx: audio_tx },
            events: Some(event_rx),
            stop: Some(stop_tx),
        })
    }

    /// Handle for the transport loop to push inbound frames.
    pub fn audio_sink(&self) -> PushAudioStream {
        self.audio.clone()
    }

    /// Take the event channel; consumed once by the session pipeline.
    pub fn take_events(&mut self) -> Option<mpsc::Receiver<RecognitionEvent>> {
        self.events.take()
    }

    /// Stop recognition.
    ///
    /// Signals the writer task to close the service connection; the actual
    /// close happens asynchronously. Safe to call more than once.
    pub fn stop(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
    }
}

type WsSink = futures_util::stream::SplitSink<
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
    Message,
>;
type WsStream = futures_util::stream::SplitStream<
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
>;

/// Forward inbound audio frames to the service until the session ends.
async fn pump_audio(
    mut ws_tx: WsSink,
    mut audio_rx: mpsc::UnboundedReceiver<Bytes>,
    mut stop_rx: oneshot::Receiver<()>,
) {
    loop {
        tokio::select! {
            frame = audio_rx.recv() => match frame {
                Some(frame) => {
                    if let Err(err) = ws_tx.send(Message::Binary(frame.to_vec())).await {
                        warn!(error = %err, "Failed to push audio to recognizer");
                        break;
                    }
                }
                None => break,
            },
            _ = &mut stop_rx => break,
        }
    }
    let _ = ws_tx.send(Message::Close(None)).await;
    debug!("Recognizer audio pump stopped");
}

/// Decode service messages into recognition events.
///
/// Dropping `event_tx` at the end is what closes the pipeline's event loop.
async fn pump_events(mut ws_rx: WsStream, event_tx: mpsc::Sender<RecognitionEvent>) {
    while let Some(message) = ws_rx.next().await {
        match message {
            Ok(Message::Text(payload)) => {
                let parsed: RecognizerMessage = match serde_json::from_str(&payload) {
                    Ok(parsed) => parsed,
                    Err(err) => {
                        warn!(error = %err, "Unparseable recognizer message");
                        continue;
                    }
                };
                match parsed.kind.as_str() {
                    "recognizing" => {
                        let event = RecognitionEvent {
                            text: parsed.text,
                            translations: parsed.translations,
                            is_final: false,
                        };
                        if event_tx.send(event).await.is_err() {
                            break;
                        }
                    }
                    "recognized" => {
                        let event = RecognitionEvent {
                            text: parsed.text,
                            translations: parsed.translations,
                            is_final: true,
                        };
                        if event_tx.send(event).await.is_err() {
                            break;
                        }
                    }
                    "session.started" => info!("Recognition session started"),
                    "session.stopped" => {
                        info!("Recognition session stopped");
                        break;
                    }
                    "canceled" => {
                        error!(reason = %parsed.reason, "Recognition canceled");
                        break;
                    }
                    other => debug!(kind = %other, "Ignoring recognizer message"),
                }
            }
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(err) => {
                error!(error = %err, "Recognizer stream error");
                break;
            }
        }
    }
    debug!("Recognizer event pump stopped");
}
