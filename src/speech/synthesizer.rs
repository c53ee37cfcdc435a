//! # Streaming Text-to-Speech
//!
//! Client for the cloud synthesis service's text-stream input mode plus the
//! per-utterance request lifecycle the pipeline drives.
//!
//! ## Request Lifecycle:
//! `Idle -> RequestOpen -> Writing -> Closing -> Idle`
//!
//! Exactly one synthesis request can be open per session at a time; `open`
//! while a request is in flight is an error. The pipeline closes the input
//! stream once all text for the utterance has been written, then awaits the
//! completion signal before the next utterance may begin. Audio frames the
//! service produces are handed to the relay sink as they arrive, on the
//! synthesis side of the session, not the transport side.

use crate::config::{AudioSettings, SpeechConfig};
use crate::error::{AppError, AppResult};
use crate::relay::sink::AudioRelaySink;
use actix_web::web::Bytes;
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, warn};

/// Capacity of the per-request text chunk channel.
const TEXT_CHANNEL_CAPACITY: usize = 32;

/// Lifecycle state of the current synthesis request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    Idle,
    RequestOpen,
    Writing,
    Closing,
}

impl RequestState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestState::Idle => "idle",
            RequestState::RequestOpen => "request_open",
            RequestState::Writing => "writing",
            RequestState::Closing => "closing",
        }
    }
}

/// A live synthesis request handed out by a backend.
///
/// Text chunks go in through the sender; the completion signal resolves once
/// the service has produced all audio for the request.
pub struct SynthesisHandle {
    text: Option<mpsc::Sender<String>>,
    done: oneshot::Receiver<AppResult<u64>>,
}

impl SynthesisHandle {
    pub fn new(text: mpsc::Sender<String>, done: oneshot::Receiver<AppResult<u64>>) -> Self {
        Self {
            text: Some(text),
            done,
        }
    }
}

/// The synthesis capability behind the request lifecycle.
///
/// The production implementation talks to the cloud service; tests substitute
/// an in-memory backend.
#[async_trait]
pub trait SynthesisBackend: Send + Sync {
    /// Begin a new synthesis request.
    async fn open(&self) -> AppResult<SynthesisHandle>;
}

/// Per-utterance synthesis driver with an explicit request state machine.
pub struct TextToSpeech {
    backend: Arc<dyn SynthesisBackend>,
    state: RequestState,
    handle: Option<SynthesisHandle>,
}

impl TextToSpeech {
    pub fn new(backend: Arc<dyn SynthesisBackend>) -> Self {
        Self {
            backend,
            state: RequestState::Idle,
            handle: None,
        }
    }

    pub fn state(&self) -> RequestState {
        self.state
    }

    /// Open a synthesis request for the next utterance.
    ///
    /// Invariant: only valid while idle. A second `open` without a completed
    /// `close`/`await_completion` cycle is refused rather than leaking the
    /// in-flight request.
    pub async fn open(&mut self) -> AppResult<()> {
        if self.state != RequestState::Idle {
            return Err(AppError::Internal(format!(
                "Synthesis request already open (state: {})",
                self.state.as_str()
            )));
        }
        self.handle = Some(self.backend.open().await?);
        self.state = RequestState::RequestOpen;
        Ok(())
    }

    /// Stream one text chunk into the open request.
    pub async fn write(&mut self, chunk: &str) -> AppResult<()> {
        if !matches!(self.state, RequestState::RequestOpen | RequestState::Writing) {
            return Err(AppError::Internal(format!(
                "Cannot write synthesis text in state {}",
                self.state.as_str()
            )));
        }
        let sender = self
            .handle
            .as_ref()
            .and_then(|h| h.text.as_ref())
            .ok_or_else(|| AppError::Internal("Synthesis input stream missing".to_string()))?;
        sender
            .send(chunk.to_string())
            .await
            .map_err(|_| AppError::Speech("Synthesis input stream closed".to_string()))?;
        self.state = RequestState::Writing;
        Ok(())
    }

    /// Close the request's input stream; no more text for this utterance.
    pub fn close(&mut self) -> AppResult<()> {
        if !matches!(self.state, RequestState::RequestOpen | RequestState::Writing) {
            return Err(AppError::Internal(format!(
                "Cannot close synthesis request in state {}",
                self.state.as_str()
            )));
        }
        if let Some(handle) = self.handle.as_mut() {
            // Dropping the sender is the end-of-input signal
            handle.text.take();
        }
        self.state = RequestState::Closing;
        Ok(())
    }

    /// Block until the service has finished producing audio.
    ///
    /// Returns the number of synthesized bytes. The request returns to idle
    /// whether synthesis succeeded or not.
    pub async fn await_completion(&mut self) -> AppResult<u64> {
        if self.state != RequestState::Closing {
            return Err(AppError::Internal(format!(
                "Cannot await synthesis completion in state {}",
                self.state.as_str()
            )));
        }
        let handle = self
            .handle
            .take()
            .ok_or_else(|| AppError::Internal("Synthesis request missing".to_string()))?;
        self.state = RequestState::Idle;
        match handle.done.await {
            Ok(result) => result,
            Err(_) => Err(AppError::Speech(
                "Synthesis ended without a completion signal".to_string(),
            )),
        }
    }

    /// Abandon the current request after a failure and return to idle.
    pub fn reset(&mut self) {
        self.handle = None;
        self.state = RequestState::Idle;
    }
}

/// Wire format of the synthesis service's control stream.
#[derive(Debug, Deserialize)]
struct SynthesizerMessage {
    kind: String,
    #[serde(default)]
    message: String,
}

/// Cloud synthesis backend speaking the service's v2 websocket protocol.
pub struct StreamingSynthesizer {
    url: String,
    subscription_key: String,
    voice: String,
    output_format: String,
    sink: AudioRelaySink,
}

impl StreamingSynthesizer {
    pub fn new(
        config: &SpeechConfig,
        audio: &AudioSettings,
        voice: &str,
        sink: AudioRelaySink,
    ) -> Self {
        Self {
            url: config.synthesis_url(),
            subscription_key: config.subscription_key.clone(),
            voice: voice.to_string(),
            output_format: format!(
                "raw-{}khz-16bit-mono-pcm",
                audio.output_sample_rate / 1000
            ),
            sink,
        }
    }
}

#[async_trait]
impl SynthesisBackend for StreamingSynthesizer {
    async fn open(&self) -> AppResult<SynthesisHandle> {
        let mut request = self.url.as_str().into_client_request()?;
        request.headers_mut().insert(
            "Ocp-Apim-Subscription-Key",
            HeaderValue::from_str(&self.subscription_key)
                .map_err(|e| AppError::Speech(format!("Invalid subscription key: {}", e)))?,
        );

        let (stream, _response) = connect_async(request).await?;
        let (mut ws_tx, ws_rx) = stream.split();

        // Generous frame timeouts so a slow language-model stream upstream
        // does not make the service cancel the request.
        let config_message = json!({
            "kind": "speech.config",
            "voice": self.voice,
            "output_format": self.output_format,
            "properties": {
                "frame_timeout_interval": "100000000",
                "rtf_timeout_threshold": "10"
            }
        });
        ws_tx
            .send(Message::Text(config_message.to_string()))
            .await?;

        let (text_tx, text_rx) = mpsc::channel(TEXT_CHANNEL_CAPACITY);
        let (done_tx, done_rx) = oneshot::channel();

        tokio::spawn(pump_text(ws_tx, text_rx));
        tokio::spawn(pump_synthesized_audio(ws_rx, self.sink.clone(), done_tx));

        Ok(SynthesisHandle::new(text_tx, done_rx))
    }
}

type WsSink = futures_util::stream::SplitSink<
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
    Message,
>;
type WsStream = futures_util::stream::SplitStream<
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
>;

/// Forward text chunks to the service, then the end-of-input marker.
async fn pump_text(mut ws_tx: WsSink, mut text_rx: mpsc::Receiver<String>) {
    while let Some(chunk) = text_rx.recv().await {
        let payload = json!({"kind": "input.text", "text": chunk});
        if let Err(err) = ws_tx.send(Message::Text(payload.to_string())).await {
            warn!(error = %err, "Failed to push text to synthesizer");
            return;
        }
    }
    let end = json!({"kind": "input.end"});
    if let Err(err) = ws_tx.send(Message::Text(end.to_string())).await {
        warn!(error = %err, "Failed to close synthesizer input stream");
    }
}

/// Relay synthesized audio to the sink and resolve the completion signal.
async fn pump_synthesized_audio(
    mut ws_rx: WsStream,
    sink: AudioRelaySink,
    done_tx: oneshot::Sender<AppResult<u64>>,
) {
    let mut done_tx = Some(done_tx);
    let mut total_bytes: u64 = 0;

    while let Some(message) = ws_rx.next().await {
        match message {
            Ok(Message::Binary(audio)) => {
                if audio.is_empty() {
                    continue;
                }
                total_bytes += audio.len() as u64;
                let written = sink.write(Bytes::from(audio)).await;
                if written == 0 {
                    debug!("Synthesized frame delivery had no effect");
                }
            }
            Ok(Message::Text(payload)) => {
                let parsed: SynthesizerMessage = match serde_json::from_str(&payload) {
                    Ok(parsed) => parsed,
                    Err(err) => {
                        warn!(error = %err, "Unparseable synthesizer message");
                        continue;
                    }
                };
                match parsed.kind.as_str() {
                    "turn.end" => {
                        if let Some(done) = done_tx.take() {
                            let _ = done.send(Ok(total_bytes));
                        }
                        break;
                    }
                    "error" => {
                        error!(message = %parsed.message, "Synthesis failed");
                        if let Some(done) = done_tx.take() {
                            let _ = done.send(Err(AppError::Speech(parsed.message)));
                        }
                        break;
                    }
                    other => debug!(kind = %other, "Ignoring synthesizer message"),
                }
            }
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(err) => {
                error!(error = %err, "Synthesizer stream error");
                break;
            }
        }
    }

    if let Some(done) = done_tx.take() {
        let _ = done.send(Err(AppError::Speech(
            "Synthesis stream closed before completion".to_string(),
        )));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// In-memory backend that records written chunks and completes with the
    /// total byte count.
    struct FakeBackend {
        chunks: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl SynthesisBackend for FakeBackend {
        async fn open(&self) -> AppResult<SynthesisHandle> {
            let (text_tx, mut text_rx) = mpsc::channel::<String>(8);
            let (done_tx, done_rx) = oneshot::channel();
            let chunks = self.chunks.clone();
            tokio::spawn(async move {
                let mut bytes: u64 = 0;
                while let Some(chunk) = text_rx.recv().await {
                    bytes += chunk.len() as u64;
                    chunks.lock().unwrap().push(chunk);
                }
                let _ = done_tx.send(Ok(bytes));
            });
            Ok(SynthesisHandle::new(text_tx, done_rx))
        }
    }

    fn tts() -> (TextToSpeech, Arc<Mutex<Vec<String>>>) {
        let chunks = Arc::new(Mutex::new(Vec::new()));
        let backend = FakeBackend {
            chunks: chunks.clone(),
        };
        (TextToSpeech::new(Arc::new(backend)), chunks)
    }

    #[tokio::test]
    async fn test_full_request_cycle() {
        let (mut tts, chunks) = tts();
        tts.open().await.unwrap();
        assert_eq!(tts.state(), RequestState::RequestOpen);
        tts.write("hol").await.unwrap();
        tts.write("a").await.unwrap();
        assert_eq!(tts.state(), RequestState::Writing);
        tts.close().unwrap();
        assert_eq!(tts.state(), RequestState::Closing);
        let bytes = tts.await_completion().await.unwrap();
        assert_eq!(bytes, 4);
        assert_eq!(tts.state(), RequestState::Idle);
        assert_eq!(*chunks.lock().unwrap(), vec!["hol", "a"]);
    }

    #[tokio::test]
    async fn test_open_while_open_rejected() {
        let (mut tts, _) = tts();
        tts.open().await.unwrap();
        assert!(tts.open().await.is_err());
        // The in-flight request is untouched
        assert_eq!(tts.state(), RequestState::RequestOpen);
    }

    #[tokio::test]
    async fn test_write_and_close_require_open_request() {
        let (mut tts, _) = tts();
        assert!(tts.write("text").await.is_err());
        assert!(tts.close().is_err());
    }

    #[tokio::test]
    async fn test_completion_requires_closed_input() {
        let (mut tts, _) = tts();
        tts.open().await.unwrap();
        tts.write("text").await.unwrap();
        assert!(tts.await_completion().await.is_err());
    }

    #[tokio::test]
    async fn test_reset_allows_reopen() {
        let (mut tts, _) = tts();
        tts.open().await.unwrap();
        tts.reset();
        assert_eq!(tts.state(), RequestState::Idle);
        assert!(tts.open().await.is_ok());
    }
}
