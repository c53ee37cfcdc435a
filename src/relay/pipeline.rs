//! # Session Pipeline
//!
//! The per-session loop from recognition events to synthesized audio. One
//! pipeline task is spawned per connection and runs until the recognizer's
//! event channel closes or a cloud failure ends the session.
//!
//! ## Ordering:
//! Utterances are voiced strictly sequentially. The loop holds on each
//! utterance until the synthesis completion signal fires, so one session's
//! audio can never interleave on the fan-out sink. Across sessions, no
//! ordering is guaranteed.
//!
//! ## Failure Policy:
//! A synthesis or translation failure is logged, the session is stopped, and
//! the connection is asked to close. There is no retry; the client decides
//! whether to reconnect.

use crate::error::AppResult;
use crate::languages::Language;
use crate::relay::registry::SessionRegistry;
use crate::relay::session::RelaySession;
use crate::relay::Disconnect;
use crate::speech::recognizer::RecognitionEvent;
use crate::speech::synthesizer::TextToSpeech;
use crate::speech::translator::Translator;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tracing::{debug, error, info, warn};

/// Spawn the pipeline task for one session.
pub fn spawn(
    session: Arc<RelaySession>,
    events: mpsc::Receiver<RecognitionEvent>,
    tts: TextToSpeech,
    translator: Option<Translator>,
    registry: SessionRegistry,
) -> JoinHandle<()> {
    tokio::spawn(run(session, events, tts, translator, registry))
}

async fn run(
    session: Arc<RelaySession>,
    events: mpsc::Receiver<RecognitionEvent>,
    mut tts: TextToSpeech,
    translator: Option<Translator>,
    registry: SessionRegistry,
) {
    if let Err(err) = session.mark_listening() {
        warn!(session_id = %session.id, error = %err, "Pipeline started in unexpected state");
    }

    let listen = session.languages.listen;
    let mut events = ReceiverStream::new(events);
    let mut failure: Option<String> = None;

    while let Some(event) = events.next().await {
        if session.is_stopped() {
            break;
        }

        if !event.is_final {
            let _ = session.mark_recognizing();
            continue;
        }

        let Some(text) = select_utterance_text(&event, listen) else {
            debug!(session_id = %session.id, "Finalized event without usable text, skipping");
            continue;
        };

        if let Err(err) = session.mark_synthesizing() {
            warn!(session_id = %session.id, error = %err, "Skipping utterance");
            continue;
        }
        debug!(session_id = %session.id, chars = text.len(), "Voicing recognized utterance");

        match voice_utterance(&mut tts, translator.as_ref(), listen, &text).await {
            Ok(bytes) => {
                let _ = session.utterance_done();
                debug!(session_id = %session.id, bytes, "Utterance synthesis complete");
            }
            Err(err) => {
                error!(
                    session_id = %session.id,
                    error = %err,
                    "Utterance synthesis failed, ending session"
                );
                failure = Some(err.to_string());
                break;
            }
        }
    }

    session.stop();

    // A cloud failure ends the session from the inside; ask the transport
    // actor to close the socket. The registry entry may already be gone if
    // the client disconnected first.
    if let Some(reason) = failure {
        if let Some(client) = registry.get(&session.id) {
            client.control.do_send(Disconnect { reason });
        }
    }

    info!(session_id = %session.id, "Pipeline finished");
}

/// Pick the text to voice from a finalized event.
fn select_utterance_text(event: &RecognitionEvent, listen: Language) -> Option<String> {
    let text = event.translation_for(listen)?.trim();
    if text.is_empty() {
        return None;
    }
    Some(text.to_string())
}

/// Voice one utterance and hold until synthesis completes.
async fn voice_utterance(
    tts: &mut TextToSpeech,
    translator: Option<&Translator>,
    listen: Language,
    text: &str,
) -> AppResult<u64> {
    tts.open().await?;

    if let Err(err) = stream_utterance_text(tts, translator, listen, text).await {
        tts.reset();
        return Err(err);
    }

    tts.await_completion().await
}

/// Stream the utterance text into the open synthesis request.
///
/// With the translator enabled, completion chunks are forwarded as they
/// arrive so synthesis can start before the model has finished.
async fn stream_utterance_text(
    tts: &mut TextToSpeech,
    translator: Option<&Translator>,
    listen: Language,
    text: &str,
) -> AppResult<()> {
    match translator {
        Some(translator) => {
            let mut chunks = translator.stream_translation(listen, text).await?;
            while let Some(chunk) = chunks.recv().await {
                tts.write(&chunk).await?;
            }
        }
        None => tts.write(text).await?,
    }
    tts.close()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;
    use crate::languages::{Language, LanguagePair};
    use crate::relay::session::SessionState;
    use crate::speech::synthesizer::{SynthesisBackend, SynthesisHandle};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::sync::oneshot;

    /// Backend that logs open/text/done markers and completes a little after
    /// the input closes, like real synthesis trailing the text stream.
    struct RecordingBackend {
        log: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl SynthesisBackend for RecordingBackend {
        async fn open(&self) -> AppResult<SynthesisHandle> {
            let (text_tx, mut text_rx) = mpsc::channel::<String>(8);
            let (done_tx, done_rx) = oneshot::channel();
            let log = self.log.clone();
            log.lock().unwrap().push("open".to_string());
            tokio::spawn(async move {
                let mut bytes: u64 = 0;
                while let Some(chunk) = text_rx.recv().await {
                    bytes += chunk.len() as u64;
                    log.lock().unwrap().push(format!("text:{}", chunk));
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
                log.lock().unwrap().push("done".to_string());
                let _ = done_tx.send(Ok(bytes));
            });
            Ok(SynthesisHandle::new(text_tx, done_rx))
        }
    }

    struct FailingBackend;

    #[async_trait]
    impl SynthesisBackend for FailingBackend {
        async fn open(&self) -> AppResult<SynthesisHandle> {
            Err(AppError::Speech("synthesis unavailable".to_string()))
        }
    }

    fn session() -> Arc<RelaySession> {
        Arc::new(RelaySession::new(
            "client-1".to_string(),
            LanguagePair::new(Language::English, Language::Spanish),
        ))
    }

    fn final_event(spanish: &str) -> RecognitionEvent {
        let mut translations = HashMap::new();
        if !spanish.is_empty() {
            translations.insert("es-ES".to_string(), spanish.to_string());
        }
        RecognitionEvent {
            text: "recognized".to_string(),
            translations,
            is_final: true,
        }
    }

    #[tokio::test]
    async fn test_utterances_are_voiced_sequentially() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let tts = TextToSpeech::new(Arc::new(RecordingBackend { log: log.clone() }));
        let session = session();
        let (tx, rx) = mpsc::channel(8);

        let handle = spawn(
            session.clone(),
            rx,
            tts,
            None,
            SessionRegistry::new(4),
        );

        tx.send(final_event("uno")).await.unwrap();
        tx.send(final_event("dos")).await.unwrap();
        drop(tx);
        handle.await.unwrap();

        // The second utterance never starts before the first one's
        // completion signal fires.
        assert_eq!(
            *log.lock().unwrap(),
            vec!["open", "text:uno", "done", "open", "text:dos", "done"]
        );
        assert_eq!(session.counters().utterances, 2);
        assert!(session.is_stopped());
    }

    #[tokio::test]
    async fn test_interim_events_only_update_state() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let tts = TextToSpeech::new(Arc::new(RecordingBackend { log: log.clone() }));
        let session = session();
        let (tx, rx) = mpsc::channel(8);

        let handle = spawn(
            session.clone(),
            rx,
            tts,
            None,
            SessionRegistry::new(4),
        );

        tx.send(RecognitionEvent {
            text: "hel".to_string(),
            translations: HashMap::new(),
            is_final: false,
        })
        .await
        .unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(session.state(), SessionState::Recognizing);
        assert!(log.lock().unwrap().is_empty());

        drop(tx);
        handle.await.unwrap();
        assert!(session.is_stopped());
    }

    #[tokio::test]
    async fn test_finalized_event_without_translation_is_skipped() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let tts = TextToSpeech::new(Arc::new(RecordingBackend { log: log.clone() }));
        let session = session();
        let (tx, rx) = mpsc::channel(8);

        let handle = spawn(
            session.clone(),
            rx,
            tts,
            None,
            SessionRegistry::new(4),
        );

        tx.send(final_event("")).await.unwrap();
        tx.send(final_event("   ")).await.unwrap();
        drop(tx);
        handle.await.unwrap();

        assert!(log.lock().unwrap().is_empty());
        assert_eq!(session.counters().utterances, 0);
    }

    #[tokio::test]
    async fn test_synthesis_failure_stops_the_session() {
        let tts = TextToSpeech::new(Arc::new(FailingBackend));
        let session = session();
        let (tx, rx) = mpsc::channel(8);

        let handle = spawn(
            session.clone(),
            rx,
            tts,
            None,
            SessionRegistry::new(4),
        );

        tx.send(final_event("uno")).await.unwrap();
        // This one is never processed; the pipeline broke on the first
        let _ = tx.send(final_event("dos")).await;
        handle.await.unwrap();

        assert!(session.is_stopped());
        assert_eq!(session.counters().utterances, 0);
    }
}
