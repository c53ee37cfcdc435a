//! # Cloud Speech Capabilities
//!
//! Clients for the three hosted services the relay delegates to. All of the
//! actual recognition, translation modeling, and synthesis happens on the
//! other side of these connections; the relay treats the streams as opaque.
//!
//! ## Key Components:
//! - **Recognizer**: streaming speech recognition with translation targets.
//!   Audio goes in through a push stream, finalized and interim results come
//!   back on an event channel.
//! - **Synthesizer**: streaming text-input synthesis. Text chunks go in, raw
//!   PCM frames come back and are handed straight to the relay sink.
//! - **Translator**: optional extra translation/correction pass through a
//!   hosted language model with streamed completions.
//!
//! There is no retry or backoff anywhere in this module: a transient cloud
//! failure is logged and ends the session that hit it.

pub mod recognizer;
pub mod synthesizer;
pub mod translator;

pub use recognizer::{PushAudioStream, RecognitionEvent, TranslationRecognizer};
pub use synthesizer::{StreamingSynthesizer, SynthesisBackend, SynthesisHandle, TextToSpeech};
pub use translator::Translator;
