//! # Hosted Language-Model Translation Pass
//!
//! Optional extra hop between recognition and synthesis: recognized text is
//! sent to a hosted chat-completions API with streaming enabled, and the
//! completion chunks are forwarded to synthesis as they arrive instead of
//! waiting for the full translation.
//!
//! The model is prompted to behave as a translator that also corrects
//! recognition mistakes, which papers over the usual speech-to-text noise
//! before a voice reads it out.

use crate::config::TranslatorConfig;
use crate::error::{AppError, AppResult};
use crate::languages::Language;
use futures_util::StreamExt;
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Capacity of the streamed completion chunk channel.
const CHUNK_CHANNEL_CAPACITY: usize = 32;

/// Client for the hosted chat-completions API.
#[derive(Clone)]
pub struct Translator {
    http: reqwest::Client,
    api_base: String,
    api_key: String,
    model: String,
}

/// One parsed line of the completion event stream.
#[derive(Debug, PartialEq)]
enum StreamLine {
    Chunk(String),
    Done,
    Skip,
}

impl Translator {
    pub fn new(config: &TranslatorConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_base: config.api_base.clone(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
        }
    }

    /// Stream a translation of `text` into `target`.
    ///
    /// Returns a channel of completion chunks. A failure before the stream
    /// opens is an error; a failure mid-stream is logged and simply ends the
    /// channel, so the utterance is voiced with whatever arrived.
    pub async fn stream_translation(
        &self,
        target: Language,
        text: &str,
    ) -> AppResult<mpsc::Receiver<String>> {
        let body = json!({
            "model": self.model,
            "stream": true,
            "messages": [
                {"role": "system", "content": system_prompt(target)},
                {"role": "user", "content": text}
            ]
        });

        let response = self
            .http
            .post(format!("{}/chat/completions", self.api_base))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| AppError::Translation(e.to_string()))?
            .error_for_status()
            .map_err(|e| AppError::Translation(e.to_string()))?;

        let (tx, rx) = mpsc::channel(CHUNK_CHANNEL_CAPACITY);
        tokio::spawn(async move {
            let mut stream = response.bytes_stream();
            let mut buffer = String::new();

            while let Some(part) = stream.next().await {
                let part = match part {
                    Ok(part) => part,
                    Err(err) => {
                        warn!(error = %err, "Completion stream ended early");
                        return;
                    }
                };
                buffer.push_str(&String::from_utf8_lossy(&part));

                while let Some(newline) = buffer.find('\n') {
                    let line = buffer[..newline].trim().to_string();
                    buffer.drain(..=newline);
                    match parse_stream_line(&line) {
                        StreamLine::Chunk(chunk) => {
                            if tx.send(chunk).await.is_err() {
                                return;
                            }
                        }
                        StreamLine::Done => return,
                        StreamLine::Skip => {}
                    }
                }
            }
            debug!("Completion stream finished without [DONE] marker");
        });

        Ok(rx)
    }
}

fn system_prompt(target: Language) -> String {
    format!(
        "You are a true translator. The input is speech-to-text output; \
         correct the input if necessary and translate it to {}. \
         In case no text is provided, don't output anything.",
        target.display_name()
    )
}

/// Parse one server-sent-event line of the completion stream.
fn parse_stream_line(line: &str) -> StreamLine {
    let Some(data) = line.strip_prefix("data:") else {
        return StreamLine::Skip;
    };
    let data = data.trim();
    if data == "[DONE]" {
        return StreamLine::Done;
    }
    match serde_json::from_str::<serde_json::Value>(data) {
        Ok(value) => value
            .pointer("/choices/0/delta/content")
            .and_then(|content| content.as_str())
            .filter(|chunk| !chunk.is_empty())
            .map(|chunk| StreamLine::Chunk(chunk.to_string()))
            .unwrap_or(StreamLine::Skip),
        Err(err) => {
            warn!(error = %err, "Unparseable completion stream line");
            StreamLine::Skip
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_content_chunk() {
        let line = r#"data: {"choices":[{"delta":{"content":"hola"}}]}"#;
        assert_eq!(
            parse_stream_line(line),
            StreamLine::Chunk("hola".to_string())
        );
    }

    #[test]
    fn test_parse_done_marker() {
        assert_eq!(parse_stream_line("data: [DONE]"), StreamLine::Done);
    }

    #[test]
    fn test_parse_skips_empty_delta() {
        // The first stream event usually carries only the role
        let line = r#"data: {"choices":[{"delta":{"role":"assistant"}}]}"#;
        assert_eq!(parse_stream_line(line), StreamLine::Skip);
        assert_eq!(parse_stream_line(""), StreamLine::Skip);
        assert_eq!(parse_stream_line(": keep-alive"), StreamLine::Skip);
    }

    #[test]
    fn test_system_prompt_names_target_language() {
        assert!(system_prompt(Language::Hindi).contains("Hindi"));
        assert!(system_prompt(Language::Spanish).contains("Spanish"));
    }
}
