use serde::Serialize;

use super::normalizer::TranscriptNormalizer;
use super::protocol::ServerMessage;

/// What the transcription stream reports to its consumer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "text", rename_all = "snake_case")]
pub enum TranscriptEvent {
    /// Not-yet-final words; never part of the utterance buffer.
    Provisional(String),
    /// Final words of the utterance so far, emitted on every new final batch.
    Accumulated(String),
    /// The caller finished an utterance; carries its full normalized text.
    Endpoint(String),
    Error { code: Option<String>, message: String },
    Finished,
}

/// Folds server token batches into utterances.
#[derive(Debug, Default)]
pub struct TokenAccumulator {
    buffer: String,
    normalizer: TranscriptNormalizer,
}

impl TokenAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw final text buffered since the last endpoint.
    pub fn buffered(&self) -> &str {
        &self.buffer
    }

    pub fn ingest(&mut self, message: ServerMessage) -> Vec<TranscriptEvent> {
        let mut events = Vec::new();

        if message.is_error() {
            events.push(TranscriptEvent::Error {
                code: message.error_code.as_ref().map(ToString::to_string),
                message: message
                    .error_message
                    .clone()
                    .unwrap_or_else(|| "speech recognition error".into()),
            });
        }

        let mut provisional = String::new();
        let mut appended = false;

        for token in message.tokens {
            if token.is_endpoint() {
                if let Some(event) = self.take_endpoint() {
                    events.push(event);
                }
                appended = false;
            } else if token.is_final {
                self.buffer.push_str(&token.text);
                appended = true;
            } else {
                provisional.push_str(&token.text);
            }
        }

        if appended {
            let text = self.normalizer.clean(&self.buffer);
            if !text.is_empty() {
                events.push(TranscriptEvent::Accumulated(text));
            }
        }

        let provisional = self.normalizer.clean(&provisional);
        if !provisional.is_empty() {
            events.push(TranscriptEvent::Provisional(provisional));
        }

        if message.finished {
            if let Some(event) = self.take_endpoint() {
                events.push(event);
            }
            events.push(TranscriptEvent::Finished);
        }

        events
    }

    /// Emits whatever is buffered as a final utterance and clears the buffer.
    pub fn take_endpoint(&mut self) -> Option<TranscriptEvent> {
        let text = self.normalizer.clean(&std::mem::take(&mut self.buffer));
        (!text.is_empty()).then_some(TranscriptEvent::Endpoint(text))
    }
}
