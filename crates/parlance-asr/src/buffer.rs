//! Per-utterance token buffer.
//!
//! Final tokens append; non-final tokens are kept only to render the live
//! partial. The `<end>` token is the provider's endpoint marker: it commits
//! the concatenation of the buffered final tokens and clears the buffer for
//! the next utterance.

use serde_json::Value;

use crate::AsrEvent;

/// The provider's endpoint marker token.
const ENDPOINT_TOKEN: &str = "<end>";

/// Accumulates recognition tokens for the current utterance.
#[derive(Debug, Default)]
pub struct UtteranceBuffer {
    finals: Vec<String>,
}

impl UtteranceBuffer {
    /// Create an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Absorb one provider payload and return the events it produces.
    ///
    /// A payload yields at most one transcript event (partial or final
    /// display text) followed by at most one endpoint event. A payload
    /// carrying an `error_code` yields a single error event instead.
    pub fn absorb(&mut self, payload: &Value) -> Vec<AsrEvent> {
        if let Some(code) = payload.get("error_code").filter(|v| !v.is_null()) {
            let message = payload
                .get("error_message")
                .and_then(Value::as_str)
                .unwrap_or("unknown provider error");
            return vec![AsrEvent::Error {
                message: format!("{code}: {message}"),
            }];
        }

        let mut events = Vec::new();
        let mut got_endpoint = false;
        let mut provisional: Vec<&str> = Vec::new();

        if let Some(tokens) = payload.get("tokens").and_then(Value::as_array) {
            for token in tokens {
                let text = token.get("text").and_then(Value::as_str).unwrap_or("");
                if text.is_empty() {
                    continue;
                }
                if text == ENDPOINT_TOKEN {
                    got_endpoint = true;
                    continue;
                }
                if token.get("is_final").and_then(Value::as_bool).unwrap_or(false) {
                    self.finals.push(text.to_string());
                } else {
                    provisional.push(text);
                }
            }
        }

        // Display text: committed finals plus the provisional tail.
        let display = format!("{}{}", self.finals.concat(), provisional.concat());
        if !display.is_empty() {
            if provisional.is_empty() {
                events.push(AsrEvent::Final { text: display });
            } else {
                events.push(AsrEvent::Partial { text: display });
            }
        }

        if got_endpoint {
            if let Some(event) = self.flush() {
                events.push(event);
            }
        }

        // The provider's session-final payload flushes whatever remains.
        if payload.get("finished").and_then(Value::as_bool).unwrap_or(false) {
            if let Some(event) = self.flush() {
                events.push(event);
            }
        }

        events
    }

    /// Commit the buffered utterance, if any, and clear the buffer.
    pub fn flush(&mut self) -> Option<AsrEvent> {
        let utterance = self.finals.concat().trim().to_string();
        self.finals.clear();
        if utterance.is_empty() {
            None
        } else {
            tracing::info!(chars = utterance.len(), "asr endpoint committed utterance");
            Some(AsrEvent::Endpoint { utterance })
        }
    }

    /// Whether any final tokens are buffered.
    pub fn is_empty(&self) -> bool {
        self.finals.is_empty()
    }
}
