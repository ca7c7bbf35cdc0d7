//! Realtime TTS wire messages.

use base64::Engine;
use serde_json::{json, Value};

/// Build the `session.update` message configuring voice and output format.
///
/// Output is always 24 kHz mono 16-bit PCM in server-commit mode: the
/// provider decides when enough text has accumulated to start synthesis.
pub fn session_update(voice: &str) -> Value {
    json!({
        "type": "session.update",
        "session": {
            "voice": voice,
            "response_format": "pcm",
            "sample_rate": 24_000,
            "mode": "server_commit",
        }
    })
}

/// Build a text-append message.
pub fn append_message(text: &str) -> Value {
    json!({
        "type": "input_text_buffer.append",
        "text": text,
    })
}

/// Build the end-of-input message.
pub fn finish_message() -> Value {
    json!({"type": "session.finish"})
}

/// A parsed server event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TtsServerEvent {
    /// Decoded PCM chunk.
    AudioDelta(Vec<u8>),
    /// Synthesis complete; the session is over.
    Finished,
    /// Provider-reported error.
    Error(String),
    /// Anything else (session.created, response.done, ...).
    Other,
}

/// Parse one server payload.
pub fn parse_server_event(payload: &Value) -> TtsServerEvent {
    match payload.get("type").and_then(Value::as_str) {
        Some("response.audio.delta") => {
            let Some(delta) = payload.get("delta").and_then(Value::as_str) else {
                return TtsServerEvent::Error("audio delta without payload".into());
            };
            match base64::engine::general_purpose::STANDARD.decode(delta) {
                Ok(pcm) => TtsServerEvent::AudioDelta(pcm),
                Err(e) => TtsServerEvent::Error(format!("invalid base64 audio delta: {e}")),
            }
        }
        Some("session.finished") => TtsServerEvent::Finished,
        Some("error") => {
            let message = payload
                .get("error")
                .and_then(|e| e.get("message"))
                .and_then(Value::as_str)
                .or_else(|| payload.get("message").and_then(Value::as_str))
                .unwrap_or("unknown provider error");
            TtsServerEvent::Error(message.to_string())
        }
        _ => TtsServerEvent::Other,
    }
}
