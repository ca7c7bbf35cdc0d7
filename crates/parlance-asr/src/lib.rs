//! Streaming speech-recognition adapter.
//!
//! Maintains one WebSocket session to the ASR provider per voice session.
//! Uplink PCM is fed through [`AsrHandle::feed`]; recognition results come
//! back as an asynchronous sequence of [`AsrEvent`]s: live partials, stable
//! finals, and provider endpoints that commit a whole utterance.
//!
//! Endpoint detection is authoritative: the orchestrator never derives
//! endpoints from silence timers. The provider marks the end of an
//! utterance with an `<end>` token; the adapter then emits the
//! concatenation of that utterance's final tokens and clears its buffer.

mod buffer;
mod stream;

pub use buffer::UtteranceBuffer;
pub use stream::{connect, AsrHandle};

use serde_json::json;

/// Errors from the ASR adapter.
#[derive(Debug, thiserror::Error)]
pub enum AsrError {
    /// The streaming session could not be established.
    #[error("asr connect failed: {0}")]
    Connect(String),

    /// WebSocket transport failure mid-stream.
    #[error("asr websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}

/// Events delivered by the ASR session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AsrEvent {
    /// Live transcription including provisional (non-final) tokens.
    Partial { text: String },
    /// Transcription whose tokens so far are all final.
    Final { text: String },
    /// The provider detected the end of an utterance; `utterance` is the
    /// committed text (concatenated final tokens).
    Endpoint { utterance: String },
    /// The provider reported an unrecoverable error.
    Error { message: String },
    /// The session closed; no further events follow.
    Closed,
}

/// Configuration for one ASR streaming session.
#[derive(Debug, Clone)]
pub struct AsrConfig {
    /// Provider API key.
    pub api_key: String,
    /// Streaming endpoint URL.
    pub ws_url: String,
    /// Provider model identifier.
    pub model: String,
    /// Language hints for recognition.
    pub language_hints: Vec<String>,
}

impl AsrConfig {
    /// The start-of-stream configuration message.
    ///
    /// Endpoint detection is always enabled; audio is raw 16 kHz mono
    /// s16le, matching the transport's uplink format.
    pub fn start_message(&self) -> serde_json::Value {
        json!({
            "api_key": self.api_key,
            "model": self.model,
            "language_hints": self.language_hints,
            "enable_language_identification": false,
            "enable_speaker_diarization": false,
            "enable_endpoint_detection": true,
            "audio_format": "pcm_s16le",
            "sample_rate": 16_000,
            "num_channels": 1,
        })
    }
}
