//! Streaming speech-synthesis adapter.
//!
//! Consumes a lazy sequence of text fragments and produces a lazy sequence
//! of 24 kHz mono s16le PCM chunks over the provider's realtime WebSocket.
//! Text is forwarded as soon as the first fragment arrives; the adapter
//! never waits for end-of-stream before starting synthesis.
//!
//! Cancellation is the hard requirement here: [`TtsControl::cancel`] must
//! stop audio within one frame. The shared cancellation token is consulted
//! by the text-ingress path, the audio-egress path, and the consumer-facing
//! [`TtsAudio::next_chunk`], so no PCM chunk is ever yielded after
//! `cancel()` returns -- including chunks already sitting in the internal
//! queue.

mod session;
mod wire;

pub use session::{synthesize, TtsAudio, TtsControl};
pub use wire::{append_message, finish_message, parse_server_event, session_update, TtsServerEvent};

/// Errors from the TTS adapter.
#[derive(Debug, thiserror::Error)]
pub enum TtsError {
    /// The realtime session could not be established.
    #[error("tts connect failed: {0}")]
    Connect(String),

    /// WebSocket transport failure.
    #[error("tts websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}

/// Convenience alias for TTS results.
pub type TtsResult<T> = Result<T, TtsError>;

/// Configuration for one synthesis session.
#[derive(Debug, Clone)]
pub struct TtsConfig {
    /// Provider API key.
    pub api_key: String,
    /// Realtime endpoint URL.
    pub ws_url: String,
    /// Synthesis model identifier.
    pub model: String,
    /// Voice identifier.
    pub voice: String,
}
