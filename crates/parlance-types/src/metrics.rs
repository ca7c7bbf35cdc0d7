//! Per-turn timing counters surfaced to the client after every turn.

use serde::{Deserialize, Serialize};

/// Timing and volume counters for one completed (or cancelled) turn.
///
/// Durations are wall-clock milliseconds. Fields that require a first LLM
/// token or first TTS audio chunk are `None` when the turn was cancelled
/// before those milestones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnMetrics {
    /// Turn this report belongs to.
    pub turn_id: String,
    /// Time spent in `listening` before the endpoint fired.
    pub listening_duration_ms: u64,
    /// Endpoint commit to first LLM token.
    pub thinking_ms: Option<u64>,
    /// First LLM token (or turn start) to turn end.
    pub speaking_ms: u64,
    /// Endpoint commit to first LLM token (alias kept for dashboards).
    pub llm_first_token_ms: Option<u64>,
    /// First LLM token to first TTS audio chunk.
    pub tts_first_audio_ms: Option<u64>,
    /// Endpoint commit to first audible audio.
    pub e2e_latency_ms: Option<u64>,
    /// LLM text deltas forwarded this turn.
    pub llm_tokens: u64,
    /// Delta throughput over the streaming window.
    pub llm_tok_per_sec: f64,
    /// Downlink PCM chunks emitted.
    pub tts_audio_chunks: u64,
    /// Estimated audio duration from byte count (24 kHz mono s16le).
    pub tts_est_duration_ms: u64,
    /// Total turn wall-clock time.
    pub turn_total_ms: u64,
    /// Tool invocations issued by the model this turn.
    pub tool_calls: u64,
}

impl TurnMetrics {
    /// Estimate playback duration of `audio_bytes` of 24 kHz mono s16le PCM.
    pub fn estimate_audio_ms(audio_bytes: u64) -> u64 {
        // Two bytes per sample at 24_000 samples per second.
        audio_bytes * 1000 / 2 / 24_000
    }

    /// Tokens-per-second over an elapsed streaming window.
    pub fn tokens_per_sec(tokens: u64, elapsed_ms: u64) -> f64 {
        if elapsed_ms == 0 {
            return 0.0;
        }
        let tps = tokens as f64 / (elapsed_ms as f64 / 1000.0);
        (tps * 100.0).round() / 100.0
    }
}
