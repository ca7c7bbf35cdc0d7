//! Per-turn timing clock.
//!
//! Tracks the milestones of one turn (endpoint commit, first LLM token,
//! first TTS audio) and volume counters, and renders the final
//! [`TurnMetrics`] report. Shared between the text pump and the audio pump
//! behind a mutex; every update is a few loads and stores.

use std::time::Instant;

use parlance_types::TurnMetrics;

/// Milestones and counters for one turn.
#[derive(Debug)]
pub struct TurnClock {
    listening_started: Instant,
    turn_started: Instant,
    first_token: Option<Instant>,
    last_token: Option<Instant>,
    first_audio: Option<Instant>,
    tokens: u64,
    audio_chunks: u64,
    audio_bytes: u64,
}

impl TurnClock {
    /// Start the clock at endpoint commit. `listening_started` is when the
    /// session last entered the listening state.
    pub fn start(listening_started: Instant) -> Self {
        Self {
            listening_started,
            turn_started: Instant::now(),
            first_token: None,
            last_token: None,
            first_audio: None,
            tokens: 0,
            audio_chunks: 0,
            audio_bytes: 0,
        }
    }

    /// Record one LLM text delta. Returns the token index (1-based) and
    /// milliseconds since the first token.
    pub fn on_token(&mut self) -> (u64, u64) {
        let now = Instant::now();
        if self.first_token.is_none() {
            self.first_token = Some(now);
        }
        self.last_token = Some(now);
        self.tokens += 1;
        let elapsed_ms = self
            .first_token
            .map(|first| now.duration_since(first).as_millis() as u64)
            .unwrap_or(0);
        (self.tokens, elapsed_ms)
    }

    /// Record one downlink PCM chunk.
    pub fn on_audio(&mut self, bytes: usize) {
        if self.first_audio.is_none() {
            self.first_audio = Some(Instant::now());
        }
        self.audio_chunks += 1;
        self.audio_bytes += bytes as u64;
    }

    /// Number of tokens recorded so far.
    pub fn tokens(&self) -> u64 {
        self.tokens
    }

    /// Milliseconds between the first and last recorded token.
    pub fn streaming_window_ms(&self) -> u64 {
        match (self.first_token, self.last_token) {
            (Some(first), Some(last)) => last.duration_since(first).as_millis() as u64,
            _ => 0,
        }
    }

    /// Render the final report.
    pub fn finish(&self, turn_id: &str, tool_calls: u64) -> TurnMetrics {
        let finished = Instant::now();
        let ms = |from: Instant, to: Instant| to.duration_since(from).as_millis() as u64;

        let llm_elapsed_ms = self.streaming_window_ms();
        TurnMetrics {
            turn_id: turn_id.to_string(),
            listening_duration_ms: ms(self.listening_started, self.turn_started),
            thinking_ms: self.first_token.map(|t| ms(self.turn_started, t)),
            speaking_ms: ms(self.first_token.unwrap_or(self.turn_started), finished),
            llm_first_token_ms: self.first_token.map(|t| ms(self.turn_started, t)),
            tts_first_audio_ms: match (self.first_audio, self.first_token) {
                (Some(audio), Some(token)) => Some(ms(token, audio)),
                _ => None,
            },
            e2e_latency_ms: self.first_audio.map(|a| ms(self.turn_started, a)),
            llm_tokens: self.tokens,
            llm_tok_per_sec: TurnMetrics::tokens_per_sec(self.tokens, llm_elapsed_ms),
            tts_audio_chunks: self.audio_chunks,
            tts_est_duration_ms: TurnMetrics::estimate_audio_ms(self.audio_bytes),
            turn_total_ms: ms(self.turn_started, finished),
            tool_calls,
        }
    }
}
