//! Barge-in and endpoint gating heuristics.

use std::time::{Duration, Instant};

/// Minimum visible characters for a final transcript to count as speech.
const MIN_TRIGGER_CHARS: usize = 3;

/// Minimum spacing between automatic barge-ins.
const MIN_TRIGGER_INTERVAL: Duration = Duration::from_millis(1500);

/// Window within which a repeated endpoint sentence is treated as an echo.
const ENDPOINT_DEDUPE_WINDOW: Duration = Duration::from_millis(2500);

/// Decides when a final ASR transcript observed while the agent is speaking
/// or executing should interrupt the turn.
///
/// A final triggers when it has at least three visible characters, its
/// normalized text differs from the previous trigger, and at least 1500 ms
/// have passed since the previous trigger. This lets a headless client
/// barge in by simply speaking, without an explicit interrupt control.
#[derive(Debug, Default)]
pub struct BargeInGate {
    last_text: String,
    last_at: Option<Instant>,
}

impl BargeInGate {
    /// Create a gate with no history.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `text` (a final transcript) should trigger an interrupt now.
    pub fn should_trigger(&mut self, text: &str, now: Instant) -> bool {
        let normalized = text.trim();
        if normalized.chars().count() < MIN_TRIGGER_CHARS {
            return false;
        }
        if normalized == self.last_text {
            return false;
        }
        if let Some(last_at) = self.last_at {
            if now.duration_since(last_at) < MIN_TRIGGER_INTERVAL {
                return false;
            }
        }
        self.last_text = normalized.to_string();
        self.last_at = Some(now);
        true
    }
}

/// Suppresses duplicated endpoint sentences.
///
/// Providers occasionally re-emit the same committed utterance in quick
/// succession (echo of the agent's own speech, or a replayed endpoint);
/// an identical sentence within 2.5 s is ignored.
#[derive(Debug, Default)]
pub struct EndpointGate {
    last_text: String,
    last_at: Option<Instant>,
}

impl EndpointGate {
    /// Create a gate with no history.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether this committed utterance should start a turn.
    pub fn accept(&mut self, utterance: &str, now: Instant) -> bool {
        if utterance == self.last_text {
            if let Some(last_at) = self.last_at {
                if now.duration_since(last_at) < ENDPOINT_DEDUPE_WINDOW {
                    return false;
                }
            }
        }
        self.last_text = utterance.to_string();
        self.last_at = Some(now);
        true
    }
}
