//! Client/server WebSocket protocol and the session state machine.
//!
//! Text frames carry JSON objects with a `type` discriminator (serde
//! internally-tagged enums); binary frames carry raw little-endian 16-bit
//! mono PCM (16 kHz uplink, 24 kHz downlink) and are never wrapped in JSON.

use serde::{Deserialize, Serialize};

use crate::metrics::TurnMetrics;
use crate::TurnId;

// ---------------------------------------------------------------------------
// SessionState
// ---------------------------------------------------------------------------

/// The orchestrator's five states. Exactly one is active at any instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// No session running; waiting for `start_session`.
    Idle,
    /// Forwarding uplink PCM to ASR, waiting for an endpoint.
    Listening,
    /// Agent loop running, no tool currently executing.
    Thinking,
    /// Agent loop running with at least one tool in flight.
    Executing,
    /// Streaming synthesized audio downlink.
    Speaking,
}

impl SessionState {
    /// Check whether transitioning from `self` to `target` is valid.
    ///
    /// Valid transitions:
    /// - Idle -> Listening (`start_session`)
    /// - Listening -> Thinking (ASR endpoint commits an utterance)
    /// - Thinking -> Speaking (first LLM text event)
    /// - Thinking <-> Executing (tool start / tool result)
    /// - Executing -> Speaking (agent loop returns to text)
    /// - Thinking | Executing | Speaking -> Listening (turn end or barge-in)
    /// - any -> Idle (`stop_session`)
    ///
    /// All other transitions are denied.
    pub fn can_transition_to(self, target: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, target),
            (Idle, Listening)
                | (Listening, Thinking)
                | (Thinking, Speaking)
                | (Thinking, Executing)
                | (Thinking, Listening)
                | (Executing, Thinking)
                | (Executing, Speaking)
                | (Executing, Listening)
                | (Speaking, Listening)
                | (_, Idle)
        )
    }

    /// Whether the barge-in heuristic is armed in this state.
    pub fn interruptible(self) -> bool {
        matches!(self, SessionState::Speaking | SessionState::Executing)
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Idle => write!(f, "idle"),
            SessionState::Listening => write!(f, "listening"),
            SessionState::Thinking => write!(f, "thinking"),
            SessionState::Executing => write!(f, "executing"),
            SessionState::Speaking => write!(f, "speaking"),
        }
    }
}

// ---------------------------------------------------------------------------
// Client -> server control messages
// ---------------------------------------------------------------------------

/// JSON control messages a client may send.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Transition `idle -> listening` and begin forwarding audio to ASR.
    StartSession,
    /// Transition any state -> `idle`, tearing the turn down.
    StopSession,
    /// Barge-in: cancel the current turn.
    Interrupt,
    /// Activate a named skill for this session.
    ActivateSkill { name: String },
    /// Deactivate a named skill.
    DeactivateSkill { name: String },
}

// ---------------------------------------------------------------------------
// Server -> client messages
// ---------------------------------------------------------------------------

/// Which external service a connection-status message refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionService {
    Asr,
    Llm,
    Tts,
}

/// Connection status of an external service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    Connected,
    Disconnected,
    Error,
}

/// Turn lifecycle events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnEvent {
    /// The ASR endpoint fired and the utterance text is committed.
    UserCommitted,
    /// The turn ended (clean completion, cancellation, or error).
    Finished,
}

/// Tool lifecycle events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolEvent {
    Start,
    Result,
}

/// Skill toggle events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkillEvent {
    Activated,
    Deactivated,
}

/// Skill summary broadcast to the client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SkillInfo {
    pub name: String,
    pub description: String,
    pub active: bool,
}

/// Identity artifact summary included in `session_info`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct IdentitySummary {
    pub persona_loaded: bool,
    pub profile_loaded: bool,
    pub persona_chars: usize,
    pub profile_chars: usize,
    pub memory_entries: usize,
}

/// JSON messages the server sends to the client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Current orchestrator state.
    State { state: SessionState },
    /// One-shot session description sent at connect time.
    SessionInfo {
        llm_model: String,
        tts_model: String,
        tts_voice: String,
        asr_configured: bool,
        llm_configured: bool,
        tts_configured: bool,
        tools: Vec<String>,
        skills: Vec<SkillInfo>,
        identity: IdentitySummary,
    },
    /// External service connectivity change.
    ConnectionStatus {
        service: ConnectionService,
        status: ConnectionStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        detail: Option<String>,
    },
    /// Live transcription update.
    Asr { text: String, is_final: bool },
    /// Turn lifecycle marker.
    Turn {
        event: TurnEvent,
        turn_id: TurnId,
        #[serde(skip_serializing_if = "Option::is_none")]
        text: Option<String>,
    },
    /// Incremental assistant text.
    Llm {
        turn_id: TurnId,
        text: String,
        done: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        token_index: Option<u64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        elapsed_ms: Option<u64>,
    },
    /// Tool activity.
    Tool {
        event: ToolEvent,
        turn_id: TurnId,
        tool_call_id: String,
        name: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        arguments: Option<serde_json::Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        content: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        is_error: Option<bool>,
        #[serde(skip_serializing_if = "Option::is_none")]
        elapsed_ms: Option<u64>,
    },
    /// A skill was toggled.
    Skill {
        event: SkillEvent,
        name: String,
        skills: Vec<SkillInfo>,
    },
    /// Full skill list broadcast (session start).
    SkillsList { skills: Vec<SkillInfo> },
    /// Per-turn timing counters.
    Metrics {
        #[serde(flatten)]
        metrics: TurnMetrics,
    },
    /// An error the client should correlate with a turn, if any.
    Error {
        #[serde(skip_serializing_if = "Option::is_none")]
        turn_id: Option<TurnId>,
        message: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    // -- State machine --

    #[test]
    fn state_transition_table() {
        use SessionState::*;

        // Valid transitions from the orchestrator table.
        assert!(Idle.can_transition_to(Listening));
        assert!(Listening.can_transition_to(Thinking));
        assert!(Thinking.can_transition_to(Speaking));
        assert!(Thinking.can_transition_to(Executing));
        assert!(Thinking.can_transition_to(Listening));
        assert!(Executing.can_transition_to(Thinking));
        assert!(Executing.can_transition_to(Speaking));
        assert!(Executing.can_transition_to(Listening));
        assert!(Speaking.can_transition_to(Listening));

        // stop_session reaches idle from everywhere.
        for s in [Idle, Listening, Thinking, Executing, Speaking] {
            assert!(s.can_transition_to(Idle), "{s} -> idle must be allowed");
        }

        // Invalid transitions.
        assert!(!Idle.can_transition_to(Thinking));
        assert!(!Idle.can_transition_to(Speaking));
        assert!(!Listening.can_transition_to(Speaking));
        assert!(!Listening.can_transition_to(Executing));
        assert!(!Speaking.can_transition_to(Thinking));
        assert!(!Speaking.can_transition_to(Executing));
    }

    #[test]
    fn interruptible_states() {
        assert!(SessionState::Speaking.interruptible());
        assert!(SessionState::Executing.interruptible());
        assert!(!SessionState::Thinking.interruptible());
        assert!(!SessionState::Listening.interruptible());
        assert!(!SessionState::Idle.interruptible());
    }

    #[test]
    fn state_serializes_snake_case() {
        let json = serde_json::to_string(&ServerMessage::State {
            state: SessionState::Listening,
        })
        .unwrap();
        assert_eq!(json, r#"{"type":"state","state":"listening"}"#);
    }

    // -- Client messages --

    #[test]
    fn client_message_parsing() {
        let msg: ClientMessage = serde_json::from_str(r#"{"type":"start_session"}"#).unwrap();
        assert_eq!(msg, ClientMessage::StartSession);

        let msg: ClientMessage =
            serde_json::from_str(r#"{"type":"activate_skill","name":"coder"}"#).unwrap();
        assert_eq!(msg, ClientMessage::ActivateSkill { name: "coder".into() });

        assert!(serde_json::from_str::<ClientMessage>(r#"{"type":"reboot"}"#).is_err());
    }

    // -- Server messages --

    #[test]
    fn asr_message_shape() {
        let json = serde_json::to_string(&ServerMessage::Asr {
            text: "hello".into(),
            is_final: true,
        })
        .unwrap();
        assert_eq!(json, r#"{"type":"asr","text":"hello","is_final":true}"#);
    }

    #[test]
    fn turn_message_shape() {
        let json = serde_json::to_value(ServerMessage::Turn {
            event: TurnEvent::UserCommitted,
            turn_id: TurnId::new("abc123def456"),
            text: Some("hello".into()),
        })
        .unwrap();
        assert_eq!(json["type"], "turn");
        assert_eq!(json["event"], "user_committed");
        assert_eq!(json["turn_id"], "abc123def456");
        assert_eq!(json["text"], "hello");

        // `text` is omitted on finished.
        let json = serde_json::to_string(&ServerMessage::Turn {
            event: TurnEvent::Finished,
            turn_id: TurnId::new("abc123def456"),
            text: None,
        })
        .unwrap();
        assert!(!json.contains("\"text\""));
        assert!(json.contains("\"event\":\"finished\""));
    }

    #[test]
    fn tool_message_shape() {
        let json = serde_json::to_value(ServerMessage::Tool {
            event: ToolEvent::Result,
            turn_id: TurnId::new("t1"),
            tool_call_id: "call_9".into(),
            name: "get_datetime".into(),
            arguments: None,
            content: Some("2026-08-02".into()),
            is_error: Some(false),
            elapsed_ms: Some(12),
        })
        .unwrap();
        assert_eq!(json["event"], "result");
        assert_eq!(json["tool_call_id"], "call_9");
        assert_eq!(json["is_error"], false);
        assert!(json.get("arguments").is_none());
    }

    #[test]
    fn metrics_message_flattens() {
        let metrics = TurnMetrics {
            turn_id: "t1".into(),
            listening_duration_ms: 900,
            thinking_ms: Some(410),
            speaking_ms: 1800,
            llm_first_token_ms: Some(410),
            tts_first_audio_ms: Some(220),
            e2e_latency_ms: Some(630),
            llm_tokens: 24,
            llm_tok_per_sec: 31.5,
            tts_audio_chunks: 40,
            tts_est_duration_ms: 1700,
            turn_total_ms: 2300,
            tool_calls: 1,
        };
        let json = serde_json::to_value(ServerMessage::Metrics { metrics }).unwrap();
        assert_eq!(json["type"], "metrics");
        // Flattened: no nested object, counters at the top level.
        assert_eq!(json["e2e_latency_ms"], 630);
        assert_eq!(json["tool_calls"], 1);
        assert!(json.get("metrics").is_none());
    }

    #[test]
    fn connection_status_shape() {
        let json = serde_json::to_string(&ServerMessage::ConnectionStatus {
            service: ConnectionService::Asr,
            status: ConnectionStatus::Connected,
            detail: None,
        })
        .unwrap();
        assert_eq!(
            json,
            r#"{"type":"connection_status","service":"asr","status":"connected"}"#
        );
    }

    #[test]
    fn server_message_roundtrip() {
        let messages = vec![
            ServerMessage::State {
                state: SessionState::Speaking,
            },
            ServerMessage::Asr {
                text: "partial".into(),
                is_final: false,
            },
            ServerMessage::Skill {
                event: SkillEvent::Activated,
                name: "coder".into(),
                skills: vec![SkillInfo {
                    name: "coder".into(),
                    description: "writes code".into(),
                    active: true,
                }],
            },
            ServerMessage::Error {
                turn_id: None,
                message: "ASR connection failed".into(),
            },
        ];
        for msg in &messages {
            let json = serde_json::to_string(msg).unwrap();
            let back: ServerMessage = serde_json::from_str(&json).unwrap();
            assert_eq!(&back, msg, "roundtrip failed for {json}");
        }
    }
}
