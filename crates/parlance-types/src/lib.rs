//! Shared types for the Parlance voice agent server.
//!
//! Everything that crosses a crate boundary lives here: the session state
//! machine, strongly-typed ids, chat history types, the client/server
//! WebSocket protocol, per-turn metrics, and runtime settings.

pub mod chat;
pub mod config;
pub mod error;
pub mod ids;
pub mod metrics;
pub mod protocol;

pub use chat::{ChatMessage, ChatRole, FinishReason, ToolCall, ToolSpec};
pub use config::Settings;
pub use error::ParlanceError;
pub use ids::{SessionId, TurnId};
pub use metrics::TurnMetrics;
pub use protocol::{
    ClientMessage, ConnectionService, ConnectionStatus, IdentitySummary, ServerMessage,
    SessionState, SkillEvent, SkillInfo, ToolEvent, TurnEvent,
};
