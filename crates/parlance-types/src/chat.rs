//! Chat history types: roles, messages, tool calls, tool specs.
//!
//! The conversation history is the authoritative context for the LLM.
//! It is an append-only sequence of [`ChatMessage`] values owned by the
//! session; adapters and the agent loop only ever push to it.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Role of a message participant in the conversation history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatRole {
    /// System instruction (composed fresh each turn; never stored in history).
    System,
    /// Committed user utterance.
    User,
    /// Assistant (model) response, possibly carrying tool calls.
    Assistant,
    /// Tool result fed back to the model.
    Tool,
}

impl fmt::Display for ChatRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChatRole::System => write!(f, "system"),
            ChatRole::User => write!(f, "user"),
            ChatRole::Assistant => write!(f, "assistant"),
            ChatRole::Tool => write!(f, "tool"),
        }
    }
}

/// A tool invocation requested by the model.
///
/// `arguments` is the fully-assembled argument map; partial JSON is never
/// stored here. When the streamed argument fragments failed to parse at
/// end-of-stream, `arguments_error` is set so the agent loop can surface a
/// tool error without executing anything.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCall {
    /// Identifier assigned by the provider (or a deterministic fallback).
    pub id: String,
    /// Name of the tool being called.
    pub name: String,
    /// Tool input arguments as a JSON value.
    pub arguments: serde_json::Value,
    /// Set when argument accumulation failed to parse at end-of-stream.
    #[serde(default, skip_serializing_if = "is_false")]
    pub arguments_error: bool,
}

fn is_false(b: &bool) -> bool {
    !*b
}

/// A tool definition handed to the LLM (name + description + JSON Schema).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolSpec {
    /// Tool name.
    pub name: String,
    /// Short description of what the tool does.
    pub description: String,
    /// Input parameter schema in JSON Schema format.
    pub parameters: serde_json::Value,
}

/// A message in the conversation history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    /// The role of the message sender.
    pub role: ChatRole,
    /// Text content of the message.
    pub content: String,
    /// Tool call id this message responds to (Tool role only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    /// Tool calls made by the assistant in this message.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
}

impl ChatMessage {
    /// Create a user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
            tool_call_id: None,
            tool_calls: Vec::new(),
        }
    }

    /// Create an assistant text message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
            tool_call_id: None,
            tool_calls: Vec::new(),
        }
    }

    /// Create an assistant message carrying a tool-call manifest.
    pub fn assistant_tool_calls(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
            tool_call_id: None,
            tool_calls,
        }
    }

    /// Create a system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
            tool_call_id: None,
            tool_calls: Vec::new(),
        }
    }

    /// Create a tool result message referencing the originating call.
    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Tool,
            content: content.into(),
            tool_call_id: Some(tool_call_id.into()),
            tool_calls: Vec::new(),
        }
    }
}

/// Why a streamed completion ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    /// Natural end of response.
    Stop,
    /// Model wants tool results before continuing.
    ToolCalls,
    /// Token limit reached.
    Length,
}

impl FinishReason {
    /// Map a provider finish-reason string. Unknown values default to `Stop`.
    pub fn from_wire(s: &str) -> Self {
        match s {
            "tool_calls" => FinishReason::ToolCalls,
            "length" => FinishReason::Length,
            _ => FinishReason::Stop,
        }
    }
}

impl fmt::Display for FinishReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FinishReason::Stop => write!(f, "stop"),
            FinishReason::ToolCalls => write!(f, "tool_calls"),
            FinishReason::Length => write!(f, "length"),
        }
    }
}
