//! Streaming chat-completions adapter.
//!
//! Submits the full message history plus tool schemas to an
//! OpenAI-compatible `/chat/completions` endpoint with streaming enabled
//! and turns the SSE response into a typed event stream: incremental text
//! deltas, fully-assembled tool calls, and a terminal finish reason.
//!
//! Tool-call arguments arrive fragmented across many deltas; the adapter
//! accumulates them per choice index and parses the assembled JSON at
//! end-of-stream. Partial JSON is never emitted -- an unparseable argument
//! string surfaces as a tool call with the `arguments_error` marker set so
//! the agent loop can report a tool error without executing anything.

mod accumulate;
mod client;
mod wire;

pub use accumulate::ToolCallAccumulator;
pub use client::{CompletionBackend, LlmClient};
pub use wire::{apply_chunk, build_request_body, to_wire_message};

use parlance_types::{ChatMessage, FinishReason, ToolCall, ToolSpec};

/// Errors from the LLM adapter.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    /// The request failed validation before being sent.
    #[error("invalid completion request: {0}")]
    InvalidRequest(String),

    /// HTTP transport failure.
    #[error("llm http error: {0}")]
    Http(#[from] reqwest::Error),

    /// The provider returned a non-success status.
    #[error("llm api returned {status}: {body}")]
    Api { status: u16, body: String },
}

/// Convenience alias for LLM results.
pub type LlmResult<T> = Result<T, LlmError>;

/// A completion request: everything the provider needs for one round.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    /// Model identifier.
    pub model: String,
    /// System prompt, sent as the first message.
    pub system_prompt: String,
    /// Conversation history.
    pub messages: Vec<ChatMessage>,
    /// Tool definitions available to the model (empty disables tools).
    pub tools: Vec<ToolSpec>,
    /// Sampling temperature, if overridden.
    pub temperature: Option<f64>,
}

/// Events produced while streaming one completion.
#[derive(Debug, Clone, PartialEq)]
pub enum LlmEvent {
    /// Incremental assistant text.
    TextDelta(String),
    /// A completed tool invocation request (arguments fully assembled).
    ToolCall(ToolCall),
    /// Terminal event: why the stream ended.
    End(FinishReason),
    /// The stream died mid-flight; no `End` will follow.
    Error(String),
}
