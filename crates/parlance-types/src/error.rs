//! Error types shared across all Parlance crates.

/// Errors that can occur across the Parlance runtime.
///
/// Each variant corresponds to a different subsystem: transport, the three
/// streaming adapters, tools, identity storage, or configuration.
#[derive(Debug, thiserror::Error)]
pub enum ParlanceError {
    /// Client channel failure: disconnect or malformed control message.
    #[error("transport error: {0}")]
    TransportError(String),

    /// Speech recognition adapter failure.
    #[error("asr error: {0}")]
    AsrError(String),

    /// Chat completion adapter failure.
    #[error("llm error: {0}")]
    LlmError(String),

    /// Speech synthesis adapter failure.
    #[error("tts error: {0}")]
    TtsError(String),

    /// Tool registry or execution failure that escaped the is_error capture.
    #[error("tool error: {0}")]
    ToolError(String),

    /// Identity artifact read/write failure.
    #[error("identity store error: {0}")]
    IdentityError(String),

    /// Configuration loading or validation error.
    #[error("configuration error: {0}")]
    ConfigError(String),
}
