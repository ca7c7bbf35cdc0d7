//! Core tool abstraction: the [`ToolDefinition`] trait and [`ToolOutcome`].

use std::time::Duration;

use anyhow::Result;
use tokio_util::sync::CancellationToken;

/// A tool the model can invoke.
///
/// Implementations must be `Send + Sync` so the registry can hand out
/// `Arc<dyn ToolDefinition>` across tasks. Long-running tools should poll
/// the cancellation token (or run processes that die with their future) so
/// barge-in aborts them promptly.
#[async_trait::async_trait]
pub trait ToolDefinition: Send + Sync {
    /// Unique name (alphanumeric + underscores, max 64 chars).
    fn name(&self) -> &str;

    /// Short description shown to the model.
    fn description(&self) -> &str;

    /// JSON Schema describing the valid input for [`Self::execute`].
    fn input_schema(&self) -> serde_json::Value;

    /// Per-tool timeout override. `None` uses the registry default.
    fn timeout(&self) -> Option<Duration> {
        None
    }

    /// Run the tool and return its textual result.
    async fn execute(&self, args: serde_json::Value, cancel: CancellationToken) -> Result<String>;
}

/// The reduced result of a tool invocation.
///
/// Binary or structured results are serialized to text before reaching
/// here; the model only ever sees strings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolOutcome {
    /// Textual result (or error description).
    pub content: String,
    /// Whether this outcome represents a failure.
    pub is_error: bool,
}

impl ToolOutcome {
    /// A successful outcome.
    pub fn ok(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: false,
        }
    }

    /// A failed outcome the model can observe and recover from.
    pub fn error(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: true,
        }
    }
}

/// Maximum allowed length for a tool name.
const MAX_TOOL_NAME_LEN: usize = 64;

/// Validate that a tool name contains only alphanumeric characters and
/// underscores, is non-empty, and does not exceed the length cap.
pub fn validate_tool_name(name: &str) -> Result<()> {
    if name.is_empty() {
        anyhow::bail!("tool name must not be empty");
    }
    if name.len() > MAX_TOOL_NAME_LEN {
        anyhow::bail!("tool name exceeds maximum length of {MAX_TOOL_NAME_LEN} characters: {name}");
    }
    if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        anyhow::bail!("tool name must contain only alphanumeric characters and underscores: {name}");
    }
    Ok(())
}

/// Validate that an input schema is a JSON object with a `"type"` field.
pub fn validate_input_schema(schema: &serde_json::Value) -> Result<()> {
    let obj = schema
        .as_object()
        .ok_or_else(|| anyhow::anyhow!("input schema must be a JSON object"))?;
    if !obj.contains_key("type") {
        anyhow::bail!("input schema must contain a \"type\" field");
    }
    Ok(())
}
