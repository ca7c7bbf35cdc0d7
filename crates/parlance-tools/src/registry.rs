//! Thread-safe tool registry with bounded, cancellable invocation.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use anyhow::{bail, Result};
use tokio_util::sync::CancellationToken;

use crate::definition::{validate_input_schema, validate_tool_name, ToolDefinition, ToolOutcome};
use parlance_types::ToolSpec;

/// Default per-tool wall-clock timeout.
pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(30);

/// A thread-safe registry of tool definitions.
///
/// Tools are stored as `Arc<dyn ToolDefinition>` so invocation never holds
/// the registry lock.
#[derive(Clone)]
pub struct ToolRegistry {
    tools: Arc<RwLock<HashMap<String, Arc<dyn ToolDefinition>>>>,
    default_timeout: Duration,
}

impl ToolRegistry {
    /// Create an empty registry with the default timeout.
    pub fn new() -> Self {
        Self::with_default_timeout(DEFAULT_TOOL_TIMEOUT)
    }

    /// Create an empty registry with a custom default timeout.
    pub fn with_default_timeout(default_timeout: Duration) -> Self {
        Self {
            tools: Arc::new(RwLock::new(HashMap::new())),
            default_timeout,
        }
    }

    /// Register a tool. Rejects duplicate names, invalid names, and invalid
    /// input schemas.
    pub fn register(&self, tool: Box<dyn ToolDefinition>) -> Result<()> {
        let name = tool.name().to_string();
        validate_tool_name(&name)?;
        validate_input_schema(&tool.input_schema())?;

        let mut map = self
            .tools
            .write()
            .map_err(|e| anyhow::anyhow!("registry lock poisoned: {e}"))?;

        if map.contains_key(&name) {
            bail!("tool already registered: {name}");
        }

        map.insert(name, Arc::from(tool));
        Ok(())
    }

    /// Look up a tool by name.
    pub fn get_tool(&self, name: &str) -> Option<Arc<dyn ToolDefinition>> {
        let map = self.tools.read().ok()?;
        map.get(name).cloned()
    }

    /// Names of all registered tools (sorted for deterministic output).
    pub fn tool_names(&self) -> Vec<String> {
        let map = self.tools.read().expect("registry lock poisoned");
        let mut names: Vec<String> = map.keys().cloned().collect();
        names.sort();
        names
    }

    /// Tool definitions for the LLM request (sorted by name).
    pub fn specs(&self) -> Vec<ToolSpec> {
        let map = self.tools.read().expect("registry lock poisoned");
        let mut specs: Vec<ToolSpec> = map
            .values()
            .map(|t| ToolSpec {
                name: t.name().to_string(),
                description: t.description().to_string(),
                parameters: t.input_schema(),
            })
            .collect();
        specs.sort_by(|a, b| a.name.cmp(&b.name));
        specs
    }

    /// Number of registered tools.
    pub fn tool_count(&self) -> usize {
        self.tools.read().expect("registry lock poisoned").len()
    }

    /// Invoke a tool under its timeout and the turn's cancellation token.
    ///
    /// Never returns an `Err`: every failure mode -- unknown tool,
    /// execution error, timeout, cancellation -- is reduced to an
    /// `is_error = true` outcome so the model can observe and recover.
    pub async fn invoke(
        &self,
        name: &str,
        args: serde_json::Value,
        cancel: CancellationToken,
    ) -> ToolOutcome {
        let Some(tool) = self.get_tool(name) else {
            return ToolOutcome::error(format!("Unknown tool: {name}"));
        };

        let deadline = tool.timeout().unwrap_or(self.default_timeout);
        let started = Instant::now();

        let result = tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!(tool = name, "tool invocation cancelled");
                return ToolOutcome::error("tool execution cancelled");
            }
            result = tokio::time::timeout(deadline, tool.execute(args, cancel.clone())) => result,
        };

        let elapsed_ms = started.elapsed().as_millis() as u64;
        match result {
            Err(_) => {
                tracing::warn!(tool = name, timeout_secs = deadline.as_secs(), "tool timed out");
                ToolOutcome::error(format!(
                    "tool timeout: {name} exceeded {}s limit",
                    deadline.as_secs()
                ))
            }
            Ok(Err(e)) => {
                tracing::warn!(tool = name, error = %e, elapsed_ms, "tool failed");
                ToolOutcome::error(format!("tool error: {e}"))
            }
            Ok(Ok(content)) => {
                tracing::debug!(tool = name, elapsed_ms, chars = content.len(), "tool succeeded");
                ToolOutcome::ok(content)
            }
        }
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}
