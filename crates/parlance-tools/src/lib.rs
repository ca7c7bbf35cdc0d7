//! Tool registry and built-in tools.
//!
//! Every tool the model can invoke implements [`ToolDefinition`]. The
//! [`ToolRegistry`] looks tools up by name, validates registration, and
//! runs invocations under a bounded wall-clock timeout and the turn's
//! cancellation token. Tool failures of every kind -- unknown name,
//! execution error, timeout, cancellation -- are captured as
//! `is_error = true` textual results and fed back to the model; they never
//! terminate the turn.

pub mod builtin;
pub mod calc;
pub mod definition;
pub mod registry;

pub use builtin::{register_builtins, BuiltinOptions};
pub use definition::{validate_input_schema, validate_tool_name, ToolDefinition, ToolOutcome};
pub use registry::ToolRegistry;
