//! Tool-call fragment accumulation.
//!
//! Chat-completion providers stream a tool call as many deltas: the id and
//! name usually arrive on the first fragment for an index, and the argument
//! string trickles in over the rest. The accumulator reassembles them per
//! choice index and parses the arguments once the stream ends.

use std::collections::BTreeMap;

use parlance_types::ToolCall;

#[derive(Default)]
struct Slot {
    id: String,
    name: String,
    arguments: String,
}

/// Reassembles streamed tool-call fragments into whole [`ToolCall`]s.
#[derive(Default)]
pub struct ToolCallAccumulator {
    slots: BTreeMap<u64, Slot>,
}

impl ToolCallAccumulator {
    /// Absorb one streamed fragment for the given choice index.
    pub fn absorb(
        &mut self,
        index: u64,
        id: Option<&str>,
        name: Option<&str>,
        arguments_fragment: Option<&str>,
    ) {
        let slot = self.slots.entry(index).or_default();
        if let Some(id) = id {
            if !id.is_empty() {
                slot.id = id.to_string();
            }
        }
        if let Some(name) = name {
            if !name.is_empty() {
                slot.name = name.to_string();
            }
        }
        if let Some(fragment) = arguments_fragment {
            slot.arguments.push_str(fragment);
        }
    }

    /// Whether any fragments have been absorbed.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Finalize: parse each slot's argument string and emit tool calls in
    /// index order. An empty argument string parses as `{}`; a malformed
    /// one yields the raw string with `arguments_error` set.
    pub fn finish(self) -> Vec<ToolCall> {
        self.slots
            .into_values()
            .map(|slot| {
                if slot.arguments.trim().is_empty() {
                    return ToolCall {
                        id: slot.id,
                        name: slot.name,
                        arguments: serde_json::json!({}),
                        arguments_error: false,
                    };
                }
                match serde_json::from_str::<serde_json::Value>(&slot.arguments) {
                    Ok(value) => ToolCall {
                        id: slot.id,
                        name: slot.name,
                        arguments: value,
                        arguments_error: false,
                    },
                    Err(e) => {
                        tracing::warn!(
                            tool = %slot.name,
                            error = %e,
                            "tool call arguments failed to parse at end-of-stream"
                        );
                        ToolCall {
                            id: slot.id,
                            name: slot.name,
                            arguments: serde_json::Value::String(slot.arguments),
                            arguments_error: true,
                        }
                    }
                }
            })
            .collect()
    }
}
