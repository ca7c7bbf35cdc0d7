//! OpenAI chat-completions wire format: request building and chunk parsing.

use parlance_types::{ChatMessage, ChatRole, FinishReason};
use serde_json::{json, Value};

use crate::{CompletionRequest, ToolCallAccumulator};

/// Convert a history message to the provider wire format.
///
/// Assistant messages that carry tool calls serialize their arguments back
/// to a JSON string, which is how the chat-completions API expects them.
pub fn to_wire_message(msg: &ChatMessage) -> Value {
    match msg.role {
        ChatRole::System => json!({"role": "system", "content": msg.content}),
        ChatRole::User => json!({"role": "user", "content": msg.content}),
        ChatRole::Assistant => {
            if msg.tool_calls.is_empty() {
                json!({"role": "assistant", "content": msg.content})
            } else {
                let calls: Vec<Value> = msg
                    .tool_calls
                    .iter()
                    .map(|tc| {
                        json!({
                            "id": tc.id,
                            "type": "function",
                            "function": {
                                "name": tc.name,
                                "arguments": tc.arguments.to_string(),
                            }
                        })
                    })
                    .collect();
                let content = if msg.content.is_empty() {
                    Value::Null
                } else {
                    Value::String(msg.content.clone())
                };
                json!({"role": "assistant", "content": content, "tool_calls": calls})
            }
        }
        ChatRole::Tool => json!({
            "role": "tool",
            "tool_call_id": msg.tool_call_id.clone().unwrap_or_default(),
            "content": msg.content,
        }),
    }
}

/// Build the streaming request body for one completion round.
pub fn build_request_body(request: &CompletionRequest) -> Value {
    let mut messages: Vec<Value> = Vec::with_capacity(request.messages.len() + 1);
    if !request.system_prompt.is_empty() {
        messages.push(json!({"role": "system", "content": request.system_prompt}));
    }
    messages.extend(request.messages.iter().map(to_wire_message));

    let mut body = json!({
        "model": request.model,
        "messages": messages,
        "stream": true,
    });

    if let Some(temp) = request.temperature {
        body["temperature"] = json!(temp);
    }

    if !request.tools.is_empty() {
        let tools: Vec<Value> = request
            .tools
            .iter()
            .map(|t| {
                json!({
                    "type": "function",
                    "function": {
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.parameters,
                    }
                })
            })
            .collect();
        body["tools"] = Value::Array(tools);
        body["tool_choice"] = Value::String("auto".into());
    }

    body
}

/// Apply one parsed SSE chunk to the streaming state.
///
/// Returns the text delta carried by the chunk, if any. Tool-call fragments
/// go into `acc`; a `finish_reason` updates `finish`.
pub fn apply_chunk(
    chunk: &Value,
    acc: &mut ToolCallAccumulator,
    finish: &mut Option<FinishReason>,
) -> Option<String> {
    let choice = chunk.get("choices")?.as_array()?.first()?;

    if let Some(reason) = choice.get("finish_reason").and_then(Value::as_str) {
        *finish = Some(FinishReason::from_wire(reason));
    }

    let delta = choice.get("delta")?;

    if let Some(calls) = delta.get("tool_calls").and_then(Value::as_array) {
        for call in calls {
            let index = call.get("index").and_then(Value::as_u64).unwrap_or(0);
            let id = call.get("id").and_then(Value::as_str);
            let function = call.get("function");
            let name = function
                .and_then(|f| f.get("name"))
                .and_then(Value::as_str);
            let fragment = function
                .and_then(|f| f.get("arguments"))
                .and_then(Value::as_str);
            acc.absorb(index, id, name, fragment);
        }
    }

    delta
        .get("content")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use parlance_types::{ToolCall, ToolSpec};

    fn sample_request() -> CompletionRequest {
        CompletionRequest {
            model: "gpt-4o".into(),
            system_prompt: "Be brief.".into(),
            messages: vec![ChatMessage::user("hello")],
            tools: vec![ToolSpec {
                name: "get_datetime".into(),
                description: "Current date and time".into(),
                parameters: json!({"type": "object", "properties": {}}),
            }],
            temperature: Some(0.7),
        }
    }

    // -- Request building --

    #[test]
    fn request_body_shape() {
        let body = build_request_body(&sample_request());

        assert_eq!(body["model"], "gpt-4o");
        assert_eq!(body["stream"], true);
        assert_eq!(body["temperature"], 0.7);

        let msgs = body["messages"].as_array().unwrap();
        assert_eq!(msgs[0]["role"], "system");
        assert_eq!(msgs[0]["content"], "Be brief.");
        assert_eq!(msgs[1]["role"], "user");

        let tools = body["tools"].as_array().unwrap();
        assert_eq!(tools[0]["type"], "function");
        assert_eq!(tools[0]["function"]["name"], "get_datetime");
        assert_eq!(body["tool_choice"], "auto");
    }

    #[test]
    fn request_without_tools_omits_tool_choice() {
        let mut request = sample_request();
        request.tools.clear();
        let body = build_request_body(&request);
        assert!(body.get("tools").is_none());
        assert!(body.get("tool_choice").is_none());
    }

    #[test]
    fn assistant_tool_calls_serialize_arguments_as_string() {
        let msg = ChatMessage::assistant_tool_calls(
            "",
            vec![ToolCall {
                id: "call_1".into(),
                name: "calculate".into(),
                arguments: json!({"expression": "2+2"}),
                arguments_error: false,
            }],
        );
        let wire = to_wire_message(&msg);
        assert_eq!(wire["role"], "assistant");
        assert!(wire["content"].is_null());
        let args = wire["tool_calls"][0]["function"]["arguments"].as_str().unwrap();
        // Arguments are a JSON *string* on the wire.
        let parsed: Value = serde_json::from_str(args).unwrap();
        assert_eq!(parsed["expression"], "2+2");
    }

    #[test]
    fn tool_message_carries_call_id() {
        let wire = to_wire_message(&ChatMessage::tool_result("call_9", "4"));
        assert_eq!(wire["role"], "tool");
        assert_eq!(wire["tool_call_id"], "call_9");
        assert_eq!(wire["content"], "4");
    }

    // -- Chunk parsing --

    #[test]
    fn text_delta_chunk() {
        let chunk = json!({
            "choices": [{"index": 0, "delta": {"content": "Hel"}, "finish_reason": null}]
        });
        let mut acc = ToolCallAccumulator::default();
        let mut finish = None;
        let text = apply_chunk(&chunk, &mut acc, &mut finish);
        assert_eq!(text.as_deref(), Some("Hel"));
        assert!(acc.is_empty());
        assert!(finish.is_none());
    }

    #[test]
    fn tool_call_chunks_accumulate() {
        let chunks = [
            json!({"choices": [{"delta": {"tool_calls": [
                {"index": 0, "id": "call_1", "function": {"name": "get_weather", "arguments": ""}}
            ]}}]}),
            json!({"choices": [{"delta": {"tool_calls": [
                {"index": 0, "function": {"arguments": "{\"city\":"}}
            ]}}]}),
            json!({"choices": [{"delta": {"tool_calls": [
                {"index": 0, "function": {"arguments": "\"NYC\"}"}}
            ]}}]}),
            json!({"choices": [{"delta": {}, "finish_reason": "tool_calls"}]}),
        ];
        let mut acc = ToolCallAccumulator::default();
        let mut finish = None;
        for chunk in &chunks {
            assert!(apply_chunk(chunk, &mut acc, &mut finish).is_none());
        }
        assert_eq!(finish, Some(FinishReason::ToolCalls));

        let calls = acc.finish();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].arguments["city"], "NYC");
    }

    #[test]
    fn chunk_without_choices_is_ignored() {
        let mut acc = ToolCallAccumulator::default();
        let mut finish = None;
        assert!(apply_chunk(&json!({"object": "ping"}), &mut acc, &mut finish).is_none());
    }
}
