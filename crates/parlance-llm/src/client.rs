//! HTTP client for streaming chat completions.

use std::time::Duration;

use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures_util::StreamExt;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::wire::{apply_chunk, build_request_body};
use crate::{CompletionRequest, LlmError, LlmEvent, LlmResult, ToolCallAccumulator};
use parlance_types::FinishReason;

/// Depth of the event channel between the SSE reader and the consumer.
const EVENT_CHANNEL_DEPTH: usize = 64;

/// Model name validation: allowed characters.
fn is_valid_model_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '-' || c == '.' || c == '_' || c == '/'
}

/// Mask an API key for log output: first four characters, then an ellipsis.
fn mask_key(key: &str) -> String {
    if key.len() <= 8 {
        "****".to_string()
    } else {
        format!("{}…", &key[..4])
    }
}

/// Abstraction the agent loop streams completions through.
///
/// The production implementation is [`LlmClient`]; tests script rounds with
/// a mock backend.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    /// Start one streaming completion. Returns the event receiver; the
    /// stream runs until `End` or `Error`.
    async fn stream(&self, request: CompletionRequest) -> LlmResult<mpsc::Receiver<LlmEvent>>;
}

/// Streaming HTTP client for an OpenAI-compatible chat-completions endpoint.
pub struct LlmClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl LlmClient {
    /// Create a client for `base_url` (e.g. `https://api.openai.com/v1`).
    ///
    /// The HTTP client follows no redirects and uses a 10 second connect
    /// timeout; the streaming response itself is unbounded (providers
    /// enforce their own inactivity limits).
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> LlmResult<Self> {
        let http = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .connect_timeout(Duration::from_secs(10))
            .user_agent("parlance/0.1")
            .build()?;
        let base_url = base_url.into();
        let api_key = api_key.into();
        debug!(key = %mask_key(&api_key), "llm client created");
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    /// Validate a request before sending.
    pub fn validate_request(request: &CompletionRequest) -> LlmResult<()> {
        if request.model.is_empty() {
            return Err(LlmError::InvalidRequest("model name must not be empty".into()));
        }
        if !request.model.chars().all(is_valid_model_char) {
            return Err(LlmError::InvalidRequest(format!(
                "model name contains invalid characters: '{}'",
                request.model
            )));
        }
        if request.messages.is_empty() {
            return Err(LlmError::InvalidRequest("messages must not be empty".into()));
        }
        if let Some(temp) = request.temperature {
            if !(0.0..=2.0).contains(&temp) {
                return Err(LlmError::InvalidRequest(format!(
                    "temperature must be between 0.0 and 2.0, got {temp}"
                )));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl CompletionBackend for LlmClient {
    async fn stream(&self, request: CompletionRequest) -> LlmResult<mpsc::Receiver<LlmEvent>> {
        Self::validate_request(&request)?;

        let url = format!("{}/chat/completions", self.base_url);
        let body = build_request_body(&request);

        info!(
            model = %request.model,
            message_count = request.messages.len(),
            tool_count = request.tools.len(),
            "starting streaming completion"
        );

        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_DEPTH);
        tokio::spawn(async move {
            let mut stream = response.bytes_stream().eventsource();
            let mut acc = ToolCallAccumulator::default();
            let mut finish: Option<FinishReason> = None;
            let mut deltas: u64 = 0;

            loop {
                match stream.next().await {
                    Some(Ok(event)) => {
                        if event.data == "[DONE]" {
                            break;
                        }
                        let chunk: Value = match serde_json::from_str(&event.data) {
                            Ok(v) => v,
                            Err(e) => {
                                warn!(error = %e, "unparseable sse chunk, skipping");
                                continue;
                            }
                        };
                        if let Some(err) = chunk.get("error") {
                            let message = err
                                .get("message")
                                .and_then(Value::as_str)
                                .unwrap_or("provider stream error")
                                .to_string();
                            let _ = tx.send(LlmEvent::Error(message)).await;
                            return;
                        }
                        if let Some(text) = apply_chunk(&chunk, &mut acc, &mut finish) {
                            deltas += 1;
                            if tx.send(LlmEvent::TextDelta(text)).await.is_err() {
                                // Consumer gone (cancelled turn); stop reading.
                                return;
                            }
                        }
                    }
                    Some(Err(e)) => {
                        let _ = tx.send(LlmEvent::Error(e.to_string())).await;
                        return;
                    }
                    None => break,
                }
            }

            let tool_calls = acc.finish();
            let reason = finish.unwrap_or(if tool_calls.is_empty() {
                FinishReason::Stop
            } else {
                FinishReason::ToolCalls
            });
            info!(
                deltas,
                tool_calls = tool_calls.len(),
                reason = %reason,
                "completion stream finished"
            );
            for call in tool_calls {
                if tx.send(LlmEvent::ToolCall(call)).await.is_err() {
                    return;
                }
            }
            let _ = tx.send(LlmEvent::End(reason)).await;
        });

        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parlance_types::ChatMessage;

    fn sample_request() -> CompletionRequest {
        CompletionRequest {
            model: "gpt-4o".into(),
            system_prompt: String::new(),
            messages: vec![ChatMessage::user("hi")],
            tools: vec![],
            temperature: None,
        }
    }

    #[test]
    fn request_validation() {
        assert!(LlmClient::validate_request(&sample_request()).is_ok());

        let req = CompletionRequest {
            model: String::new(),
            ..sample_request()
        };
        assert!(LlmClient::validate_request(&req).is_err());

        let req = CompletionRequest {
            model: "bad model".into(),
            ..sample_request()
        };
        assert!(LlmClient::validate_request(&req).is_err());

        // Vendor-prefixed model ids are valid.
        let req = CompletionRequest {
            model: "qwen/qwen3-max".into(),
            ..sample_request()
        };
        assert!(LlmClient::validate_request(&req).is_ok());

        let req = CompletionRequest {
            messages: vec![],
            ..sample_request()
        };
        assert!(LlmClient::validate_request(&req).is_err());

        let req = CompletionRequest {
            temperature: Some(2.5),
            ..sample_request()
        };
        assert!(LlmClient::validate_request(&req).is_err());
    }

    #[test]
    fn api_key_never_in_body() {
        let body = build_request_body(&sample_request());
        let body_str = body.to_string();
        assert!(!body_str.contains("api_key"));
        assert!(!body_str.contains("Authorization"));
        assert!(!body_str.contains("Bearer"));
    }

    #[test]
    fn key_masking() {
        assert_eq!(mask_key("short"), "****");
        assert_eq!(mask_key("sk-veryverylongkey"), "sk-v…");
    }
}
