//! The agent loop: a bounded multi-round LLM/tool cycle.
//!
//! One call to [`AgentLoop::run_turn`] handles one user utterance. Each
//! round streams the LLM with the current history; text deltas are buffered
//! per round, tool calls are queued for end-of-round execution. A round
//! that ends without tool calls is the speaking round: its buffered deltas
//! flush to the caller's text stream (which feeds TTS) and the loop
//! returns. A round with tool calls executes them in parallel, appends the
//! results to history in issuance order, and iterates. After the round
//! budget is exhausted the loop speaks a fixed terminal message.
//!
//! Buffering per round is what guarantees the TTS consumer a contiguous
//! assistant answer composed only from the final speaking round: whether a
//! round carries tool calls is unknown until its end event arrives.

use std::sync::{Arc, Mutex};
use std::time::Instant;

use futures_util::future::join_all;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use parlance_identity::IdentityStore;
use parlance_llm::{CompletionBackend, CompletionRequest, LlmError, LlmEvent};
use parlance_skills::SkillSet;
use parlance_tools::{ToolOutcome, ToolRegistry};
use parlance_types::{ChatMessage, FinishReason, SkillInfo, ToolCall};

/// Message spoken when the round budget is exhausted.
pub const MAX_ROUNDS_MESSAGE: &str = "(reached maximum reasoning rounds)";

/// Cap on tool result text forwarded in UI events (history keeps it all).
pub const TOOL_RESULT_PREVIEW_CHARS: usize = 2000;

/// Operating instructions composed into every system prompt.
const AGENT_INSTRUCTIONS: &str = "<agent_instructions>\n\
You are a capable voice agent. You can use tools to fetch live information, \
run calculations and code, search the web, and read and write files; you can \
activate skills to deepen specific abilities; and you can recall past \
conversations (recall_memory) and record facts about the user \
(update_user_profile).\n\
\n\
Rules:\n\
- Replies are spoken aloud: keep them short and conversational, with no \
markdown, code blocks, or special symbols.\n\
- Reach for a tool whenever live information (time, weather, news) is needed.\n\
- Weave tool results into your reply naturally instead of reading raw data.\n\
- If a tool fails, say so briefly and offer an alternative.\n\
- When you learn something important about the user, record it with \
update_user_profile.\n\
</agent_instructions>";

/// Conversation history shared between the orchestrator and the agent loop.
pub type History = Arc<Mutex<Vec<ChatMessage>>>;

/// Errors that abort a turn (tool failures never do).
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    /// The completion request could not be started.
    #[error(transparent)]
    Llm(#[from] LlmError),

    /// The completion stream died mid-round.
    #[error("completion stream failed: {0}")]
    Stream(String),
}

/// Events the agent loop emits for the orchestrator/UI.
#[derive(Debug, Clone)]
pub enum AgentEvent {
    /// A new reasoning round is starting.
    Thinking { round: u32 },
    /// A tool invocation is about to execute.
    ToolStart {
        tool_call_id: String,
        name: String,
        arguments: serde_json::Value,
    },
    /// A tool invocation finished.
    ToolResult {
        tool_call_id: String,
        name: String,
        content: String,
        is_error: bool,
        elapsed_ms: u64,
    },
    /// The model toggled a skill; the prompt rebuilds next round.
    SkillChanged {
        activated: bool,
        skill_name: String,
        skills: Vec<SkillInfo>,
    },
}

/// Configuration for the agent loop.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Chat model identifier.
    pub model: String,
    /// Round budget (default 5).
    pub max_rounds: u32,
}

/// The bounded LLM/tool cycle for one session.
pub struct AgentLoop {
    backend: Arc<dyn CompletionBackend>,
    tools: ToolRegistry,
    skills: SkillSet,
    identity: Arc<IdentityStore>,
    config: AgentConfig,
}

impl AgentLoop {
    /// Create an agent loop over the given backend and session state.
    pub fn new(
        backend: Arc<dyn CompletionBackend>,
        tools: ToolRegistry,
        skills: SkillSet,
        identity: Arc<IdentityStore>,
        config: AgentConfig,
    ) -> Self {
        Self {
            backend,
            tools,
            skills,
            identity,
            config,
        }
    }

    /// Compose the system prompt: persona, user profile, operating
    /// instructions, then skill declarations. Rebuilt every round so
    /// profile updates and skill toggles inside a turn take effect.
    pub fn build_system_prompt(&self) -> String {
        let mut parts: Vec<String> = Vec::new();
        let persona = self.identity.persona();
        if !persona.is_empty() {
            parts.push(format!("<agent_persona>\n{persona}\n</agent_persona>"));
        }
        let profile = self.identity.profile();
        if !profile.is_empty() {
            parts.push(format!("<user_profile>\n{profile}\n</user_profile>"));
        }
        parts.push(AGENT_INSTRUCTIONS.to_string());
        self.skills.build_system_prompt(&parts.join("\n\n"))
    }

    /// Run one full turn. Text for TTS goes to `text_tx`; observable
    /// activity goes to `events`. Returns quietly on cancellation.
    pub async fn run_turn(
        &self,
        history: History,
        user_text: String,
        events: mpsc::Sender<AgentEvent>,
        text_tx: mpsc::Sender<String>,
        cancel: CancellationToken,
    ) -> Result<(), AgentError> {
        history
            .lock()
            .expect("history lock poisoned")
            .push(ChatMessage::user(user_text));

        let specs = self.tools.specs();
        let mut tool_seq: u64 = 0;

        for round in 1..=self.config.max_rounds {
            if cancel.is_cancelled() {
                info!(round, "turn cancelled before round");
                return Ok(());
            }
            let _ = events.send(AgentEvent::Thinking { round }).await;

            let request = CompletionRequest {
                model: self.config.model.clone(),
                system_prompt: self.build_system_prompt(),
                messages: history.lock().expect("history lock poisoned").clone(),
                tools: specs.clone(),
                temperature: None,
            };
            let mut rx = self.backend.stream(request).await?;

            // Collect the whole round: deltas, tool calls, finish reason.
            let mut deltas: Vec<String> = Vec::new();
            let mut calls: Vec<ToolCall> = Vec::new();
            loop {
                let event = tokio::select! {
                    _ = cancel.cancelled() => {
                        info!(round, "turn cancelled mid-round");
                        return Ok(());
                    }
                    event = rx.recv() => event,
                };
                match event {
                    Some(LlmEvent::TextDelta(text)) => deltas.push(text),
                    Some(LlmEvent::ToolCall(call)) => calls.push(call),
                    Some(LlmEvent::End(reason)) => {
                        if reason == FinishReason::Length {
                            warn!(round, "completion hit the length limit");
                        }
                        break;
                    }
                    Some(LlmEvent::Error(message)) => return Err(AgentError::Stream(message)),
                    None => break,
                }
            }
            if cancel.is_cancelled() {
                return Ok(());
            }

            let round_text: String = deltas.concat();

            if calls.is_empty() {
                // Speaking round: flush the buffered deltas and finish.
                for delta in deltas {
                    if text_tx.send(delta).await.is_err() {
                        return Ok(());
                    }
                }
                if !round_text.is_empty() {
                    history
                        .lock()
                        .expect("history lock poisoned")
                        .push(ChatMessage::assistant(round_text));
                }
                info!(round, "turn finished with a speaking round");
                return Ok(());
            }

            // Tool round. Assign fallback ids so the client can always
            // correlate start/result events.
            for call in &mut calls {
                if call.id.trim().is_empty() {
                    tool_seq += 1;
                    call.id = format!("fallback_{round}_{tool_seq}");
                }
            }

            for call in &calls {
                let _ = events
                    .send(AgentEvent::ToolStart {
                        tool_call_id: call.id.clone(),
                        name: call.name.clone(),
                        arguments: call.arguments.clone(),
                    })
                    .await;
            }

            let outcomes = self.execute_round(&calls, &cancel).await;
            if cancel.is_cancelled() {
                // Results of a cancelled round are discarded, and the
                // manifest is withheld so history never carries an
                // assistant tool-call message without its tool results.
                info!(round, "turn cancelled during tool execution");
                return Ok(());
            }

            {
                let mut h = history.lock().expect("history lock poisoned");
                h.push(ChatMessage::assistant_tool_calls(
                    round_text,
                    calls.clone(),
                ));
                for (call, outcome) in calls.iter().zip(&outcomes) {
                    h.push(ChatMessage::tool_result(
                        call.id.as_str(),
                        outcome.content.as_str(),
                    ));
                }
            }

            for (call, outcome) in calls.iter().zip(&outcomes) {
                let mut preview = outcome.content.clone();
                if preview.len() > TOOL_RESULT_PREVIEW_CHARS {
                    let mut end = TOOL_RESULT_PREVIEW_CHARS;
                    while !preview.is_char_boundary(end) {
                        end -= 1;
                    }
                    preview.truncate(end);
                }
                let _ = events
                    .send(AgentEvent::ToolResult {
                        tool_call_id: call.id.clone(),
                        name: call.name.clone(),
                        content: preview,
                        is_error: outcome.is_error,
                        elapsed_ms: outcome.elapsed_ms,
                    })
                    .await;

                if !outcome.is_error
                    && (call.name == "activate_skill" || call.name == "deactivate_skill")
                {
                    let skill_name = call
                        .arguments
                        .get("skill_name")
                        .and_then(serde_json::Value::as_str)
                        .unwrap_or_default()
                        .to_string();
                    let _ = events
                        .send(AgentEvent::SkillChanged {
                            activated: call.name == "activate_skill",
                            skill_name,
                            skills: self.skills.to_info(),
                        })
                        .await;
                }
            }
        }

        // Round budget exhausted: every round produced tool calls.
        warn!(
            max_rounds = self.config.max_rounds,
            "agent hit the round budget, speaking the terminal message"
        );
        history
            .lock()
            .expect("history lock poisoned")
            .push(ChatMessage::assistant(MAX_ROUNDS_MESSAGE));
        let _ = text_tx.send(MAX_ROUNDS_MESSAGE.to_string()).await;
        Ok(())
    }

    /// Execute one round's tool calls in parallel. Results come back in
    /// issuance order regardless of completion order.
    async fn execute_round(&self, calls: &[ToolCall], cancel: &CancellationToken) -> Vec<RoundOutcome> {
        let futures = calls.iter().map(|call| {
            let registry = self.tools.clone();
            let cancel = cancel.clone();
            let call = call.clone();
            async move {
                let started = Instant::now();
                let outcome = if call.arguments_error {
                    // Arguments never parsed; surface the failure to the
                    // model without executing anything.
                    ToolOutcome::error(format!(
                        "tool arguments for {} could not be parsed",
                        call.name
                    ))
                } else {
                    registry.invoke(&call.name, call.arguments.clone(), cancel).await
                };
                RoundOutcome {
                    content: outcome.content,
                    is_error: outcome.is_error,
                    elapsed_ms: started.elapsed().as_millis() as u64,
                }
            }
        });
        join_all(futures).await
    }
}

struct RoundOutcome {
    content: String,
    is_error: bool,
    elapsed_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::time::Duration;

    use parlance_types::ChatRole;
    use serde_json::json;

    /// Backend that replays scripted rounds of events.
    struct ScriptedBackend {
        rounds: Mutex<VecDeque<Vec<LlmEvent>>>,
    }

    impl ScriptedBackend {
        fn new(rounds: Vec<Vec<LlmEvent>>) -> Arc<Self> {
            Arc::new(Self {
                rounds: Mutex::new(rounds.into()),
            })
        }
    }

    #[async_trait::async_trait]
    impl CompletionBackend for ScriptedBackend {
        async fn stream(
            &self,
            _request: CompletionRequest,
        ) -> Result<mpsc::Receiver<LlmEvent>, LlmError> {
            let round = self
                .rounds
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| vec![LlmEvent::End(FinishReason::Stop)]);
            let (tx, rx) = mpsc::channel(16);
            tokio::spawn(async move {
                for event in round {
                    if tx.send(event).await.is_err() {
                        return;
                    }
                }
            });
            Ok(rx)
        }
    }

    /// Tool that echoes its "value" argument after an optional delay.
    struct EchoTool {
        tool_name: String,
        delay_ms: u64,
    }

    #[async_trait::async_trait]
    impl parlance_tools::ToolDefinition for EchoTool {
        fn name(&self) -> &str {
            &self.tool_name
        }
        fn description(&self) -> &str {
            "echoes its input"
        }
        fn input_schema(&self) -> serde_json::Value {
            json!({"type": "object", "properties": {"value": {"type": "string"}}})
        }
        async fn execute(
            &self,
            args: serde_json::Value,
            _cancel: CancellationToken,
        ) -> anyhow::Result<String> {
            if self.delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
            }
            Ok(args.get("value").and_then(|v| v.as_str()).unwrap_or("?").to_string())
        }
    }

    struct Harness {
        _dir: tempfile::TempDir,
        agent: AgentLoop,
        history: History,
        events_rx: mpsc::Receiver<AgentEvent>,
        events_tx: mpsc::Sender<AgentEvent>,
        text_rx: mpsc::Receiver<String>,
        text_tx: mpsc::Sender<String>,
    }

    fn harness(backend: Arc<dyn CompletionBackend>, max_rounds: u32) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let identity = Arc::new(IdentityStore::open(dir.path()).unwrap());
        let tools = ToolRegistry::new();
        tools
            .register(Box::new(EchoTool {
                tool_name: "echo".into(),
                delay_ms: 0,
            }))
            .unwrap();
        tools
            .register(Box::new(EchoTool {
                tool_name: "slow_echo".into(),
                delay_ms: 100,
            }))
            .unwrap();

        let agent = AgentLoop::new(
            backend,
            tools,
            SkillSet::new(),
            identity,
            AgentConfig {
                model: "test-model".into(),
                max_rounds,
            },
        );
        let (events_tx, events_rx) = mpsc::channel(64);
        let (text_tx, text_rx) = mpsc::channel(64);
        Harness {
            _dir: dir,
            agent,
            history: Arc::new(Mutex::new(Vec::new())),
            events_rx,
            events_tx,
            text_rx,
            text_tx,
        }
    }

    fn tool_call(id: &str, name: &str, args: serde_json::Value) -> ToolCall {
        ToolCall {
            id: id.into(),
            name: name.into(),
            arguments: args,
            arguments_error: false,
        }
    }

    async fn drain_text(rx: &mut mpsc::Receiver<String>) -> String {
        let mut out = String::new();
        while let Ok(delta) = rx.try_recv() {
            out.push_str(&delta);
        }
        out
    }

    #[tokio::test]
    async fn text_only_turn() {
        let backend = ScriptedBackend::new(vec![vec![
            LlmEvent::TextDelta("Hi ".into()),
            LlmEvent::TextDelta("there.".into()),
            LlmEvent::End(FinishReason::Stop),
        ]]);
        let mut h = harness(backend, 5);

        h.agent
            .run_turn(
                h.history.clone(),
                "hello".into(),
                h.events_tx.clone(),
                h.text_tx.clone(),
                CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(drain_text(&mut h.text_rx).await, "Hi there.");

        let history = h.history.lock().unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].role, ChatRole::User);
        assert_eq!(history[1].role, ChatRole::Assistant);
        assert_eq!(history[1].content, "Hi there.");
    }

    #[tokio::test]
    async fn tool_round_then_speaking_round() {
        let backend = ScriptedBackend::new(vec![
            vec![
                LlmEvent::ToolCall(tool_call("call_1", "echo", json!({"value": "12:00"}))),
                LlmEvent::End(FinishReason::ToolCalls),
            ],
            vec![
                LlmEvent::TextDelta("It is noon.".into()),
                LlmEvent::End(FinishReason::Stop),
            ],
        ]);
        let mut h = harness(backend, 5);

        h.agent
            .run_turn(
                h.history.clone(),
                "what time is it?".into(),
                h.events_tx.clone(),
                h.text_tx.clone(),
                CancellationToken::new(),
            )
            .await
            .unwrap();

        // Only the speaking round's text reaches TTS.
        assert_eq!(drain_text(&mut h.text_rx).await, "It is noon.");

        // History: user, assistant manifest, tool result, assistant text.
        let history = h.history.lock().unwrap();
        assert_eq!(history.len(), 4);
        assert_eq!(history[1].role, ChatRole::Assistant);
        assert_eq!(history[1].tool_calls.len(), 1);
        assert_eq!(history[2].role, ChatRole::Tool);
        assert_eq!(history[2].tool_call_id.as_deref(), Some("call_1"));
        assert_eq!(history[2].content, "12:00");
        assert_eq!(history[3].content, "It is noon.");

        // Events: thinking, tool start, tool result, thinking.
        let mut saw_start = false;
        let mut saw_result = false;
        while let Ok(event) = h.events_rx.try_recv() {
            match event {
                AgentEvent::ToolStart { ref name, .. } => {
                    assert_eq!(name, "echo");
                    saw_start = true;
                }
                AgentEvent::ToolResult {
                    ref content,
                    is_error,
                    ..
                } => {
                    assert_eq!(content, "12:00");
                    assert!(!is_error);
                    saw_result = true;
                }
                _ => {}
            }
        }
        assert!(saw_start && saw_result);
    }

    #[tokio::test]
    async fn parallel_results_append_in_issuance_order() {
        // The slow tool is issued first; its result must still come first.
        let backend = ScriptedBackend::new(vec![
            vec![
                LlmEvent::ToolCall(tool_call("call_a", "slow_echo", json!({"value": "first"}))),
                LlmEvent::ToolCall(tool_call("call_b", "echo", json!({"value": "second"}))),
                LlmEvent::End(FinishReason::ToolCalls),
            ],
            vec![
                LlmEvent::TextDelta("done".into()),
                LlmEvent::End(FinishReason::Stop),
            ],
        ]);
        let h = harness(backend, 5);

        let started = Instant::now();
        h.agent
            .run_turn(
                h.history.clone(),
                "go".into(),
                h.events_tx.clone(),
                h.text_tx.clone(),
                CancellationToken::new(),
            )
            .await
            .unwrap();

        // Ran concurrently: well under the 2x serial time.
        assert!(started.elapsed() < Duration::from_millis(190));

        let history = h.history.lock().unwrap();
        assert_eq!(history[2].tool_call_id.as_deref(), Some("call_a"));
        assert_eq!(history[2].content, "first");
        assert_eq!(history[3].tool_call_id.as_deref(), Some("call_b"));
        assert_eq!(history[3].content, "second");
    }

    #[tokio::test]
    async fn arguments_error_is_surfaced_without_execution() {
        let bad_call = ToolCall {
            id: "call_bad".into(),
            name: "echo".into(),
            arguments: serde_json::Value::String("{\"truncated".into()),
            arguments_error: true,
        };
        let backend = ScriptedBackend::new(vec![
            vec![
                LlmEvent::ToolCall(bad_call),
                LlmEvent::End(FinishReason::ToolCalls),
            ],
            vec![
                LlmEvent::TextDelta("sorry".into()),
                LlmEvent::End(FinishReason::Stop),
            ],
        ]);
        let h = harness(backend, 5);

        h.agent
            .run_turn(
                h.history.clone(),
                "go".into(),
                h.events_tx.clone(),
                h.text_tx.clone(),
                CancellationToken::new(),
            )
            .await
            .unwrap();

        let history = h.history.lock().unwrap();
        assert_eq!(history[2].role, ChatRole::Tool);
        assert!(history[2].content.contains("could not be parsed"));
    }

    #[tokio::test]
    async fn round_budget_exhaustion_speaks_terminal_message() {
        let looping_round = vec![
            LlmEvent::ToolCall(tool_call("", "echo", json!({"value": "again"}))),
            LlmEvent::End(FinishReason::ToolCalls),
        ];
        let backend = ScriptedBackend::new(vec![
            looping_round.clone(),
            looping_round.clone(),
            looping_round,
        ]);
        let mut h = harness(backend, 3);

        h.agent
            .run_turn(
                h.history.clone(),
                "loop forever".into(),
                h.events_tx.clone(),
                h.text_tx.clone(),
                CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(drain_text(&mut h.text_rx).await, MAX_ROUNDS_MESSAGE);

        let history = h.history.lock().unwrap();
        let last = history.last().unwrap();
        assert_eq!(last.role, ChatRole::Assistant);
        assert_eq!(last.content, MAX_ROUNDS_MESSAGE);

        // Fallback ids were minted for the empty-id calls.
        let manifest = &history[1];
        assert!(manifest.tool_calls[0].id.starts_with("fallback_1_"));
    }

    #[tokio::test]
    async fn cancelled_turn_commits_nothing_beyond_user_message() {
        let backend = ScriptedBackend::new(vec![vec![
            LlmEvent::TextDelta("never spoken".into()),
            LlmEvent::End(FinishReason::Stop),
        ]]);
        let mut h = harness(backend, 5);

        let cancel = CancellationToken::new();
        cancel.cancel();
        h.agent
            .run_turn(
                h.history.clone(),
                "hello".into(),
                h.events_tx.clone(),
                h.text_tx.clone(),
                cancel,
            )
            .await
            .unwrap();

        assert!(drain_text(&mut h.text_rx).await.is_empty());
        let history = h.history.lock().unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].role, ChatRole::User);
    }

    #[tokio::test]
    async fn stream_error_aborts_the_turn() {
        let backend = ScriptedBackend::new(vec![vec![LlmEvent::Error("boom".into())]]);
        let h = harness(backend, 5);

        let err = h
            .agent
            .run_turn(
                h.history.clone(),
                "hello".into(),
                h.events_tx.clone(),
                h.text_tx.clone(),
                CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::Stream(_)));
    }

    #[test]
    fn system_prompt_composition_order() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("PERSONA.md"), "I am Parlance.").unwrap();
        let identity = Arc::new(IdentityStore::open(dir.path()).unwrap());
        identity.update_profile("name is Ada").unwrap();

        let agent = AgentLoop::new(
            ScriptedBackend::new(vec![]),
            ToolRegistry::new(),
            SkillSet::new(),
            identity,
            AgentConfig {
                model: "m".into(),
                max_rounds: 5,
            },
        );
        let prompt = agent.build_system_prompt();

        let persona_pos = prompt.find("<agent_persona>").unwrap();
        let profile_pos = prompt.find("<user_profile>").unwrap();
        let instructions_pos = prompt.find("<agent_instructions>").unwrap();
        assert!(persona_pos < profile_pos);
        assert!(profile_pos < instructions_pos);
        assert!(prompt.contains("I am Parlance."));
        assert!(prompt.contains("name is Ada"));
    }
}
