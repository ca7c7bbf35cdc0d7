//! The per-session orchestrator.
//!
//! One [`Session`] exists per connected client. It owns the conversation
//! history, the skill set, the tool registry, and the agent loop, and it
//! drives the five-state machine: `idle`, `listening`, `thinking`,
//! `executing`, `speaking`. Adapters produce events; every state
//! transition happens here.
//!
//! Turn lifecycle: an ASR endpoint commits an utterance, mints a turn id,
//! and spawns the turn task. The turn task runs the agent loop, pipes its
//! speaking-round text into TTS while emitting `llm` events, forwards PCM
//! downlink, and finishes with `metrics` and `turn:finished`. Barge-in
//! (explicit `interrupt`, a qualifying ASR final, or a new endpoint)
//! cancels TTS first so no further audio is emitted, then cancels the
//! agent loop, and the turn task winds down through the same finish path
//! without committing the partial assistant turn.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use parlance_agent::{AgentConfig, AgentEvent, AgentLoop, History};
use parlance_asr::{AsrConfig, AsrEvent, AsrHandle};
use parlance_identity::IdentityStore;
use parlance_llm::LlmClient;
use parlance_skills::SkillSet;
use parlance_tools::{register_builtins, BuiltinOptions, ToolRegistry};
use parlance_tts::{TtsConfig, TtsControl};
use parlance_types::{
    ChatRole, ConnectionService, ConnectionStatus, ServerMessage, SessionId, SessionState,
    Settings, SkillEvent, ToolEvent, TurnEvent, TurnId,
};

use crate::bargein::{BargeInGate, EndpointGate};
use crate::clock::TurnClock;

/// Depth of the outbound frame queue toward the transport.
pub const OUTBOUND_QUEUE_DEPTH: usize = 256;

/// A frame bound for the client.
#[derive(Debug)]
pub enum Outbound {
    /// JSON control message.
    Json(ServerMessage),
    /// Raw 24 kHz mono s16le PCM.
    Pcm(Vec<u8>),
}

/// Sender half of the outbound frame queue.
pub type OutboundTx = mpsc::Sender<Outbound>;

struct ActiveTurn {
    turn_id: TurnId,
    cancel: CancellationToken,
    tts: Arc<Mutex<Option<TtsControl>>>,
    task: JoinHandle<()>,
}

pub(crate) struct SessionInner {
    settings: Settings,
    identity: Arc<IdentityStore>,
    outbound: OutboundTx,
    session_id: SessionId,
    skills: SkillSet,
    tools: ToolRegistry,
    agent: Arc<AgentLoop>,
    history: History,
    state: Mutex<SessionState>,
    listening_since: Mutex<Instant>,
    running: AtomicBool,
    completed_turns: AtomicU64,
    session_cancel: Mutex<CancellationToken>,
    asr: Mutex<Option<AsrHandle>>,
    active_turn: tokio::sync::Mutex<Option<ActiveTurn>>,
    loop_task: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

/// One client's voice session.
pub struct Session {
    inner: Arc<SessionInner>,
}

impl Session {
    /// Build the session: discover skills, register tools, wire the agent.
    pub fn new(
        settings: Settings,
        identity: Arc<IdentityStore>,
        outbound: OutboundTx,
    ) -> anyhow::Result<Self> {
        let session_id = SessionId::generate();

        let skills = SkillSet::new();
        skills.discover(&settings.skills_dirs);

        let tools = ToolRegistry::with_default_timeout(Duration::from_secs(
            settings.tool_timeout_secs,
        ));
        register_builtins(
            &tools,
            BuiltinOptions {
                enabled: settings.enabled_tools.clone(),
                allow_shell: settings.allow_shell,
                skills: skills.clone(),
                identity: identity.clone(),
            },
        )?;

        let backend = Arc::new(LlmClient::new(
            settings.llm_base_url.clone(),
            settings.llm_api_key.clone(),
        )?);
        let agent = Arc::new(AgentLoop::new(
            backend,
            tools.clone(),
            skills.clone(),
            identity.clone(),
            AgentConfig {
                model: settings.llm_model.clone(),
                max_rounds: settings.max_tool_rounds,
            },
        ));

        info!(session_id = %session_id, "voice session created");

        Ok(Self {
            inner: Arc::new(SessionInner {
                settings,
                identity,
                outbound,
                session_id,
                skills,
                tools,
                agent,
                history: Arc::new(Mutex::new(Vec::new())),
                state: Mutex::new(SessionState::Idle),
                listening_since: Mutex::new(Instant::now()),
                running: AtomicBool::new(false),
                completed_turns: AtomicU64::new(0),
                session_cancel: Mutex::new(CancellationToken::new()),
                asr: Mutex::new(None),
                active_turn: tokio::sync::Mutex::new(None),
                loop_task: tokio::sync::Mutex::new(None),
            }),
        })
    }

    /// One-shot session description plus readiness warnings, sent at connect.
    pub async fn send_session_info(&self) {
        let inner = &self.inner;
        inner
            .send_json(ServerMessage::SessionInfo {
                llm_model: inner.settings.llm_model.clone(),
                tts_model: inner.settings.tts_model.clone(),
                tts_voice: inner.settings.tts_voice.clone(),
                asr_configured: inner.settings.asr_configured(),
                llm_configured: inner.settings.llm_configured(),
                tts_configured: inner.settings.tts_configured(),
                tools: inner.tools.tool_names(),
                skills: inner.skills.to_info(),
                identity: inner.identity.summary(),
            })
            .await;

        if !inner.settings.asr_configured() {
            warn!("asr not configured: PARLANCE_ASR_API_KEY missing");
            inner
                .send_error(None, "Missing PARLANCE_ASR_API_KEY".to_string())
                .await;
        }
        if !inner.settings.llm_configured() {
            warn!("llm not configured: one or more PARLANCE_LLM_* variables missing");
            inner
                .send_error(
                    None,
                    "Missing PARLANCE_LLM_BASE_URL / PARLANCE_LLM_API_KEY / PARLANCE_LLM_MODEL"
                        .to_string(),
                )
                .await;
        }
        if !inner.settings.tts_configured() {
            warn!("tts not configured: PARLANCE_TTS_API_KEY or PARLANCE_TTS_VOICE missing");
            inner
                .send_error(
                    None,
                    "Missing PARLANCE_TTS_API_KEY or PARLANCE_TTS_VOICE".to_string(),
                )
                .await;
        }
    }

    /// Route one client control message.
    pub async fn handle_control(&self, message: parlance_types::ClientMessage) {
        use parlance_types::ClientMessage::*;
        match message {
            StartSession => self.start_session().await,
            StopSession => self.stop_session().await,
            Interrupt => self.interrupt().await,
            ActivateSkill { name } => self.inner.toggle_skill(&name, true).await,
            DeactivateSkill { name } => self.inner.toggle_skill(&name, false).await,
        }
    }

    /// Forward one uplink PCM chunk to the ASR session.
    pub async fn feed_audio(&self, pcm: Vec<u8>) {
        if !self.inner.running.load(Ordering::SeqCst) {
            return;
        }
        let handle = self.inner.asr.lock().expect("asr lock poisoned").clone();
        if let Some(handle) = handle {
            handle.feed(pcm).await;
        }
    }

    /// Start the session loop (`idle -> listening`). Ignored if running.
    pub async fn start_session(&self) {
        if self.inner.running.swap(true, Ordering::SeqCst) {
            info!("start_session ignored: session already running");
            return;
        }
        info!(session_id = %self.inner.session_id, "starting session");
        let cancel = CancellationToken::new();
        *self
            .inner
            .session_cancel
            .lock()
            .expect("session cancel lock poisoned") = cancel.clone();

        let inner = self.inner.clone();
        let task = tokio::spawn(async move { inner.session_loop(cancel).await });
        *self.inner.loop_task.lock().await = Some(task);
    }

    /// Stop the session (any state -> `idle`).
    pub async fn stop_session(&self) {
        info!(session_id = %self.inner.session_id, "stopping session");
        self.inner.running.store(false, Ordering::SeqCst);
        self.inner
            .session_cancel
            .lock()
            .expect("session cancel lock poisoned")
            .cancel();
        let task = self.inner.loop_task.lock().await.take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }

    /// Explicit client barge-in.
    pub async fn interrupt(&self) {
        let state = *self.inner.state.lock().expect("state lock poisoned");
        info!(state = %state, "interrupt requested");
        self.inner.interrupt_turn().await;
        if self.inner.running.load(Ordering::SeqCst) {
            self.inner.set_state(SessionState::Listening).await;
        }
    }

    /// Tear everything down on transport close.
    pub async fn shutdown(&self) {
        self.stop_session().await;
        debug!(session_id = %self.inner.session_id, "session shut down");
    }
}

impl SessionInner {
    async fn send_json(&self, message: ServerMessage) {
        if self.outbound.send(Outbound::Json(message)).await.is_err() {
            debug!("client gone; dropping outbound message");
        }
    }

    async fn send_error(&self, turn_id: Option<TurnId>, message: String) {
        self.send_json(ServerMessage::Error { turn_id, message }).await;
    }

    async fn send_connection_status(
        &self,
        service: ConnectionService,
        status: ConnectionStatus,
        detail: Option<String>,
    ) {
        self.send_json(ServerMessage::ConnectionStatus {
            service,
            status,
            detail,
        })
        .await;
    }

    /// Apply and broadcast a state transition. No-op when unchanged.
    async fn set_state(&self, next: SessionState) {
        {
            let mut state = self.state.lock().expect("state lock poisoned");
            if *state == next {
                return;
            }
            if !state.can_transition_to(next) {
                warn!(from = %*state, to = %next, "state transition outside the table");
            }
            *state = next;
        }
        if next == SessionState::Listening {
            *self
                .listening_since
                .lock()
                .expect("listening clock lock poisoned") = Instant::now();
        }
        info!(state = %next, "session state");
        self.send_json(ServerMessage::State { state: next }).await;
    }

    async fn toggle_skill(&self, name: &str, activate: bool) {
        let ok = if activate {
            self.skills.activate(name)
        } else {
            self.skills.deactivate(name)
        };
        if ok {
            self.send_json(ServerMessage::Skill {
                event: if activate {
                    SkillEvent::Activated
                } else {
                    SkillEvent::Deactivated
                },
                name: name.to_string(),
                skills: self.skills.to_info(),
            })
            .await;
        }
    }

    /// The session loop: connect ASR, pump its events, start and cancel
    /// turns. Runs until stop, ASR close, or transport teardown.
    async fn session_loop(self: Arc<Self>, cancel: CancellationToken) {
        info!("session loop started");
        self.set_state(SessionState::Listening).await;
        self.send_json(ServerMessage::SkillsList {
            skills: self.skills.to_info(),
        })
        .await;

        let asr_config = AsrConfig {
            api_key: self.settings.asr_api_key.clone(),
            ws_url: self.settings.asr_ws_url.clone(),
            model: self.settings.asr_model.clone(),
            language_hints: self.settings.asr_language_hints.clone(),
        };
        let (asr_handle, mut asr_events) = match parlance_asr::connect(asr_config).await {
            Ok(pair) => pair,
            Err(e) => {
                error!(error = %e, "asr connect failed");
                self.send_connection_status(
                    ConnectionService::Asr,
                    ConnectionStatus::Error,
                    Some(e.to_string()),
                )
                .await;
                self.send_error(None, format!("ASR connection failed: {e}")).await;
                self.running.store(false, Ordering::SeqCst);
                self.set_state(SessionState::Idle).await;
                return;
            }
        };
        info!("asr connected");
        *self.asr.lock().expect("asr lock poisoned") = Some(asr_handle);
        self.send_connection_status(ConnectionService::Asr, ConnectionStatus::Connected, None)
            .await;
        // TTS sessions are per-turn; between turns the service is down.
        self.send_connection_status(ConnectionService::Tts, ConnectionStatus::Disconnected, None)
            .await;
        self.send_connection_status(ConnectionService::Llm, ConnectionStatus::Connected, None)
            .await;

        let mut bargein = BargeInGate::new();
        let mut endpoints = EndpointGate::new();

        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => break,
                event = asr_events.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };
            match event {
                AsrEvent::Partial { text } => {
                    self.send_json(ServerMessage::Asr {
                        text,
                        is_final: false,
                    })
                    .await;
                }
                AsrEvent::Final { text } => {
                    self.send_json(ServerMessage::Asr {
                        text: text.clone(),
                        is_final: true,
                    })
                    .await;
                    let interruptible =
                        self.state.lock().expect("state lock poisoned").interruptible();
                    if interruptible && bargein.should_trigger(&text, Instant::now()) {
                        info!(text = %text, "automatic barge-in");
                        self.interrupt_turn().await;
                        if self.running.load(Ordering::SeqCst) {
                            self.set_state(SessionState::Listening).await;
                        }
                    }
                }
                AsrEvent::Endpoint { utterance } => {
                    let utterance = utterance.trim().to_string();
                    if utterance.is_empty() {
                        continue;
                    }
                    if !endpoints.accept(&utterance, Instant::now()) {
                        info!("ignoring duplicated endpoint sentence");
                        continue;
                    }
                    // A new endpoint cancels any active turn before the
                    // next one begins.
                    self.interrupt_turn().await;
                    self.clone().start_turn(utterance).await;
                }
                AsrEvent::Error { message } => {
                    error!(error = %message, "asr stream error");
                    self.send_connection_status(
                        ConnectionService::Asr,
                        ConnectionStatus::Error,
                        Some(message.clone()),
                    )
                    .await;
                    let turn_id = self
                        .active_turn
                        .lock()
                        .await
                        .as_ref()
                        .map(|t| t.turn_id.clone());
                    self.send_error(turn_id, format!("ASR error: {message}")).await;
                    self.interrupt_turn().await;
                }
                AsrEvent::Closed => break,
            }
        }

        // Teardown: cancel any turn, signal end-of-audio to the provider,
        // report adapters down, go idle.
        self.interrupt_turn().await;
        self.running.store(false, Ordering::SeqCst);
        let asr_handle = self.asr.lock().expect("asr lock poisoned").take();
        if let Some(handle) = asr_handle {
            handle.end().await;
        }
        self.send_connection_status(ConnectionService::Asr, ConnectionStatus::Disconnected, None)
            .await;
        self.send_connection_status(ConnectionService::Tts, ConnectionStatus::Disconnected, None)
            .await;
        self.send_connection_status(ConnectionService::Llm, ConnectionStatus::Disconnected, None)
            .await;
        self.set_state(SessionState::Idle).await;
        info!(
            completed_turns = self.completed_turns.load(Ordering::Relaxed),
            "session loop finished"
        );
    }

    /// Cancel the active turn, TTS first, and wait for it to wind down.
    /// Idempotent; a no-op when no turn is active.
    async fn interrupt_turn(&self) {
        let turn = self.active_turn.lock().await.take();
        if let Some(turn) = turn {
            if !turn.task.is_finished() {
                info!(turn_id = %turn.turn_id, "cancelling turn");
                let tts = turn.tts.lock().expect("tts slot lock poisoned").clone();
                if let Some(tts) = tts {
                    tts.cancel();
                }
                turn.cancel.cancel();
            }
            let _ = turn.task.await;
        }
    }

    /// Mint a turn, announce the committed utterance, and spawn the turn task.
    async fn start_turn(self: Arc<Self>, utterance: String) {
        let turn_id = TurnId::generate();
        info!(turn_id = %turn_id, chars = utterance.len(), "turn start");
        self.send_json(ServerMessage::Turn {
            event: TurnEvent::UserCommitted,
            turn_id: turn_id.clone(),
            text: Some(utterance.clone()),
        })
        .await;

        let cancel = CancellationToken::new();
        let tts_slot: Arc<Mutex<Option<TtsControl>>> = Arc::new(Mutex::new(None));

        let task = tokio::spawn({
            let inner = self.clone();
            let turn_id = turn_id.clone();
            let cancel = cancel.clone();
            let tts_slot = tts_slot.clone();
            async move { inner.run_turn(turn_id, utterance, cancel, tts_slot).await }
        });

        *self.active_turn.lock().await = Some(ActiveTurn {
            turn_id,
            cancel,
            tts: tts_slot,
            task,
        });
    }

    /// One full turn: agent loop -> llm events -> TTS -> downlink PCM,
    /// finished by `metrics` and `turn:finished` on every path.
    async fn run_turn(
        self: Arc<Self>,
        turn_id: TurnId,
        utterance: String,
        cancel: CancellationToken,
        tts_slot: Arc<Mutex<Option<TtsControl>>>,
    ) {
        self.set_state(SessionState::Thinking).await;
        let listening_since = *self
            .listening_since
            .lock()
            .expect("listening clock lock poisoned");
        let clock = Arc::new(Mutex::new(TurnClock::start(listening_since)));
        let tool_calls = Arc::new(AtomicU64::new(0));

        let (event_tx, mut event_rx) = mpsc::channel::<AgentEvent>(64);
        let (agent_text_tx, mut agent_text_rx) = mpsc::channel::<String>(256);

        // Agent loop task.
        let agent_task = tokio::spawn({
            let agent = self.agent.clone();
            let history = self.history.clone();
            let user_text = utterance.clone();
            let cancel = cancel.clone();
            async move { agent.run_turn(history, user_text, event_tx, agent_text_tx, cancel).await }
        });

        // Event pump: tool and skill activity -> client, with the
        // thinking/executing sub-state toggled around tool execution.
        let event_pump = tokio::spawn({
            let inner = self.clone();
            let turn_id = turn_id.clone();
            let tool_calls = tool_calls.clone();
            async move {
                while let Some(event) = event_rx.recv().await {
                    match event {
                        AgentEvent::Thinking { round } => {
                            debug!(round, "agent round");
                            inner.set_state(SessionState::Thinking).await;
                        }
                        AgentEvent::ToolStart {
                            tool_call_id,
                            name,
                            arguments,
                        } => {
                            tool_calls.fetch_add(1, Ordering::Relaxed);
                            inner.set_state(SessionState::Executing).await;
                            inner
                                .send_json(ServerMessage::Tool {
                                    event: ToolEvent::Start,
                                    turn_id: turn_id.clone(),
                                    tool_call_id,
                                    name,
                                    arguments: Some(arguments),
                                    content: None,
                                    is_error: None,
                                    elapsed_ms: None,
                                })
                                .await;
                        }
                        AgentEvent::ToolResult {
                            tool_call_id,
                            name,
                            content,
                            is_error,
                            elapsed_ms,
                        } => {
                            inner
                                .send_json(ServerMessage::Tool {
                                    event: ToolEvent::Result,
                                    turn_id: turn_id.clone(),
                                    tool_call_id,
                                    name,
                                    arguments: None,
                                    content: Some(content),
                                    is_error: Some(is_error),
                                    elapsed_ms: Some(elapsed_ms),
                                })
                                .await;
                            inner.set_state(SessionState::Thinking).await;
                        }
                        AgentEvent::SkillChanged {
                            activated,
                            skill_name,
                            skills,
                        } => {
                            inner
                                .send_json(ServerMessage::Skill {
                                    event: if activated {
                                        SkillEvent::Activated
                                    } else {
                                        SkillEvent::Deactivated
                                    },
                                    name: skill_name,
                                    skills,
                                })
                                .await;
                        }
                    }
                }
            }
        });

        // TTS session, started up front so the first text fragment flows
        // straight into synthesis. A missing or failed session leaves the
        // sender as None and the turn completes text-only.
        let mut tts_audio = None;
        let mut tts_text_tx = None;
        if self.settings.tts_configured() {
            let config = TtsConfig {
                api_key: self.settings.tts_api_key.clone(),
                ws_url: self.settings.tts_ws_url.clone(),
                model: self.settings.tts_model.clone(),
                voice: self.settings.tts_voice.clone(),
            };
            let (text_tx, text_rx) = mpsc::channel::<String>(256);
            match parlance_tts::synthesize(&config, text_rx).await {
                Ok((control, audio)) => {
                    *tts_slot.lock().expect("tts slot lock poisoned") = Some(control);
                    self.send_connection_status(
                        ConnectionService::Tts,
                        ConnectionStatus::Connected,
                        None,
                    )
                    .await;
                    tts_audio = Some(audio);
                    tts_text_tx = Some(text_tx);
                }
                Err(e) => {
                    error!(error = %e, "tts connect failed");
                    self.send_connection_status(
                        ConnectionService::Tts,
                        ConnectionStatus::Error,
                        Some(e.to_string()),
                    )
                    .await;
                    self.send_error(Some(turn_id.clone()), format!("TTS connection failed: {e}"))
                        .await;
                }
            }
        }

        // Text pump: speaking-round deltas -> llm events + TTS input.
        let text_pump = tokio::spawn({
            let inner = self.clone();
            let turn_id = turn_id.clone();
            let clock = clock.clone();
            let cancel = cancel.clone();
            async move {
                let mut speaking = false;
                while let Some(delta) = agent_text_rx.recv().await {
                    if cancel.is_cancelled() {
                        break;
                    }
                    if !speaking {
                        speaking = true;
                        inner.set_state(SessionState::Speaking).await;
                    }
                    let (token_index, elapsed_ms) = clock
                        .lock()
                        .expect("turn clock lock poisoned")
                        .on_token();
                    inner
                        .send_json(ServerMessage::Llm {
                            turn_id: turn_id.clone(),
                            text: delta.clone(),
                            done: false,
                            token_index: Some(token_index),
                            elapsed_ms: Some(elapsed_ms),
                        })
                        .await;
                    if let Some(tts) = &tts_text_tx {
                        let _ = tts.send(delta).await;
                    }
                }
                // Dropping the TTS sender finishes the synthesis input.
            }
        });

        // Downlink audio: forward PCM in order, tracking first-audio.
        if let Some(mut audio) = tts_audio {
            while let Some(chunk) = audio.next_chunk().await {
                clock
                    .lock()
                    .expect("turn clock lock poisoned")
                    .on_audio(chunk.len());
                if self.outbound.send(Outbound::Pcm(chunk)).await.is_err() {
                    break;
                }
            }
            if !cancel.is_cancelled() {
                self.send_connection_status(
                    ConnectionService::Tts,
                    ConnectionStatus::Disconnected,
                    None,
                )
                .await;
            }
        }

        let agent_result = agent_task.await;
        let _ = text_pump.await;
        let _ = event_pump.await;

        match agent_result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                error!(turn_id = %turn_id, error = %e, "agent loop failed");
                self.send_connection_status(
                    ConnectionService::Llm,
                    ConnectionStatus::Error,
                    Some(e.to_string()),
                )
                .await;
                self.send_error(Some(turn_id.clone()), format!("Agent failed: {e}")).await;
            }
            Err(e) => error!(turn_id = %turn_id, error = %e, "turn task join error"),
        }

        let (tokens, window_ms) = {
            let clock = clock.lock().expect("turn clock lock poisoned");
            (clock.tokens(), clock.streaming_window_ms())
        };
        if !cancel.is_cancelled() && tokens > 0 {
            self.send_json(ServerMessage::Llm {
                turn_id: turn_id.clone(),
                text: String::new(),
                done: true,
                token_index: Some(tokens),
                elapsed_ms: Some(window_ms),
            })
            .await;
        }

        // Clean completion: append the turn summary to memory.
        if !cancel.is_cancelled() {
            self.append_turn_memory(&utterance);
            self.completed_turns.fetch_add(1, Ordering::Relaxed);
        }

        let metrics = clock
            .lock()
            .expect("turn clock lock poisoned")
            .finish(turn_id.as_str(), tool_calls.load(Ordering::Relaxed));
        self.send_json(ServerMessage::Metrics { metrics }).await;
        self.send_json(ServerMessage::Turn {
            event: TurnEvent::Finished,
            turn_id: turn_id.clone(),
            text: None,
        })
        .await;
        info!(turn_id = %turn_id, cancelled = cancel.is_cancelled(), "turn finished");

        if self.running.load(Ordering::SeqCst) {
            self.set_state(SessionState::Listening).await;
        }
    }

    /// Summarize the committed turn into the memory artifact.
    fn append_turn_memory(&self, utterance: &str) {
        let reply = {
            let history = self.history.lock().expect("history lock poisoned");
            history
                .iter()
                .rev()
                .find(|m| m.role == ChatRole::Assistant && !m.content.is_empty())
                .map(|m| m.content.clone())
        };
        let Some(reply) = reply else {
            return;
        };
        let summary = format!(
            "user asked: {} | replied: {}",
            truncate_chars(utterance, 80),
            truncate_chars(&reply, 100)
        );
        if let Err(e) = self.identity.append_memory(&summary) {
            warn!(error = %e, "failed to append turn memory");
        }
    }
}

fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let prefix: String = s.chars().take(max).collect();
        format!("{prefix}…")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parlance_types::ClientMessage;

    fn test_settings(dir: &std::path::Path) -> Settings {
        let mut settings = Settings::from_env().unwrap();
        settings.asr_api_key = "test-key".into();
        // Unroutable: connect fails fast in both attempts.
        settings.asr_ws_url = "ws://127.0.0.1:1/".into();
        settings.llm_base_url = "https://api.example.invalid/v1".into();
        settings.llm_api_key = "test-key".into();
        settings.llm_model = "test-model".into();
        settings.identity_dir = dir.join("identity");
        settings.skills_dirs = vec![dir.join("skills")];
        settings
    }

    fn seeded_skill(dir: &std::path::Path) {
        let skill_dir = dir.join("skills/coder");
        std::fs::create_dir_all(&skill_dir).unwrap();
        std::fs::write(
            skill_dir.join("SKILL.md"),
            "---\nname: coder\ndescription: Writes code\n---\nBody\n",
        )
        .unwrap();
    }

    async fn next_json(rx: &mut mpsc::Receiver<Outbound>) -> ServerMessage {
        match tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for outbound message")
            .expect("outbound channel closed")
        {
            Outbound::Json(msg) => msg,
            Outbound::Pcm(_) => panic!("unexpected pcm frame"),
        }
    }

    #[tokio::test]
    async fn session_info_reflects_configuration() {
        let dir = tempfile::tempdir().unwrap();
        seeded_skill(dir.path());
        let settings = test_settings(dir.path());
        let identity = Arc::new(IdentityStore::open(&settings.identity_dir).unwrap());
        let (tx, mut rx) = mpsc::channel(OUTBOUND_QUEUE_DEPTH);

        let session = Session::new(settings, identity, tx).unwrap();
        session.send_session_info().await;

        match next_json(&mut rx).await {
            ServerMessage::SessionInfo {
                llm_model,
                asr_configured,
                llm_configured,
                tts_configured,
                tools,
                skills,
                ..
            } => {
                assert_eq!(llm_model, "test-model");
                assert!(asr_configured);
                assert!(llm_configured);
                assert!(!tts_configured);
                assert!(tools.contains(&"get_datetime".to_string()));
                assert_eq!(skills.len(), 1);
                assert_eq!(skills[0].name, "coder");
            }
            other => panic!("expected session_info, got {other:?}"),
        }

        // TTS is unconfigured, so exactly one readiness warning follows.
        match next_json(&mut rx).await {
            ServerMessage::Error { message, .. } => {
                assert!(message.contains("PARLANCE_TTS"), "got: {message}");
            }
            other => panic!("expected error warning, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn skill_toggle_broadcasts() {
        let dir = tempfile::tempdir().unwrap();
        seeded_skill(dir.path());
        let settings = test_settings(dir.path());
        let identity = Arc::new(IdentityStore::open(&settings.identity_dir).unwrap());
        let (tx, mut rx) = mpsc::channel(OUTBOUND_QUEUE_DEPTH);

        let session = Session::new(settings, identity, tx).unwrap();
        session
            .handle_control(ClientMessage::ActivateSkill {
                name: "coder".into(),
            })
            .await;

        match next_json(&mut rx).await {
            ServerMessage::Skill { event, name, skills } => {
                assert_eq!(event, SkillEvent::Activated);
                assert_eq!(name, "coder");
                assert!(skills[0].active);
            }
            other => panic!("expected skill event, got {other:?}"),
        }

        session
            .handle_control(ClientMessage::DeactivateSkill {
                name: "coder".into(),
            })
            .await;
        match next_json(&mut rx).await {
            ServerMessage::Skill { event, .. } => assert_eq!(event, SkillEvent::Deactivated),
            other => panic!("expected skill event, got {other:?}"),
        }

        // Unknown skills are ignored silently.
        session
            .handle_control(ClientMessage::ActivateSkill {
                name: "nope".into(),
            })
            .await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn asr_connect_failure_returns_to_idle() {
        let dir = tempfile::tempdir().unwrap();
        let settings = test_settings(dir.path());
        let identity = Arc::new(IdentityStore::open(&settings.identity_dir).unwrap());
        let (tx, mut rx) = mpsc::channel(OUTBOUND_QUEUE_DEPTH);

        let session = Session::new(settings, identity, tx).unwrap();
        session.handle_control(ClientMessage::StartSession).await;

        // listening -> skills_list -> asr error status -> error -> idle.
        let mut saw_listening = false;
        let mut saw_error_status = false;
        let mut saw_error = false;
        loop {
            match next_json(&mut rx).await {
                ServerMessage::State { state: SessionState::Listening } => saw_listening = true,
                ServerMessage::State { state: SessionState::Idle } => break,
                ServerMessage::ConnectionStatus {
                    service: ConnectionService::Asr,
                    status: ConnectionStatus::Error,
                    ..
                } => saw_error_status = true,
                ServerMessage::Error { message, .. } => {
                    assert!(message.contains("ASR connection failed"));
                    saw_error = true;
                }
                _ => {}
            }
        }
        assert!(saw_listening && saw_error_status && saw_error);
    }

    #[test]
    fn truncation_is_char_safe() {
        assert_eq!(truncate_chars("hello", 10), "hello");
        assert_eq!(truncate_chars("hello world", 5), "hello…");
        // Multi-byte characters do not split.
        assert_eq!(truncate_chars("日本語テスト", 3), "日本語…");
    }
}
