//! Runtime settings loaded from the environment at startup.
//!
//! API keys are read from environment variables only; they are never
//! written to disk and never logged in the clear. Readiness predicates
//! (`asr_configured` etc.) feed the `session_info` message so a client can
//! see which services will actually work before speaking.

use std::path::PathBuf;

use crate::ParlanceError;

/// Default ASR streaming endpoint.
pub const DEFAULT_ASR_WS_URL: &str = "wss://stt-rt.soniox.com/transcribe-websocket";

/// Default ASR model.
pub const DEFAULT_ASR_MODEL: &str = "stt-rt-v4";

/// Default TTS realtime endpoint.
pub const DEFAULT_TTS_WS_URL: &str = "wss://dashscope-intl.aliyuncs.com/api-ws/v1/realtime";

/// Default agent-loop round budget.
pub const DEFAULT_MAX_TOOL_ROUNDS: u32 = 5;

/// Default per-tool wall-clock timeout in seconds.
pub const DEFAULT_TOOL_TIMEOUT_SECS: u64 = 30;

/// Default set of enabled tools (everything except the shell).
pub const DEFAULT_TOOLS: &str = "get_datetime,calculate,web_search,read_file,write_file,\
run_python,list_directory,search_files,list_skills,activate_skill,deactivate_skill,\
recall_memory,update_user_profile,save_note";

/// Process-global settings, one instance per server process.
#[derive(Debug, Clone)]
pub struct Settings {
    /// ASR provider API key (empty = unconfigured).
    pub asr_api_key: String,
    /// ASR streaming WebSocket URL.
    pub asr_ws_url: String,
    /// ASR model identifier.
    pub asr_model: String,
    /// Language hints passed to the ASR session.
    pub asr_language_hints: Vec<String>,

    /// Chat-completions base URL (e.g. `https://api.openai.com/v1`).
    pub llm_base_url: String,
    /// Chat-completions API key.
    pub llm_api_key: String,
    /// Chat model identifier.
    pub llm_model: String,

    /// TTS provider API key.
    pub tts_api_key: String,
    /// TTS realtime WebSocket URL.
    pub tts_ws_url: String,
    /// TTS model identifier.
    pub tts_model: String,
    /// TTS voice identifier.
    pub tts_voice: String,

    /// Directory holding PERSONA.md / PROFILE.md / MEMORY.md.
    pub identity_dir: PathBuf,
    /// Directories scanned for SKILL.md bundles.
    pub skills_dirs: Vec<PathBuf>,
    /// Enabled tool names.
    pub enabled_tools: Vec<String>,
    /// Agent-loop round budget.
    pub max_tool_rounds: u32,
    /// Per-tool default timeout in seconds.
    pub tool_timeout_secs: u64,
    /// Whether the shell tool may execute commands.
    pub allow_shell: bool,
    /// Server bind address.
    pub bind_addr: String,
}

fn env_or(key: &str, default: &str) -> String {
    match std::env::var(key) {
        Ok(v) if !v.is_empty() => v,
        _ => default.to_string(),
    }
}

fn split_csv(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

impl Settings {
    /// Load settings from `PARLANCE_*` environment variables, applying
    /// defaults for everything except credentials.
    pub fn from_env() -> Result<Self, ParlanceError> {
        let max_tool_rounds = match std::env::var("PARLANCE_MAX_TOOL_ROUNDS") {
            Ok(v) if !v.is_empty() => v.parse::<u32>().map_err(|e| {
                ParlanceError::ConfigError(format!("PARLANCE_MAX_TOOL_ROUNDS: {e}"))
            })?,
            _ => DEFAULT_MAX_TOOL_ROUNDS,
        };
        let tool_timeout_secs = match std::env::var("PARLANCE_TOOL_TIMEOUT_SECS") {
            Ok(v) if !v.is_empty() => v.parse::<u64>().map_err(|e| {
                ParlanceError::ConfigError(format!("PARLANCE_TOOL_TIMEOUT_SECS: {e}"))
            })?,
            _ => DEFAULT_TOOL_TIMEOUT_SECS,
        };

        Ok(Self {
            asr_api_key: env_or("PARLANCE_ASR_API_KEY", ""),
            asr_ws_url: env_or("PARLANCE_ASR_WS_URL", DEFAULT_ASR_WS_URL),
            asr_model: env_or("PARLANCE_ASR_MODEL", DEFAULT_ASR_MODEL),
            asr_language_hints: split_csv(&env_or("PARLANCE_ASR_LANGUAGES", "en,zh")),
            llm_base_url: env_or("PARLANCE_LLM_BASE_URL", ""),
            llm_api_key: env_or("PARLANCE_LLM_API_KEY", ""),
            llm_model: env_or("PARLANCE_LLM_MODEL", ""),
            tts_api_key: env_or("PARLANCE_TTS_API_KEY", ""),
            tts_ws_url: env_or("PARLANCE_TTS_WS_URL", DEFAULT_TTS_WS_URL),
            tts_model: env_or("PARLANCE_TTS_MODEL", "qwen3-tts-realtime"),
            tts_voice: env_or("PARLANCE_TTS_VOICE", ""),
            identity_dir: PathBuf::from(env_or("PARLANCE_IDENTITY_DIR", "identity")),
            skills_dirs: split_csv(&env_or("PARLANCE_SKILLS_DIRS", "skills"))
                .into_iter()
                .map(PathBuf::from)
                .collect(),
            enabled_tools: split_csv(&env_or("PARLANCE_TOOLS", DEFAULT_TOOLS)),
            max_tool_rounds,
            tool_timeout_secs,
            allow_shell: env_or("PARLANCE_ALLOW_SHELL", "false") == "true",
            bind_addr: env_or("PARLANCE_BIND_ADDR", "127.0.0.1:8700"),
        })
    }

    /// ASR is usable: an API key is present.
    pub fn asr_configured(&self) -> bool {
        !self.asr_api_key.is_empty()
    }

    /// LLM is usable: base URL, key, and model are all present.
    pub fn llm_configured(&self) -> bool {
        !self.llm_base_url.is_empty() && !self.llm_api_key.is_empty() && !self.llm_model.is_empty()
    }

    /// TTS is usable: an API key and a voice id are present.
    pub fn tts_configured(&self) -> bool {
        !self.tts_api_key.is_empty() && !self.tts_voice.is_empty()
    }
}
