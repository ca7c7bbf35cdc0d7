//! Built-in tools registered for every session.
//!
//! The set mirrors what a voice assistant actually needs at runtime:
//! clock and calculator, filesystem inspection, subprocess execution,
//! web search, skill management, and identity/memory access. Which tools
//! are enabled comes from configuration; the shell tool additionally
//! requires an explicit opt-in.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use crate::definition::ToolDefinition;
use crate::registry::ToolRegistry;
use parlance_identity::{IdentityStore, DEFAULT_MEMORY_MAX_CHARS};
use parlance_skills::SkillSet;

/// Maximum file size the read tool will return.
const MAX_READ_BYTES: u64 = 100_000;

/// Maximum directory entries listed.
const LIST_CAP: usize = 100;

/// Maximum search results returned.
const SEARCH_CAP: usize = 50;

/// Stdout cap for subprocess tools.
const STDOUT_CAP: usize = 8_000;

/// Stderr cap for subprocess tools.
const STDERR_CAP: usize = 2_000;

fn arg_str(args: &Value, key: &str) -> Option<String> {
    args.get(key).and_then(Value::as_str).map(str::to_string)
}

fn expand_user(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~") {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join(rest.trim_start_matches('/'));
        }
    }
    PathBuf::from(path)
}

fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{bytes} B")
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / 1024.0 / 1024.0)
    }
}

fn truncate_utf8(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

// ---------------------------------------------------------------------------
// get_datetime
// ---------------------------------------------------------------------------

struct GetDatetimeTool;

#[async_trait::async_trait]
impl ToolDefinition for GetDatetimeTool {
    fn name(&self) -> &str {
        "get_datetime"
    }

    fn description(&self) -> &str {
        "Get the current date and time. Optionally pass timezone \"utc\" for UTC; \
the default is server local time."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "timezone": {
                    "type": "string",
                    "description": "\"utc\" or \"local\" (default local)."
                }
            },
            "required": []
        })
    }

    async fn execute(&self, args: Value, _cancel: CancellationToken) -> Result<String> {
        let tz = arg_str(&args, "timezone").unwrap_or_default();
        let formatted = if tz.eq_ignore_ascii_case("utc") {
            chrono::Utc::now().format("%Y-%m-%d %H:%M:%S UTC (%A)").to_string()
        } else {
            chrono::Local::now().format("%Y-%m-%d %H:%M:%S %Z (%A)").to_string()
        };
        Ok(formatted)
    }
}

// ---------------------------------------------------------------------------
// calculate
// ---------------------------------------------------------------------------

struct CalculateTool;

#[async_trait::async_trait]
impl ToolDefinition for CalculateTool {
    fn name(&self) -> &str {
        "calculate"
    }

    fn description(&self) -> &str {
        "Evaluate a math expression. Supports + - * / % ^, functions \
(sqrt, sin, cos, tan, ln, log, log2, abs, floor, ceil, round, min, max, pow) \
and the constants pi and e."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "expression": {
                    "type": "string",
                    "description": "Expression to evaluate, e.g. 'sqrt(144) + 3^2' or '2*pi*6.371e6'."
                }
            },
            "required": ["expression"]
        })
    }

    async fn execute(&self, args: Value, _cancel: CancellationToken) -> Result<String> {
        let expression = arg_str(&args, "expression").context("no expression provided")?;
        let value = crate::calc::evaluate(&expression)?;
        // Render integers without a trailing .0 so speech output reads well.
        if value.fract() == 0.0 && value.abs() < 1e15 {
            Ok(format!("{expression} = {}", value as i64))
        } else {
            Ok(format!("{expression} = {value}"))
        }
    }
}

// ---------------------------------------------------------------------------
// web_search
// ---------------------------------------------------------------------------

struct WebSearchTool {
    http: reqwest::Client,
}

#[async_trait::async_trait]
impl ToolDefinition for WebSearchTool {
    fn name(&self) -> &str {
        "web_search"
    }

    fn description(&self) -> &str {
        "Search the web for current information. Returns a handful of result \
summaries with links."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {"type": "string", "description": "Search terms."},
                "max_results": {
                    "type": "integer",
                    "description": "Maximum results (1-5, default 3)."
                }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, args: Value, _cancel: CancellationToken) -> Result<String> {
        let query = arg_str(&args, "query").context("no search query")?;
        let max_results = args
            .get("max_results")
            .and_then(Value::as_u64)
            .unwrap_or(3)
            .clamp(1, 5) as usize;

        let response = self
            .http
            .get("https://api.duckduckgo.com/")
            .query(&[
                ("q", query.as_str()),
                ("format", "json"),
                ("no_html", "1"),
                ("skip_disambig", "1"),
            ])
            .send()
            .await
            .context("search request failed")?;
        let body: Value = response.json().await.context("search response not JSON")?;

        let mut lines: Vec<String> = Vec::new();
        if let Some(abstract_text) = body.get("AbstractText").and_then(Value::as_str) {
            if !abstract_text.is_empty() {
                let url = body.get("AbstractURL").and_then(Value::as_str).unwrap_or("");
                lines.push(format!("1. {abstract_text}\n   {url}"));
            }
        }
        if let Some(topics) = body.get("RelatedTopics").and_then(Value::as_array) {
            for topic in topics {
                if lines.len() >= max_results {
                    break;
                }
                let Some(text) = topic.get("Text").and_then(Value::as_str) else {
                    continue;
                };
                let url = topic.get("FirstURL").and_then(Value::as_str).unwrap_or("");
                lines.push(format!("{}. {text}\n   {url}", lines.len() + 1));
            }
        }

        if lines.is_empty() {
            Ok("No results found.".to_string())
        } else {
            Ok(lines.join("\n\n"))
        }
    }
}

// ---------------------------------------------------------------------------
// read_file / write_file
// ---------------------------------------------------------------------------

struct ReadFileTool;

#[async_trait::async_trait]
impl ToolDefinition for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read a text file's contents (max 100 KB)."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "description": "File path; ~ expands to the home directory."}
            },
            "required": ["path"]
        })
    }

    async fn execute(&self, args: Value, _cancel: CancellationToken) -> Result<String> {
        let raw = arg_str(&args, "path").context("no path provided")?;
        let path = expand_user(&raw);
        let meta = tokio::fs::metadata(&path)
            .await
            .with_context(|| format!("file not found: {}", path.display()))?;
        if !meta.is_file() {
            bail!("not a file: {}", path.display());
        }
        if meta.len() > MAX_READ_BYTES {
            bail!("file too large ({} bytes), max {MAX_READ_BYTES}", meta.len());
        }
        let bytes = tokio::fs::read(&path).await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

struct WriteFileTool;

#[async_trait::async_trait]
impl ToolDefinition for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Write content to a file, creating parent directories as needed."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "description": "Destination file path."},
                "content": {"type": "string", "description": "Content to write."}
            },
            "required": ["path", "content"]
        })
    }

    async fn execute(&self, args: Value, _cancel: CancellationToken) -> Result<String> {
        let raw = arg_str(&args, "path").context("no path provided")?;
        let content = arg_str(&args, "content").unwrap_or_default();
        let path = expand_user(&raw);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, &content).await?;
        Ok(format!("Wrote {} chars to {}", content.chars().count(), path.display()))
    }
}

// ---------------------------------------------------------------------------
// run_command / run_python
// ---------------------------------------------------------------------------

struct RunCommandTool {
    allowed: bool,
}

#[async_trait::async_trait]
impl ToolDefinition for RunCommandTool {
    fn name(&self) -> &str {
        "run_command"
    }

    fn description(&self) -> &str {
        "Execute a shell command (30 s timeout). Disabled unless the server \
is configured with PARLANCE_ALLOW_SHELL=true."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": {"type": "string", "description": "Shell command to run."}
            },
            "required": ["command"]
        })
    }

    async fn execute(&self, args: Value, cancel: CancellationToken) -> Result<String> {
        if !self.allowed {
            bail!("shell commands are disabled; set PARLANCE_ALLOW_SHELL=true to enable");
        }
        let command = arg_str(&args, "command").context("no command provided")?;
        run_subprocess(tokio::process::Command::new("sh").args(["-c", &command]), cancel).await
    }
}

struct RunPythonTool;

#[async_trait::async_trait]
impl ToolDefinition for RunPythonTool {
    fn name(&self) -> &str {
        "run_python"
    }

    fn description(&self) -> &str {
        "Execute Python code in a subprocess and return what it prints. \
30 second timeout."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "code": {"type": "string", "description": "Python code; print() the result."}
            },
            "required": ["code"]
        })
    }

    async fn execute(&self, args: Value, cancel: CancellationToken) -> Result<String> {
        let code = arg_str(&args, "code").context("no code provided")?;
        run_subprocess(tokio::process::Command::new("python3").args(["-c", &code]), cancel).await
    }
}

/// Run a subprocess to completion, racing the cancellation token. The child
/// is killed when the future is dropped, so registry timeouts and barge-in
/// both reap it.
async fn run_subprocess(
    command: &mut tokio::process::Command,
    cancel: CancellationToken,
) -> Result<String> {
    let child = command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .context("failed to spawn subprocess")?;

    let output = tokio::select! {
        _ = cancel.cancelled() => bail!("subprocess cancelled"),
        output = child.wait_with_output() => output?,
    };

    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    let code = output.status.code().unwrap_or(-1);

    let mut result = String::new();
    if !stdout.is_empty() {
        result.push_str(truncate_utf8(&stdout, STDOUT_CAP));
    }
    if !stderr.is_empty() {
        if !result.is_empty() {
            result.push('\n');
        }
        result.push_str("[stderr]\n");
        result.push_str(truncate_utf8(&stderr, STDERR_CAP));
    }
    if !output.status.success() {
        result.push_str(&format!("\n[exit code: {code}]"));
        bail!("{}", result.trim());
    }
    if result.trim().is_empty() {
        result = "(no output)".to_string();
    }
    Ok(result.trim().to_string())
}

// ---------------------------------------------------------------------------
// list_directory / search_files
// ---------------------------------------------------------------------------

struct ListDirectoryTool;

#[async_trait::async_trait]
impl ToolDefinition for ListDirectoryTool {
    fn name(&self) -> &str {
        "list_directory"
    }

    fn description(&self) -> &str {
        "List files and directories with sizes and modification times."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "description": "Directory path (default: current directory)."}
            },
            "required": []
        })
    }

    async fn execute(&self, args: Value, _cancel: CancellationToken) -> Result<String> {
        let raw = arg_str(&args, "path").unwrap_or_else(|| ".".to_string());
        let path = expand_user(&raw);
        if !path.is_dir() {
            bail!("not a directory: {}", path.display());
        }

        let mut entries: Vec<std::fs::DirEntry> =
            std::fs::read_dir(&path)?.flatten().collect();
        entries.sort_by_key(|e| {
            let is_file = e.path().is_file();
            (is_file, e.file_name().to_string_lossy().to_lowercase())
        });
        let total = entries.len();

        let mut lines = vec![format!("Directory: {}\n", path.display())];
        for entry in entries.iter().take(LIST_CAP) {
            let name = entry.file_name().to_string_lossy().into_owned();
            match entry.metadata() {
                Ok(meta) if meta.is_dir() => lines.push(format!("  [DIR]  {name}/")),
                Ok(meta) => {
                    let modified: chrono::DateTime<chrono::Local> =
                        meta.modified().map(Into::into).unwrap_or_else(|_| chrono::Local::now());
                    lines.push(format!(
                        "  {:>10}  {}  {name}",
                        format_size(meta.len()),
                        modified.format("%Y-%m-%d %H:%M")
                    ));
                }
                Err(_) => lines.push(format!("  [???]  {name}")),
            }
        }
        if total > LIST_CAP {
            lines.push(format!("\n  ... and {} more entries", total - LIST_CAP));
        }
        lines.push(format!("\nTotal: {total} items"));
        Ok(lines.join("\n"))
    }
}

/// Glob-style filename matching supporting `*` and `?`.
pub fn wildcard_match(pattern: &str, name: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let n: Vec<char> = name.chars().collect();
    let (mut pi, mut ni) = (0usize, 0usize);
    let (mut star, mut star_ni) = (None::<usize>, 0usize);

    while ni < n.len() {
        if pi < p.len() && (p[pi] == '?' || p[pi] == n[ni]) {
            pi += 1;
            ni += 1;
        } else if pi < p.len() && p[pi] == '*' {
            star = Some(pi);
            star_ni = ni;
            pi += 1;
        } else if let Some(s) = star {
            pi = s + 1;
            star_ni += 1;
            ni = star_ni;
        } else {
            return false;
        }
    }
    while pi < p.len() && p[pi] == '*' {
        pi += 1;
    }
    pi == p.len()
}

fn walk_matches(dir: &std::path::Path, pattern: &str, out: &mut Vec<(PathBuf, u64)>) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    let mut children: Vec<PathBuf> = entries.flatten().map(|e| e.path()).collect();
    children.sort();
    for child in children {
        if out.len() > SEARCH_CAP {
            return;
        }
        if child.is_dir() {
            walk_matches(&child, pattern, out);
        } else if let Some(name) = child.file_name().and_then(|n| n.to_str()) {
            if wildcard_match(pattern, name) {
                let size = child.metadata().map(|m| m.len()).unwrap_or(0);
                out.push((child, size));
            }
        }
    }
}

struct SearchFilesTool;

#[async_trait::async_trait]
impl ToolDefinition for SearchFilesTool {
    fn name(&self) -> &str {
        "search_files"
    }

    fn description(&self) -> &str {
        "Search for files by name pattern (glob syntax such as '*.csv' or \
'report*'), recursively from a start directory."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "pattern": {"type": "string", "description": "Filename pattern, e.g. '*.py'."},
                "directory": {"type": "string", "description": "Start directory (default: current)."}
            },
            "required": ["pattern"]
        })
    }

    async fn execute(&self, args: Value, _cancel: CancellationToken) -> Result<String> {
        let pattern = arg_str(&args, "pattern").context("no search pattern provided")?;
        let raw_dir = arg_str(&args, "directory").unwrap_or_else(|| ".".to_string());
        let dir = expand_user(&raw_dir);
        if !dir.is_dir() {
            bail!("not a directory: {}", dir.display());
        }

        let mut matches = Vec::new();
        walk_matches(&dir, &pattern, &mut matches);
        let truncated = matches.len() > SEARCH_CAP;
        matches.truncate(SEARCH_CAP);

        if matches.is_empty() {
            return Ok(format!("No files matching '{pattern}' in {}", dir.display()));
        }
        let mut lines = vec![format!(
            "Found {} file(s) matching '{pattern}' in {}:\n",
            matches.len(),
            dir.display()
        )];
        for (path, size) in &matches {
            let rel = path.strip_prefix(&dir).unwrap_or(path);
            lines.push(format!("  {}  ({})", rel.display(), format_size(*size)));
        }
        if truncated {
            lines.push("\n  ... more matches not shown".to_string());
        }
        Ok(lines.join("\n"))
    }
}

// ---------------------------------------------------------------------------
// Skill tools
// ---------------------------------------------------------------------------

struct ListSkillsTool {
    skills: SkillSet,
}

#[async_trait::async_trait]
impl ToolDefinition for ListSkillsTool {
    fn name(&self) -> &str {
        "list_skills"
    }

    fn description(&self) -> &str {
        "List all available agent skills and whether each is active."
    }

    fn input_schema(&self) -> Value {
        json!({"type": "object", "properties": {}, "required": []})
    }

    async fn execute(&self, _args: Value, _cancel: CancellationToken) -> Result<String> {
        let info = self.skills.to_info();
        if info.is_empty() {
            return Ok("No skills are available.".to_string());
        }
        Ok(info
            .iter()
            .map(|s| {
                let status = if s.active { "[active]" } else { "[inactive]" };
                format!("- {} {status}: {}", s.name, s.description)
            })
            .collect::<Vec<_>>()
            .join("\n"))
    }
}

struct ActivateSkillTool {
    skills: SkillSet,
}

#[async_trait::async_trait]
impl ToolDefinition for ActivateSkillTool {
    fn name(&self) -> &str {
        "activate_skill"
    }

    fn description(&self) -> &str {
        "Activate an agent skill. Its specialized instructions join the \
conversation context from the next reasoning round on."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "skill_name": {"type": "string", "description": "Name of the skill to activate."}
            },
            "required": ["skill_name"]
        })
    }

    async fn execute(&self, args: Value, _cancel: CancellationToken) -> Result<String> {
        let name = arg_str(&args, "skill_name").context("no skill name provided")?;
        if self.skills.activate(&name) {
            let description = self.skills.description(&name).unwrap_or_default();
            Ok(format!("Activated skill: {name} - {description}"))
        } else {
            let available: Vec<String> =
                self.skills.to_info().into_iter().map(|s| s.name).collect();
            bail!("unknown skill '{name}'; available: {}", available.join(", "))
        }
    }
}

struct DeactivateSkillTool {
    skills: SkillSet,
}

#[async_trait::async_trait]
impl ToolDefinition for DeactivateSkillTool {
    fn name(&self) -> &str {
        "deactivate_skill"
    }

    fn description(&self) -> &str {
        "Deactivate a previously activated agent skill."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "skill_name": {"type": "string", "description": "Name of the skill to deactivate."}
            },
            "required": ["skill_name"]
        })
    }

    async fn execute(&self, args: Value, _cancel: CancellationToken) -> Result<String> {
        let name = arg_str(&args, "skill_name").context("no skill name provided")?;
        if self.skills.deactivate(&name) {
            Ok(format!("Deactivated skill: {name}"))
        } else {
            bail!("skill '{name}' is not active")
        }
    }
}

// ---------------------------------------------------------------------------
// Identity tools
// ---------------------------------------------------------------------------

struct RecallMemoryTool {
    identity: Arc<IdentityStore>,
}

#[async_trait::async_trait]
impl ToolDefinition for RecallMemoryTool {
    fn name(&self) -> &str {
        "recall_memory"
    }

    fn description(&self) -> &str {
        "Recall past conversation memory. Use when the user refers to earlier \
conversations or historical context is needed."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "max_chars": {
                    "type": "integer",
                    "description": "Maximum characters to read (default 4000)."
                }
            },
            "required": []
        })
    }

    async fn execute(&self, args: Value, _cancel: CancellationToken) -> Result<String> {
        let max_chars = args
            .get("max_chars")
            .and_then(Value::as_u64)
            .unwrap_or(DEFAULT_MEMORY_MAX_CHARS as u64) as usize;
        let memory = self.identity.memory_tail(max_chars);
        if memory.is_empty() {
            Ok("No conversation memory yet; this may be the first conversation.".to_string())
        } else {
            Ok(memory)
        }
    }
}

struct UpdateUserProfileTool {
    identity: Arc<IdentityStore>,
}

#[async_trait::async_trait]
impl ToolDefinition for UpdateUserProfileTool {
    fn name(&self) -> &str {
        "update_user_profile"
    }

    fn description(&self) -> &str {
        "Record new information about the user (name, preferences, interests, \
work) in their profile."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "info": {
                    "type": "string",
                    "description": "The fact to record, e.g. 'prefers metric units'."
                }
            },
            "required": ["info"]
        })
    }

    async fn execute(&self, args: Value, _cancel: CancellationToken) -> Result<String> {
        let info = arg_str(&args, "info").context("no info provided")?;
        self.identity.update_profile(&info)?;
        Ok(format!("Recorded user information: {info}"))
    }
}

struct SaveNoteTool {
    identity: Arc<IdentityStore>,
}

#[async_trait::async_trait]
impl ToolDefinition for SaveNoteTool {
    fn name(&self) -> &str {
        "save_note"
    }

    fn description(&self) -> &str {
        "Save an important fact or decision to long-term memory."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "note": {"type": "string", "description": "The note to save."}
            },
            "required": ["note"]
        })
    }

    async fn execute(&self, args: Value, _cancel: CancellationToken) -> Result<String> {
        let note = arg_str(&args, "note").context("no note provided")?;
        self.identity.append_memory(&note)?;
        Ok("Saved note to memory.".to_string())
    }
}

// ---------------------------------------------------------------------------
// Registration
// ---------------------------------------------------------------------------

/// Options controlling which built-ins are registered for a session.
pub struct BuiltinOptions {
    /// Names of tools to enable.
    pub enabled: Vec<String>,
    /// Whether the shell tool may actually execute commands.
    pub allow_shell: bool,
    /// The session's skill set (shared with the orchestrator).
    pub skills: SkillSet,
    /// The identity store (shared across sessions).
    pub identity: Arc<IdentityStore>,
}

/// Register the enabled built-in tools into `registry`.
pub fn register_builtins(registry: &ToolRegistry, opts: BuiltinOptions) -> Result<()> {
    let http = reqwest::Client::builder()
        .connect_timeout(std::time::Duration::from_secs(10))
        .user_agent("parlance/0.1")
        .build()?;

    let mut all: HashMap<&'static str, Box<dyn ToolDefinition>> = HashMap::new();
    all.insert("get_datetime", Box::new(GetDatetimeTool));
    all.insert("calculate", Box::new(CalculateTool));
    all.insert("web_search", Box::new(WebSearchTool { http }));
    all.insert("read_file", Box::new(ReadFileTool));
    all.insert("write_file", Box::new(WriteFileTool));
    all.insert(
        "run_command",
        Box::new(RunCommandTool {
            allowed: opts.allow_shell,
        }),
    );
    all.insert("run_python", Box::new(RunPythonTool));
    all.insert("list_directory", Box::new(ListDirectoryTool));
    all.insert("search_files", Box::new(SearchFilesTool));
    all.insert(
        "list_skills",
        Box::new(ListSkillsTool {
            skills: opts.skills.clone(),
        }),
    );
    all.insert(
        "activate_skill",
        Box::new(ActivateSkillTool {
            skills: opts.skills.clone(),
        }),
    );
    all.insert(
        "deactivate_skill",
        Box::new(DeactivateSkillTool {
            skills: opts.skills,
        }),
    );
    all.insert(
        "recall_memory",
        Box::new(RecallMemoryTool {
            identity: opts.identity.clone(),
        }),
    );
    all.insert(
        "update_user_profile",
        Box::new(UpdateUserProfileTool {
            identity: opts.identity.clone(),
        }),
    );
    all.insert(
        "save_note",
        Box::new(SaveNoteTool {
            identity: opts.identity,
        }),
    );

    for name in &opts.enabled {
        match all.remove(name.as_str()) {
            Some(tool) => registry.register(tool)?,
            None => tracing::warn!(tool = %name, "unknown tool in enabled list"),
        }
    }

    tracing::info!(
        count = registry.tool_count(),
        tools = ?registry.tool_names(),
        "tool registry created"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(enabled: &[&str]) -> (tempfile::TempDir, BuiltinOptions) {
        let dir = tempfile::tempdir().unwrap();
        let identity = Arc::new(IdentityStore::open(dir.path().join("identity")).unwrap());
        (
            dir,
            BuiltinOptions {
                enabled: enabled.iter().map(|s| s.to_string()).collect(),
                allow_shell: false,
                skills: SkillSet::new(),
                identity,
            },
        )
    }

    #[test]
    fn registers_only_enabled_tools() {
        let registry = ToolRegistry::new();
        let (_dir, opts) = options(&["get_datetime", "calculate", "bogus_tool"]);
        register_builtins(&registry, opts).unwrap();
        assert_eq!(registry.tool_names(), vec!["calculate", "get_datetime"]);
    }

    #[tokio::test]
    async fn datetime_tool_formats() {
        let tool = GetDatetimeTool;
        let out = tool
            .execute(json!({"timezone": "utc"}), CancellationToken::new())
            .await
            .unwrap();
        assert!(out.contains("UTC"), "expected UTC marker in: {out}");
        // Year-month-day prefix.
        assert_eq!(&out[4..5], "-");
    }

    #[tokio::test]
    async fn calculate_tool_renders_integers_cleanly() {
        let tool = CalculateTool;
        let out = tool
            .execute(json!({"expression": "sqrt(144) + 3^2"}), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(out, "sqrt(144) + 3^2 = 21");

        let err = tool
            .execute(json!({}), CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no expression"));
    }

    #[tokio::test]
    async fn read_file_enforces_size_cap() {
        let dir = tempfile::tempdir().unwrap();
        let small = dir.path().join("small.txt");
        std::fs::write(&small, "hello").unwrap();
        let big = dir.path().join("big.txt");
        std::fs::write(&big, "x".repeat(MAX_READ_BYTES as usize + 1)).unwrap();

        let tool = ReadFileTool;
        let out = tool
            .execute(
                json!({"path": small.to_str().unwrap()}),
                CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(out, "hello");

        let err = tool
            .execute(
                json!({"path": big.to_str().unwrap()}),
                CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(err.to_string().contains("too large"));
    }

    #[tokio::test]
    async fn write_then_list_directory() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a/b/c.txt");

        let write = WriteFileTool;
        write
            .execute(
                json!({"path": nested.to_str().unwrap(), "content": "data"}),
                CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(std::fs::read_to_string(&nested).unwrap(), "data");

        let list = ListDirectoryTool;
        let out = list
            .execute(
                json!({"path": dir.path().to_str().unwrap()}),
                CancellationToken::new(),
            )
            .await
            .unwrap();
        assert!(out.contains("[DIR]  a/"));
        assert!(out.contains("Total: 1 items"));
    }

    #[tokio::test]
    async fn shell_tool_refuses_when_disabled() {
        let tool = RunCommandTool { allowed: false };
        let err = tool
            .execute(json!({"command": "echo hi"}), CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("disabled"));
    }

    #[tokio::test]
    async fn shell_tool_runs_when_enabled() {
        let tool = RunCommandTool { allowed: true };
        let out = tool
            .execute(json!({"command": "echo parlance"}), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(out, "parlance");
    }

    #[tokio::test]
    async fn failing_command_reports_exit_code() {
        let tool = RunCommandTool { allowed: true };
        let err = tool
            .execute(json!({"command": "exit 3"}), CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("exit code: 3"));
    }

    #[tokio::test]
    async fn search_files_matches_patterns() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("report_a.csv"), "x").unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("sub/report_b.csv"), "x").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "x").unwrap();

        let tool = SearchFilesTool;
        let out = tool
            .execute(
                json!({"pattern": "*.csv", "directory": dir.path().to_str().unwrap()}),
                CancellationToken::new(),
            )
            .await
            .unwrap();
        assert!(out.contains("Found 2 file(s)"));
        assert!(out.contains("report_a.csv"));
        assert!(out.contains("report_b.csv"));
        assert!(!out.contains("notes.txt"));
    }

    #[test]
    fn wildcard_matching() {
        assert!(wildcard_match("*.py", "main.py"));
        assert!(wildcard_match("report*", "report_2026.csv"));
        assert!(wildcard_match("?at", "cat"));
        assert!(wildcard_match("*", "anything"));
        assert!(wildcard_match("a*b*c", "axxbyyc"));

        assert!(!wildcard_match("*.py", "main.rs"));
        assert!(!wildcard_match("?at", "chat"));
        assert!(!wildcard_match("a*b", "a"));
    }

    #[tokio::test]
    async fn skill_tools_toggle_shared_set() {
        let dir = tempfile::tempdir().unwrap();
        let skill_dir = dir.path().join("coder");
        std::fs::create_dir_all(&skill_dir).unwrap();
        std::fs::write(
            skill_dir.join("SKILL.md"),
            "---\nname: coder\ndescription: Writes code\n---\nBody\n",
        )
        .unwrap();
        let skills = SkillSet::new();
        skills.discover(&[dir.path().to_path_buf()]);

        let activate = ActivateSkillTool { skills: skills.clone() };
        let out = activate
            .execute(json!({"skill_name": "coder"}), CancellationToken::new())
            .await
            .unwrap();
        assert!(out.contains("Activated skill: coder"));
        assert_eq!(skills.active_names(), vec!["coder".to_string()]);

        let err = activate
            .execute(json!({"skill_name": "nope"}), CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("unknown skill"));

        let deactivate = DeactivateSkillTool { skills: skills.clone() };
        deactivate
            .execute(json!({"skill_name": "coder"}), CancellationToken::new())
            .await
            .unwrap();
        assert!(skills.active_names().is_empty());
    }

    #[tokio::test]
    async fn identity_tools_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let identity = Arc::new(IdentityStore::open(dir.path()).unwrap());

        let update = UpdateUserProfileTool { identity: identity.clone() };
        update
            .execute(json!({"info": "name is Ada"}), CancellationToken::new())
            .await
            .unwrap();
        assert!(identity.profile().contains("name is Ada"));

        let note = SaveNoteTool { identity: identity.clone() };
        note.execute(json!({"note": "likes jazz"}), CancellationToken::new())
            .await
            .unwrap();

        let recall = RecallMemoryTool { identity };
        let out = recall
            .execute(json!({}), CancellationToken::new())
            .await
            .unwrap();
        assert!(out.contains("likes jazz"));
    }

    #[test]
    fn expand_user_home() {
        std::env::set_var("HOME", "/home/tester");
        assert_eq!(expand_user("~/notes.txt"), PathBuf::from("/home/tester/notes.txt"));
        assert_eq!(expand_user("/abs/path"), PathBuf::from("/abs/path"));
    }
}
