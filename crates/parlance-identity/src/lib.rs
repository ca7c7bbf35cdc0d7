//! Identity artifacts for the Parlance agent.
//!
//! Three plain-text documents under one root directory shape the agent's
//! voice and continuity:
//!
//! - `PERSONA.md` — who the agent is. Read at startup, immutable for the
//!   lifetime of a session.
//! - `PROFILE.md` — who the user is, learned over time. Read at startup and
//!   rewritten by the `update_user_profile` tool.
//! - `MEMORY.md` — append-only log of turn summaries across sessions.
//!
//! Writes are crash-safe: whole-file updates go to a temporary sibling that
//! is fsynced and atomically renamed over the target; appends use an
//! append-open followed by fsync. Writers across sessions are serialized by
//! a process-global per-path lock.

use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock, RwLock};

use parlance_types::IdentitySummary;

/// Persona artifact file name.
pub const PERSONA_FILE: &str = "PERSONA.md";

/// User profile artifact file name.
pub const PROFILE_FILE: &str = "PROFILE.md";

/// Conversation memory artifact file name.
pub const MEMORY_FILE: &str = "MEMORY.md";

/// Default cap on characters returned by [`IdentityStore::memory_tail`].
pub const DEFAULT_MEMORY_MAX_CHARS: usize = 4000;

/// Errors from identity artifact operations.
#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    /// Underlying filesystem failure.
    #[error("identity io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience alias for identity results.
pub type IdentityResult<T> = Result<T, IdentityError>;

// ---------------------------------------------------------------------------
// Per-path write locks
// ---------------------------------------------------------------------------

/// Process-global map of per-path write locks. Identity artifacts are shared
/// across sessions; concurrent writers to the same path are serialized here.
fn path_lock(path: &Path) -> Arc<Mutex<()>> {
    static LOCKS: OnceLock<Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>> = OnceLock::new();
    let locks = LOCKS.get_or_init(|| Mutex::new(HashMap::new()));
    let mut map = locks.lock().expect("path lock registry poisoned");
    map.entry(path.to_path_buf())
        .or_insert_with(|| Arc::new(Mutex::new(())))
        .clone()
}

/// Write `content` to `path` via a temporary sibling and atomic rename.
fn write_atomic(path: &Path, content: &str) -> IdentityResult<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    {
        let mut file = fs::File::create(&tmp)?;
        file.write_all(content.as_bytes())?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)?;
    Ok(())
}

// ---------------------------------------------------------------------------
// IdentityStore
// ---------------------------------------------------------------------------

/// Loads and persists the three identity artifacts.
///
/// The persona is cached immutably; the profile cache is refreshed on every
/// rewrite so prompt rebuilds within the same session see tool updates.
pub struct IdentityStore {
    root: PathBuf,
    persona: String,
    profile: RwLock<String>,
}

impl IdentityStore {
    /// Open the identity root, creating it if missing, and load the persona
    /// and profile artifacts.
    pub fn open(root: impl Into<PathBuf>) -> IdentityResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;

        let persona = read_trimmed(&root.join(PERSONA_FILE))?;
        let profile = read_trimmed(&root.join(PROFILE_FILE))?;

        tracing::info!(
            root = %root.display(),
            persona_chars = persona.len(),
            profile_chars = profile.len(),
            "identity store loaded"
        );

        Ok(Self {
            root,
            persona,
            profile: RwLock::new(profile),
        })
    }

    /// The identity root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The persona document (may be empty if no PERSONA.md exists).
    pub fn persona(&self) -> &str {
        &self.persona
    }

    /// The current user profile document.
    pub fn profile(&self) -> String {
        self.profile.read().expect("profile lock poisoned").clone()
    }

    /// Read the most recent conversation memory, capped at `max_chars`.
    ///
    /// When the file exceeds the cap, the tail is returned with a leading
    /// truncation notice, cut at a line boundary where one falls close
    /// enough to the cut point.
    pub fn memory_tail(&self, max_chars: usize) -> String {
        let path = self.root.join(MEMORY_FILE);
        let content = match fs::read_to_string(&path) {
            Ok(c) => c.trim().to_string(),
            Err(_) => return String::new(),
        };
        if content.is_empty() {
            return String::new();
        }
        if content.len() <= max_chars {
            return content;
        }
        // Byte-index into the tail at a char boundary.
        let mut start = content.len() - max_chars;
        while !content.is_char_boundary(start) {
            start += 1;
        }
        let mut tail = &content[start..];
        if let Some(pos) = tail.find('\n') {
            if pos > 0 && pos < 200 {
                tail = &tail[pos + 1..];
            }
        }
        format!("(earlier memory omitted)\n\n{tail}")
    }

    /// Merge a new fact into the user profile and rewrite it atomically.
    ///
    /// Facts accumulate as bullets under a `## Notes` section; the section
    /// and the document skeleton are created on first write. Returns the new
    /// profile content.
    pub fn update_profile(&self, info: &str) -> IdentityResult<String> {
        let path = self.root.join(PROFILE_FILE);
        let lock = path_lock(&path);
        let _guard = lock.lock().expect("profile path lock poisoned");

        let existing = read_trimmed(&path)?;
        let updated = if existing.is_empty() {
            format!("# User Profile\n\n## Notes\n\n- {info}")
        } else if existing.contains("## Notes") {
            format!("{existing}\n- {info}")
        } else {
            format!("{existing}\n\n## Notes\n\n- {info}")
        };

        write_atomic(&path, &format!("{updated}\n"))?;
        *self.profile.write().expect("profile lock poisoned") = updated.clone();

        tracing::info!(added_chars = info.len(), "user profile updated");
        Ok(updated)
    }

    /// Append a timestamped summary entry to the conversation memory.
    pub fn append_memory(&self, summary: &str) -> IdentityResult<()> {
        let path = self.root.join(MEMORY_FILE);
        let lock = path_lock(&path);
        let _guard = lock.lock().expect("memory path lock poisoned");

        let now = chrono::Local::now().format("%Y-%m-%d %H:%M");
        let entry = format!("\n## {now}\n\n{}\n", summary.trim());

        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        if file.metadata()?.len() == 0 {
            file.write_all(
                b"# Conversation Memory\n\nMaintained automatically; one entry per committed turn.\n",
            )?;
        }
        file.write_all(entry.as_bytes())?;
        file.sync_all()?;

        tracing::info!(chars = summary.len(), "memory entry appended");
        Ok(())
    }

    /// Artifact summary for the `session_info` message.
    pub fn summary(&self) -> IdentitySummary {
        let memory_entries = fs::read_to_string(self.root.join(MEMORY_FILE))
            .map(|c| c.matches("\n## ").count())
            .unwrap_or(0);
        let profile = self.profile();
        IdentitySummary {
            persona_loaded: !self.persona.is_empty(),
            profile_loaded: !profile.is_empty(),
            persona_chars: self.persona.len(),
            profile_chars: profile.len(),
            memory_entries,
        }
    }
}

fn read_trimmed(path: &Path) -> IdentityResult<String> {
    match fs::read_to_string(path) {
        Ok(c) => Ok(c.trim().to_string()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, IdentityStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = IdentityStore::open(dir.path()).unwrap();
        (dir, store)
    }

    #[test]
    fn open_with_empty_root() {
        let (_dir, store) = store();
        assert!(store.persona().is_empty());
        assert!(store.profile().is_empty());
        assert!(store.memory_tail(DEFAULT_MEMORY_MAX_CHARS).is_empty());

        let summary = store.summary();
        assert!(!summary.persona_loaded);
        assert!(!summary.profile_loaded);
        assert_eq!(summary.memory_entries, 0);
    }

    #[test]
    fn persona_loaded_at_open() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(PERSONA_FILE), "You are warm and brief.\n").unwrap();
        let store = IdentityStore::open(dir.path()).unwrap();
        assert_eq!(store.persona(), "You are warm and brief.");
        assert!(store.summary().persona_loaded);
    }

    #[test]
    fn profile_update_builds_skeleton_then_appends() {
        let (dir, store) = store();

        let first = store.update_profile("name is Ada").unwrap();
        assert!(first.starts_with("# User Profile"));
        assert!(first.contains("## Notes"));
        assert!(first.contains("- name is Ada"));

        let second = store.update_profile("prefers short answers").unwrap();
        assert!(second.contains("- name is Ada"));
        assert!(second.contains("- prefers short answers"));
        // Only one Notes section.
        assert_eq!(second.matches("## Notes").count(), 1);

        // On-disk content matches the cache, and no temp sibling remains.
        let on_disk = fs::read_to_string(dir.path().join(PROFILE_FILE)).unwrap();
        assert_eq!(on_disk.trim(), second);
        assert!(!dir.path().join(format!("{PROFILE_FILE}.tmp")).exists());
    }

    #[test]
    fn memory_appends_are_timestamped_entries() {
        let (_dir, store) = store();
        store.append_memory("talked about the weather").unwrap();
        store.append_memory("helped debug a parser").unwrap();

        let tail = store.memory_tail(DEFAULT_MEMORY_MAX_CHARS);
        assert!(tail.starts_with("# Conversation Memory"));
        assert!(tail.contains("talked about the weather"));
        assert!(tail.contains("helped debug a parser"));
        assert_eq!(store.summary().memory_entries, 2);
    }

    #[test]
    fn memory_tail_truncates_at_line_boundary() {
        let (_dir, store) = store();
        for i in 0..200 {
            store.append_memory(&format!("entry number {i}")).unwrap();
        }
        let tail = store.memory_tail(500);
        assert!(tail.starts_with("(earlier memory omitted)"));
        assert!(tail.len() <= 500 + 30);
        // The newest entry always survives truncation.
        assert!(tail.contains("entry number 199"));
    }

    #[test]
    fn profile_update_is_visible_in_prompt_cache() {
        let (_dir, store) = store();
        store.update_profile("likes espresso").unwrap();
        assert!(store.profile().contains("likes espresso"));
    }
}
