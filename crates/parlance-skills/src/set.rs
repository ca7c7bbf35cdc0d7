//! Per-session skill set: discovery, activation, prompt injection.

use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use parlance_types::SkillInfo;

use crate::manifest::{parse_skill_md, Skill};

struct Inner {
    skills: HashMap<String, Skill>,
    /// Discovery order, so listings and prompts are deterministic.
    order: Vec<String>,
    active: BTreeSet<String>,
}

/// The session's skill state.
///
/// Stored behind `Arc<RwLock<...>>` so the orchestrator and the skill tools
/// share one view; cloning is cheap.
#[derive(Clone)]
pub struct SkillSet {
    inner: Arc<RwLock<Inner>>,
}

impl SkillSet {
    /// Create an empty skill set.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(Inner {
                skills: HashMap::new(),
                order: Vec::new(),
                active: BTreeSet::new(),
            })),
        }
    }

    /// Scan the given directories for skill bundles. Previously discovered
    /// skills are replaced; the active set is preserved for names that still
    /// exist.
    pub fn discover(&self, dirs: &[PathBuf]) -> usize {
        let mut skills = HashMap::new();
        let mut order = Vec::new();
        for dir in dirs {
            let entries = match std::fs::read_dir(dir) {
                Ok(e) => e,
                Err(_) => {
                    tracing::debug!(dir = %dir.display(), "skills directory does not exist");
                    continue;
                }
            };
            let mut children: Vec<PathBuf> =
                entries.flatten().map(|e| e.path()).filter(|p| p.is_dir()).collect();
            children.sort();
            for child in children {
                match parse_skill_md(&child) {
                    Ok(Some(skill)) => {
                        tracing::info!(name = %skill.name, path = %child.display(), "discovered skill");
                        if !skills.contains_key(&skill.name) {
                            order.push(skill.name.clone());
                        }
                        skills.insert(skill.name.clone(), skill);
                    }
                    Ok(None) => {}
                    Err(e) => {
                        tracing::warn!(path = %child.display(), error = %e, "skipping invalid skill");
                    }
                }
            }
        }

        let mut inner = self.inner.write().expect("skill set lock poisoned");
        inner.active.retain(|name| skills.contains_key(name));
        inner.skills = skills;
        inner.order = order;
        let count = inner.skills.len();
        tracing::info!(count, "skill discovery finished");
        count
    }

    /// Activate a skill by name. Returns false for unknown skills.
    pub fn activate(&self, name: &str) -> bool {
        let mut inner = self.inner.write().expect("skill set lock poisoned");
        if inner.skills.contains_key(name) {
            inner.active.insert(name.to_string());
            tracing::info!(skill = name, "skill activated");
            true
        } else {
            tracing::warn!(skill = name, "cannot activate unknown skill");
            false
        }
    }

    /// Deactivate a skill. Returns true if it was active.
    pub fn deactivate(&self, name: &str) -> bool {
        let mut inner = self.inner.write().expect("skill set lock poisoned");
        let was_active = inner.active.remove(name);
        if was_active {
            tracing::info!(skill = name, "skill deactivated");
        }
        was_active
    }

    /// Look up a skill's description.
    pub fn description(&self, name: &str) -> Option<String> {
        let inner = self.inner.read().expect("skill set lock poisoned");
        inner.skills.get(name).map(|s| s.description.clone())
    }

    /// Names of currently active skills, sorted.
    pub fn active_names(&self) -> Vec<String> {
        let inner = self.inner.read().expect("skill set lock poisoned");
        inner.active.iter().cloned().collect()
    }

    /// Skill info list for client broadcasts, in discovery order.
    pub fn to_info(&self) -> Vec<SkillInfo> {
        let inner = self.inner.read().expect("skill set lock poisoned");
        inner
            .order
            .iter()
            .filter_map(|name| inner.skills.get(name))
            .map(|s| SkillInfo {
                name: s.name.clone(),
                description: s.description.clone(),
                active: inner.active.contains(&s.name),
            })
            .collect()
    }

    /// Append skill context to a base system prompt.
    ///
    /// Available-skill metadata is always included so the model can decide
    /// to activate something; full instruction bodies are injected only for
    /// active skills.
    pub fn build_system_prompt(&self, base: &str) -> String {
        let inner = self.inner.read().expect("skill set lock poisoned");
        let mut parts = vec![base.to_string()];

        if !inner.skills.is_empty() {
            let mut xml = String::from("\n<available_skills>\n");
            for name in &inner.order {
                let Some(skill) = inner.skills.get(name) else {
                    continue;
                };
                let active_attr = if inner.active.contains(name) {
                    " active=\"true\""
                } else {
                    ""
                };
                xml.push_str(&format!(
                    "<skill{active_attr}>\n  <name>{}</name>\n  <description>{}</description>\n</skill>\n",
                    skill.name, skill.description
                ));
            }
            xml.push_str("</available_skills>\n");
            xml.push_str(
                "\nActivate a skill with the activate_skill tool when the user's request \
matches its description; list_skills shows everything available.\n",
            );
            parts.push(xml);
        }

        let active: Vec<&Skill> = inner
            .order
            .iter()
            .filter(|n| inner.active.contains(*n))
            .filter_map(|n| inner.skills.get(n))
            .collect();
        if !active.is_empty() {
            parts.push("\n<active_skill_instructions>".to_string());
            for skill in active {
                parts.push(format!("\n## Skill: {}\n", skill.name));
                parts.push(skill.instructions.clone());
            }
            parts.push("\n</active_skill_instructions>".to_string());
        }

        parts.join("\n")
    }
}

impl Default for SkillSet {
    fn default() -> Self {
        Self::new()
    }
}
