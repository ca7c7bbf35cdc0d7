//! Agent skill discovery and activation.
//!
//! A skill is a directory containing a `SKILL.md` file: YAML frontmatter
//! (`name`, `description`) followed by a markdown instruction body. Skill
//! metadata is always visible to the model (progressive disclosure); the
//! full instruction body is injected into the system prompt only while the
//! skill is active. Activation is per-session state, toggled either by a
//! client control message or by the model through the `activate_skill` /
//! `deactivate_skill` tools.

pub mod manifest;
pub mod set;

pub use manifest::{parse_skill_md, Skill, SkillFrontmatter};
pub use set::SkillSet;
