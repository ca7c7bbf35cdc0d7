//! SKILL.md parsing and validation.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::Deserialize;

/// Maximum allowed length for a skill name.
const MAX_NAME_LEN: usize = 64;

/// YAML frontmatter of a SKILL.md file.
#[derive(Debug, Clone, Deserialize)]
pub struct SkillFrontmatter {
    /// Unique skill name (alphanumeric + hyphens/underscores, 1-64 chars).
    pub name: String,
    /// One-line description shown to the model and the client.
    pub description: String,
}

/// A parsed skill bundle.
#[derive(Debug, Clone)]
pub struct Skill {
    /// Skill name from the frontmatter.
    pub name: String,
    /// Description from the frontmatter.
    pub description: String,
    /// Markdown instruction body (everything after the frontmatter).
    pub instructions: String,
    /// Directory containing the SKILL.md.
    pub path: PathBuf,
}

/// Validate a skill name: non-empty, bounded, no shell metacharacters.
pub fn validate_skill_name(name: &str) -> Result<()> {
    if name.is_empty() {
        bail!("skill name must not be empty");
    }
    if name.len() > MAX_NAME_LEN {
        bail!("skill name exceeds maximum length of {MAX_NAME_LEN} characters: {name}");
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        bail!("skill name must contain only alphanumeric characters, hyphens, and underscores: {name}");
    }
    Ok(())
}

/// Split a SKILL.md document into its frontmatter and body.
///
/// The document must start with a `---` line, followed by YAML, another
/// `---` line, and the markdown body.
fn split_frontmatter(content: &str) -> Option<(&str, &str)> {
    let rest = content.strip_prefix("---")?;
    let rest = rest.strip_prefix('\n').or_else(|| rest.strip_prefix("\r\n"))?;
    let end = rest.find("\n---")?;
    let yaml = &rest[..end];
    let body = &rest[end + 4..];
    let body = body.strip_prefix('\n').unwrap_or(body);
    Some((yaml, body))
}

/// Parse the SKILL.md inside `skill_dir`.
///
/// Returns `Ok(None)` when the directory has no SKILL.md; errors only on a
/// present-but-invalid file so discovery can report it.
pub fn parse_skill_md(skill_dir: &Path) -> Result<Option<Skill>> {
    let skill_file = skill_dir.join("SKILL.md");
    if !skill_file.exists() {
        return Ok(None);
    }

    let content = std::fs::read_to_string(&skill_file)
        .with_context(|| format!("failed to read {}", skill_file.display()))?;

    let (yaml, body) = split_frontmatter(&content)
        .with_context(|| format!("no YAML frontmatter in {}", skill_file.display()))?;

    let fm: SkillFrontmatter = serde_yaml::from_str(yaml)
        .with_context(|| format!("invalid YAML frontmatter in {}", skill_file.display()))?;

    if fm.name.is_empty() || fm.description.is_empty() {
        bail!(
            "skill {} missing required name/description",
            skill_file.display()
        );
    }
    validate_skill_name(&fm.name)?;

    Ok(Some(Skill {
        name: fm.name,
        description: fm.description,
        instructions: body.trim().to_string(),
        path: skill_dir.to_path_buf(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    const CODER_SKILL: &str = "---\nname: coder\ndescription: Writes and reviews code\n---\n\n\
# Coder\n\nWhen coding, explain the change before showing it.\n";

    fn write_skill(dir: &Path, name: &str, content: &str) -> PathBuf {
        let skill_dir = dir.join(name);
        std::fs::create_dir_all(&skill_dir).unwrap();
        std::fs::write(skill_dir.join("SKILL.md"), content).unwrap();
        skill_dir
    }

    #[test]
    fn parses_frontmatter_and_body() {
        let dir = tempfile::tempdir().unwrap();
        let skill_dir = write_skill(dir.path(), "coder", CODER_SKILL);

        let skill = parse_skill_md(&skill_dir).unwrap().unwrap();
        assert_eq!(skill.name, "coder");
        assert_eq!(skill.description, "Writes and reviews code");
        assert!(skill.instructions.starts_with("# Coder"));
        assert!(skill.instructions.contains("explain the change"));
    }

    #[test]
    fn missing_skill_md_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let empty = dir.path().join("empty");
        std::fs::create_dir_all(&empty).unwrap();
        assert!(parse_skill_md(&empty).unwrap().is_none());
    }

    #[test]
    fn rejects_missing_frontmatter() {
        let dir = tempfile::tempdir().unwrap();
        let skill_dir = write_skill(dir.path(), "bad", "# Just markdown\n");
        assert!(parse_skill_md(&skill_dir).is_err());
    }

    #[test]
    fn rejects_incomplete_frontmatter() {
        let dir = tempfile::tempdir().unwrap();
        let skill_dir = write_skill(dir.path(), "bad", "---\nname: only-name\n---\nbody\n");
        assert!(parse_skill_md(&skill_dir).is_err());
    }

    #[test]
    fn skill_name_validation() {
        assert!(validate_skill_name("coder").is_ok());
        assert!(validate_skill_name("web-research").is_ok());
        assert!(validate_skill_name("notes_v2").is_ok());

        assert!(validate_skill_name("").is_err());
        assert!(validate_skill_name(&"a".repeat(65)).is_err());
        assert!(validate_skill_name("bad name").is_err());
        assert!(validate_skill_name("bad;name").is_err());
        assert!(validate_skill_name("../escape").is_err());
    }
}
