//! Instruction skills: filesystem packages discovered at startup.
//!
//! A package is a directory holding a `SKILL.md` manifest (YAML frontmatter
//! plus a free-form body) and optional `scripts/` and `references/`
//! subtrees. Invalid packages are logged and skipped, never fatal.

use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use tracing::{info, warn};

use super::SkillError;

pub const MANIFEST_FILE: &str = "SKILL.md";

/// `name` rule: lowercase, digits, dashes, at most 64 chars.
static NAME_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-z0-9-]{1,64}$").unwrap());

const DESCRIPTION_MAX: usize = 1024;

/// Frontmatter of a `SKILL.md` manifest.
#[derive(Clone, Debug, Deserialize)]
pub struct SkillManifest {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub license: Option<String>,
    #[serde(default)]
    pub compatibility: Option<String>,
    #[serde(default)]
    pub metadata: Option<serde_yaml::Value>,
    #[serde(default, rename = "allowed-tools")]
    pub allowed_tools: Option<Vec<String>>,
}

/// One discovered package: manifest, body text, and package root.
#[derive(Clone, Debug)]
pub struct InstructionSkill {
    pub manifest: SkillManifest,
    pub body: String,
    pub root: PathBuf,
}

impl InstructionSkill {
    pub fn name(&self) -> &str {
        &self.manifest.name
    }

    pub fn description(&self) -> &str {
        &self.manifest.description
    }
}

/// Scans `dirs` for instruction-skill packages. Invalid packages are
/// reported at `warn` and skipped; missing directories are ignored.
pub fn discover_instruction_skills(dirs: &[PathBuf]) -> Vec<InstructionSkill> {
    let mut found = Vec::new();
    for dir in dirs {
        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(_) => {
                warn!(dir = %dir.display(), "skill directory not readable, skipping");
                continue;
            }
        };
        for entry in entries.flatten() {
            let root = entry.path();
            if !root.is_dir() {
                continue;
            }
            match load_package(&root) {
                Ok(skill) => {
                    info!(name = skill.name(), root = %root.display(), "instruction skill discovered");
                    found.push(skill);
                }
                Err(SkillError::InvalidPackage(reason)) => {
                    warn!(root = %root.display(), %reason, "invalid skill package skipped");
                }
                Err(other) => {
                    warn!(root = %root.display(), error = %other, "skill package skipped");
                }
            }
        }
    }
    found.sort_by(|a, b| a.manifest.name.cmp(&b.manifest.name));
    found
}

fn load_package(root: &Path) -> Result<InstructionSkill, SkillError> {
    let manifest_path = root.join(MANIFEST_FILE);
    let raw = std::fs::read_to_string(&manifest_path)
        .map_err(|e| SkillError::InvalidPackage(format!("read {MANIFEST_FILE}: {e}")))?;
    let (manifest, body) = parse_manifest(&raw)?;
    validate_manifest(&manifest, root)?;
    Ok(InstructionSkill {
        manifest,
        body,
        root: root.to_path_buf(),
    })
}

/// Splits `---`-delimited YAML frontmatter from the body.
pub fn parse_manifest(raw: &str) -> Result<(SkillManifest, String), SkillError> {
    let rest = raw
        .strip_prefix("---")
        .ok_or_else(|| SkillError::InvalidPackage("manifest has no frontmatter".to_string()))?;
    let end = rest
        .find("\n---")
        .ok_or_else(|| SkillError::InvalidPackage("unterminated frontmatter".to_string()))?;
    let frontmatter = &rest[..end];
    let body = rest[end + 4..].trim_start_matches('\n').to_string();
    let manifest: SkillManifest = serde_yaml::from_str(frontmatter)
        .map_err(|e| SkillError::InvalidPackage(format!("frontmatter: {e}")))?;
    Ok((manifest, body))
}

fn validate_manifest(manifest: &SkillManifest, root: &Path) -> Result<(), SkillError> {
    if !NAME_RE.is_match(&manifest.name) {
        return Err(SkillError::InvalidPackage(format!(
            "name '{}' must match [a-z0-9-]{{1,64}}",
            manifest.name
        )));
    }
    if manifest.description.is_empty() || manifest.description.len() > DESCRIPTION_MAX {
        return Err(SkillError::InvalidPackage(format!(
            "description must be 1-{DESCRIPTION_MAX} chars, got {}",
            manifest.description.len()
        )));
    }
    let dir_name = root.file_name().and_then(|n| n.to_str()).unwrap_or("");
    if dir_name != manifest.name {
        return Err(SkillError::InvalidPackage(format!(
            "directory '{dir_name}' does not match manifest name '{}'",
            manifest.name
        )));
    }
    Ok(())
}
