//! Bridge skill: lets the model pull instruction-skill content on demand.
//!
//! Registered only when discovery found at least one package. `load_skill`
//! returns the manifest body; `read_skill_file` serves files under the
//! package's `scripts/` and `references/` subtrees only. Path validation
//! happens before any filesystem access.

use std::collections::BTreeMap;
use std::path::{Component, Path};

use async_trait::async_trait;
use serde_json::{json, Value};

use super::instruction::InstructionSkill;
use super::{Skill, ToolDefinition, ToolResult};

pub const TOOL_LOAD_SKILL: &str = "load_skill";
pub const TOOL_READ_SKILL_FILE: &str = "read_skill_file";

/// Subtrees `read_skill_file` may serve from.
const READABLE_SUBTREES: &[&str] = &["scripts", "references"];

pub struct BridgeSkill {
    skills: BTreeMap<String, InstructionSkill>,
}

impl BridgeSkill {
    pub fn new(skills: Vec<InstructionSkill>) -> Self {
        Self {
            skills: skills
                .into_iter()
                .map(|s| (s.name().to_string(), s))
                .collect(),
        }
    }

    /// The discovered packages as (name, description), for the skill index
    /// in the system prompt.
    pub fn index(&self) -> Vec<(String, String)> {
        self.skills
            .values()
            .map(|s| (s.name().to_string(), s.description().to_string()))
            .collect()
    }

    /// Validates a relative path into a skill package: no absolutes, no
    /// `..`, first component must be a readable subtree.
    fn validate_path(raw: &str) -> Result<(), String> {
        let path = Path::new(raw);
        if path.is_absolute() {
            return Err(format!("absolute paths are not allowed: '{raw}'"));
        }
        let mut components = path.components();
        let first = match components.next() {
            Some(Component::Normal(part)) => part.to_string_lossy().to_string(),
            _ => return Err(format!("invalid path: '{raw}'")),
        };
        if !READABLE_SUBTREES.contains(&first.as_str()) {
            return Err(format!(
                "only scripts/ and references/ are readable, got '{raw}'"
            ));
        }
        for component in components {
            match component {
                Component::Normal(_) => {}
                _ => return Err(format!("path must not contain '..' or '.': '{raw}'")),
            }
        }
        Ok(())
    }

    fn load(&self, name: &str) -> ToolResult {
        match self.skills.get(name) {
            Some(skill) => ToolResult::ok(json!({
                "name": skill.name(),
                "description": skill.description(),
                "content": skill.body,
            })),
            None => {
                let available: Vec<&str> = self.skills.keys().map(String::as_str).collect();
                ToolResult::fail(format!(
                    "skill '{name}' not found; available: {}",
                    available.join(", ")
                ))
            }
        }
    }

    async fn read_file(&self, name: &str, raw_path: &str) -> ToolResult {
        let Some(skill) = self.skills.get(name) else {
            return ToolResult::fail(format!("skill '{name}' not found"));
        };
        if let Err(reason) = Self::validate_path(raw_path) {
            return ToolResult::fail(reason);
        }
        let full = skill.root.join(raw_path);
        match tokio::fs::read_to_string(&full).await {
            Ok(content) => ToolResult::ok(json!({
                "skill": name,
                "path": raw_path,
                "content": content,
            })),
            Err(e) => ToolResult::fail(format!("read '{raw_path}': {e}")),
        }
    }
}

#[async_trait]
impl Skill for BridgeSkill {
    fn name(&self) -> &str {
        "skill_bridge"
    }

    fn description(&self) -> &str {
        "Load instruction skills and their bundled files"
    }

    fn tool_definitions(&self) -> Vec<ToolDefinition> {
        vec![
            ToolDefinition {
                name: TOOL_LOAD_SKILL.to_string(),
                description: "Load the full instructions of a named skill.".to_string(),
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "name": {"type": "string", "description": "Skill name from the skill index."}
                    },
                    "required": ["name"],
                    "additionalProperties": false
                }),
            },
            ToolDefinition {
                name: TOOL_READ_SKILL_FILE.to_string(),
                description: "Read a file bundled with a skill, under its scripts/ or references/ directory."
                    .to_string(),
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "name": {"type": "string"},
                        "path": {
                            "type": "string",
                            "description": "Relative path starting with scripts/ or references/."
                        }
                    },
                    "required": ["name", "path"],
                    "additionalProperties": false
                }),
            },
        ]
    }

    async fn execute(&self, tool_name: &str, arguments: &Value) -> ToolResult {
        let name = arguments.get("name").and_then(Value::as_str);
        match tool_name {
            TOOL_LOAD_SKILL => match name {
                Some(n) => self.load(n),
                None => ToolResult::fail("missing 'name' argument"),
            },
            TOOL_READ_SKILL_FILE => {
                let path = arguments.get("path").and_then(Value::as_str);
                match (name, path) {
                    (Some(n), Some(p)) => self.read_file(n, p).await,
                    _ => ToolResult::fail("missing 'name' or 'path' argument"),
                }
            }
            other => ToolResult::fail(format!("unknown tool '{other}'")),
        }
    }
}
