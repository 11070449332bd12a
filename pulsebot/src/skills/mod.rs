//! Skills: the capabilities the agent can invoke as tools.
//!
//! Coded skills implement [`Skill`] directly; instruction skills are
//! filesystem packages surfaced through the bridge skill. The
//! [`SkillRegistry`] maps tool names to skills and validates arguments
//! before dispatch. Tool failures travel as data ([`ToolResult`] with
//! `success = false`), never as errors across the agent loop.

mod bridge;
mod file_ops;
mod instruction;
mod registry;
mod shell;
mod web_search;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub use bridge::{BridgeSkill, TOOL_LOAD_SKILL, TOOL_READ_SKILL_FILE};
pub use file_ops::FileSkill;
pub use instruction::{discover_instruction_skills, InstructionSkill, SkillManifest};
pub use registry::SkillRegistry;
pub use shell::{ShellSkill, BLOCKED_COMMANDS};
pub use web_search::{SearchBackend, WebSearchSkill};

#[derive(Error, Debug)]
pub enum SkillError {
    #[error("tool name collision: '{0}' is already registered")]
    Collision(String),
    #[error("invalid tool schema for '{name}': {reason}")]
    Schema { name: String, reason: String },
    #[error("invalid skill package: {0}")]
    InvalidPackage(String),
}

/// One tool a skill exposes: name, description, JSON-schema parameters.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// Outcome of one tool invocation. `error` is present exactly when
/// `success` is false.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolResult {
    pub success: bool,
    pub output: Value,
    #[serde(default)]
    pub error: Option<String>,
}

impl ToolResult {
    pub fn ok(output: Value) -> Self {
        Self {
            success: true,
            output,
            error: None,
        }
    }

    pub fn fail(error: impl Into<String>) -> Self {
        Self {
            success: false,
            output: Value::Null,
            error: Some(error.into()),
        }
    }
}

/// A named capability exposing one or more tools.
#[async_trait]
pub trait Skill: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    fn tool_definitions(&self) -> Vec<ToolDefinition>;

    /// Runs one of this skill's tools. Arguments have already been validated
    /// against the tool's schema by the registry.
    async fn execute(&self, tool_name: &str, arguments: &Value) -> ToolResult;
}
