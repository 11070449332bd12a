//! Tool registry and dispatcher.
//!
//! Registration compiles each tool's JSON schema once; dispatch validates
//! arguments, enforces the per-call timeout, and converts every failure mode
//! (unknown tool, invalid arguments, execution error, timeout) into a failed
//! [`ToolResult`] so the agent loop can feed it back to the model.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use jsonschema::Validator;
use serde_json::Value;
use tracing::{debug, warn};

use super::{Skill, SkillError, ToolDefinition, ToolResult};

struct RegisteredTool {
    skill: Arc<dyn Skill>,
    definition: ToolDefinition,
    validator: Validator,
}

#[derive(Default)]
pub struct SkillRegistry {
    tools: DashMap<String, Arc<RegisteredTool>>,
}

impl SkillRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers every tool of `skill`. Fails without registering anything
    /// if a tool name is already taken or a schema does not compile.
    pub fn register(&self, skill: Arc<dyn Skill>) -> Result<(), SkillError> {
        let definitions = skill.tool_definitions();
        let mut staged = Vec::with_capacity(definitions.len());
        for definition in definitions {
            if self.tools.contains_key(&definition.name) {
                return Err(SkillError::Collision(definition.name));
            }
            let validator =
                jsonschema::validator_for(&definition.parameters).map_err(|e| {
                    SkillError::Schema {
                        name: definition.name.clone(),
                        reason: e.to_string(),
                    }
                })?;
            staged.push((definition, validator));
        }
        for (definition, validator) in staged {
            debug!(tool = %definition.name, skill = %skill.name(), "tool registered");
            self.tools.insert(
                definition.name.clone(),
                Arc::new(RegisteredTool {
                    skill: Arc::clone(&skill),
                    definition,
                    validator,
                }),
            );
        }
        Ok(())
    }

    /// Tool catalog, name-sorted so prompts are deterministic.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> = self
            .tools
            .iter()
            .map(|entry| entry.value().definition.clone())
            .collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    /// Which skill owns `tool_name`.
    pub fn skill_for(&self, tool_name: &str) -> Option<String> {
        self.tools
            .get(tool_name)
            .map(|t| t.skill.name().to_string())
    }

    pub fn contains(&self, tool_name: &str) -> bool {
        self.tools.contains_key(tool_name)
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Validates and runs one tool call under `timeout`.
    pub async fn dispatch(
        &self,
        tool_name: &str,
        arguments: &Value,
        timeout: Duration,
    ) -> ToolResult {
        let Some(tool) = self.tools.get(tool_name).map(|t| Arc::clone(&t)) else {
            return ToolResult::fail(format!("unknown tool '{tool_name}'"));
        };

        if let Err(error) = tool.validator.validate(arguments) {
            return ToolResult::fail(format!(
                "invalid arguments for '{tool_name}': {error}"
            ));
        }

        match tokio::time::timeout(timeout, tool.skill.execute(tool_name, arguments)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(tool = tool_name, ?timeout, "tool call timed out");
                ToolResult::fail(format!(
                    "tool '{tool_name}' timed out after {}s",
                    timeout.as_secs()
                ))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;

    struct EchoSkill;

    #[async_trait]
    impl Skill for EchoSkill {
        fn name(&self) -> &str {
            "echo"
        }

        fn description(&self) -> &str {
            "echoes its input"
        }

        fn tool_definitions(&self) -> Vec<ToolDefinition> {
            vec![ToolDefinition {
                name: "echo".to_string(),
                description: "echo the given text".to_string(),
                parameters: json!({
                    "type": "object",
                    "properties": {"text": {"type": "string"}},
                    "required": ["text"],
                    "additionalProperties": false
                }),
            }]
        }

        async fn execute(&self, _tool_name: &str, arguments: &Value) -> ToolResult {
            ToolResult::ok(json!({"echo": arguments["text"]}))
        }
    }

    struct SlowSkill;

    #[async_trait]
    impl Skill for SlowSkill {
        fn name(&self) -> &str {
            "slow"
        }

        fn description(&self) -> &str {
            "never finishes in time"
        }

        fn tool_definitions(&self) -> Vec<ToolDefinition> {
            vec![ToolDefinition {
                name: "sleep_forever".to_string(),
                description: "sleeps".to_string(),
                parameters: json!({"type": "object"}),
            }]
        }

        async fn execute(&self, _tool_name: &str, _arguments: &Value) -> ToolResult {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            ToolResult::ok(Value::Null)
        }
    }

    #[tokio::test]
    async fn dispatch_runs_registered_tool() {
        let registry = SkillRegistry::new();
        registry.register(Arc::new(EchoSkill)).unwrap();
        let result = registry
            .dispatch("echo", &json!({"text": "hi"}), Duration::from_secs(5))
            .await;
        assert!(result.success);
        assert_eq!(result.output["echo"], "hi");
        assert_eq!(registry.skill_for("echo").as_deref(), Some("echo"));
    }

    #[tokio::test]
    async fn unknown_tool_fails_as_data() {
        let registry = SkillRegistry::new();
        let result = registry
            .dispatch("nope", &json!({}), Duration::from_secs(1))
            .await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("unknown tool"));
    }

    #[tokio::test]
    async fn invalid_arguments_are_rejected_before_execution() {
        let registry = SkillRegistry::new();
        registry.register(Arc::new(EchoSkill)).unwrap();
        let result = registry
            .dispatch("echo", &json!({"text": 42}), Duration::from_secs(1))
            .await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("invalid arguments"));

        let missing = registry
            .dispatch("echo", &json!({}), Duration::from_secs(1))
            .await;
        assert!(!missing.success);
    }

    #[tokio::test]
    async fn name_collision_fails_registration() {
        let registry = SkillRegistry::new();
        registry.register(Arc::new(EchoSkill)).unwrap();
        let err = registry.register(Arc::new(EchoSkill)).unwrap_err();
        assert!(matches!(err, SkillError::Collision(name) if name == "echo"));
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_converts_to_failed_result() {
        let registry = SkillRegistry::new();
        registry.register(Arc::new(SlowSkill)).unwrap();
        let result = registry
            .dispatch("sleep_forever", &json!({}), Duration::from_secs(1))
            .await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("timed out"));
    }

    #[test]
    fn definitions_are_name_sorted() {
        let registry = SkillRegistry::new();
        registry.register(Arc::new(SlowSkill)).unwrap();
        registry.register(Arc::new(EchoSkill)).unwrap();
        let names: Vec<String> = registry.definitions().into_iter().map(|d| d.name).collect();
        assert_eq!(names, vec!["echo", "sleep_forever"]);
    }
}
