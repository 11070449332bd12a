//! LLM provider abstraction.
//!
//! One call shape for every backend: conversation messages plus a system
//! prompt and an optional tool catalog in, assistant content plus tool-call
//! requests and token usage out. Provider-specific wire formats stay inside
//! each implementation; the agent loop is provider-agnostic.

mod mock;
mod ollama;
mod openai;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::skills::ToolDefinition;

pub use mock::MockLlm;
pub use ollama::OllamaChat;
pub use openai::OpenAiChat;

#[derive(Error, Debug, Clone)]
pub enum LlmError {
    #[error("LLM call timed out")]
    Timeout,
    #[error("LLM rate limited")]
    RateLimited,
    #[error("LLM API error: {0}")]
    Api(String),
    #[error("LLM response could not be decoded: {0}")]
    Decode(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatRole {
    System,
    User,
    Assistant,
    Tool,
}

/// One tool invocation requested by the model.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

/// One conversation message as seen by a provider.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
    /// Set on `Tool` messages: which call this result answers.
    #[serde(default)]
    pub tool_call_id: Option<String>,
    /// Set on `Assistant` messages that requested tools.
    #[serde(default)]
    pub tool_calls: Vec<ToolCallRequest>,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
            tool_call_id: None,
            tool_calls: Vec::new(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
            tool_call_id: None,
            tool_calls: Vec::new(),
        }
    }

    pub fn assistant_with_tools(
        content: impl Into<String>,
        tool_calls: Vec<ToolCallRequest>,
    ) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
            tool_call_id: None,
            tool_calls,
        }
    }

    pub fn tool(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Tool,
            content: content.into(),
            tool_call_id: Some(tool_call_id.into()),
            tool_calls: Vec::new(),
        }
    }
}

/// Token usage for one call.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub total_tokens: u32,
}

impl LlmUsage {
    pub fn new(input_tokens: u32, output_tokens: u32) -> Self {
        Self {
            input_tokens,
            output_tokens,
            total_tokens: input_tokens + output_tokens,
        }
    }
}

/// Response from one chat completion.
#[derive(Clone, Debug, Default)]
pub struct ChatResponse {
    /// Assistant text; may be empty when the model only called tools.
    pub content: String,
    /// Empty means the reason/act cycle ends this turn.
    pub tool_calls: Vec<ToolCallRequest>,
    pub usage: LlmUsage,
}

/// Chat-completion contract every provider satisfies.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn chat(
        &self,
        messages: &[ChatMessage],
        system: &str,
        tools: &[ToolDefinition],
    ) -> Result<ChatResponse, LlmError>;

    fn provider_name(&self) -> &str;

    fn model(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usage_totals_inputs_and_outputs() {
        let usage = LlmUsage::new(5, 2);
        assert_eq!(usage.total_tokens, 7);
    }

    #[test]
    fn message_constructors_set_roles() {
        assert_eq!(ChatMessage::user("hi").role, ChatRole::User);
        assert_eq!(ChatMessage::assistant("yo").role, ChatRole::Assistant);
        let t = ChatMessage::tool("t1", "{}");
        assert_eq!(t.role, ChatRole::Tool);
        assert_eq!(t.tool_call_id.as_deref(), Some("t1"));
    }
}
