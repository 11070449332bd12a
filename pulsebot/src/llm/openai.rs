//! OpenAI chat-completions backend (also serves OpenAI-compatible servers
//! via a custom base URL).

use std::time::Duration;

use async_openai::{
    config::OpenAIConfig,
    error::OpenAIError,
    types::chat::{
        ChatCompletionMessageToolCall, ChatCompletionMessageToolCalls,
        ChatCompletionRequestAssistantMessage,
        ChatCompletionRequestAssistantMessageContent, ChatCompletionRequestMessage,
        ChatCompletionRequestSystemMessage, ChatCompletionRequestSystemMessageContent,
        ChatCompletionRequestToolMessage, ChatCompletionRequestToolMessageContent,
        ChatCompletionRequestUserMessage, ChatCompletionRequestUserMessageContent,
        ChatCompletionTool, ChatCompletionTools, CreateChatCompletionRequest, FunctionCall,
        FunctionObject,
    },
    Client,
};
use async_trait::async_trait;
use serde_json::Value;

use crate::skills::ToolDefinition;

use super::{ChatMessage, ChatResponse, ChatRole, LlmError, LlmProvider, LlmUsage, ToolCallRequest};

pub struct OpenAiChat {
    config: OpenAIConfig,
    model: String,
    temperature: f32,
    max_tokens: u32,
    timeout: Duration,
}

impl OpenAiChat {
    pub fn new(
        api_key: &str,
        model: impl Into<String>,
        temperature: f32,
        max_tokens: u32,
        timeout: Duration,
    ) -> Self {
        Self {
            config: OpenAIConfig::new().with_api_key(api_key),
            model: model.into(),
            temperature,
            max_tokens,
            timeout,
        }
    }

    /// Points the client at an OpenAI-compatible server.
    pub fn with_api_base(mut self, base: &str) -> Self {
        self.config = self.config.with_api_base(base);
        self
    }

    fn request_messages(
        messages: &[ChatMessage],
        system: &str,
    ) -> Vec<ChatCompletionRequestMessage> {
        let mut out = Vec::with_capacity(messages.len() + 1);
        if !system.is_empty() {
            out.push(ChatCompletionRequestMessage::System(
                ChatCompletionRequestSystemMessage {
                    content: ChatCompletionRequestSystemMessageContent::Text(system.to_string()),
                    name: None,
                },
            ));
        }
        for m in messages {
            out.push(match m.role {
                ChatRole::System => ChatCompletionRequestMessage::System(
                    ChatCompletionRequestSystemMessage {
                        content: ChatCompletionRequestSystemMessageContent::Text(m.content.clone()),
                        name: None,
                    },
                ),
                ChatRole::User => {
                    ChatCompletionRequestMessage::User(ChatCompletionRequestUserMessage {
                        content: ChatCompletionRequestUserMessageContent::Text(m.content.clone()),
                        name: None,
                    })
                }
                ChatRole::Assistant => {
                    let tool_calls = (!m.tool_calls.is_empty()).then(|| {
                        m.tool_calls
                            .iter()
                            .map(|c| {
                                ChatCompletionMessageToolCalls::Function(
                                    ChatCompletionMessageToolCall {
                                        id: c.id.clone(),
                                        function: FunctionCall {
                                            name: c.name.clone(),
                                            arguments: c.arguments.to_string(),
                                        },
                                    },
                                )
                            })
                            .collect()
                    });
                    ChatCompletionRequestMessage::Assistant(ChatCompletionRequestAssistantMessage {
                        content: (!m.content.is_empty()).then(|| {
                            ChatCompletionRequestAssistantMessageContent::Text(m.content.clone())
                        }),
                        tool_calls,
                        ..Default::default()
                    })
                }
                ChatRole::Tool => {
                    ChatCompletionRequestMessage::Tool(ChatCompletionRequestToolMessage {
                        content: ChatCompletionRequestToolMessageContent::Text(m.content.clone()),
                        tool_call_id: m.tool_call_id.clone().unwrap_or_default(),
                    })
                }
            });
        }
        out
    }

    fn request_tools(tools: &[ToolDefinition]) -> Option<Vec<ChatCompletionTools>> {
        (!tools.is_empty()).then(|| {
            tools
                .iter()
                .map(|t| {
                    ChatCompletionTools::Function(ChatCompletionTool {
                        function: FunctionObject {
                            name: t.name.clone(),
                            description: Some(t.description.clone()),
                            parameters: Some(t.parameters.clone()),
                            strict: None,
                        },
                    })
                })
                .collect()
        })
    }

    fn map_error(e: OpenAIError) -> LlmError {
        match e {
            OpenAIError::ApiError(api) => {
                let kind = api.r#type.clone().unwrap_or_default();
                let code = api.code.clone().unwrap_or_default();
                if kind.contains("rate_limit") || code.contains("rate_limit") {
                    LlmError::RateLimited
                } else {
                    LlmError::Api(api.message)
                }
            }
            OpenAIError::JSONDeserialize(e, _) => LlmError::Decode(e.to_string()),
            other => LlmError::Api(other.to_string()),
        }
    }
}

#[async_trait]
impl LlmProvider for OpenAiChat {
    async fn chat(
        &self,
        messages: &[ChatMessage],
        system: &str,
        tools: &[ToolDefinition],
    ) -> Result<ChatResponse, LlmError> {
        let request = CreateChatCompletionRequest {
            model: self.model.clone(),
            messages: Self::request_messages(messages, system),
            temperature: Some(self.temperature),
            max_completion_tokens: Some(self.max_tokens),
            tools: Self::request_tools(tools),
            ..Default::default()
        };

        let client = Client::with_config(self.config.clone());
        let response = tokio::time::timeout(self.timeout, client.chat().create(request))
            .await
            .map_err(|_| LlmError::Timeout)?
            .map_err(Self::map_error)?;

        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::Decode("no choices in response".to_string()))?;

        let tool_calls = choice
            .message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .filter_map(|c| match c {
                ChatCompletionMessageToolCalls::Function(c) => Some(c),
                ChatCompletionMessageToolCalls::Custom(_) => None,
            })
            .map(|c| ToolCallRequest {
                id: c.id,
                name: c.function.name,
                // Invalid argument JSON is kept verbatim; schema validation
                // at dispatch reports it as a failed tool call.
                arguments: serde_json::from_str(&c.function.arguments)
                    .unwrap_or(Value::String(c.function.arguments)),
            })
            .collect();

        let usage = response
            .usage
            .map(|u| LlmUsage::new(u.prompt_tokens, u.completion_tokens))
            .unwrap_or_default();

        Ok(ChatResponse {
            content: choice.message.content.unwrap_or_default(),
            tool_calls,
            usage,
        })
    }

    fn provider_name(&self) -> &str {
        "openai"
    }

    fn model(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn system_prompt_leads_the_message_list() {
        let messages = vec![ChatMessage::user("hi")];
        let mapped = OpenAiChat::request_messages(&messages, "be helpful");
        assert_eq!(mapped.len(), 2);
        assert!(matches!(
            mapped[0],
            ChatCompletionRequestMessage::System(_)
        ));
    }

    #[test]
    fn assistant_tool_calls_round_trip_into_request() {
        let messages = vec![
            ChatMessage::assistant_with_tools(
                "",
                vec![ToolCallRequest {
                    id: "t1".to_string(),
                    name: "web_search".to_string(),
                    arguments: json!({"query": "cats"}),
                }],
            ),
            ChatMessage::tool("t1", "{\"ok\":true}"),
        ];
        let mapped = OpenAiChat::request_messages(&messages, "");
        assert_eq!(mapped.len(), 2);
        match &mapped[0] {
            ChatCompletionRequestMessage::Assistant(a) => {
                let calls = a.tool_calls.as_ref().unwrap();
                match &calls[0] {
                    ChatCompletionMessageToolCalls::Function(c) => {
                        assert_eq!(c.id, "t1");
                        assert_eq!(c.function.name, "web_search");
                    }
                    other => panic!("expected function tool call, got {other:?}"),
                }
            }
            other => panic!("expected assistant, got {other:?}"),
        }
        assert!(matches!(mapped[1], ChatCompletionRequestMessage::Tool(_)));
    }

    #[test]
    fn empty_tool_catalog_sends_no_tools() {
        assert!(OpenAiChat::request_tools(&[]).is_none());
        let tools = vec![ToolDefinition {
            name: "run_command".to_string(),
            description: "run a shell command".to_string(),
            parameters: json!({"type": "object"}),
        }];
        let mapped = OpenAiChat::request_tools(&tools).unwrap();
        match &mapped[0] {
            ChatCompletionTools::Function(t) => assert_eq!(t.function.name, "run_command"),
            other => panic!("expected function tool, got {other:?}"),
        }
    }

    #[tokio::test]
    #[ignore = "Requires OPENAI_API_KEY"]
    async fn chats_against_live_api() {
        let key = std::env::var("OPENAI_API_KEY").expect("OPENAI_API_KEY must be set");
        let llm = OpenAiChat::new(&key, "gpt-4o-mini", 0.0, 64, Duration::from_secs(60));
        let resp = llm
            .chat(&[ChatMessage::user("say hello")], "", &[])
            .await
            .unwrap();
        assert!(!resp.content.is_empty());
        assert!(resp.usage.total_tokens > 0);
    }
}
