//! Ollama chat backend (`/api/chat`, non-streaming).
//!
//! Ollama does not assign tool-call ids; this client synthesizes stable
//! per-response ids so the rest of the runtime can correlate results.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::skills::ToolDefinition;

use super::{ChatMessage, ChatResponse, ChatRole, LlmError, LlmProvider, LlmUsage, ToolCallRequest};

pub struct OllamaChat {
    http: reqwest::Client,
    host: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
    timeout: Duration,
}

#[derive(Deserialize)]
struct ApiResponse {
    message: ApiMessage,
    #[serde(default)]
    prompt_eval_count: u32,
    #[serde(default)]
    eval_count: u32,
}

#[derive(Deserialize)]
struct ApiMessage {
    #[serde(default)]
    content: String,
    #[serde(default)]
    tool_calls: Vec<ApiToolCall>,
}

#[derive(Deserialize)]
struct ApiToolCall {
    function: ApiFunction,
}

#[derive(Deserialize)]
struct ApiFunction {
    name: String,
    #[serde(default)]
    arguments: Value,
}

impl OllamaChat {
    pub fn new(
        host: impl Into<String>,
        model: impl Into<String>,
        temperature: f32,
        max_tokens: u32,
        timeout: Duration,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            host: host.into().trim_end_matches('/').to_string(),
            model: model.into(),
            temperature,
            max_tokens,
            timeout,
        }
    }

    fn request_body(
        &self,
        messages: &[ChatMessage],
        system: &str,
        tools: &[ToolDefinition],
    ) -> Value {
        let mut wire: Vec<Value> = Vec::with_capacity(messages.len() + 1);
        if !system.is_empty() {
            wire.push(json!({"role": "system", "content": system}));
        }
        for m in messages {
            let role = match m.role {
                ChatRole::System => "system",
                ChatRole::User => "user",
                ChatRole::Assistant => "assistant",
                ChatRole::Tool => "tool",
            };
            let mut msg = json!({"role": role, "content": m.content});
            if !m.tool_calls.is_empty() {
                msg["tool_calls"] = Value::Array(
                    m.tool_calls
                        .iter()
                        .map(|c| {
                            json!({"function": {"name": c.name, "arguments": c.arguments}})
                        })
                        .collect(),
                );
            }
            wire.push(msg);
        }

        let mut body = json!({
            "model": self.model,
            "messages": wire,
            "stream": false,
            "options": {
                "temperature": self.temperature,
                "num_predict": self.max_tokens,
            },
        });
        if !tools.is_empty() {
            body["tools"] = Value::Array(
                tools
                    .iter()
                    .map(|t| {
                        json!({
                            "type": "function",
                            "function": {
                                "name": t.name,
                                "description": t.description,
                                "parameters": t.parameters,
                            },
                        })
                    })
                    .collect(),
            );
        }
        body
    }
}

#[async_trait]
impl LlmProvider for OllamaChat {
    async fn chat(
        &self,
        messages: &[ChatMessage],
        system: &str,
        tools: &[ToolDefinition],
    ) -> Result<ChatResponse, LlmError> {
        let url = format!("{}/api/chat", self.host);
        let body = self.request_body(messages, system, tools);

        let response = tokio::time::timeout(self.timeout, async {
            let resp = self
                .http
                .post(&url)
                .json(&body)
                .send()
                .await
                .map_err(|e| LlmError::Api(e.to_string()))?;
            if resp.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
                return Err(LlmError::RateLimited);
            }
            resp.error_for_status()
                .map_err(|e| LlmError::Api(e.to_string()))?
                .json::<ApiResponse>()
                .await
                .map_err(|e| LlmError::Decode(e.to_string()))
        })
        .await
        .map_err(|_| LlmError::Timeout)??;

        let tool_calls = response
            .message
            .tool_calls
            .into_iter()
            .enumerate()
            .map(|(i, c)| ToolCallRequest {
                id: format!("call_{i}"),
                name: c.function.name,
                arguments: c.function.arguments,
            })
            .collect();

        Ok(ChatResponse {
            content: response.message.content,
            tool_calls,
            usage: LlmUsage::new(response.prompt_eval_count, response.eval_count),
        })
    }

    fn provider_name(&self) -> &str {
        "ollama"
    }

    fn model(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn body_carries_system_tools_and_options() {
        let llm = OllamaChat::new(
            "http://localhost:11434/",
            "llama3.2",
            0.7,
            512,
            Duration::from_secs(30),
        );
        let tools = vec![ToolDefinition {
            name: "web_search".to_string(),
            description: "search".to_string(),
            parameters: json!({"type": "object"}),
        }];
        let body = llm.request_body(&[ChatMessage::user("hi")], "sys", &tools);
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "hi");
        assert_eq!(body["stream"], false);
        assert_eq!(body["options"]["num_predict"], 512);
        assert_eq!(body["tools"][0]["function"]["name"], "web_search");
    }

    #[test]
    fn response_parses_tool_calls_with_synthesized_ids() {
        let raw = json!({
            "message": {
                "content": "",
                "tool_calls": [
                    {"function": {"name": "web_search", "arguments": {"query": "cats", "count": 3}}}
                ]
            },
            "prompt_eval_count": 12,
            "eval_count": 4
        });
        let parsed: ApiResponse = serde_json::from_value(raw).unwrap();
        assert_eq!(parsed.message.tool_calls[0].function.name, "web_search");
        assert_eq!(parsed.prompt_eval_count, 12);
    }

    #[tokio::test]
    #[ignore = "Requires a local Ollama instance"]
    async fn chats_against_local_instance() {
        let llm = OllamaChat::new(
            "http://localhost:11434",
            "llama3.2",
            0.0,
            64,
            Duration::from_secs(60),
        );
        let resp = llm
            .chat(&[ChatMessage::user("say hello")], "", &[])
            .await
            .unwrap();
        assert!(!resp.content.is_empty());
    }
}
