//! Scripted provider for tests and dry runs.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::skills::ToolDefinition;

use super::{ChatMessage, ChatResponse, LlmError, LlmProvider, LlmUsage, ToolCallRequest};

/// Returns scripted responses in order, then repeats the fallback.
///
/// With no script and no fallback override, every call answers `"ok"` with
/// no tool calls.
pub struct MockLlm {
    script: Mutex<VecDeque<Result<ChatResponse, LlmError>>>,
    fallback: ChatResponse,
    calls: AtomicUsize,
}

impl Default for MockLlm {
    fn default() -> Self {
        Self::new()
    }
}

impl MockLlm {
    pub fn new() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback: ChatResponse {
                content: "ok".to_string(),
                tool_calls: Vec::new(),
                usage: LlmUsage::new(1, 1),
            },
            calls: AtomicUsize::new(0),
        }
    }

    /// Queues responses returned before the fallback kicks in.
    pub fn with_responses(self, responses: Vec<Result<ChatResponse, LlmError>>) -> Self {
        *self.script.lock().unwrap() = responses.into();
        self
    }

    /// Changes the fallback returned once the script is exhausted.
    pub fn with_fallback(mut self, fallback: ChatResponse) -> Self {
        self.fallback = fallback;
        self
    }

    /// A fallback that always requests the same tool call; drives
    /// iteration-cap behavior.
    pub fn always_calling(tool_name: &str, arguments: serde_json::Value) -> Self {
        Self::new().with_fallback(ChatResponse {
            content: String::new(),
            tool_calls: vec![ToolCallRequest {
                id: "call_loop".to_string(),
                name: tool_name.to_string(),
                arguments,
            }],
            usage: LlmUsage::new(10, 5),
        })
    }

    /// How many chat calls this mock has served.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LlmProvider for MockLlm {
    async fn chat(
        &self,
        _messages: &[ChatMessage],
        _system: &str,
        _tools: &[ToolDefinition],
    ) -> Result<ChatResponse, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.script.lock().unwrap().pop_front() {
            Some(scripted) => scripted,
            None => Ok(self.fallback.clone()),
        }
    }

    fn provider_name(&self) -> &str {
        "mock"
    }

    fn model(&self) -> &str {
        "mock-model"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn script_runs_then_fallback_repeats() {
        let llm = MockLlm::new().with_responses(vec![
            Ok(ChatResponse {
                content: "first".to_string(),
                tool_calls: Vec::new(),
                usage: LlmUsage::new(5, 2),
            }),
            Err(LlmError::Timeout),
        ]);
        assert_eq!(llm.chat(&[], "", &[]).await.unwrap().content, "first");
        assert!(matches!(
            llm.chat(&[], "", &[]).await,
            Err(LlmError::Timeout)
        ));
        assert_eq!(llm.chat(&[], "", &[]).await.unwrap().content, "ok");
        assert_eq!(llm.call_count(), 3);
    }

    #[tokio::test]
    async fn always_calling_never_converges() {
        let llm = MockLlm::always_calling("web_search", json!({"query": "x", "count": 1}));
        for _ in 0..3 {
            let resp = llm.chat(&[], "", &[]).await.unwrap();
            assert_eq!(resp.tool_calls.len(), 1);
            assert_eq!(resp.tool_calls[0].name, "web_search");
        }
    }
}
