//! Context builder: turns a session's log history, relevant memories, and
//! the registry state into one LLM call's inputs.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use tracing::warn;
use uuid::Uuid;

use crate::llm::ChatMessage;
use crate::memory::MemoryManager;
use crate::skills::{SkillRegistry, ToolDefinition};
use crate::stream::{LogStore, StreamError};
use crate::types::{MessageRecord, MessageType};

/// Everything one LLM call needs.
pub struct BuiltContext {
    pub system_prompt: String,
    pub messages: Vec<ChatMessage>,
    pub tools: Vec<ToolDefinition>,
}

pub struct ContextBuilder {
    logs: Arc<dyn LogStore>,
    memory: Arc<MemoryManager>,
    registry: Arc<SkillRegistry>,
    agent_name: String,
    instructions: Option<String>,
    skill_index: Vec<(String, String)>,
    history_limit: usize,
    memory_limit: usize,
    memory_enabled: bool,
}

impl ContextBuilder {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        logs: Arc<dyn LogStore>,
        memory: Arc<MemoryManager>,
        registry: Arc<SkillRegistry>,
        agent_name: impl Into<String>,
        instructions: Option<String>,
        skill_index: Vec<(String, String)>,
        history_limit: usize,
        memory_limit: usize,
        memory_enabled: bool,
    ) -> Self {
        Self {
            logs,
            memory,
            registry,
            agent_name: agent_name.into(),
            instructions,
            skill_index,
            history_limit,
            memory_limit,
            memory_enabled,
        }
    }

    /// Whether memory retrieval will actually run for a non-empty message.
    pub fn memory_active(&self) -> bool {
        self.memory_enabled && self.memory.is_available()
    }

    /// Builds the context for one turn. `exclude_id` is the triggering row,
    /// which is re-appended as the live user message rather than replayed
    /// from history.
    pub async fn build(
        &self,
        session_id: &str,
        user_message: &str,
        user_id: &str,
        channel: &str,
        exclude_id: Uuid,
    ) -> Result<BuiltContext, StreamError> {
        let history = self.logs.recent_messages(session_id, self.history_limit).await?;
        let mut messages: Vec<ChatMessage> = history
            .iter()
            .filter(|m| m.id != exclude_id)
            .filter_map(history_message)
            .collect();

        let memory_section = if self.memory_active() && !user_message.is_empty() {
            match self
                .memory
                .search(user_message, self.memory_limit, 0.0, None, None)
                .await
            {
                Ok(hits) if !hits.is_empty() => Some(format_memories(&hits)),
                Ok(_) => None,
                Err(e) => {
                    // Retrieval failures degrade to a memory-less prompt.
                    warn!(error = %e, "memory retrieval failed");
                    None
                }
            }
        } else {
            None
        };

        let system_prompt = self.system_prompt(session_id, user_id, channel, memory_section);
        messages.push(ChatMessage::user(user_message));

        Ok(BuiltContext {
            system_prompt,
            messages,
            tools: self.registry.definitions(),
        })
    }

    fn system_prompt(
        &self,
        session_id: &str,
        user_id: &str,
        channel: &str,
        memory_section: Option<String>,
    ) -> String {
        let mut prompt = format!(
            "You are {}, a conversational assistant that can call tools.\n\
             Current time (UTC): {}\n\
             User: {}\n\
             Session: {}\n\
             Channel: {}\n",
            self.agent_name,
            Utc::now().format("%Y-%m-%d %H:%M:%S"),
            if user_id.is_empty() { "unknown" } else { user_id },
            session_id,
            if channel.is_empty() { "unknown" } else { channel },
        );

        let tools = self.registry.definitions();
        if !tools.is_empty() {
            prompt.push_str("\nAvailable tools:\n");
            for tool in &tools {
                prompt.push_str(&format!("- {}: {}\n", tool.name, tool.description));
            }
        }

        if let Some(memories) = memory_section {
            prompt.push('\n');
            prompt.push_str(&memories);
        }

        if !self.skill_index.is_empty() {
            prompt.push_str(
                "\nAvailable skills (use load_skill to read their instructions):\n",
            );
            for (name, description) in &self.skill_index {
                prompt.push_str(&format!("- {name}: {description}\n"));
            }
        }

        if let Some(instructions) = &self.instructions {
            prompt.push('\n');
            prompt.push_str(instructions);
            prompt.push('\n');
        }

        prompt
    }
}

/// Maps one history row to an LLM message. Tool activity from past turns is
/// folded into plain text; the live turn carries structured tool calls
/// in memory instead.
fn history_message(record: &MessageRecord) -> Option<ChatMessage> {
    match record.message_type {
        MessageType::UserInput => Some(ChatMessage::user(record.text().unwrap_or_default())),
        MessageType::AgentResponse => {
            Some(ChatMessage::assistant(record.text().unwrap_or_default()))
        }
        MessageType::ToolCall => {
            let content = record.content_json();
            let name = content["tool_name"].as_str().unwrap_or("?");
            let summary = content["arguments_summary"].as_str().unwrap_or("");
            Some(ChatMessage::assistant(format!(
                "[called tool {name}({summary})]"
            )))
        }
        MessageType::ToolResult => {
            let content = record.content_json();
            let name = content["tool_name"].as_str().unwrap_or("?");
            Some(ChatMessage::user(format!(
                "[tool {name} returned: {}]",
                content["output"]
            )))
        }
        _ => None,
    }
}

/// Bullet list of retrieved memories grouped by type.
fn format_memories(hits: &[crate::memory::MemorySearchHit]) -> String {
    let mut grouped: BTreeMap<&str, Vec<&crate::memory::MemorySearchHit>> = BTreeMap::new();
    for hit in hits {
        grouped
            .entry(hit.record.memory_type.as_str())
            .or_default()
            .push(hit);
    }
    let mut out = String::from("Relevant memories:\n");
    for (memory_type, group) in grouped {
        out.push_str(&format!("[{memory_type}]\n"));
        for hit in group {
            out.push_str(&format!("- {}\n", hit.record.content));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::MockEmbedding;
    use crate::stream::InMemoryLogs;
    use crate::types::{channel_target, MemoryCategory, MemoryType, TARGET_AGENT};
    use serde_json::json;

    fn builder(logs: Arc<InMemoryLogs>, memory_enabled: bool) -> ContextBuilder {
        let memory = Arc::new(MemoryManager::new(
            Arc::clone(&logs) as Arc<dyn LogStore>,
            memory_enabled.then(|| {
                Arc::new(MockEmbedding::new(8)) as Arc<dyn crate::embedding::EmbeddingProvider>
            }),
            0.95,
            None,
        ));
        let registry = Arc::new(SkillRegistry::new());
        ContextBuilder::new(
            logs,
            memory,
            registry,
            "pulsebot",
            Some("Be brief.".to_string()),
            vec![("timeplus-sql-guide".to_string(), "Streaming SQL.".to_string())],
            20,
            5,
            memory_enabled,
        )
    }

    async fn seed_history(logs: &InMemoryLogs) -> MessageRecord {
        let mut older = MessageRecord::new(
            "web",
            TARGET_AGENT,
            "s1",
            MessageType::UserInput,
            &json!({"text": "earlier question"}),
        );
        older.timestamp = Utc::now() - chrono::Duration::seconds(10);
        logs.append_message(&older).await.unwrap();

        let mut reply = MessageRecord::new(
            "pulsebot",
            channel_target("web"),
            "s1",
            MessageType::AgentResponse,
            &json!({"text": "earlier answer"}),
        );
        reply.timestamp = Utc::now() - chrono::Duration::seconds(9);
        logs.append_message(&reply).await.unwrap();

        let trigger = MessageRecord::new(
            "web",
            TARGET_AGENT,
            "s1",
            MessageType::UserInput,
            &json!({"text": "new question"}),
        );
        logs.append_message(&trigger).await.unwrap();
        trigger
    }

    #[tokio::test]
    async fn history_replays_without_duplicating_the_trigger() {
        let logs = Arc::new(InMemoryLogs::new());
        let trigger = seed_history(&logs).await;
        let ctx = builder(Arc::clone(&logs), false)
            .build("s1", "new question", "u1", "web", trigger.id)
            .await
            .unwrap();

        assert_eq!(ctx.messages.len(), 3);
        assert_eq!(ctx.messages[0].content, "earlier question");
        assert_eq!(ctx.messages[1].content, "earlier answer");
        assert_eq!(ctx.messages[2].content, "new question");
    }

    #[tokio::test]
    async fn system_prompt_names_identity_session_and_skills() {
        let logs = Arc::new(InMemoryLogs::new());
        let trigger = seed_history(&logs).await;
        let ctx = builder(logs, false)
            .build("s1", "new question", "u1", "web", trigger.id)
            .await
            .unwrap();

        assert!(ctx.system_prompt.contains("You are pulsebot"));
        assert!(ctx.system_prompt.contains("Session: s1"));
        assert!(ctx.system_prompt.contains("User: u1"));
        assert!(ctx.system_prompt.contains("Channel: web"));
        assert!(ctx.system_prompt.contains("timeplus-sql-guide"));
        assert!(ctx.system_prompt.contains("Be brief."));
    }

    #[tokio::test]
    async fn memory_bullets_appear_when_enabled() {
        let logs = Arc::new(InMemoryLogs::new());
        let trigger = seed_history(&logs).await;
        let builder = builder(Arc::clone(&logs), true);
        // Seed one memory via the builder's own manager path.
        let memory = MemoryManager::new(
            Arc::clone(&logs) as Arc<dyn LogStore>,
            Some(Arc::new(MockEmbedding::new(8))),
            0.95,
            None,
        );
        memory
            .store(
                "User prefers espresso",
                MemoryType::Preference,
                MemoryCategory::UserInfo,
                0.9,
                "s1",
                false,
            )
            .await
            .unwrap();

        let ctx = builder
            .build("s1", "coffee?", "u1", "web", trigger.id)
            .await
            .unwrap();
        assert!(ctx.system_prompt.contains("Relevant memories:"));
        assert!(ctx.system_prompt.contains("[preference]"));
        assert!(ctx.system_prompt.contains("User prefers espresso"));
    }

    #[tokio::test]
    async fn tool_history_folds_to_text() {
        let logs = Arc::new(InMemoryLogs::new());
        let mut call = MessageRecord::new(
            "pulsebot",
            channel_target("web"),
            "s1",
            MessageType::ToolCall,
            &json!({"tool_name": "web_search", "arguments_summary": "query=cats", "status": "started"}),
        );
        call.timestamp = Utc::now() - chrono::Duration::seconds(5);
        logs.append_message(&call).await.unwrap();

        let trigger = MessageRecord::new(
            "web",
            TARGET_AGENT,
            "s1",
            MessageType::UserInput,
            &json!({"text": "and now?"}),
        );
        logs.append_message(&trigger).await.unwrap();

        let ctx = builder(logs, false)
            .build("s1", "and now?", "u1", "web", trigger.id)
            .await
            .unwrap();
        assert!(ctx.messages[0]
            .content
            .contains("[called tool web_search(query=cats)]"));
    }
}
