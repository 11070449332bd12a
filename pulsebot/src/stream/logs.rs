//! Typed access to the five logs.
//!
//! [`LogStore`] is the only surface the rest of the runtime uses; nothing
//! above this module concatenates SQL. [`ProtonLogs`] implements it against
//! the streaming DB; [`InMemoryLogs`](super::InMemoryLogs) implements it for
//! tests. Historical reads order by `(timestamp, id)` so reorderings within
//! one millisecond resolve deterministically.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::types::{
    EventRecord, LlmCallRecord, MemoryCategory, MemoryRecord, MemoryType, MessageRecord,
    MessageType, ToolLogRecord, TARGET_AGENT,
};

use super::client::retry_write;
use super::schema::{EVENTS, LLM_CALLS, MEMORIES, MESSAGES, TOOL_CALLS};
use super::{ProtonClient, SeekTo, StreamError, Tail};

/// How many attempts a log write gets before the error propagates.
const WRITE_ATTEMPTS: u32 = 3;

/// Cap on candidate rows pulled for in-process vector scoring.
const MEMORY_CANDIDATE_CAP: usize = 1024;

/// Filters for memory reads. `None` means "all".
#[derive(Clone, Debug)]
pub struct MemoryFilter {
    pub memory_types: Option<Vec<MemoryType>>,
    pub categories: Option<Vec<MemoryCategory>>,
    pub min_importance: f32,
    pub limit: usize,
}

impl Default for MemoryFilter {
    fn default() -> Self {
        Self {
            memory_types: None,
            categories: None,
            min_importance: 0.0,
            limit: MEMORY_CANDIDATE_CAP,
        }
    }
}

/// Typed operations over the five streams.
#[async_trait]
pub trait LogStore: Send + Sync {
    async fn append_message(&self, record: &MessageRecord) -> Result<(), StreamError>;
    async fn append_llm_call(&self, record: &LlmCallRecord) -> Result<(), StreamError>;
    async fn append_tool_log(&self, record: &ToolLogRecord) -> Result<(), StreamError>;
    async fn append_memory(&self, record: &MemoryRecord) -> Result<(), StreamError>;
    async fn append_event(&self, record: &EventRecord) -> Result<(), StreamError>;

    /// Last `limit` LLM-visible messages of a session, oldest first.
    async fn recent_messages(
        &self,
        session_id: &str,
        limit: usize,
    ) -> Result<Vec<MessageRecord>, StreamError>;

    /// Live, non-deleted memories matching `filter`, newest first.
    /// Latest-per-id resolution happens here so callers never see tombstoned
    /// or superseded rows.
    async fn memory_candidates(
        &self,
        filter: &MemoryFilter,
    ) -> Result<Vec<MemoryRecord>, StreamError>;

    async fn memories_by_session(
        &self,
        session_id: &str,
        limit: usize,
    ) -> Result<Vec<MemoryRecord>, StreamError>;

    /// Aggregate `estimated_cost` over the trailing hour of the LLM log.
    async fn hourly_llm_cost(&self) -> Result<f64, StreamError>;

    /// Tail of rows addressed to the agent (turn triggers and tool results).
    async fn tail_agent_messages(&self, seek: SeekTo) -> Result<Tail, StreamError>;

    /// Tail of rows addressed to one channel.
    async fn tail_channel_messages(&self, channel: &str, seek: SeekTo)
        -> Result<Tail, StreamError>;
}

/// [`LogStore`] over the streaming DB.
pub struct ProtonLogs {
    client: Arc<ProtonClient>,
}

impl ProtonLogs {
    pub fn new(client: Arc<ProtonClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl LogStore for ProtonLogs {
    async fn append_message(&self, record: &MessageRecord) -> Result<(), StreamError> {
        let sql = sql::insert_message(record);
        retry_write(WRITE_ATTEMPTS, || self.client.execute(&sql)).await
    }

    async fn append_llm_call(&self, record: &LlmCallRecord) -> Result<(), StreamError> {
        let sql = sql::insert_llm_call(record);
        retry_write(WRITE_ATTEMPTS, || self.client.execute(&sql)).await
    }

    async fn append_tool_log(&self, record: &ToolLogRecord) -> Result<(), StreamError> {
        let sql = sql::insert_tool_log(record);
        retry_write(WRITE_ATTEMPTS, || self.client.execute(&sql)).await
    }

    async fn append_memory(&self, record: &MemoryRecord) -> Result<(), StreamError> {
        let sql = sql::insert_memory(record);
        retry_write(WRITE_ATTEMPTS, || self.client.execute(&sql)).await
    }

    async fn append_event(&self, record: &EventRecord) -> Result<(), StreamError> {
        let sql = sql::insert_event(record);
        retry_write(WRITE_ATTEMPTS, || self.client.execute(&sql)).await
    }

    async fn recent_messages(
        &self,
        session_id: &str,
        limit: usize,
    ) -> Result<Vec<MessageRecord>, StreamError> {
        let rows = self
            .client
            .query(&sql::select_recent_messages(session_id, limit))
            .await?;
        let mut records = rows
            .into_iter()
            .map(|r| r.decode::<MessageRecord>())
            .collect::<Result<Vec<_>, _>>()?;
        // Query returns newest-first to apply the limit; callers want oldest-first.
        records.reverse();
        Ok(records)
    }

    async fn memory_candidates(
        &self,
        filter: &MemoryFilter,
    ) -> Result<Vec<MemoryRecord>, StreamError> {
        let rows = self.client.query(&sql::select_memories(filter)).await?;
        rows.into_iter().map(|r| r.decode()).collect()
    }

    async fn memories_by_session(
        &self,
        session_id: &str,
        limit: usize,
    ) -> Result<Vec<MemoryRecord>, StreamError> {
        let rows = self
            .client
            .query(&sql::select_memories_by_session(session_id, limit))
            .await?;
        rows.into_iter().map(|r| r.decode()).collect()
    }

    async fn hourly_llm_cost(&self) -> Result<f64, StreamError> {
        let rows = self.client.query(sql::SELECT_HOURLY_COST).await?;
        Ok(rows
            .first()
            .and_then(|r| r.get_f64("hourly_cost"))
            .unwrap_or(0.0))
    }

    async fn tail_agent_messages(&self, seek: SeekTo) -> Result<Tail, StreamError> {
        self.client.tail(&sql::tail_agent_messages(), seek).await
    }

    async fn tail_channel_messages(
        &self,
        channel: &str,
        seek: SeekTo,
    ) -> Result<Tail, StreamError> {
        self.client
            .tail(&sql::tail_channel_messages(channel), seek)
            .await
    }
}

/// SQL builders, kept as pure functions so the statements are testable
/// without a database.
pub(crate) mod sql {
    use super::*;

    pub const SELECT_HOURLY_COST: &str = "SELECT sum(estimated_cost) AS hourly_cost \
         FROM table(llm_calls) WHERE timestamp > now64(3) - INTERVAL 1 HOUR";

    pub fn quote(s: &str) -> String {
        format!("'{}'", s.replace('\\', "\\\\").replace('\'', "\\'"))
    }

    pub fn quote_opt(s: &Option<String>) -> String {
        match s {
            Some(v) => quote(v),
            None => "NULL".to_string(),
        }
    }

    pub fn string_array(items: &[String]) -> String {
        let quoted: Vec<String> = items.iter().map(|s| quote(s)).collect();
        format!("[{}]", quoted.join(","))
    }

    pub fn float_array(items: &[f32]) -> String {
        let rendered: Vec<String> = items.iter().map(|f| format!("{f:?}")).collect();
        format!("[{}]", rendered.join(","))
    }

    pub fn timestamp(ts: &DateTime<Utc>) -> String {
        format!("'{}'", ts.format("%Y-%m-%d %H:%M:%S%.3f"))
    }

    fn opt_u64(v: Option<u64>) -> String {
        match v {
            Some(n) => n.to_string(),
            None => "NULL".to_string(),
        }
    }

    pub fn insert_message(m: &MessageRecord) -> String {
        format!(
            "INSERT INTO {MESSAGES} (id, timestamp, source, target, session_id, message_type, \
             content, user_id, channel_metadata, priority) VALUES ({}, {}, {}, {}, {}, {}, {}, {}, {}, {})",
            quote(&m.id.to_string()),
            timestamp(&m.timestamp),
            quote(&m.source),
            quote(&m.target),
            quote(&m.session_id),
            quote(m.message_type.as_str()),
            quote(&m.content),
            quote(&m.user_id),
            quote(&m.channel_metadata),
            m.priority,
        )
    }

    pub fn insert_llm_call(r: &LlmCallRecord) -> String {
        format!(
            "INSERT INTO {LLM_CALLS} (id, timestamp, session_id, model, provider, input_tokens, \
             output_tokens, total_tokens, estimated_cost, latency_ms, time_to_first_token_ms, \
             system_prompt_hash, user_message_preview, assistant_response_preview, tools_called, \
             tool_call_count, status, error_message) VALUES ({}, {}, {}, {}, {}, {}, {}, {}, {}, \
             {}, {}, {}, {}, {}, {}, {}, {}, {})",
            quote(&r.id.to_string()),
            timestamp(&r.timestamp),
            quote(&r.session_id),
            quote(&r.model),
            quote(&r.provider),
            r.input_tokens,
            r.output_tokens,
            r.total_tokens,
            r.estimated_cost,
            r.latency_ms,
            opt_u64(r.time_to_first_token_ms),
            quote(&r.system_prompt_hash),
            quote(&r.user_message_preview),
            quote(&r.assistant_response_preview),
            string_array(&r.tools_called),
            r.tool_call_count,
            quote(r.status.as_str()),
            quote_opt(&r.error_message),
        )
    }

    pub fn insert_tool_log(r: &ToolLogRecord) -> String {
        format!(
            "INSERT INTO {TOOL_CALLS} (id, timestamp, session_id, llm_request_id, tool_name, \
             skill_name, arguments, status, result_preview, error_message, duration_ms) \
             VALUES ({}, {}, {}, {}, {}, {}, {}, {}, {}, {}, {})",
            quote(&r.id.to_string()),
            timestamp(&r.timestamp),
            quote(&r.session_id),
            quote(&r.llm_request_id),
            quote(&r.tool_name),
            quote(&r.skill_name),
            quote(&r.arguments),
            quote(r.status.as_str()),
            quote(&r.result_preview),
            quote_opt(&r.error_message),
            r.duration_ms,
        )
    }

    pub fn insert_memory(r: &MemoryRecord) -> String {
        format!(
            "INSERT INTO {MEMORIES} (id, timestamp, memory_type, category, content, \
             source_session_id, embedding, importance, is_deleted) \
             VALUES ({}, {}, {}, {}, {}, {}, {}, {}, {})",
            quote(&r.id.to_string()),
            timestamp(&r.timestamp),
            quote(r.memory_type.as_str()),
            quote(r.category.as_str()),
            quote(&r.content),
            quote(&r.source_session_id),
            float_array(&r.embedding),
            r.importance,
            r.is_deleted,
        )
    }

    pub fn insert_event(e: &EventRecord) -> String {
        format!(
            "INSERT INTO {EVENTS} (id, timestamp, event_type, source, severity, payload, tags) \
             VALUES ({}, {}, {}, {}, {}, {}, {})",
            quote(&e.id.to_string()),
            timestamp(&e.timestamp),
            quote(&e.event_type),
            quote(&e.source),
            quote(e.severity.as_str()),
            quote(&e.payload),
            string_array(&e.tags),
        )
    }

    pub fn select_recent_messages(session_id: &str, limit: usize) -> String {
        let visible: Vec<String> = [
            MessageType::UserInput,
            MessageType::AgentResponse,
            MessageType::ToolCall,
            MessageType::ToolResult,
        ]
        .iter()
        .map(|t| quote(t.as_str()))
        .collect();
        format!(
            "SELECT * FROM table({MESSAGES}) WHERE session_id = {} AND message_type IN ({}) \
             ORDER BY timestamp DESC, id DESC LIMIT {limit}",
            quote(session_id),
            visible.join(","),
        )
    }

    /// Latest-per-id resolution via a window, then the live-row filters.
    fn live_memories(extra_where: &str, limit: usize) -> String {
        format!(
            "SELECT id, timestamp, memory_type, category, content, source_session_id, embedding, \
             importance, is_deleted FROM (SELECT *, row_number() OVER (PARTITION BY id ORDER BY \
             timestamp DESC) AS rn FROM table({MEMORIES})) WHERE rn = 1 AND is_deleted = false\
             {extra_where} ORDER BY timestamp DESC, id LIMIT {limit}"
        )
    }

    pub fn select_memories(filter: &MemoryFilter) -> String {
        let mut extra = String::new();
        if filter.min_importance > 0.0 {
            extra.push_str(&format!(" AND importance >= {}", filter.min_importance));
        }
        if let Some(types) = &filter.memory_types {
            let quoted: Vec<String> = types.iter().map(|t| quote(t.as_str())).collect();
            extra.push_str(&format!(" AND memory_type IN ({})", quoted.join(",")));
        }
        if let Some(categories) = &filter.categories {
            let quoted: Vec<String> = categories.iter().map(|c| quote(c.as_str())).collect();
            extra.push_str(&format!(" AND category IN ({})", quoted.join(",")));
        }
        live_memories(&extra, filter.limit)
    }

    pub fn select_memories_by_session(session_id: &str, limit: usize) -> String {
        live_memories(
            &format!(" AND source_session_id = {}", quote(session_id)),
            limit,
        )
    }

    pub fn tail_agent_messages() -> String {
        let triggers: Vec<String> = [
            MessageType::UserInput,
            MessageType::ToolResult,
            MessageType::Heartbeat,
            MessageType::ScheduledTask,
        ]
        .iter()
        .map(|t| quote(t.as_str()))
        .collect();
        format!(
            "SELECT * FROM {MESSAGES} WHERE target = {} AND message_type IN ({})",
            quote(TARGET_AGENT),
            triggers.join(","),
        )
    }

    pub fn tail_channel_messages(channel: &str) -> String {
        format!(
            "SELECT * FROM {MESSAGES} WHERE target = {}",
            quote(&crate::types::channel_target(channel)),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::sql;
    use super::*;
    use serde_json::json;

    #[test]
    fn quote_escapes_quotes_and_backslashes() {
        assert_eq!(sql::quote("plain"), "'plain'");
        assert_eq!(sql::quote("it's"), "'it\\'s'");
        assert_eq!(sql::quote("a\\b"), "'a\\\\b'");
    }

    #[test]
    fn insert_message_carries_all_fields() {
        let m = MessageRecord::new(
            "web",
            TARGET_AGENT,
            "s1",
            MessageType::UserInput,
            &json!({"text": "hi"}),
        )
        .with_user("u1")
        .with_priority(1);
        let stmt = sql::insert_message(&m);
        assert!(stmt.starts_with("INSERT INTO messages"));
        assert!(stmt.contains("'user_input'"));
        assert!(stmt.contains(&m.id.to_string()));
        assert!(stmt.contains("'u1'"));
        assert!(stmt.ends_with(", 1)"));
    }

    #[test]
    fn recent_messages_orders_newest_first_with_tiebreak() {
        let stmt = sql::select_recent_messages("s1", 20);
        assert!(stmt.contains("ORDER BY timestamp DESC, id DESC LIMIT 20"));
        assert!(stmt.contains("'user_input'"));
        assert!(stmt.contains("'tool_result'"));
        assert!(!stmt.contains("'heartbeat'"));
    }

    #[test]
    fn memory_select_resolves_latest_per_id_and_filters_deleted() {
        let stmt = sql::select_memories(&MemoryFilter::default());
        assert!(stmt.contains("PARTITION BY id"));
        assert!(stmt.contains("rn = 1 AND is_deleted = false"));

        let filtered = sql::select_memories(&MemoryFilter {
            memory_types: Some(vec![MemoryType::Fact]),
            categories: Some(vec![MemoryCategory::UserInfo]),
            min_importance: 0.3,
            limit: 10,
        });
        assert!(filtered.contains("importance >= 0.3"));
        assert!(filtered.contains("memory_type IN ('fact')"));
        assert!(filtered.contains("category IN ('user_info')"));
        assert!(filtered.contains("LIMIT 10"));
    }

    #[test]
    fn agent_tail_selects_trigger_types_only() {
        let stmt = sql::tail_agent_messages();
        assert!(stmt.contains("target = 'agent'"));
        assert!(stmt.contains("'heartbeat'"));
        assert!(!stmt.contains("'agent_response'"));
        // Unbounded: reads the live stream, not the historical table.
        assert!(!stmt.contains("table("));
    }

    #[test]
    fn channel_tail_uses_channel_target() {
        assert!(sql::tail_channel_messages("web").contains("'channel:web'"));
    }

    #[test]
    fn float_array_renders_round_trippable() {
        assert_eq!(sql::float_array(&[0.5, 1.0]), "[0.5,1.0]");
        assert_eq!(sql::float_array(&[]), "[]");
    }
}
