//! Record types for the five append-only logs.
//!
//! Every durable fact in the runtime is one of these rows: a conversation
//! message, an LLM call, a tool invocation, a memory, or a health event.
//! Enums serialize to the snake_case strings used on the wire; timestamps are
//! millisecond UTC and accept both RFC 3339 and the streaming DB's
//! `YYYY-MM-DD hh:mm:ss.SSS` rendering.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Target tag for rows consumed by the agent loop.
pub const TARGET_AGENT: &str = "agent";

/// Target tag for rows every channel should see.
pub const TARGET_BROADCAST: &str = "broadcast";

/// Builds the target tag a channel subscribes to.
pub fn channel_target(channel: &str) -> String {
    format!("channel:{channel}")
}

/// Reply target for a message that arrived from `source`. Sources may already
/// carry the `channel:` prefix; bare names get it added.
pub fn reply_target(source: &str) -> String {
    match source.strip_prefix("channel:") {
        Some(name) => channel_target(name),
        None => channel_target(source),
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    UserInput,
    AgentResponse,
    ToolCall,
    ToolResult,
    Error,
    Heartbeat,
    ScheduledTask,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::UserInput => "user_input",
            MessageType::AgentResponse => "agent_response",
            MessageType::ToolCall => "tool_call",
            MessageType::ToolResult => "tool_result",
            MessageType::Error => "error",
            MessageType::Heartbeat => "heartbeat",
            MessageType::ScheduledTask => "scheduled_task",
        }
    }

    /// Types the context builder replays to the LLM.
    pub fn llm_visible(&self) -> bool {
        matches!(
            self,
            MessageType::UserInput
                | MessageType::AgentResponse
                | MessageType::ToolCall
                | MessageType::ToolResult
        )
    }

    /// Types that start a turn when tailed by the agent loop.
    pub fn turn_trigger(&self) -> bool {
        matches!(
            self,
            MessageType::UserInput | MessageType::Heartbeat | MessageType::ScheduledTask
        )
    }
}

/// One row of the `messages` stream.
///
/// `content` is a JSON document serialized to text; [`MessageRecord::content_json`]
/// and [`MessageRecord::text`] parse it back.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MessageRecord {
    pub id: Uuid,
    #[serde(with = "time_format")]
    pub timestamp: DateTime<Utc>,
    pub source: String,
    pub target: String,
    pub session_id: String,
    pub message_type: MessageType,
    pub content: String,
    #[serde(default)]
    pub user_id: String,
    #[serde(default = "empty_json_object")]
    pub channel_metadata: String,
    #[serde(default)]
    pub priority: i8,
}

impl MessageRecord {
    pub fn new(
        source: impl Into<String>,
        target: impl Into<String>,
        session_id: impl Into<String>,
        message_type: MessageType,
        content: &Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            source: source.into(),
            target: target.into(),
            session_id: session_id.into(),
            message_type,
            content: content.to_string(),
            user_id: String::new(),
            channel_metadata: empty_json_object(),
            priority: 0,
        }
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = user_id.into();
        self
    }

    pub fn with_priority(mut self, priority: i8) -> Self {
        self.priority = priority;
        self
    }

    /// Parses `content` back into JSON; malformed content becomes `Null`.
    pub fn content_json(&self) -> Value {
        serde_json::from_str(&self.content).unwrap_or(Value::Null)
    }

    /// The `text` field of the content payload, when present.
    pub fn text(&self) -> Option<String> {
        self.content_json()
            .get("text")
            .and_then(|v| v.as_str())
            .map(str::to_string)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmCallStatus {
    Success,
    Error,
    RateLimited,
    Timeout,
}

impl LlmCallStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LlmCallStatus::Success => "success",
            LlmCallStatus::Error => "error",
            LlmCallStatus::RateLimited => "rate_limited",
            LlmCallStatus::Timeout => "timeout",
        }
    }
}

/// One row of the `llm_calls` stream: one provider call, with usage, latency,
/// previews, and the tools the model asked for.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LlmCallRecord {
    pub id: Uuid,
    #[serde(with = "time_format")]
    pub timestamp: DateTime<Utc>,
    pub session_id: String,
    pub model: String,
    pub provider: String,
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub total_tokens: u32,
    pub estimated_cost: f64,
    pub latency_ms: u64,
    #[serde(default)]
    pub time_to_first_token_ms: Option<u64>,
    /// Stable digest of the exact system prompt text; for bucketing, not
    /// reconstruction.
    pub system_prompt_hash: String,
    pub user_message_preview: String,
    pub assistant_response_preview: String,
    #[serde(default)]
    pub tools_called: Vec<String>,
    pub tool_call_count: u32,
    pub status: LlmCallStatus,
    #[serde(default)]
    pub error_message: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCallStatus {
    Started,
    Success,
    Error,
}

impl ToolCallStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolCallStatus::Started => "started",
            ToolCallStatus::Success => "success",
            ToolCallStatus::Error => "error",
        }
    }
}

/// One row of the `tool_calls` stream: one tool invocation, keyed back to the
/// LLM call that requested it by `llm_request_id`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolLogRecord {
    pub id: Uuid,
    #[serde(with = "time_format")]
    pub timestamp: DateTime<Utc>,
    pub session_id: String,
    pub llm_request_id: String,
    pub tool_name: String,
    pub skill_name: String,
    pub arguments: String,
    pub status: ToolCallStatus,
    pub result_preview: String,
    #[serde(default)]
    pub error_message: Option<String>,
    pub duration_ms: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryType {
    Fact,
    Preference,
    ConversationSummary,
    SkillLearned,
}

impl MemoryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryType::Fact => "fact",
            MemoryType::Preference => "preference",
            MemoryType::ConversationSummary => "conversation_summary",
            MemoryType::SkillLearned => "skill_learned",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "fact" => Some(MemoryType::Fact),
            "preference" => Some(MemoryType::Preference),
            "conversation_summary" => Some(MemoryType::ConversationSummary),
            "skill_learned" => Some(MemoryType::SkillLearned),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryCategory {
    UserInfo,
    Project,
    Schedule,
    General,
}

impl MemoryCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryCategory::UserInfo => "user_info",
            MemoryCategory::Project => "project",
            MemoryCategory::Schedule => "schedule",
            MemoryCategory::General => "general",
        }
    }
}

/// One row of the `memories` stream. Logical deletion appends a later row
/// with the same `id` and `is_deleted = true`; reads always resolve
/// latest-per-id and filter deleted rows.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub id: Uuid,
    #[serde(with = "time_format")]
    pub timestamp: DateTime<Utc>,
    pub memory_type: MemoryType,
    pub category: MemoryCategory,
    pub content: String,
    pub source_session_id: String,
    #[serde(default)]
    pub embedding: Vec<f32>,
    pub importance: f32,
    #[serde(default)]
    pub is_deleted: bool,
}

impl MemoryRecord {
    /// The tombstone appended by `mark_deleted`: same id, later timestamp,
    /// `is_deleted = true`. Carries no content or embedding.
    pub fn tombstone(id: Uuid) -> Self {
        Self {
            id,
            timestamp: Utc::now(),
            memory_type: MemoryType::Fact,
            category: MemoryCategory::General,
            content: String::new(),
            source_session_id: String::new(),
            embedding: Vec::new(),
            importance: 0.0,
            is_deleted: true,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Debug,
    Info,
    Warning,
    Error,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Debug => "debug",
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
            Severity::Critical => "critical",
        }
    }
}

/// One row of the `events` stream: health and lifecycle signals.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EventRecord {
    pub id: Uuid,
    #[serde(with = "time_format")]
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub source: String,
    pub severity: Severity,
    /// JSON document serialized to text, like message content.
    #[serde(default = "empty_json_object")]
    pub payload: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl EventRecord {
    pub fn new(
        event_type: impl Into<String>,
        source: impl Into<String>,
        severity: Severity,
        payload: &Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            event_type: event_type.into(),
            source: source.into(),
            severity,
            payload: payload.to_string(),
            tags: Vec::new(),
        }
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    pub fn payload_json(&self) -> Value {
        serde_json::from_str(&self.payload).unwrap_or(Value::Null)
    }
}

fn empty_json_object() -> String {
    "{}".to_string()
}

/// Timestamp (de)serialization: emits RFC 3339 with millisecond precision,
/// accepts that or the streaming DB's `YYYY-MM-DD hh:mm:ss.SSS` (UTC).
pub mod time_format {
    use chrono::{DateTime, NaiveDateTime, Utc};
    use serde::{self, Deserialize, Deserializer, Serializer};

    const DB_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

    pub fn serialize<S>(ts: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&ts.to_rfc3339_opts(chrono::SecondsFormat::Millis, true))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        if let Ok(ts) = DateTime::parse_from_rfc3339(&raw) {
            return Ok(ts.with_timezone(&Utc));
        }
        NaiveDateTime::parse_from_str(&raw, DB_FORMAT)
            .map(|naive| naive.and_utc())
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn message_content_round_trips_as_text() {
        let msg = MessageRecord::new(
            "web",
            TARGET_AGENT,
            "s1",
            MessageType::UserInput,
            &json!({"text": "hello"}),
        );
        assert_eq!(msg.text().as_deref(), Some("hello"));
        assert_eq!(msg.content_json()["text"], "hello");
    }

    #[test]
    fn malformed_content_is_null_not_panic() {
        let mut msg = MessageRecord::new(
            "web",
            TARGET_AGENT,
            "s1",
            MessageType::UserInput,
            &json!({}),
        );
        msg.content = "not json".to_string();
        assert_eq!(msg.content_json(), Value::Null);
        assert_eq!(msg.text(), None);
    }

    #[test]
    fn reply_target_handles_bare_and_prefixed_sources() {
        assert_eq!(reply_target("web"), "channel:web");
        assert_eq!(reply_target("channel:web"), "channel:web");
    }

    #[test]
    fn enums_serialize_to_wire_strings() {
        assert_eq!(
            serde_json::to_value(MessageType::ScheduledTask).unwrap(),
            json!("scheduled_task")
        );
        assert_eq!(
            serde_json::to_value(LlmCallStatus::RateLimited).unwrap(),
            json!("rate_limited")
        );
        assert_eq!(
            serde_json::to_value(MemoryType::ConversationSummary).unwrap(),
            json!("conversation_summary")
        );
        assert_eq!(
            serde_json::to_value(Severity::Warning).unwrap(),
            json!("warning")
        );
    }

    #[test]
    fn timestamps_accept_db_rendering() {
        let raw = json!({
            "id": Uuid::new_v4(),
            "timestamp": "2026-08-01 09:30:00.123",
            "source": "web",
            "target": "agent",
            "session_id": "s1",
            "message_type": "user_input",
            "content": "{\"text\":\"hi\"}",
            "user_id": "u1",
            "channel_metadata": "{}",
            "priority": 0
        });
        let msg: MessageRecord = serde_json::from_value(raw).unwrap();
        assert_eq!(msg.timestamp.timestamp_subsec_millis(), 123);

        let rfc = serde_json::to_value(&msg).unwrap();
        let back: MessageRecord = serde_json::from_value(rfc).unwrap();
        assert_eq!(back.timestamp, msg.timestamp);
    }

    #[test]
    fn turn_trigger_excludes_tool_results() {
        assert!(MessageType::UserInput.turn_trigger());
        assert!(MessageType::Heartbeat.turn_trigger());
        assert!(MessageType::ScheduledTask.turn_trigger());
        assert!(!MessageType::ToolResult.turn_trigger());
        assert!(!MessageType::AgentResponse.turn_trigger());
    }

    #[test]
    fn tombstone_keeps_id_and_marks_deleted() {
        let id = Uuid::new_v4();
        let tomb = MemoryRecord::tombstone(id);
        assert_eq!(tomb.id, id);
        assert!(tomb.is_deleted);
        assert!(tomb.embedding.is_empty());
    }
}
