//! Observability writer: LLM-log, tool-log, and event appends.
//!
//! Best-effort by contract: a failed observability write degrades to a
//! `tracing` warning and never fails the turn it describes.

use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::warn;
use uuid::Uuid;

use crate::llm::LlmUsage;
use crate::stream::LogStore;
use crate::types::{EventRecord, LlmCallRecord, LlmCallStatus, Severity, ToolCallStatus, ToolLogRecord};

/// Preview bounds from the log schema.
pub const MESSAGE_PREVIEW_MAX: usize = 200;
pub const RESULT_PREVIEW_MAX: usize = 500;

/// Inputs for one LLM-log row.
pub struct LlmCallParts<'a> {
    pub session_id: &'a str,
    pub model: &'a str,
    pub provider: &'a str,
    pub usage: LlmUsage,
    pub latency_ms: u64,
    pub time_to_first_token_ms: Option<u64>,
    pub system_prompt: &'a str,
    pub user_message: &'a str,
    pub assistant_response: &'a str,
    pub tools_called: Vec<String>,
    pub status: LlmCallStatus,
    pub error_message: Option<String>,
}

/// Inputs for one tool-log row.
pub struct ToolCallParts<'a> {
    pub session_id: &'a str,
    pub llm_request_id: &'a str,
    pub tool_name: &'a str,
    pub skill_name: &'a str,
    pub arguments: &'a Value,
    pub status: ToolCallStatus,
    pub result_preview: String,
    pub error_message: Option<String>,
    pub duration_ms: u64,
}

pub struct ObservabilityWriter {
    logs: Arc<dyn LogStore>,
    source: String,
}

impl ObservabilityWriter {
    pub fn new(logs: Arc<dyn LogStore>, source: impl Into<String>) -> Self {
        Self {
            logs,
            source: source.into(),
        }
    }

    /// Appends one LLM-log row and returns its id, which tool-log rows
    /// reference as `llm_request_id`. The id is assigned even when the
    /// append fails, so correlation survives degraded observability.
    pub async fn record_llm_call(&self, parts: LlmCallParts<'_>) -> Uuid {
        let record = LlmCallRecord {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            session_id: parts.session_id.to_string(),
            model: parts.model.to_string(),
            provider: parts.provider.to_string(),
            input_tokens: parts.usage.input_tokens,
            output_tokens: parts.usage.output_tokens,
            total_tokens: parts.usage.input_tokens + parts.usage.output_tokens,
            estimated_cost: estimate_cost(parts.model, &parts.usage),
            latency_ms: parts.latency_ms,
            time_to_first_token_ms: parts.time_to_first_token_ms,
            system_prompt_hash: system_prompt_hash(parts.system_prompt),
            user_message_preview: truncate_preview(parts.user_message, MESSAGE_PREVIEW_MAX),
            assistant_response_preview: truncate_preview(
                parts.assistant_response,
                MESSAGE_PREVIEW_MAX,
            ),
            tool_call_count: parts.tools_called.len() as u32,
            tools_called: parts.tools_called,
            status: parts.status,
            error_message: parts.error_message,
        };
        let id = record.id;
        if let Err(e) = self.logs.append_llm_call(&record).await {
            warn!(error = %e, "llm-log write failed, dropping record");
        }
        id
    }

    pub async fn record_tool_call(&self, parts: ToolCallParts<'_>) {
        let record = ToolLogRecord {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            session_id: parts.session_id.to_string(),
            llm_request_id: parts.llm_request_id.to_string(),
            tool_name: parts.tool_name.to_string(),
            skill_name: parts.skill_name.to_string(),
            arguments: parts.arguments.to_string(),
            status: parts.status,
            result_preview: truncate_preview(&parts.result_preview, RESULT_PREVIEW_MAX),
            error_message: parts.error_message,
            duration_ms: parts.duration_ms,
        };
        if let Err(e) = self.logs.append_tool_log(&record).await {
            warn!(error = %e, "tool-log write failed, dropping record");
        }
    }

    pub async fn record_event(
        &self,
        event_type: &str,
        severity: Severity,
        payload: &Value,
        tags: Vec<String>,
    ) {
        let record = EventRecord::new(event_type, &self.source, severity, payload).with_tags(tags);
        if let Err(e) = self.logs.append_event(&record).await {
            warn!(error = %e, event_type, "event write failed, dropping record");
        }
    }
}

/// Hex SHA-256 of the exact prompt text.
pub fn system_prompt_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Char-boundary-safe prefix of at most `max` bytes.
pub fn truncate_preview(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    s[..end].to_string()
}

/// Dollars per call from a per-model price table (per 1M tokens). Unknown
/// models cost zero rather than guessing.
pub fn estimate_cost(model: &str, usage: &LlmUsage) -> f64 {
    let (input_per_m, output_per_m) = match model {
        m if m.starts_with("gpt-4o-mini") => (0.15, 0.60),
        m if m.starts_with("gpt-4o") => (2.50, 10.00),
        m if m.starts_with("gpt-4.1-mini") => (0.40, 1.60),
        m if m.starts_with("gpt-4.1") => (2.00, 8.00),
        _ => (0.0, 0.0),
    };
    (usage.input_tokens as f64 * input_per_m + usage.output_tokens as f64 * output_per_m) / 1e6
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::InMemoryLogs;

    #[test]
    fn prompt_hash_is_stable_and_content_sensitive() {
        let a = system_prompt_hash("you are pulsebot");
        let b = system_prompt_hash("you are pulsebot");
        let c = system_prompt_hash("you are Pulsebot");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn previews_truncate_on_char_boundaries() {
        assert_eq!(truncate_preview("short", 200), "short");
        let long = "x".repeat(300);
        assert_eq!(truncate_preview(&long, MESSAGE_PREVIEW_MAX).len(), 200);
        // Multi-byte char straddling the limit is dropped, not split.
        let tricky = format!("{}é", "a".repeat(199));
        let preview = truncate_preview(&tricky, 200);
        assert_eq!(preview.len(), 199);
    }

    #[test]
    fn cost_is_nonnegative_and_zero_for_unknown_models() {
        let usage = LlmUsage::new(1000, 500);
        assert!(estimate_cost("gpt-4o-mini", &usage) > 0.0);
        assert_eq!(estimate_cost("entirely-unknown", &usage), 0.0);
        assert!(estimate_cost("gpt-4o", &LlmUsage::default()) >= 0.0);
    }

    #[tokio::test]
    async fn llm_record_totals_tokens() {
        let logs = Arc::new(InMemoryLogs::new());
        let writer = ObservabilityWriter::new(Arc::clone(&logs) as Arc<dyn LogStore>, "agent-loop");
        let id = writer
            .record_llm_call(LlmCallParts {
                session_id: "s1",
                model: "gpt-4o-mini",
                provider: "openai",
                usage: LlmUsage::new(5, 2),
                latency_ms: 42,
                time_to_first_token_ms: None,
                system_prompt: "sys",
                user_message: "hello",
                assistant_response: "hi there",
                tools_called: vec!["web_search".to_string()],
                status: LlmCallStatus::Success,
                error_message: None,
            })
            .await;

        let rows = logs.llm_calls();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, id);
        assert_eq!(rows[0].total_tokens, 7);
        assert_eq!(rows[0].tool_call_count, 1);
        assert_eq!(rows[0].tools_called, vec!["web_search"]);
        assert!(rows[0].estimated_cost >= 0.0);
    }
}
