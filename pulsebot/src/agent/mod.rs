//! The agent loop: tail triggers, run the bounded reason/act cycle, write
//! everything back to the logs.
//!
//! One long-lived task per agent identity. Turns for tailed rows run
//! sequentially, which is what makes per-session ordering hold with a
//! single agent instance. Tool calls within one iteration are dispatched
//! strictly in declaration order; a `tool_result` is on the log before the
//! LLM call that references it.

pub mod extract;

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::context::{BuiltContext, ContextBuilder};
use crate::error::AgentError;
use crate::llm::{ChatMessage, ChatResponse, LlmError, LlmProvider, LlmUsage};
use crate::memory::MemoryManager;
use crate::observe::{LlmCallParts, ObservabilityWriter, ToolCallParts};
use crate::skills::SkillRegistry;
use crate::stream::{LogStore, Row, SeekTo};
use crate::types::{
    reply_target, LlmCallStatus, MessageRecord, MessageType, Severity, ToolCallStatus,
};

use extract::{parse_extraction, EXTRACTION_PROMPT, EXTRACTION_WINDOW};

/// Reason/act iterations per turn before the loop gives up.
pub const MAX_ITERATIONS: usize = 10;

pub struct AgentLoop {
    logs: Arc<dyn LogStore>,
    llm: Arc<dyn LlmProvider>,
    registry: Arc<SkillRegistry>,
    memory: Arc<MemoryManager>,
    context: ContextBuilder,
    observe: ObservabilityWriter,
    agent_name: String,
    tool_timeout: Duration,
    memory_enabled: bool,
    shutdown: CancellationToken,
}

impl AgentLoop {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        logs: Arc<dyn LogStore>,
        llm: Arc<dyn LlmProvider>,
        registry: Arc<SkillRegistry>,
        memory: Arc<MemoryManager>,
        context: ContextBuilder,
        observe: ObservabilityWriter,
        agent_name: impl Into<String>,
        tool_timeout: Duration,
        memory_enabled: bool,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            logs,
            llm,
            registry,
            memory,
            context,
            observe,
            agent_name: agent_name.into(),
            tool_timeout,
            memory_enabled,
            shutdown,
        }
    }

    /// Tails the message log until shutdown. Transport loss reconnects the
    /// tail at `Latest` after a bounded backoff; the in-flight turn always
    /// finishes before the loop notices cancellation.
    pub async fn run(&self) {
        let mut backoff = Duration::from_millis(500);
        loop {
            if self.shutdown.is_cancelled() {
                return;
            }
            match self.logs.tail_agent_messages(SeekTo::Latest).await {
                Ok(mut tail) => {
                    info!(agent = %self.agent_name, "agent loop tailing messages");
                    backoff = Duration::from_millis(500);
                    loop {
                        tokio::select! {
                            _ = self.shutdown.cancelled() => return,
                            item = tail.next() => match item {
                                Some(Ok(row)) => self.handle_row(row).await,
                                Some(Err(e)) => {
                                    warn!(error = %e, "agent tail lost, reconnecting");
                                    self.observe
                                        .record_event(
                                            "stream_transport_error",
                                            Severity::Error,
                                            &json!({"error": e.to_string()}),
                                            vec!["agent_loop".to_string()],
                                        )
                                        .await;
                                    break;
                                }
                                None => break,
                            }
                        }
                    }
                }
                Err(e) => {
                    warn!(error = %e, "agent tail could not start");
                }
            }
            tokio::select! {
                _ = self.shutdown.cancelled() => return,
                _ = tokio::time::sleep(backoff) => {}
            }
            backoff = (backoff * 2).min(Duration::from_secs(30));
        }
    }

    async fn handle_row(&self, row: Row) {
        let trigger: MessageRecord = match row.decode() {
            Ok(record) => record,
            Err(e) => {
                debug!(error = %e, "undecodable row on agent tail, skipping");
                return;
            }
        };
        if !trigger.message_type.turn_trigger() {
            // Tool results are consumed inline within their own turn.
            debug!(id = %trigger.id, kind = trigger.message_type.as_str(), "non-trigger row ignored");
            return;
        }

        if let Err(e) = self.handle_turn(&trigger).await {
            error!(session = %trigger.session_id, error = %e, "turn failed");
            let message = MessageRecord::new(
                &self.agent_name,
                reply_target(&trigger.source),
                &trigger.session_id,
                MessageType::Error,
                &json!({"message": e.to_string()}),
            )
            .with_user(&trigger.user_id);
            if let Err(write_err) = self.logs.append_message(&message).await {
                warn!(error = %write_err, "could not surface turn error to channel");
            }
            self.observe
                .record_event(
                    "turn_error",
                    Severity::Error,
                    &json!({"session_id": trigger.session_id, "error": e.to_string()}),
                    vec!["agent_loop".to_string()],
                )
                .await;
        }
    }

    /// One turn: context, up to [`MAX_ITERATIONS`] reason/act iterations,
    /// final response or truncation notice.
    async fn handle_turn(&self, trigger: &MessageRecord) -> Result<(), AgentError> {
        let session_id = &trigger.session_id;
        let target = reply_target(&trigger.source);
        let user_text = trigger
            .text()
            .unwrap_or_else(|| default_trigger_text(trigger.message_type).to_string());
        debug!(session = %session_id, kind = trigger.message_type.as_str(), "turn started");

        let ctx = self
            .context
            .build(
                session_id,
                &user_text,
                &trigger.user_id,
                trigger.source.trim_start_matches("channel:"),
                trigger.id,
            )
            .await?;
        if self.memory_enabled && !self.memory.is_available() {
            self.observe
                .record_event(
                    "memory_unavailable",
                    Severity::Warning,
                    &json!({"session_id": session_id}),
                    vec!["memory".to_string()],
                )
                .await;
        }
        let mut messages = ctx.messages.clone();

        for _iteration in 0..MAX_ITERATIONS {
            let started = Instant::now();
            let outcome = self
                .llm
                .chat(&messages, &ctx.system_prompt, &ctx.tools)
                .await;
            let latency_ms = started.elapsed().as_millis() as u64;

            let response = match outcome {
                Ok(response) => response,
                Err(e) => {
                    self.record_failed_llm_call(session_id, &ctx, &user_text, latency_ms, &e)
                        .await;
                    return Err(AgentError::Llm(e));
                }
            };

            let tools_called: Vec<String> =
                response.tool_calls.iter().map(|c| c.name.clone()).collect();
            let llm_request_id = self
                .observe
                .record_llm_call(LlmCallParts {
                    session_id,
                    model: self.llm.model(),
                    provider: self.llm.provider_name(),
                    usage: response.usage,
                    latency_ms,
                    time_to_first_token_ms: None,
                    system_prompt: &ctx.system_prompt,
                    user_message: &user_text,
                    assistant_response: &response.content,
                    tools_called,
                    status: LlmCallStatus::Success,
                    error_message: None,
                })
                .await;

            if response.tool_calls.is_empty() {
                let message = MessageRecord::new(
                    &self.agent_name,
                    &target,
                    session_id,
                    MessageType::AgentResponse,
                    &json!({"text": response.content}),
                )
                .with_user(&trigger.user_id);
                self.logs.append_message(&message).await?;
                debug!(session = %session_id, "turn finished");
                self.extract_memories(session_id, &trigger.user_id).await;
                return Ok(());
            }

            messages.push(ChatMessage::assistant_with_tools(
                response.content.clone(),
                response.tool_calls.clone(),
            ));
            self.run_tool_calls(
                trigger,
                &target,
                &llm_request_id.to_string(),
                &response,
                &mut messages,
            )
            .await?;
        }

        // Iteration cap: tell the channel and flag the session.
        let message = MessageRecord::new(
            &self.agent_name,
            &target,
            session_id,
            MessageType::AgentResponse,
            &json!({"text": format!(
                "I stopped after {MAX_ITERATIONS} reasoning steps without reaching a final \
                 answer. Please rephrase or narrow the request."
            )}),
        )
        .with_user(&trigger.user_id);
        self.logs.append_message(&message).await?;
        self.observe
            .record_event(
                "iteration_cap_reached",
                Severity::Warning,
                &json!({"session_id": session_id, "iterations": MAX_ITERATIONS}),
                vec!["agent_loop".to_string()],
            )
            .await;
        Ok(())
    }

    /// Dispatches one iteration's tool calls sequentially, in declaration
    /// order, bracketing each with a status broadcast and a result message.
    async fn run_tool_calls(
        &self,
        trigger: &MessageRecord,
        target: &str,
        llm_request_id: &str,
        response: &ChatResponse,
        messages: &mut Vec<ChatMessage>,
    ) -> Result<(), AgentError> {
        let session_id = &trigger.session_id;
        for call in &response.tool_calls {
            let broadcast = MessageRecord::new(
                &self.agent_name,
                target,
                session_id,
                MessageType::ToolCall,
                &json!({
                    "tool_call_id": call.id,
                    "tool_name": call.name,
                    "arguments_summary": arguments_summary(&call.arguments),
                    "status": ToolCallStatus::Started.as_str(),
                }),
            )
            .with_user(&trigger.user_id);
            self.logs.append_message(&broadcast).await?;

            let started = Instant::now();
            let result = self
                .registry
                .dispatch(&call.name, &call.arguments, self.tool_timeout)
                .await;
            let duration_ms = started.elapsed().as_millis() as u64;
            let status = if result.success {
                ToolCallStatus::Success
            } else {
                ToolCallStatus::Error
            };

            self.observe
                .record_tool_call(ToolCallParts {
                    session_id,
                    llm_request_id,
                    tool_name: &call.name,
                    skill_name: &self.registry.skill_for(&call.name).unwrap_or_default(),
                    arguments: &call.arguments,
                    status,
                    result_preview: result.output.to_string(),
                    error_message: result.error.clone(),
                    duration_ms,
                })
                .await;

            let result_message = MessageRecord::new(
                &self.agent_name,
                target,
                session_id,
                MessageType::ToolResult,
                &json!({
                    "tool_call_id": call.id,
                    "tool_name": call.name,
                    "status": status.as_str(),
                    "success": result.success,
                    "output": result.output,
                    "error": result.error,
                    "duration_ms": duration_ms,
                }),
            )
            .with_user(&trigger.user_id);
            self.logs.append_message(&result_message).await?;

            let feedback = serde_json::to_string(&result)
                .unwrap_or_else(|_| "{\"success\":false}".to_string());
            messages.push(ChatMessage::tool(&call.id, feedback));
        }
        Ok(())
    }

    async fn record_failed_llm_call(
        &self,
        session_id: &str,
        ctx: &BuiltContext,
        user_text: &str,
        latency_ms: u64,
        error: &LlmError,
    ) {
        let status = match error {
            LlmError::Timeout => LlmCallStatus::Timeout,
            LlmError::RateLimited => LlmCallStatus::RateLimited,
            _ => LlmCallStatus::Error,
        };
        self.observe
            .record_llm_call(LlmCallParts {
                session_id,
                model: self.llm.model(),
                provider: self.llm.provider_name(),
                usage: LlmUsage::default(),
                latency_ms,
                time_to_first_token_ms: None,
                system_prompt: &ctx.system_prompt,
                user_message: user_text,
                assistant_response: "",
                tools_called: Vec::new(),
                status,
                error_message: Some(error.to_string()),
            })
            .await;
    }

    /// Post-turn extraction sub-call. Failures never touch the turn result:
    /// parse problems are swallowed, store problems are logged.
    async fn extract_memories(&self, session_id: &str, _user_id: &str) {
        if !self.context.memory_active() {
            return;
        }
        let recent = match self.logs.recent_messages(session_id, EXTRACTION_WINDOW).await {
            Ok(recent) => recent,
            Err(e) => {
                debug!(error = %e, "extraction skipped, history unavailable");
                return;
            }
        };
        let transcript: String = recent
            .iter()
            .filter_map(|m| {
                let text = m.text()?;
                Some(format!("{}: {}\n", m.message_type.as_str(), text))
            })
            .collect();
        if transcript.is_empty() {
            return;
        }

        let started = Instant::now();
        let outcome = self
            .llm
            .chat(&[ChatMessage::user(transcript)], EXTRACTION_PROMPT, &[])
            .await;
        let latency_ms = started.elapsed().as_millis() as u64;
        let response = match outcome {
            Ok(response) => response,
            Err(e) => {
                debug!(error = %e, "extraction call failed");
                return;
            }
        };
        self.observe
            .record_llm_call(LlmCallParts {
                session_id,
                model: self.llm.model(),
                provider: self.llm.provider_name(),
                usage: response.usage,
                latency_ms,
                time_to_first_token_ms: None,
                system_prompt: EXTRACTION_PROMPT,
                user_message: "",
                assistant_response: &response.content,
                tools_called: Vec::new(),
                status: LlmCallStatus::Success,
                error_message: None,
            })
            .await;

        for entry in parse_extraction(&response.content) {
            match self
                .memory
                .store(
                    &entry.content,
                    entry.memory_type,
                    crate::types::MemoryCategory::General,
                    entry.importance,
                    session_id,
                    true,
                )
                .await
            {
                Ok(id) => debug!(memory = %id, "memory stored"),
                Err(e) => debug!(error = %e, "memory store failed"),
            }
        }
    }
}

fn default_trigger_text(kind: MessageType) -> &'static str {
    match kind {
        MessageType::Heartbeat => {
            "Periodic heartbeat. Review the conversation and respond only if something needs attention."
        }
        MessageType::ScheduledTask => "Run the scheduled task described by this message.",
        _ => "",
    }
}

/// Compact `k=v` rendering of tool arguments for status broadcasts.
fn arguments_summary(arguments: &Value) -> String {
    const MAX: usize = 120;
    let summary = match arguments {
        Value::Object(map) => map
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(", "),
        other => other.to_string(),
    };
    crate::observe::truncate_preview(&summary, MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn arguments_summary_is_compact_and_bounded() {
        let summary = arguments_summary(&json!({"query": "cats", "count": 3}));
        // serde_json maps iterate in key order.
        assert_eq!(summary, "count=3, query=\"cats\"");

        let long = arguments_summary(&json!({"text": "x".repeat(500)}));
        assert!(long.len() <= 120);
    }

    #[test]
    fn trigger_defaults_cover_scheduled_kinds() {
        assert!(default_trigger_text(MessageType::Heartbeat).contains("heartbeat"));
        assert!(!default_trigger_text(MessageType::ScheduledTask).is_empty());
        assert_eq!(default_trigger_text(MessageType::UserInput), "");
    }
}
