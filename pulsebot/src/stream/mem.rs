//! In-memory [`LogStore`] used by tests.
//!
//! Appends go into plain vectors; message appends additionally fan out over
//! a broadcast channel so tails behave like live tails (always
//! latest-seek). Memory reads apply the same latest-per-id / deleted-filter
//! semantics as the SQL implementation.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc};
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;

use crate::types::{
    channel_target, EventRecord, LlmCallRecord, MemoryRecord, MessageRecord, ToolLogRecord,
    TARGET_AGENT,
};

use super::logs::{LogStore, MemoryFilter};
use super::{Row, SeekTo, StreamError, Tail};

pub struct InMemoryLogs {
    messages: Mutex<Vec<MessageRecord>>,
    llm_calls: Mutex<Vec<LlmCallRecord>>,
    tool_logs: Mutex<Vec<ToolLogRecord>>,
    memories: Mutex<Vec<MemoryRecord>>,
    events: Mutex<Vec<EventRecord>>,
    message_tx: broadcast::Sender<MessageRecord>,
}

impl Default for InMemoryLogs {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryLogs {
    pub fn new() -> Self {
        let (message_tx, _) = broadcast::channel(256);
        Self {
            messages: Mutex::new(Vec::new()),
            llm_calls: Mutex::new(Vec::new()),
            tool_logs: Mutex::new(Vec::new()),
            memories: Mutex::new(Vec::new()),
            events: Mutex::new(Vec::new()),
            message_tx,
        }
    }

    pub fn messages(&self) -> Vec<MessageRecord> {
        self.messages.lock().unwrap().clone()
    }

    pub fn llm_calls(&self) -> Vec<LlmCallRecord> {
        self.llm_calls.lock().unwrap().clone()
    }

    pub fn tool_logs(&self) -> Vec<ToolLogRecord> {
        self.tool_logs.lock().unwrap().clone()
    }

    /// Raw memory rows, tombstones included.
    pub fn memory_rows(&self) -> Vec<MemoryRecord> {
        self.memories.lock().unwrap().clone()
    }

    pub fn events(&self) -> Vec<EventRecord> {
        self.events.lock().unwrap().clone()
    }

    /// How many live tails are subscribed. Tests use this to know the agent
    /// loop is listening before they append a trigger.
    pub fn tail_count(&self) -> usize {
        self.message_tx.receiver_count()
    }

    /// Live (latest-per-id, non-deleted) memories, newest first.
    fn live_memories(&self) -> Vec<MemoryRecord> {
        let rows = self.memories.lock().unwrap();
        let mut latest: HashMap<uuid::Uuid, MemoryRecord> = HashMap::new();
        for row in rows.iter() {
            match latest.get(&row.id) {
                Some(existing) if existing.timestamp > row.timestamp => {}
                _ => {
                    latest.insert(row.id, row.clone());
                }
            }
        }
        let mut live: Vec<MemoryRecord> =
            latest.into_values().filter(|m| !m.is_deleted).collect();
        live.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then(a.id.cmp(&b.id)));
        live
    }

    fn spawn_tail<F>(&self, predicate: F) -> Tail
    where
        F: Fn(&MessageRecord) -> bool + Send + 'static,
    {
        let mut sub = BroadcastStream::new(self.message_tx.subscribe());
        let (tx, rx) = mpsc::channel(Tail::CAPACITY);
        tokio::spawn(async move {
            while let Some(item) = sub.next().await {
                match item {
                    Ok(record) if predicate(&record) => {
                        let row = serde_json::to_value(&record)
                            .map_err(|e| StreamError::Decode(e.to_string()))
                            .and_then(Row::from_value);
                        if tx.send(row).await.is_err() {
                            return;
                        }
                    }
                    Ok(_) => {}
                    Err(BroadcastStreamRecvError::Lagged(_)) => continue,
                }
            }
        });
        Tail::new(rx, None)
    }
}

#[async_trait]
impl LogStore for InMemoryLogs {
    async fn append_message(&self, record: &MessageRecord) -> Result<(), StreamError> {
        self.messages.lock().unwrap().push(record.clone());
        let _ = self.message_tx.send(record.clone());
        Ok(())
    }

    async fn append_llm_call(&self, record: &LlmCallRecord) -> Result<(), StreamError> {
        self.llm_calls.lock().unwrap().push(record.clone());
        Ok(())
    }

    async fn append_tool_log(&self, record: &ToolLogRecord) -> Result<(), StreamError> {
        self.tool_logs.lock().unwrap().push(record.clone());
        Ok(())
    }

    async fn append_memory(&self, record: &MemoryRecord) -> Result<(), StreamError> {
        self.memories.lock().unwrap().push(record.clone());
        Ok(())
    }

    async fn append_event(&self, record: &EventRecord) -> Result<(), StreamError> {
        self.events.lock().unwrap().push(record.clone());
        Ok(())
    }

    async fn recent_messages(
        &self,
        session_id: &str,
        limit: usize,
    ) -> Result<Vec<MessageRecord>, StreamError> {
        let rows = self.messages.lock().unwrap();
        let mut visible: Vec<MessageRecord> = rows
            .iter()
            .filter(|m| m.session_id == session_id && m.message_type.llm_visible())
            .cloned()
            .collect();
        visible.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then(a.id.cmp(&b.id)));
        let skip = visible.len().saturating_sub(limit);
        Ok(visible.split_off(skip))
    }

    async fn memory_candidates(
        &self,
        filter: &MemoryFilter,
    ) -> Result<Vec<MemoryRecord>, StreamError> {
        let live = self
            .live_memories()
            .into_iter()
            .filter(|m| m.importance >= filter.min_importance)
            .filter(|m| match &filter.memory_types {
                Some(types) => types.contains(&m.memory_type),
                None => true,
            })
            .filter(|m| match &filter.categories {
                Some(categories) => categories.contains(&m.category),
                None => true,
            })
            .take(filter.limit)
            .collect();
        Ok(live)
    }

    async fn memories_by_session(
        &self,
        session_id: &str,
        limit: usize,
    ) -> Result<Vec<MemoryRecord>, StreamError> {
        Ok(self
            .live_memories()
            .into_iter()
            .filter(|m| m.source_session_id == session_id)
            .take(limit)
            .collect())
    }

    async fn hourly_llm_cost(&self) -> Result<f64, StreamError> {
        let hour_ago = chrono::Utc::now() - chrono::Duration::hours(1);
        Ok(self
            .llm_calls
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.timestamp > hour_ago)
            .map(|r| r.estimated_cost)
            .sum())
    }

    async fn tail_agent_messages(&self, _seek: SeekTo) -> Result<Tail, StreamError> {
        Ok(self.spawn_tail(|m| m.target == TARGET_AGENT && m.message_type.turn_trigger()))
    }

    async fn tail_channel_messages(
        &self,
        channel: &str,
        _seek: SeekTo,
    ) -> Result<Tail, StreamError> {
        let target = channel_target(channel);
        Ok(self.spawn_tail(move |m| m.target == target))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{MemoryCategory, MemoryType, MessageType};
    use serde_json::json;
    use uuid::Uuid;

    fn memory(content: &str, importance: f32) -> MemoryRecord {
        MemoryRecord {
            id: Uuid::new_v4(),
            timestamp: chrono::Utc::now(),
            memory_type: MemoryType::Fact,
            category: MemoryCategory::General,
            content: content.to_string(),
            source_session_id: "s1".to_string(),
            embedding: vec![1.0, 0.0],
            importance,
            is_deleted: false,
        }
    }

    #[tokio::test]
    async fn tombstone_hides_memory_from_reads() {
        let logs = InMemoryLogs::new();
        let m = memory("fact one", 0.9);
        logs.append_memory(&m).await.unwrap();
        assert_eq!(
            logs.memory_candidates(&MemoryFilter::default())
                .await
                .unwrap()
                .len(),
            1
        );

        let mut tomb = MemoryRecord::tombstone(m.id);
        tomb.timestamp = m.timestamp + chrono::Duration::milliseconds(1);
        logs.append_memory(&tomb).await.unwrap();
        assert!(logs
            .memory_candidates(&MemoryFilter::default())
            .await
            .unwrap()
            .is_empty());
        // Both rows are still on the log.
        assert_eq!(logs.memory_rows().len(), 2);
    }

    #[tokio::test]
    async fn recent_messages_filters_and_orders() {
        let logs = InMemoryLogs::new();
        for (i, ty) in [
            MessageType::UserInput,
            MessageType::Heartbeat,
            MessageType::AgentResponse,
        ]
        .iter()
        .enumerate()
        {
            let mut m =
                MessageRecord::new("web", TARGET_AGENT, "s1", *ty, &json!({"text": i.to_string()}));
            m.timestamp = chrono::Utc::now() + chrono::Duration::milliseconds(i as i64);
            logs.append_message(&m).await.unwrap();
        }
        let recent = logs.recent_messages("s1", 10).await.unwrap();
        // Heartbeats are not LLM-visible.
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].message_type, MessageType::UserInput);
        assert_eq!(recent[1].message_type, MessageType::AgentResponse);

        let limited = logs.recent_messages("s1", 1).await.unwrap();
        assert_eq!(limited.len(), 1);
        assert_eq!(limited[0].message_type, MessageType::AgentResponse);
    }

    #[tokio::test]
    async fn agent_tail_sees_only_trigger_rows() {
        let logs = InMemoryLogs::new();
        let mut tail = logs.tail_agent_messages(SeekTo::Latest).await.unwrap();

        let trigger = MessageRecord::new(
            "web",
            TARGET_AGENT,
            "s1",
            MessageType::UserInput,
            &json!({"text": "hi"}),
        );
        let response = MessageRecord::new(
            "agent",
            channel_target("web"),
            "s1",
            MessageType::AgentResponse,
            &json!({"text": "hello"}),
        );
        logs.append_message(&response).await.unwrap();
        logs.append_message(&trigger).await.unwrap();

        let row = tail.next().await.unwrap().unwrap();
        let got: MessageRecord = row.decode().unwrap();
        assert_eq!(got.id, trigger.id);
    }

    #[tokio::test]
    async fn candidate_filters_apply() {
        let logs = InMemoryLogs::new();
        logs.append_memory(&memory("low", 0.1)).await.unwrap();
        logs.append_memory(&memory("high", 0.9)).await.unwrap();
        let hits = logs
            .memory_candidates(&MemoryFilter {
                min_importance: 0.5,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].content, "high");
    }
}
