//! Idempotent creation and verification of the five streams.
//!
//! `CREATE STREAM IF NOT EXISTS` makes re-running `setup` a no-op. Schema
//! drift is not migrated: [`verify_streams`] DESCRIBEs each stream and fails
//! fast when a required column is missing.

use tracing::info;

use super::{ProtonClient, StreamError};

pub const MESSAGES: &str = "messages";
pub const LLM_CALLS: &str = "llm_calls";
pub const TOOL_CALLS: &str = "tool_calls";
pub const MEMORIES: &str = "memories";
pub const EVENTS: &str = "events";

/// All five streams, creation order.
pub const STREAM_NAMES: [&str; 5] = [MESSAGES, LLM_CALLS, TOOL_CALLS, MEMORIES, EVENTS];

const CREATE_MESSAGES: &str = "\
CREATE STREAM IF NOT EXISTS messages (
  id uuid DEFAULT uuid(),
  timestamp datetime64(3) DEFAULT now64(3),
  source string,
  target string,
  session_id string,
  message_type string,
  content string,
  user_id string DEFAULT '',
  channel_metadata string DEFAULT '{}',
  priority int8 DEFAULT 0
) SETTINGS event_time_column = 'timestamp'";

const CREATE_LLM_CALLS: &str = "\
CREATE STREAM IF NOT EXISTS llm_calls (
  id uuid DEFAULT uuid(),
  timestamp datetime64(3) DEFAULT now64(3),
  session_id string,
  model string,
  provider string,
  input_tokens uint32 DEFAULT 0,
  output_tokens uint32 DEFAULT 0,
  total_tokens uint32 DEFAULT 0,
  estimated_cost float64 DEFAULT 0,
  latency_ms uint64 DEFAULT 0,
  time_to_first_token_ms nullable(uint64),
  system_prompt_hash string DEFAULT '',
  user_message_preview string DEFAULT '',
  assistant_response_preview string DEFAULT '',
  tools_called array(string) DEFAULT [],
  tool_call_count uint32 DEFAULT 0,
  status string,
  error_message nullable(string)
) SETTINGS event_time_column = 'timestamp'";

const CREATE_TOOL_CALLS: &str = "\
CREATE STREAM IF NOT EXISTS tool_calls (
  id uuid DEFAULT uuid(),
  timestamp datetime64(3) DEFAULT now64(3),
  session_id string,
  llm_request_id string,
  tool_name string,
  skill_name string,
  arguments string DEFAULT '',
  status string,
  result_preview string DEFAULT '',
  error_message nullable(string),
  duration_ms uint64 DEFAULT 0
) SETTINGS event_time_column = 'timestamp'";

const CREATE_MEMORIES: &str = "\
CREATE STREAM IF NOT EXISTS memories (
  id uuid DEFAULT uuid(),
  timestamp datetime64(3) DEFAULT now64(3),
  memory_type string,
  category string,
  content string,
  source_session_id string DEFAULT '',
  embedding array(float32) DEFAULT [],
  importance float32 DEFAULT 0.5,
  is_deleted bool DEFAULT false
) SETTINGS event_time_column = 'timestamp'";

const CREATE_EVENTS: &str = "\
CREATE STREAM IF NOT EXISTS events (
  id uuid DEFAULT uuid(),
  timestamp datetime64(3) DEFAULT now64(3),
  event_type string,
  source string,
  severity string,
  payload string DEFAULT '{}',
  tags array(string) DEFAULT []
) SETTINGS event_time_column = 'timestamp'";

fn required_columns(stream: &str) -> &'static [&'static str] {
    match stream {
        MESSAGES => &[
            "id",
            "timestamp",
            "source",
            "target",
            "session_id",
            "message_type",
            "content",
            "user_id",
            "channel_metadata",
            "priority",
        ],
        LLM_CALLS => &[
            "id",
            "timestamp",
            "session_id",
            "model",
            "provider",
            "input_tokens",
            "output_tokens",
            "total_tokens",
            "estimated_cost",
            "latency_ms",
            "time_to_first_token_ms",
            "system_prompt_hash",
            "user_message_preview",
            "assistant_response_preview",
            "tools_called",
            "tool_call_count",
            "status",
            "error_message",
        ],
        TOOL_CALLS => &[
            "id",
            "timestamp",
            "session_id",
            "llm_request_id",
            "tool_name",
            "skill_name",
            "arguments",
            "status",
            "result_preview",
            "error_message",
            "duration_ms",
        ],
        MEMORIES => &[
            "id",
            "timestamp",
            "memory_type",
            "category",
            "content",
            "source_session_id",
            "embedding",
            "importance",
            "is_deleted",
        ],
        EVENTS => &[
            "id",
            "timestamp",
            "event_type",
            "source",
            "severity",
            "payload",
            "tags",
        ],
        other => panic!("unknown stream {other}"),
    }
}

/// Creates the five streams. Safe to re-run.
pub async fn init_streams(client: &ProtonClient) -> Result<(), StreamError> {
    for (name, ddl) in [
        (MESSAGES, CREATE_MESSAGES),
        (LLM_CALLS, CREATE_LLM_CALLS),
        (TOOL_CALLS, CREATE_TOOL_CALLS),
        (MEMORIES, CREATE_MEMORIES),
        (EVENTS, CREATE_EVENTS),
    ] {
        client.execute(ddl).await?;
        info!(stream = name, "stream ready");
    }
    Ok(())
}

/// Checks that each stream exists with the columns the runtime reads and
/// writes. Missing columns are a fatal [`StreamError::SchemaMismatch`].
pub async fn verify_streams(client: &ProtonClient) -> Result<(), StreamError> {
    for stream in STREAM_NAMES {
        let rows = client.query(&format!("DESCRIBE {stream}")).await?;
        let present: Vec<&str> = rows.iter().filter_map(|r| r.get_str("name")).collect();
        for required in required_columns(stream) {
            if !present.contains(required) {
                return Err(StreamError::SchemaMismatch(format!(
                    "stream '{stream}' is missing column '{required}'; \
                     drop the stream and re-run setup"
                )));
            }
        }
    }
    Ok(())
}
