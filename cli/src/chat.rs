//! Interactive local chat: stdin lines in, channel rows out.
//!
//! The terminal is just another channel named `cli`: inputs are appended as
//! `user_input` rows, and the tail on `channel:cli` renders tool-status
//! broadcasts and responses as they land on the log.

use std::sync::Arc;

use serde_json::json;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use uuid::Uuid;

use env_config::Config;
use pulsebot::{
    verify_streams, LogStore, MessageRecord, MessageType, ProtonClient, ProtonLogs, SeekTo,
    TARGET_AGENT,
};

const CHANNEL: &str = "cli";

pub async fn run(
    config: &Config,
    session: Option<String>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let client = Arc::new(ProtonClient::new(&config.database));
    verify_streams(&client).await?;
    let logs: Arc<dyn LogStore> = Arc::new(ProtonLogs::new(client));

    let session_id = session.unwrap_or_else(|| Uuid::new_v4().to_string());
    println!("session {session_id}, type a message, ctrl-d to quit");

    let mut tail = logs.tail_channel_messages(CHANNEL, SeekTo::Latest).await?;
    let printer = tokio::spawn(async move {
        while let Some(Ok(row)) = tail.next().await {
            let Ok(record) = row.decode::<MessageRecord>() else {
                continue;
            };
            render(&record).await;
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let text = line.trim();
        if text.is_empty() {
            continue;
        }
        let record = MessageRecord::new(
            CHANNEL,
            TARGET_AGENT,
            &session_id,
            MessageType::UserInput,
            &json!({"text": text}),
        );
        logs.append_message(&record).await?;
    }

    printer.abort();
    Ok(())
}

async fn render(record: &MessageRecord) {
    let content = record.content_json();
    let line = match record.message_type {
        MessageType::AgentResponse => {
            format!("agent> {}\n", content["text"].as_str().unwrap_or(""))
        }
        MessageType::ToolCall => format!(
            "  [tool {} {}]\n",
            content["tool_name"].as_str().unwrap_or("?"),
            content["status"].as_str().unwrap_or(""),
        ),
        MessageType::ToolResult => format!(
            "  [tool {} {} in {}ms]\n",
            content["tool_name"].as_str().unwrap_or("?"),
            content["status"].as_str().unwrap_or(""),
            content["duration_ms"].as_u64().unwrap_or(0),
        ),
        MessageType::Error => format!("error> {}\n", content["message"].as_str().unwrap_or("")),
        _ => return,
    };
    let mut stdout = tokio::io::stdout();
    let _ = stdout.write_all(line.as_bytes()).await;
    let _ = stdout.flush().await;
}
