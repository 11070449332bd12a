//! WebSocket connection lifecycle: one tail task out, one recv loop in.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};
use uuid::Uuid;

use pulsebot::{MessageRecord, MessageType, SeekTo, TARGET_AGENT};

use super::app::AppState;

/// One incoming frame: the text plus optional session/user identity. A
/// missing session id starts a fresh session for the connection.
#[derive(Deserialize)]
struct IncomingFrame {
    text: String,
    #[serde(default)]
    session_id: Option<String>,
    #[serde(default)]
    user_id: Option<String>,
}

/// Maps one frame to the `user_input` row a channel writes.
pub(crate) fn frame_to_record(
    channel: &str,
    default_session: &str,
    raw: &str,
) -> Result<MessageRecord, serde_json::Error> {
    let frame: IncomingFrame = serde_json::from_str(raw)?;
    let session = frame
        .session_id
        .unwrap_or_else(|| default_session.to_string());
    let mut record = MessageRecord::new(
        channel,
        TARGET_AGENT,
        session,
        MessageType::UserInput,
        &json!({"text": frame.text}),
    );
    if let Some(user) = frame.user_id {
        record = record.with_user(user);
    }
    Ok(record)
}

pub(crate) async fn handle_socket(socket: WebSocket, channel: String, state: Arc<AppState>) {
    let (mut sink, mut source) = socket.split();
    let default_session = Uuid::new_v4().to_string();

    // Outbound: everything addressed to this channel, in log order.
    let mut tail = match state.logs.tail_channel_messages(&channel, SeekTo::Latest).await {
        Ok(tail) => tail,
        Err(e) => {
            warn!(error = %e, channel, "channel tail failed, closing socket");
            return;
        }
    };
    let forward = tokio::spawn(async move {
        while let Some(item) = tail.next().await {
            match item {
                Ok(row) => {
                    let frame = serde_json::Value::Object(row.0).to_string();
                    if sink.send(Message::Text(frame)).await.is_err() {
                        return;
                    }
                }
                Err(e) => {
                    debug!(error = %e, "channel tail ended");
                    return;
                }
            }
        }
    });

    // Inbound: text frames become user_input rows.
    while let Some(Ok(message)) = source.next().await {
        let Message::Text(raw) = message else {
            continue;
        };
        match frame_to_record(&channel, &default_session, &raw) {
            Ok(record) => {
                if let Err(e) = state.logs.append_message(&record).await {
                    warn!(error = %e, "user_input append failed");
                }
            }
            Err(e) => debug!(error = %e, "undecodable frame ignored"),
        }
    }
    forward.abort();
}
