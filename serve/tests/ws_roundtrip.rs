//! End-to-end WebSocket round trip against the in-memory log store: a frame
//! in becomes a `user_input` row; a channel-targeted row comes back out as a
//! frame.

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::json;
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;

use pulsebot::{
    channel_target, InMemoryLogs, LogStore, MessageRecord, MessageType, TARGET_AGENT,
};

#[tokio::test]
async fn frame_in_row_out() {
    let logs = Arc::new(InMemoryLogs::new());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server_logs = Arc::clone(&logs) as Arc<dyn LogStore>;
    tokio::spawn(async move {
        let _ = serve::run_serve_on_listener(listener, server_logs).await;
    });

    let (mut socket, _) =
        tokio_tungstenite::connect_async(format!("ws://{addr}/ws/test-channel"))
            .await
            .expect("connect");

    // Inbound: a text frame lands on the message log targeted at the agent.
    socket
        .send(Message::Text(
            json!({"text": "hello", "session_id": "s1", "user_id": "u1"}).to_string(),
        ))
        .await
        .unwrap();

    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let rows = logs.messages();
            if let Some(row) = rows.first() {
                assert_eq!(row.message_type, MessageType::UserInput);
                assert_eq!(row.target, TARGET_AGENT);
                assert_eq!(row.source, "test-channel");
                assert_eq!(row.session_id, "s1");
                assert_eq!(row.user_id, "u1");
                assert_eq!(row.text().as_deref(), Some("hello"));
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("user_input row never appeared");

    // Outbound: a row targeted at this channel arrives as a JSON frame.
    let response = MessageRecord::new(
        "pulsebot",
        channel_target("test-channel"),
        "s1",
        MessageType::AgentResponse,
        &json!({"text": "hi there"}),
    );
    logs.append_message(&response).await.unwrap();

    let frame = tokio::time::timeout(Duration::from_secs(5), socket.next())
        .await
        .expect("no frame")
        .unwrap()
        .unwrap();
    let value: serde_json::Value = serde_json::from_str(frame.to_text().unwrap()).unwrap();
    assert_eq!(value["message_type"], "agent_response");
    assert_eq!(value["session_id"], "s1");
    assert!(value["content"].as_str().unwrap().contains("hi there"));
}
