//! Raw client for the streaming DB: SQL over two HTTP endpoints.
//!
//! Bounded queries and DDL go to the request/response endpoint
//! (`query_port`); unbounded tails go to the streaming endpoint
//! (`stream_port`), whose response body never ends and is consumed line by
//! line. Both speak JSON-lines rows.

use std::time::Duration;

use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{Row, SeekTo, StreamError, Tail};

/// Client for a Timeplus-Proton-style streaming database.
///
/// One instance owns one connection pool for the batch path. Every [`tail`]
/// builds a dedicated client so concurrent tails never share a transport
/// connection with each other or with batch queries.
///
/// [`tail`]: ProtonClient::tail
pub struct ProtonClient {
    query_url: String,
    stream_url: String,
    username: String,
    password: Option<String>,
    http: reqwest::Client,
}

impl ProtonClient {
    pub fn new(db: &env_config::DatabaseConfig) -> Self {
        Self {
            query_url: format!("http://{}:{}", db.host, db.query_port),
            stream_url: format!("http://{}:{}", db.host, db.stream_port),
            username: db.username.clone(),
            // Empty strings come out of ${VAR} substitution for unset vars.
            password: db.password.clone().filter(|p| !p.is_empty()),
            http: reqwest::Client::new(),
        }
    }

    /// Fire-and-forget DDL/DML.
    pub async fn execute(&self, sql: &str) -> Result<(), StreamError> {
        debug!(sql, "execute");
        let resp = self
            .http
            .post(&self.query_url)
            .basic_auth(&self.username, self.password.as_deref())
            .body(sql.to_string())
            .send()
            .await
            .map_err(|e| StreamError::Transport(e.to_string()))?;
        check_status(resp).await.map(|_| ())
    }

    /// Bounded historical read: the full result set, decoded.
    pub async fn query(&self, sql: &str) -> Result<Vec<Row>, StreamError> {
        debug!(sql, "query");
        let resp = self
            .http
            .post(&self.query_url)
            .basic_auth(&self.username, self.password.as_deref())
            .body(sql.to_string())
            .send()
            .await
            .map_err(|e| StreamError::Transport(e.to_string()))?;
        let body = check_status(resp).await?;
        parse_rows(&body)
    }

    /// Unbounded streaming read starting at `seek`.
    ///
    /// The transfer runs on its own task and its own HTTP client; rows are
    /// handed over a bounded channel so the consumer paces the producer.
    /// Transport loss surfaces as one `Err(StreamError::Transport)` and then
    /// the tail ends.
    pub async fn tail(&self, sql: &str, seek: SeekTo) -> Result<Tail, StreamError> {
        let sql = format!("{} SETTINGS seek_to='{}'", sql, seek.to_setting());
        debug!(sql, "tail");

        // Dedicated client: tails must not share a connection with the batch
        // path or with each other (head-of-line blocking).
        let client = reqwest::Client::new();
        let resp = client
            .post(&self.stream_url)
            .basic_auth(&self.username, self.password.as_deref())
            .body(sql)
            .send()
            .await
            .map_err(|e| StreamError::Transport(e.to_string()))?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(StreamError::Query(format!("{status}: {body}")));
        }

        let (tx, rx) = mpsc::channel(Tail::CAPACITY);
        let cancel = CancellationToken::new();
        let child = cancel.child_token();

        tokio::spawn(async move {
            let mut body = resp.bytes_stream();
            let mut buf: Vec<u8> = Vec::new();
            loop {
                let chunk = tokio::select! {
                    _ = child.cancelled() => return,
                    chunk = body.next() => chunk,
                };
                match chunk {
                    Some(Ok(bytes)) => {
                        buf.extend_from_slice(&bytes);
                        while let Some(pos) = buf.iter().position(|&b| b == b'\n') {
                            let line: Vec<u8> = buf.drain(..=pos).collect();
                            let line = String::from_utf8_lossy(&line[..line.len() - 1]);
                            let line = line.trim();
                            if line.is_empty() {
                                continue;
                            }
                            let item = serde_json::from_str::<serde_json::Value>(line)
                                .map_err(|e| StreamError::Decode(e.to_string()))
                                .and_then(Row::from_value);
                            if tx.send(item).await.is_err() {
                                return; // consumer dropped the tail
                            }
                        }
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "tail transport lost");
                        let _ = tx.send(Err(StreamError::Transport(e.to_string()))).await;
                        return;
                    }
                    None => {
                        let _ = tx
                            .send(Err(StreamError::Transport("stream ended".to_string())))
                            .await;
                        return;
                    }
                }
            }
        });

        Ok(Tail::new(rx, Some(cancel.drop_guard())))
    }
}

/// Bounded-backoff retry for writes: transient transport failures are
/// retried, query failures are not.
pub async fn retry_write<F, Fut>(attempts: u32, mut op: F) -> Result<(), StreamError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<(), StreamError>>,
{
    let mut delay = Duration::from_millis(200);
    let mut last = None;
    for attempt in 0..attempts {
        match op().await {
            Ok(()) => return Ok(()),
            Err(StreamError::Transport(e)) => {
                debug!(attempt, error = %e, "write failed, backing off");
                last = Some(StreamError::Transport(e));
                tokio::time::sleep(delay).await;
                delay = (delay * 2).min(Duration::from_secs(5));
            }
            Err(other) => return Err(other),
        }
    }
    Err(last.unwrap_or_else(|| StreamError::Transport("write retries exhausted".to_string())))
}

async fn check_status(resp: reqwest::Response) -> Result<String, StreamError> {
    let status = resp.status();
    let body = resp
        .text()
        .await
        .map_err(|e| StreamError::Transport(e.to_string()))?;
    if status.is_success() {
        Ok(body)
    } else {
        Err(StreamError::Query(format!("{status}: {body}")))
    }
}

fn parse_rows(body: &str) -> Result<Vec<Row>, StreamError> {
    body.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(|line| {
            serde_json::from_str::<serde_json::Value>(line)
                .map_err(|e| StreamError::Decode(e.to_string()))
                .and_then(Row::from_value)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn parse_rows_handles_json_lines() {
        let rows = parse_rows("{\"a\":1}\n\n{\"a\":2}\n").unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].get_f64("a"), Some(2.0));
    }

    #[test]
    fn parse_rows_rejects_garbage() {
        assert!(parse_rows("{\"a\":1}\nnot json\n").is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn retry_write_retries_transport_only() {
        let calls = AtomicU32::new(0);
        let result = retry_write(3, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(StreamError::Transport("down".to_string()))
                } else {
                    Ok(())
                }
            }
        })
        .await;
        assert!(result.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        let calls = AtomicU32::new(0);
        let result = retry_write(3, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(StreamError::Query("bad sql".to_string())) }
        })
        .await;
        assert!(matches!(result, Err(StreamError::Query(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_write_gives_up_after_attempts() {
        let result = retry_write(2, || async {
            Err(StreamError::Transport("still down".to_string()))
        })
        .await;
        assert!(matches!(result, Err(StreamError::Transport(_))));
    }
}
