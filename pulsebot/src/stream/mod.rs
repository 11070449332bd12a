//! Stream substrate: the append-only logs and how the runtime reads them.
//!
//! [`ProtonClient`] is the raw SQL-over-HTTP client (execute / query / tail);
//! [`LogStore`] is the typed surface the rest of the runtime uses; the
//! [`mem`] module holds the in-memory implementation used by tests.

pub mod client;
pub mod logs;
pub mod mem;
pub mod schema;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::DropGuard;

pub use client::ProtonClient;
pub use logs::{LogStore, MemoryFilter, ProtonLogs};
pub use mem::InMemoryLogs;
pub use schema::{init_streams, verify_streams, STREAM_NAMES};

#[derive(Error, Debug)]
pub enum StreamError {
    /// The transport under a tail or request was lost; callers restart the
    /// tail with a fresh [`SeekTo`].
    #[error("stream transport: {0}")]
    Transport(String),
    #[error("query failed: {0}")]
    Query(String),
    #[error("decode row: {0}")]
    Decode(String),
    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),
}

/// Where a tail starts reading.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SeekTo {
    Latest,
    Earliest,
    At(DateTime<Utc>),
    /// "now minus N" relative seek.
    Ago(chrono::Duration),
}

impl SeekTo {
    /// Renders the `seek_to` setting value for the streaming SQL dialect.
    pub fn to_setting(&self) -> String {
        match self {
            SeekTo::Latest => "latest".to_string(),
            SeekTo::Earliest => "earliest".to_string(),
            SeekTo::At(ts) => ts.to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
            SeekTo::Ago(d) => format!("-{}s", d.num_seconds().max(0)),
        }
    }
}

/// One decoded row: field name to JSON value.
#[derive(Clone, Debug, Default)]
pub struct Row(pub serde_json::Map<String, Value>);

impl Row {
    pub fn from_value(value: Value) -> Result<Self, StreamError> {
        match value {
            Value::Object(map) => Ok(Row(map)),
            other => Err(StreamError::Decode(format!(
                "expected object row, got {other}"
            ))),
        }
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.get(field).and_then(Value::as_str)
    }

    pub fn get_f64(&self, field: &str) -> Option<f64> {
        self.get(field).and_then(Value::as_f64)
    }

    /// Decodes the whole row into a record type.
    pub fn decode<T: DeserializeOwned>(self) -> Result<T, StreamError> {
        serde_json::from_value(Value::Object(self.0)).map_err(|e| StreamError::Decode(e.to_string()))
    }
}

/// A live, single-consumer tail over one stream.
///
/// Rows arrive over a bounded channel, so the producer cannot run ahead of
/// the consumer. Dropping the tail cancels the underlying transfer. After an
/// `Err` the tail is dead; restart with a fresh tail and a [`SeekTo`].
pub struct Tail {
    rx: mpsc::Receiver<Result<Row, StreamError>>,
    _guard: Option<DropGuard>,
}

impl Tail {
    /// Channel capacity for every tail; this bound is the backpressure.
    pub const CAPACITY: usize = 64;

    pub fn new(rx: mpsc::Receiver<Result<Row, StreamError>>, guard: Option<DropGuard>) -> Self {
        Self { rx, _guard: guard }
    }

    /// Next row, `None` once the tail has ended.
    pub async fn next(&mut self) -> Option<Result<Row, StreamError>> {
        self.rx.recv().await
    }
}

/// A tail is also a [`futures::Stream`], for callers that combine it.
impl futures::Stream for Tail {
    type Item = Result<Row, StreamError>;

    fn poll_next(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}
