//! Channel vocabulary shared by the subscription manager and pub/sub backends.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;

/// Row change kind. `All` is only meaningful in a filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    #[serde(rename = "INSERT")]
    Insert,
    #[serde(rename = "UPDATE")]
    Update,
    #[serde(rename = "DELETE")]
    Delete,
    #[serde(rename = "*")]
    All,
}

/// Which changes a channel wants to hear about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelFilter {
    pub event: EventKind,
    pub schema: String,
    pub table: String,
    /// Row predicate in `column=eq.value` form.
    pub predicate: Option<String>,
}

impl ChannelFilter {
    /// All changes on `schema.table`.
    pub fn table(schema: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            event: EventKind::All,
            schema: schema.into(),
            table: table.into(),
            predicate: None,
        }
    }

    pub fn on(mut self, event: EventKind) -> Self {
        self.event = event;
        self
    }

    pub fn with_predicate(mut self, predicate: impl Into<String>) -> Self {
        self.predicate = Some(predicate.into());
        self
    }

    pub fn matches(&self, event: &ChangeEvent) -> bool {
        if self.event != EventKind::All && self.event != event.kind {
            return false;
        }
        if self.schema != event.schema || self.table != event.table {
            return false;
        }

        match &self.predicate {
            None => true,
            Some(predicate) => {
                let Some((column, expected)) = parse_eq_predicate(predicate) else {
                    return false;
                };
                let record = match event.kind {
                    EventKind::Delete => &event.old_record,
                    _ => &event.new_record,
                };
                match record.get(column) {
                    Some(Value::String(actual)) => actual == expected,
                    Some(Value::Null) | None => false,
                    Some(other) => other.to_string() == expected,
                }
            }
        }
    }
}

fn parse_eq_predicate(predicate: &str) -> Option<(&str, &str)> {
    let (column, rest) = predicate.split_once('=')?;
    let value = rest.strip_prefix("eq.")?;
    if column.is_empty() {
        return None;
    }
    Some((column, value))
}

/// A row change delivered on a channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub kind: EventKind,
    pub schema: String,
    pub table: String,
    #[serde(default)]
    pub new_record: Value,
    #[serde(default)]
    pub old_record: Value,
    pub commit_timestamp_ms: u64,
}

impl ChangeEvent {
    pub fn insert(schema: &str, table: &str, record: Value, commit_timestamp_ms: u64) -> Self {
        Self {
            kind: EventKind::Insert,
            schema: schema.to_string(),
            table: table.to_string(),
            new_record: record,
            old_record: Value::Null,
            commit_timestamp_ms,
        }
    }
}

/// Status reported by a backend channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChannelStatus {
    Subscribed,
    ChannelError,
    TimedOut,
    Closed,
}

/// Status reported to subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Connected,
    Connecting,
    Disconnected,
    Error,
}

impl ConnectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::Disconnected => "disconnected",
            ConnectionStatus::Error => "error",
        }
    }
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Backend handle for an open channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChannelId(pub u64);

/// Streams of a freshly opened backend channel.
///
/// Both streams end when the backend closes the channel.
#[derive(Debug)]
pub struct OpenedChannel {
    pub id: ChannelId,
    pub events: mpsc::UnboundedReceiver<ChangeEvent>,
    pub status: mpsc::UnboundedReceiver<ChannelStatus>,
}

#[derive(Debug, Error)]
pub enum PubSubError {
    #[error("pub/sub unavailable: {0}")]
    Unavailable(String),

    #[error("channel '{0}' rejected")]
    Rejected(String),
}

/// Pub/sub contract.
///
/// `open` returns immediately; the subscription outcome arrives later on the
/// status stream.
pub trait PubSub: Send + Sync + std::fmt::Debug {
    fn open(&self, channel_name: &str, filter: &ChannelFilter) -> Result<OpenedChannel, PubSubError>;

    fn close(&self, id: ChannelId);
}
