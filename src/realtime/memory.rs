//! In-process pub/sub backends.

use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::mpsc;
use tracing::debug;

use super::channel::{
    ChangeEvent, ChannelFilter, ChannelId, ChannelStatus, OpenedChannel, PubSub, PubSubError,
};

#[derive(Debug)]
struct BrokerChannel {
    name: String,
    filter: ChannelFilter,
    events: mpsc::UnboundedSender<ChangeEvent>,
    status: mpsc::UnboundedSender<ChannelStatus>,
}

#[derive(Debug, Default)]
struct BrokerState {
    next_id: u64,
    total_opened: u64,
    fail_next_opens: u32,
    channels: HashMap<ChannelId, BrokerChannel>,
}

/// In-process broker.
///
/// Channels receive every published event their filter matches. Status can be
/// injected per channel name to simulate connectivity failures.
#[derive(Debug)]
pub struct InMemoryPubSub {
    auto_subscribe: bool,
    state: Mutex<BrokerState>,
}

impl Default for InMemoryPubSub {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryPubSub {
    /// Broker that confirms every channel with `Subscribed` as soon as it opens.
    pub fn new() -> Self {
        Self {
            auto_subscribe: true,
            state: Mutex::new(BrokerState::default()),
        }
    }

    /// Broker that reports nothing until told to via [`inject_status`](Self::inject_status).
    pub fn manual() -> Self {
        Self {
            auto_subscribe: false,
            state: Mutex::new(BrokerState::default()),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, BrokerState> {
        self.state.lock().expect("pub/sub broker mutex poisoned")
    }

    /// Deliver `event` to every open channel whose filter matches. Returns the count.
    pub fn publish(&self, event: ChangeEvent) -> usize {
        let state = self.state();
        state
            .channels
            .values()
            .filter(|ch| ch.filter.matches(&event))
            .filter(|ch| ch.events.send(event.clone()).is_ok())
            .count()
    }

    /// Push `status` to every open channel named `channel_name`. Returns the count.
    pub fn inject_status(&self, channel_name: &str, status: ChannelStatus) -> usize {
        let state = self.state();
        state
            .channels
            .values()
            .filter(|ch| ch.name == channel_name)
            .filter(|ch| ch.status.send(status).is_ok())
            .count()
    }

    /// Make the next `count` calls to `open` fail.
    pub fn fail_next_opens(&self, count: u32) {
        self.state().fail_next_opens = count;
    }

    pub fn open_channel_count(&self) -> usize {
        self.state().channels.len()
    }

    /// Channels opened over the broker's lifetime, including closed ones.
    pub fn total_opened(&self) -> u64 {
        self.state().total_opened
    }
}

impl PubSub for InMemoryPubSub {
    fn open(&self, channel_name: &str, filter: &ChannelFilter) -> Result<OpenedChannel, PubSubError> {
        let mut state = self.state();
        if state.fail_next_opens > 0 {
            state.fail_next_opens -= 1;
            return Err(PubSubError::Unavailable("broker refused connection".into()));
        }

        state.next_id += 1;
        state.total_opened += 1;
        let id = ChannelId(state.next_id);

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = mpsc::unbounded_channel();
        if self.auto_subscribe {
            let _ = status_tx.send(ChannelStatus::Subscribed);
        }

        state.channels.insert(
            id,
            BrokerChannel {
                name: channel_name.to_string(),
                filter: filter.clone(),
                events: events_tx,
                status: status_tx,
            },
        );
        debug!(channel = %channel_name, id = id.0, "Broker channel opened");

        Ok(OpenedChannel {
            id,
            events: events_rx,
            status: status_rx,
        })
    }

    fn close(&self, id: ChannelId) {
        if let Some(channel) = self.state().channels.remove(&id) {
            debug!(channel = %channel.name, id = id.0, "Broker channel closed");
        }
    }
}

/// Offline backend: every channel reports `Closed` straight away and never
/// carries events.
#[derive(Debug, Default)]
pub struct NullPubSub;

impl PubSub for NullPubSub {
    fn open(&self, _channel_name: &str, _filter: &ChannelFilter) -> Result<OpenedChannel, PubSubError> {
        let (_events_tx, events_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = mpsc::unbounded_channel();
        let _ = status_tx.send(ChannelStatus::Closed);

        Ok(OpenedChannel {
            id: ChannelId(0),
            events: events_rx,
            status: status_rx,
        })
    }

    fn close(&self, _id: ChannelId) {}
}
