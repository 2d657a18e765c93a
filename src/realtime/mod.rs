//! Realtime subscription subsystem.
//!
//! # Data Flow
//! ```text
//! subscribe_with_retry(name, filter):
//!     → manager.rs (reuse tracked channel, or open a new one)
//!     → PubSub backend (memory.rs in-process, or an external broker)
//!     → pump task: events → broadcast to handles, status → manager
//!
//! Backend status:
//!     SUBSCRIBED    → connected, retry counter reset
//!     CHANNEL_ERROR → error, reconnect with backoff
//!     TIMED_OUT     → disconnected, reconnect with backoff
//!     CLOSED        → disconnected, no reconnect
//! ```
//!
//! # Design Decisions
//! - Handles hold broadcast/watch receivers that outlive backend reconnects
//! - Reconnect always tears the old backend channel down before opening anew
//! - Exhausting the retry budget is a terminal status, never an error return

pub mod channel;
pub mod health;
pub mod manager;
pub mod memory;

pub use channel::{
    ChangeEvent, ChannelFilter, ChannelId, ChannelStatus, ConnectionStatus, EventKind,
    OpenedChannel, PubSub, PubSubError,
};
pub use health::{ConnectionMetrics, HealthTracker};
pub use manager::{SubscriptionHandle, SubscriptionManager};
pub use memory::{InMemoryPubSub, NullPubSub};
