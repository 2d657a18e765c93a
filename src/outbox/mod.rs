//! Durable outbox subsystem.
//!
//! # Data Flow
//! ```text
//! Send fails:
//!     → queue.rs enqueue (retries = 0, no attempt yet)
//!     → store.rs (JSON file or memory)
//!
//! Connectivity restored:
//!     → replay.rs (pending messages, oldest first)
//!     → queue.rs should_retry (base * 2^retries elapsed?)
//!     → MessageSender
//!     → mark_sent on success, increment_retry on failure
//!     → dead-lettered once the retry budget is spent
//! ```
//!
//! # Design Decisions
//! - At-least-once delivery; a crash between send and mark_sent resends
//! - The queue owns no timers; callers decide when to replay
//! - Dead letters stay on disk until purged

pub mod message;
pub mod queue;
pub mod replay;
pub mod store;

pub use message::{NewMessage, QueuedMessage};
pub use queue::{OutboxStats, RetryQueue};
pub use replay::{replay_pending, MessageSender, ReplayReport, SendError};
pub use store::{FileStore, MemoryStore, OutboxStore, PersistenceError};
