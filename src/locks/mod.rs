//! Advisory lock subsystem.
//!
//! # Data Flow
//! ```text
//! with_lock(type, resource, op):
//!     → key.rs (deterministic 64-bit key from type + resource)
//!     → coordinator.rs (try-acquire with linear retry)
//!     → backend.rs (remote try_advisory_lock RPC, or local set)
//!     → op runs, auto-release timer armed
//!     → coordinator.rs (release exactly once: op done, timer, panic or cancel)
//! ```
//!
//! # Design Decisions
//! - Acquisition never blocks on the backend; contention is a normal outcome
//! - Local tracking is advisory; the backend is the source of truth
//! - Every acquisition carries a token so stale timers and guards cannot
//!   release a newer acquisition of the same key

pub mod backend;
pub mod coordinator;
pub mod key;

pub use backend::{LocalLockBackend, LockBackend, LockBackendError, RpcLockBackend};
pub use coordinator::{ActiveLock, LockAttempt, LockCoordinator, LockError, LockOptions};
pub use key::{LockKey, LockType};
