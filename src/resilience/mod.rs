//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Call to remote dependency:
//!     → circuit_breaker.rs (admit? fail fast while open)
//!     → wrapped operation runs
//!     → circuit_breaker.rs (record outcome, transition state)
//!
//! Retrying components (realtime, locks, outbox):
//!     → backoff.rs (exponential / linear delay schedules)
//! ```
//!
//! # Design Decisions
//! - Circuit breaker prevents cascading failures; it never retries on its own
//! - Retry policy lives with the caller, backoff math lives here
//! - Backoff is deterministic unless jitter is explicitly configured

pub mod backoff;
pub mod circuit_breaker;

pub use circuit_breaker::{CircuitBreakerError, CircuitBreakerRegistry, CircuitState, CircuitStats};
