//! Client-side messaging resilience layer.
//!
//! Circuit breakers, advisory locks, self-healing realtime subscriptions and a
//! durable outbox, composed by [`ResilienceLayer`].

pub mod clock;
pub mod config;
pub mod layer;
pub mod locks;
pub mod observability;
pub mod outbox;
pub mod realtime;
pub mod resilience;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::ResilienceConfig;
pub use layer::{Backends, LayerError, ResilienceLayer, SessionTeardown};
pub use locks::{LockCoordinator, LockOptions, LockType};
pub use outbox::{replay_pending, RetryQueue};
pub use realtime::SubscriptionManager;
pub use resilience::CircuitBreakerRegistry;
