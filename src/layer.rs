//! Composition root wiring the four resilience components together.

use std::sync::Arc;

use thiserror::Error;
use tracing::{info, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::ResilienceConfig;
use crate::locks::{LocalLockBackend, LockBackend, LockBackendError, LockCoordinator, RpcLockBackend};
use crate::outbox::{FileStore, MemoryStore, OutboxStore, PersistenceError, RetryQueue};
use crate::realtime::{NullPubSub, PubSub, SubscriptionManager};
use crate::resilience::CircuitBreakerRegistry;

#[derive(Debug, Error)]
pub enum LayerError {
    #[error("lock backend: {0}")]
    LockBackend(#[from] LockBackendError),

    #[error("outbox: {0}")]
    Persistence(#[from] PersistenceError),
}

/// External contracts the layer runs against.
#[derive(Debug, Clone)]
pub struct Backends {
    pub locks: Arc<dyn LockBackend>,
    pub pubsub: Arc<dyn PubSub>,
    pub store: Arc<dyn OutboxStore>,
    pub clock: Arc<dyn Clock>,
}

impl Backends {
    /// Local lock table, closed channels, in-memory outbox.
    pub fn offline() -> Self {
        Self {
            locks: Arc::new(LocalLockBackend::new()),
            pubsub: Arc::new(NullPubSub),
            store: Arc::new(MemoryStore::new()),
            clock: Arc::new(SystemClock),
        }
    }
}

/// What [`ResilienceLayer::end_session`] tore down.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionTeardown {
    pub released_locks: usize,
    pub closed_channels: usize,
}

/// One instance per client session.
#[derive(Debug, Clone)]
pub struct ResilienceLayer {
    config: Arc<ResilienceConfig>,
    circuits: Arc<CircuitBreakerRegistry>,
    locks: LockCoordinator,
    subscriptions: SubscriptionManager,
    outbox: Arc<RetryQueue>,
}

impl ResilienceLayer {
    pub fn new(config: ResilienceConfig, backends: Backends) -> Self {
        let circuits = CircuitBreakerRegistry::new(
            config.circuit_breaker.clone(),
            backends.clock.clone(),
        );
        let locks = LockCoordinator::new(
            backends.locks,
            config.locks.clone(),
            backends.clock.clone(),
        );
        let subscriptions = SubscriptionManager::new(
            backends.pubsub,
            config.realtime.clone(),
            backends.clock.clone(),
        );
        let outbox = RetryQueue::new(backends.store, config.outbox.clone(), backends.clock);

        Self {
            config: Arc::new(config),
            circuits: Arc::new(circuits),
            locks,
            subscriptions,
            outbox: Arc::new(outbox),
        }
    }

    /// Null/local backends and an in-memory outbox, regardless of what the
    /// config points at. [`from_config`](Self::from_config) with `offline = true`
    /// keeps a configured outbox file.
    pub fn offline(config: ResilienceConfig) -> Self {
        info!("Resilience layer running offline");
        Self::new(config, Backends::offline())
    }

    /// Build backends from `config`. `pubsub` is the realtime broker to use
    /// when online.
    pub async fn from_config(
        config: ResilienceConfig,
        pubsub: Arc<dyn PubSub>,
    ) -> Result<Self, LayerError> {
        // Offline mode swaps locks and pub/sub only.
        let store: Arc<dyn OutboxStore> = match &config.outbox.path {
            Some(path) => Arc::new(FileStore::open(path).await?),
            None => Arc::new(MemoryStore::new()),
        };

        if config.offline {
            info!(
                durable_outbox = config.outbox.path.is_some(),
                "Resilience layer running offline"
            );
            let backends = Backends {
                store,
                ..Backends::offline()
            };
            return Ok(Self::new(config, backends));
        }

        let locks: Arc<dyn LockBackend> = match RpcLockBackend::from_settings(&config.locks)? {
            Some(rpc) => Arc::new(rpc),
            None => {
                warn!("No lock rpc_url configured, locks are process-local");
                Arc::new(LocalLockBackend::new())
            }
        };

        let backends = Backends {
            locks,
            pubsub,
            store,
            clock: Arc::new(SystemClock),
        };
        Ok(Self::new(config, backends))
    }

    pub fn config(&self) -> &ResilienceConfig {
        &self.config
    }

    pub fn circuit_breakers(&self) -> &CircuitBreakerRegistry {
        &self.circuits
    }

    pub fn locks(&self) -> &LockCoordinator {
        &self.locks
    }

    pub fn subscriptions(&self) -> &SubscriptionManager {
        &self.subscriptions
    }

    pub fn outbox(&self) -> &Arc<RetryQueue> {
        &self.outbox
    }

    /// Logout/teardown: release every held lock and close every channel.
    pub async fn end_session(&self) -> SessionTeardown {
        let released_locks = self.locks.release_all_locks().await;
        let closed_channels = self.subscriptions.unsubscribe_all();
        info!(released_locks, closed_channels, "Session ended");

        SessionTeardown {
            released_locks,
            closed_channels,
        }
    }
}
