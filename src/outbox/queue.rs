//! Durable retry queue over an [`OutboxStore`].

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::message::{NewMessage, QueuedMessage};
use super::store::{OutboxStore, PersistenceError};
use crate::clock::Clock;
use crate::config::OutboxConfig;
use crate::observability::metrics;
use crate::resilience::backoff::uncapped_delay;

/// Outbox counts for dashboards and the CLI.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OutboxStats {
    pub total: usize,
    pub pending: usize,
    pub dead_lettered: usize,
    /// Pending messages whose backoff has elapsed.
    pub ready: usize,
    pub oldest_enqueued_at_ms: Option<u64>,
    pub max_retries: u32,
}

/// Persists failed sends and decides when each may be retried.
///
/// Owns no timers; eligibility is a pure function of the record and the clock.
#[derive(Debug)]
pub struct RetryQueue {
    store: Arc<dyn OutboxStore>,
    clock: Arc<dyn Clock>,
    config: OutboxConfig,
    /// Serializes read-modify-write cycles on records.
    mutation: Mutex<()>,
    pub(super) replaying: AtomicBool,
}

impl RetryQueue {
    pub fn new(store: Arc<dyn OutboxStore>, config: OutboxConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            config,
            mutation: Mutex::new(()),
            replaying: AtomicBool::new(false),
        }
    }

    /// Configured retry budget.
    pub fn max_retries(&self) -> u32 {
        self.config.max_retries
    }

    pub fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    /// Persist a failed send with no attempts recorded.
    pub async fn enqueue(&self, message: NewMessage) -> Result<QueuedMessage, PersistenceError> {
        let queued = QueuedMessage::from_new(Uuid::new_v4().to_string(), message, self.now_ms());

        let _guard = self.mutation.lock().await;
        self.store.put(queued.clone()).await?;
        info!(
            message_id = %queued.id,
            recipient_id = %queued.recipient_id,
            "Message queued for retry"
        );
        self.record_pending().await;

        Ok(queued)
    }

    pub async fn get(&self, id: &str) -> Result<Option<QueuedMessage>, PersistenceError> {
        self.store.get(id).await
    }

    /// Messages still under `max_retries`, in enqueue order.
    pub async fn list_pending(&self, max_retries: u32) -> Result<Vec<QueuedMessage>, PersistenceError> {
        let all = self.store.get_all().await?;
        Ok(all
            .into_iter()
            .filter(|m| !m.is_dead_lettered(max_retries))
            .collect())
    }

    /// Messages that exhausted `max_retries`.
    pub async fn list_dead_lettered(
        &self,
        max_retries: u32,
    ) -> Result<Vec<QueuedMessage>, PersistenceError> {
        let all = self.store.get_all().await?;
        Ok(all
            .into_iter()
            .filter(|m| m.is_dead_lettered(max_retries))
            .collect())
    }

    /// Whether `message` is within budget and its backoff (`base * 2^retries`) has elapsed.
    pub fn should_retry(&self, message: &QueuedMessage) -> bool {
        if message.is_dead_lettered(self.config.max_retries) {
            return false;
        }
        match message.last_attempt_at_ms {
            None => true,
            Some(last) => {
                let backoff = uncapped_delay(message.retries, self.config.base_backoff_ms);
                self.now_ms().saturating_sub(last) as u128 >= backoff.as_millis()
            }
        }
    }

    /// Delivered: drop the record. Returns whether it existed.
    pub async fn mark_sent(&self, id: &str) -> Result<bool, PersistenceError> {
        let _guard = self.mutation.lock().await;
        let removed = self.store.delete(id).await?;
        if removed {
            debug!(message_id = %id, "Queued message delivered");
        }
        self.record_pending().await;
        Ok(removed)
    }

    /// Count a failed attempt. Returns the updated record, `None` if unknown.
    pub async fn increment_retry(&self, id: &str) -> Result<Option<QueuedMessage>, PersistenceError> {
        let _guard = self.mutation.lock().await;
        let Some(mut message) = self.store.get(id).await? else {
            return Ok(None);
        };

        message.retries += 1;
        message.last_attempt_at_ms = Some(self.now_ms());
        self.store.put(message.clone()).await?;

        if message.retries == self.config.max_retries {
            metrics::record_dead_letter();
            warn!(
                message_id = %message.id,
                retries = message.retries,
                "Message dead-lettered after exhausting retries"
            );
        } else {
            debug!(message_id = %message.id, retries = message.retries, "Retry recorded");
        }
        self.record_pending().await;

        Ok(Some(message))
    }

    /// Delete dead-lettered messages. Returns how many were removed.
    pub async fn purge_dead_lettered(&self, max_retries: u32) -> Result<usize, PersistenceError> {
        let _guard = self.mutation.lock().await;
        let dead = self.list_dead_lettered(max_retries).await?;

        let mut purged = 0;
        for message in &dead {
            if self.store.delete(&message.id).await? {
                purged += 1;
            }
        }

        if purged > 0 {
            info!(purged, "Purged dead-lettered messages");
        }
        self.record_pending().await;
        Ok(purged)
    }

    pub async fn stats(&self) -> Result<OutboxStats, PersistenceError> {
        let all = self.store.get_all().await?;
        let max_retries = self.config.max_retries;

        let mut stats = OutboxStats {
            total: all.len(),
            max_retries,
            oldest_enqueued_at_ms: all.iter().map(|m| m.enqueued_at_ms).min(),
            ..OutboxStats::default()
        };
        for message in &all {
            if message.is_dead_lettered(max_retries) {
                stats.dead_lettered += 1;
            } else {
                stats.pending += 1;
                if self.should_retry(message) {
                    stats.ready += 1;
                }
            }
        }
        Ok(stats)
    }

    async fn record_pending(&self) {
        if let Ok(pending) = self.list_pending(self.config.max_retries).await {
            metrics::record_outbox_pending(pending.len());
        }
    }
}
