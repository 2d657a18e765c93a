//! Replaying queued messages once connectivity returns.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, info, warn};

use super::message::QueuedMessage;
use super::queue::RetryQueue;
use super::store::PersistenceError;

pub type SendError = Box<dyn std::error::Error + Send + Sync>;

/// Delivers one queued message to its recipient.
#[async_trait]
pub trait MessageSender: Send + Sync {
    async fn send(&self, message: &QueuedMessage) -> Result<(), SendError>;
}

/// Outcome of one replay pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReplayReport {
    pub attempted: usize,
    pub delivered: usize,
    pub failed: usize,
    pub dead_lettered: usize,
    /// Pending messages still inside their backoff window.
    pub skipped: usize,
}

struct ReplayFlag<'a>(&'a AtomicBool);

impl Drop for ReplayFlag<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Resend every eligible pending message, oldest first.
///
/// Delivered messages are removed; failures count a retry. A replay already
/// running on `queue` makes this call a no-op.
pub async fn replay_pending(
    queue: &RetryQueue,
    sender: &dyn MessageSender,
) -> Result<ReplayReport, PersistenceError> {
    if queue.replaying.swap(true, Ordering::AcqRel) {
        debug!("Outbox replay already in progress");
        return Ok(ReplayReport::default());
    }
    let _flag = ReplayFlag(&queue.replaying);

    let max_retries = queue.max_retries();
    let pending = queue.list_pending(max_retries).await?;
    let mut report = ReplayReport::default();

    for message in pending {
        if !queue.should_retry(&message) {
            report.skipped += 1;
            continue;
        }

        report.attempted += 1;
        match sender.send(&message).await {
            Ok(()) => {
                queue.mark_sent(&message.id).await?;
                report.delivered += 1;
            }
            Err(e) => {
                report.failed += 1;
                warn!(
                    message_id = %message.id,
                    retries = message.retries,
                    error = %e,
                    "Queued message resend failed"
                );
                if let Some(updated) = queue.increment_retry(&message.id).await? {
                    if updated.is_dead_lettered(max_retries) {
                        report.dead_lettered += 1;
                    }
                }
            }
        }
    }

    if report.attempted > 0 || report.skipped > 0 {
        info!(
            attempted = report.attempted,
            delivered = report.delivered,
            failed = report.failed,
            dead_lettered = report.dead_lettered,
            skipped = report.skipped,
            "Outbox replay finished"
        );
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use tokio::sync::Notify;

    use super::*;
    use crate::clock::ManualClock;
    use crate::config::OutboxConfig;
    use crate::outbox::message::NewMessage;
    use crate::outbox::store::MemoryStore;

    /// Fails for recipients in `offline`, records everything else.
    #[derive(Default)]
    struct RecordingSender {
        offline: HashSet<String>,
        sent: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl MessageSender for RecordingSender {
        async fn send(&self, message: &QueuedMessage) -> Result<(), SendError> {
            if self.offline.contains(&message.recipient_id) {
                return Err("recipient unreachable".into());
            }
            self.sent.lock().unwrap().push(message.body.clone());
            Ok(())
        }
    }

    fn queue() -> (RetryQueue, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(50_000));
        let queue = RetryQueue::new(
            Arc::new(MemoryStore::new()),
            OutboxConfig::default(),
            clock.clone(),
        );
        (queue, clock)
    }

    #[tokio::test]
    async fn test_replay_delivers_in_enqueue_order() {
        let (queue, _) = queue();
        for body in ["one", "two", "three"] {
            queue.enqueue(NewMessage::new("renter-1", body)).await.unwrap();
        }
        let sender = RecordingSender::default();

        let report = replay_pending(&queue, &sender).await.unwrap();
        assert_eq!(
            report,
            ReplayReport {
                attempted: 3,
                delivered: 3,
                ..ReplayReport::default()
            }
        );
        assert_eq!(*sender.sent.lock().unwrap(), ["one", "two", "three"]);
        assert!(queue.list_pending(5).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failures_back_off_then_dead_letter() {
        let (queue, clock) = queue();
        queue.enqueue(NewMessage::new("owner-offline", "ping")).await.unwrap();
        let sender = RecordingSender {
            offline: HashSet::from(["owner-offline".to_string()]),
            ..RecordingSender::default()
        };

        let first = replay_pending(&queue, &sender).await.unwrap();
        assert_eq!(first.failed, 1);

        // Still inside the 2s window after the first failure.
        let second = replay_pending(&queue, &sender).await.unwrap();
        assert_eq!(second.skipped, 1);
        assert_eq!(second.attempted, 0);

        let mut last = ReplayReport::default();
        for retries in 1..5u32 {
            clock.advance(Duration::from_millis(1_000 * 2u64.pow(retries)));
            last = replay_pending(&queue, &sender).await.unwrap();
            assert_eq!(last.attempted, 1);
        }
        assert_eq!(last.dead_lettered, 1);
        assert_eq!(queue.list_dead_lettered(5).await.unwrap().len(), 1);

        clock.advance(Duration::from_secs(3_600));
        assert_eq!(replay_pending(&queue, &sender).await.unwrap(), ReplayReport::default());
    }

    /// Blocks every send until released.
    struct GatedSender {
        entered: Notify,
        release: Notify,
    }

    #[async_trait]
    impl MessageSender for GatedSender {
        async fn send(&self, _message: &QueuedMessage) -> Result<(), SendError> {
            self.entered.notify_one();
            self.release.notified().await;
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_concurrent_replay_is_a_noop() {
        let (queue, _) = queue();
        queue.enqueue(NewMessage::new("u", "only")).await.unwrap();
        let queue = Arc::new(queue);
        let sender = Arc::new(GatedSender {
            entered: Notify::new(),
            release: Notify::new(),
        });

        let running = {
            let queue = queue.clone();
            let sender = sender.clone();
            tokio::spawn(async move { replay_pending(&queue, sender.as_ref()).await })
        };
        sender.entered.notified().await;

        let concurrent = replay_pending(&queue, sender.as_ref()).await.unwrap();
        assert_eq!(concurrent, ReplayReport::default());

        sender.release.notify_one();
        let report = running.await.unwrap().unwrap();
        assert_eq!(report.delivered, 1);

        // The flag is cleared once the first pass finishes.
        queue.enqueue(NewMessage::new("u", "later")).await.unwrap();
        sender.release.notify_one();
        assert_eq!(replay_pending(&queue, sender.as_ref()).await.unwrap().delivered, 1);
    }
}
