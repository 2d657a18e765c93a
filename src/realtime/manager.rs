//! Resilient subscription manager.
//!
//! One tracked entry per channel name. Each entry owns the broadcast/watch
//! senders its subscribers hold receivers for, so handles survive reconnects:
//! only the backend channel underneath is replaced.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::channel::{
    ChangeEvent, ChannelFilter, ChannelId, ChannelStatus, ConnectionStatus, PubSub,
};
use super::health::{ConnectionMetrics, HealthTracker};
use crate::clock::Clock;
use crate::config::RealtimeConfig;
use crate::observability::metrics;
use crate::resilience::backoff::{exponential_delay, with_jitter};

/// A caller's view of a subscription.
///
/// Dropping the handle only detaches this caller; the channel stays up until
/// [`SubscriptionManager::unsubscribe`].
#[derive(Debug)]
pub struct SubscriptionHandle {
    pub channel_name: String,
    pub events: broadcast::Receiver<ChangeEvent>,
    pub status: watch::Receiver<ConnectionStatus>,
    reused: bool,
}

impl SubscriptionHandle {
    /// Current status of the channel.
    pub fn status(&self) -> ConnectionStatus {
        *self.status.borrow()
    }

    /// Whether this handle attached to an already tracked channel.
    pub fn was_reused(&self) -> bool {
        self.reused
    }

    /// Next event. Errors when the channel was torn down or this caller lagged.
    pub async fn recv(&mut self) -> Result<ChangeEvent, broadcast::error::RecvError> {
        self.events.recv().await
    }
}

#[derive(Debug)]
struct ActiveChannel {
    filter: ChannelFilter,
    /// Bumped on every (re)open; late signals from older backend channels are dropped.
    generation: u64,
    retry_count: u32,
    exhausted: bool,
    connect_started_ms: Option<u64>,
    events: broadcast::Sender<ChangeEvent>,
    status: watch::Sender<ConnectionStatus>,
    backend: Option<ChannelId>,
    pump: Option<JoinHandle<()>>,
    reconnect: Option<JoinHandle<()>>,
}

impl ActiveChannel {
    fn handle(&self, channel_name: &str, reused: bool) -> SubscriptionHandle {
        SubscriptionHandle {
            channel_name: channel_name.to_string(),
            events: self.events.subscribe(),
            status: self.status.subscribe(),
            reused,
        }
    }

    fn detach_backend(&mut self, pubsub: &dyn PubSub) {
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
        if let Some(id) = self.backend.take() {
            pubsub.close(id);
        }
    }

    fn shutdown(&mut self, pubsub: &dyn PubSub) {
        if let Some(reconnect) = self.reconnect.take() {
            reconnect.abort();
        }
        self.detach_backend(pubsub);
        self.status.send_replace(ConnectionStatus::Disconnected);
    }
}

#[derive(Debug)]
struct ManagerInner {
    pubsub: Arc<dyn PubSub>,
    config: RealtimeConfig,
    health: HealthTracker,
    status: watch::Sender<ConnectionStatus>,
    channels: Mutex<HashMap<String, ActiveChannel>>,
    next_generation: AtomicU64,
}

impl Drop for ManagerInner {
    fn drop(&mut self) {
        if let Ok(channels) = self.channels.get_mut() {
            for (_, mut channel) in channels.drain() {
                channel.shutdown(self.pubsub.as_ref());
            }
        }
    }
}

/// Keeps named realtime subscriptions alive across backend failures.
#[derive(Debug, Clone)]
pub struct SubscriptionManager {
    inner: Arc<ManagerInner>,
}

impl SubscriptionManager {
    pub fn new(pubsub: Arc<dyn PubSub>, config: RealtimeConfig, clock: Arc<dyn Clock>) -> Self {
        let (status, _) = watch::channel(ConnectionStatus::Disconnected);
        let health = HealthTracker::new(clock, config.latency_window);
        Self {
            inner: Arc::new(ManagerInner {
                pubsub,
                config,
                health,
                status,
                channels: Mutex::new(HashMap::new()),
                next_generation: AtomicU64::new(1),
            }),
        }
    }

    fn channels(&self) -> MutexGuard<'_, HashMap<String, ActiveChannel>> {
        self.inner
            .channels
            .lock()
            .expect("subscription registry mutex poisoned")
    }

    /// Subscribe to `channel_name`, reusing a live subscription unless `force_new`.
    ///
    /// Channels that gave up reconnecting are replaced rather than reused.
    pub fn subscribe_with_retry(
        &self,
        channel_name: &str,
        filter: ChannelFilter,
        force_new: bool,
    ) -> SubscriptionHandle {
        let mut channels = self.channels();

        if !force_new {
            if let Some(existing) = channels.get(channel_name) {
                if !existing.exhausted {
                    debug!(channel = %channel_name, "Reusing existing channel");
                    return existing.handle(channel_name, true);
                }
            }
        }

        if let Some(mut previous) = channels.remove(channel_name) {
            previous.shutdown(self.inner.pubsub.as_ref());
        }

        let (events, _) = broadcast::channel(self.inner.config.event_buffer.max(1));
        let (status, _) = watch::channel(ConnectionStatus::Connecting);
        let mut channel = ActiveChannel {
            filter,
            generation: 0,
            retry_count: 0,
            exhausted: false,
            connect_started_ms: None,
            events,
            status,
            backend: None,
            pump: None,
            reconnect: None,
        };

        self.open_backend(channel_name, &mut channel);
        let handle = channel.handle(channel_name, false);
        channels.insert(channel_name.to_string(), channel);
        metrics::record_channel_count(channels.len());
        info!(channel = %channel_name, "Channel subscription created");

        handle
    }

    fn open_backend(&self, channel_name: &str, channel: &mut ActiveChannel) {
        channel.generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);
        channel.connect_started_ms = Some(self.inner.health.now_ms());
        self.inner.health.record_attempt();

        match self.inner.pubsub.open(channel_name, &channel.filter) {
            Ok(opened) => {
                channel.backend = Some(opened.id);
                channel.pump = Some(tokio::spawn(pump(
                    Arc::downgrade(&self.inner),
                    channel_name.to_string(),
                    channel.generation,
                    opened.events,
                    opened.status,
                    channel.events.clone(),
                )));
            }
            Err(e) => {
                warn!(channel = %channel_name, error = %e, "Failed to open channel");
                self.apply_status(channel_name, channel, ChannelStatus::ChannelError);
            }
        }
    }

    fn on_backend_status(&self, channel_name: &str, generation: u64, status: ChannelStatus) {
        let mut channels = self.channels();
        match channels.get_mut(channel_name) {
            Some(channel) if channel.generation == generation => {
                self.apply_status(channel_name, channel, status);
            }
            _ => debug!(channel = %channel_name, ?status, "Ignoring status from stale channel"),
        }
    }

    fn apply_status(&self, channel_name: &str, channel: &mut ActiveChannel, status: ChannelStatus) {
        match status {
            ChannelStatus::Subscribed => {
                let now = self.inner.health.now_ms();
                let latency = channel
                    .connect_started_ms
                    .take()
                    .map(|started| now.saturating_sub(started))
                    .unwrap_or(0);
                self.inner.health.record_success(latency);
                channel.retry_count = 0;
                channel.exhausted = false;
                self.report(channel, ConnectionStatus::Connected);
                info!(channel = %channel_name, latency_ms = latency, "Channel connected");
            }
            ChannelStatus::ChannelError => {
                self.inner.health.record_failure();
                channel.connect_started_ms = None;
                self.report(channel, ConnectionStatus::Error);
                warn!(channel = %channel_name, "Channel error");
                self.schedule_reconnect(channel_name, channel);
            }
            ChannelStatus::TimedOut => {
                self.inner.health.record_failure();
                channel.connect_started_ms = None;
                self.report(channel, ConnectionStatus::Disconnected);
                warn!(channel = %channel_name, "Channel timed out");
                self.schedule_reconnect(channel_name, channel);
            }
            ChannelStatus::Closed => {
                self.report(channel, ConnectionStatus::Disconnected);
                info!(channel = %channel_name, "Channel closed");
            }
        }
    }

    fn report(&self, channel: &ActiveChannel, status: ConnectionStatus) {
        channel.status.send_replace(status);
        self.inner.status.send_replace(status);
    }

    fn schedule_reconnect(&self, channel_name: &str, channel: &mut ActiveChannel) {
        if channel.reconnect.as_ref().is_some_and(|r| !r.is_finished()) {
            debug!(channel = %channel_name, "Reconnect already scheduled");
            return;
        }

        let max_retries = self.inner.config.max_retries;
        if channel.retry_count >= max_retries {
            channel.exhausted = true;
            self.report(channel, ConnectionStatus::Error);
            warn!(channel = %channel_name, max_retries, "Max reconnect attempts reached");
            return;
        }

        let delay = with_jitter(
            exponential_delay(
                channel.retry_count,
                self.inner.config.base_delay_ms,
                self.inner.config.max_delay_ms,
            ),
            self.inner.config.jitter_ratio,
        );
        channel.retry_count += 1;
        self.report(channel, ConnectionStatus::Connecting);
        metrics::record_reconnect();
        debug!(
            channel = %channel_name,
            delay_ms = delay.as_millis() as u64,
            attempt = channel.retry_count,
            max_retries,
            "Scheduling reconnect"
        );

        channel.reconnect = Some(tokio::spawn(reconnect_after(
            Arc::downgrade(&self.inner),
            channel_name.to_string(),
            channel.generation,
            delay,
        )));
    }

    fn reconnect(&self, channel_name: &str, generation: u64) {
        let mut channels = self.channels();
        let Some(channel) = channels.get_mut(channel_name) else {
            return;
        };
        if channel.generation != generation {
            return;
        }

        // This task is the one running; detach rather than abort.
        channel.reconnect = None;
        channel.detach_backend(self.inner.pubsub.as_ref());
        self.open_backend(channel_name, channel);
        debug!(channel = %channel_name, attempt = channel.retry_count, "Channel reopened");
    }

    /// Tear down the channel and forget its retry counter.
    pub fn unsubscribe(&self, channel_name: &str) -> bool {
        let mut channels = self.channels();
        let Some(mut channel) = channels.remove(channel_name) else {
            return false;
        };
        channel.shutdown(self.inner.pubsub.as_ref());
        metrics::record_channel_count(channels.len());
        info!(channel = %channel_name, "Channel unsubscribed");
        true
    }

    /// Tear down every tracked channel. Returns how many were removed.
    pub fn unsubscribe_all(&self) -> usize {
        let mut channels = self.channels();
        let count = channels.len();
        for (_, mut channel) in channels.drain() {
            channel.shutdown(self.inner.pubsub.as_ref());
        }
        metrics::record_channel_count(0);
        if count > 0 {
            info!(count, "All channels unsubscribed");
        }
        count
    }

    /// Last status reported by any channel.
    pub fn connection_status(&self) -> ConnectionStatus {
        *self.inner.status.borrow()
    }

    pub fn watch_connection_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.inner.status.subscribe()
    }

    pub fn channel_status(&self, channel_name: &str) -> Option<ConnectionStatus> {
        self.channels()
            .get(channel_name)
            .map(|channel| *channel.status.borrow())
    }

    pub fn retry_count(&self, channel_name: &str) -> Option<u32> {
        self.channels()
            .get(channel_name)
            .map(|channel| channel.retry_count)
    }

    /// Channels that are up or still trying to reconnect.
    pub fn active_channel_count(&self) -> usize {
        self.channels().values().filter(|c| !c.exhausted).count()
    }

    pub fn is_channel_active(&self, channel_name: &str) -> bool {
        self.channels()
            .get(channel_name)
            .is_some_and(|channel| !channel.exhausted)
    }

    pub fn connection_metrics(&self) -> ConnectionMetrics {
        self.inner.health.snapshot()
    }

    pub fn health_score(&self) -> u8 {
        self.inner.health.health_score()
    }

    pub fn reset_metrics(&self) {
        self.inner.health.reset();
    }

    pub fn metrics_summary(&self) -> String {
        self.inner.health.summary()
    }
}

/// Forwards backend events to subscribers and status to the manager.
async fn pump(
    inner: Weak<ManagerInner>,
    channel_name: String,
    generation: u64,
    mut events: mpsc::UnboundedReceiver<ChangeEvent>,
    mut status: mpsc::UnboundedReceiver<ChannelStatus>,
    subscribers: broadcast::Sender<ChangeEvent>,
) {
    loop {
        tokio::select! {
            Some(event) = events.recv() => {
                // No subscribers right now is fine.
                let _ = subscribers.send(event);
            }
            next = status.recv() => {
                let Some(next) = next else {
                    return;
                };
                let Some(inner) = inner.upgrade() else {
                    return;
                };
                SubscriptionManager { inner }.on_backend_status(&channel_name, generation, next);
            }
        }
    }
}

async fn reconnect_after(
    inner: Weak<ManagerInner>,
    channel_name: String,
    generation: u64,
    delay: Duration,
) {
    tokio::time::sleep(delay).await;
    if let Some(inner) = inner.upgrade() {
        SubscriptionManager { inner }.reconnect(&channel_name, generation);
    }
}
