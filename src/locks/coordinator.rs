//! Advisory lock coordinator.
//!
//! Tracks the locks this process holds, arms a safety timer per lock and
//! releases through the configured [`LockBackend`].

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use dashmap::DashMap;
use serde::Serialize;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use super::backend::LockBackend;
use super::key::{LockKey, LockType};
use crate::clock::Clock;
use crate::config::LockSettings;
use crate::observability::metrics;
use crate::resilience::backoff::linear_delay;

/// Outcome of a single non-blocking acquisition attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockAttempt {
    pub acquired: bool,
    pub lock_key: LockKey,
    /// Backend error text; `None` for plain contention.
    pub error: Option<String>,
}

/// A lock currently tracked by this coordinator.
#[derive(Debug, Clone, Serialize)]
pub struct ActiveLock {
    pub lock_key: LockKey,
    pub lock_type: LockType,
    pub resource_id: String,
    pub acquired_at_ms: u64,
    pub auto_release: bool,
}

/// Options for [`LockCoordinator::with_lock`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockOptions {
    /// Retries after the first attempt.
    pub retry_attempts: u32,
    /// Delay step; attempt `n` waits `retry_delay * n` before the next try.
    pub retry_delay: Duration,
    /// Auto-release timeout. `None` uses the configured default.
    pub timeout: Option<Duration>,
    /// Message reported when the lock cannot be taken.
    pub fail_message: Option<String>,
}

impl LockOptions {
    pub fn from_settings(settings: &LockSettings) -> Self {
        Self {
            retry_attempts: settings.retry_attempts,
            retry_delay: Duration::from_millis(settings.retry_delay_ms),
            timeout: None,
            fail_message: None,
        }
    }

    pub fn retry(mut self, attempts: u32, delay: Duration) -> Self {
        self.retry_attempts = attempts;
        self.retry_delay = delay;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn fail_message(mut self, message: impl Into<String>) -> Self {
        self.fail_message = Some(message.into());
        self
    }
}

impl Default for LockOptions {
    fn default() -> Self {
        Self::from_settings(&LockSettings::default())
    }
}

#[derive(Debug, Error)]
pub enum LockError<E> {
    #[error("{message}")]
    Unavailable { lock_key: LockKey, message: String },

    #[error("{0}")]
    Operation(E),
}

impl<E> LockError<E> {
    pub fn is_unavailable(&self) -> bool {
        matches!(self, LockError::Unavailable { .. })
    }
}

#[derive(Debug)]
struct HeldLock {
    lock_type: LockType,
    resource_id: String,
    acquired_at_ms: u64,
    /// Distinguishes successive acquisitions of the same key.
    token: u64,
    auto_release: Option<JoinHandle<()>>,
}

impl HeldLock {
    fn cancel_timer(&mut self) {
        if let Some(handle) = self.auto_release.take() {
            handle.abort();
        }
    }
}

#[derive(Debug)]
struct CoordinatorInner {
    backend: Arc<dyn LockBackend>,
    clock: Arc<dyn Clock>,
    settings: LockSettings,
    held: DashMap<LockKey, HeldLock>,
    next_token: AtomicU64,
}

/// Session-scoped advisory lock coordinator. Cheap to clone.
#[derive(Debug, Clone)]
pub struct LockCoordinator {
    inner: Arc<CoordinatorInner>,
}

impl LockCoordinator {
    pub fn new(backend: Arc<dyn LockBackend>, settings: LockSettings, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Arc::new(CoordinatorInner {
                backend,
                clock,
                settings,
                held: DashMap::new(),
                next_token: AtomicU64::new(1),
            }),
        }
    }

    /// Default [`LockOptions`] from the configured settings.
    pub fn default_options(&self) -> LockOptions {
        LockOptions::from_settings(&self.inner.settings)
    }

    /// Single non-blocking attempt.
    ///
    /// `timeout` of `None` uses the configured default; a zero duration arms no timer.
    pub async fn try_lock(
        &self,
        lock_type: LockType,
        resource_id: &str,
        timeout: Option<Duration>,
    ) -> LockAttempt {
        self.acquire(lock_type, resource_id, timeout).await.0
    }

    async fn acquire(
        &self,
        lock_type: LockType,
        resource_id: &str,
        timeout: Option<Duration>,
    ) -> (LockAttempt, Option<u64>) {
        let lock_key = LockKey::derive(lock_type, resource_id);

        match self.inner.backend.try_acquire(lock_key).await {
            Ok(true) => {
                let timeout = timeout
                    .unwrap_or_else(|| Duration::from_millis(self.inner.settings.default_timeout_ms));
                let token = self.track(lock_type, resource_id, lock_key, timeout);
                metrics::record_lock_attempt(lock_type.as_str(), "acquired");
                debug!(
                    lock_key = %lock_key,
                    lock_type = %lock_type,
                    resource_id = %resource_id,
                    "Lock acquired"
                );
                let attempt = LockAttempt {
                    acquired: true,
                    lock_key,
                    error: None,
                };
                (attempt, Some(token))
            }
            Ok(false) => {
                metrics::record_lock_attempt(lock_type.as_str(), "contended");
                debug!(
                    lock_key = %lock_key,
                    lock_type = %lock_type,
                    resource_id = %resource_id,
                    "Lock held elsewhere"
                );
                let attempt = LockAttempt {
                    acquired: false,
                    lock_key,
                    error: None,
                };
                (attempt, None)
            }
            Err(e) => {
                metrics::record_lock_attempt(lock_type.as_str(), "error");
                error!(
                    lock_key = %lock_key,
                    lock_type = %lock_type,
                    resource_id = %resource_id,
                    error = %e,
                    "Lock acquisition failed"
                );
                let attempt = LockAttempt {
                    acquired: false,
                    lock_key,
                    error: Some(e.to_string()),
                };
                (attempt, None)
            }
        }
    }

    fn track(&self, lock_type: LockType, resource_id: &str, key: LockKey, timeout: Duration) -> u64 {
        let token = self.inner.next_token.fetch_add(1, Ordering::Relaxed);
        let held = HeldLock {
            lock_type,
            resource_id: resource_id.to_string(),
            acquired_at_ms: self.inner.clock.now_ms(),
            token,
            auto_release: None,
        };

        // Re-entrant grant of a key we already track: the old timer must not fire.
        if let Some(mut previous) = self.inner.held.insert(key, held) {
            previous.cancel_timer();
        }

        if !timeout.is_zero() {
            let weak = Arc::downgrade(&self.inner);
            let handle = tokio::spawn(auto_release_after(weak, key, token, timeout));
            match self.inner.held.get_mut(&key) {
                Some(mut entry) if entry.token == token => entry.auto_release = Some(handle),
                // Timer already fired or the lock was released; the task is done with it.
                _ => drop(handle),
            }
        }

        metrics::record_locks_held(self.inner.held.len());
        token
    }

    /// Release a lock. Stops its timer and always asks the backend, tracked or not.
    ///
    /// Returns the backend's answer; `false` on backend failure.
    pub async fn unlock(&self, lock_type: LockType, resource_id: &str) -> bool {
        let key = LockKey::derive(lock_type, resource_id);
        if let Some((_, mut held)) = self.inner.held.remove(&key) {
            held.cancel_timer();
        }
        metrics::record_locks_held(self.inner.held.len());
        self.release_remote(key).await
    }

    /// Release only if the tracked entry is still the acquisition identified by `token`.
    async fn release_token(&self, key: LockKey, token: u64) -> bool {
        match self.inner.held.remove_if(&key, |_, held| held.token == token) {
            Some((_, mut held)) => {
                held.cancel_timer();
                metrics::record_locks_held(self.inner.held.len());
                self.release_remote(key).await
            }
            None => false,
        }
    }

    async fn release_remote(&self, key: LockKey) -> bool {
        match self.inner.backend.release(key).await {
            Ok(released) => {
                if !released {
                    debug!(lock_key = %key, "Backend reported lock was not held");
                }
                released
            }
            Err(e) => {
                error!(lock_key = %key, error = %e, "Lock release failed");
                false
            }
        }
    }

    /// Acquire, run `operation`, release. The lock is released exactly once,
    /// including when `operation` fails, panics or is cancelled.
    ///
    /// Makes `1 + retry_attempts` attempts, waiting `retry_delay * n` after attempt `n`.
    pub async fn with_lock<T, E, F, Fut>(
        &self,
        lock_type: LockType,
        resource_id: &str,
        options: LockOptions,
        operation: F,
    ) -> Result<T, LockError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let lock_key = LockKey::derive(lock_type, resource_id);
        let total_attempts = options.retry_attempts.saturating_add(1);
        let mut last_error = None;
        let mut acquired = None;

        for attempt in 1..=total_attempts {
            let (result, token) = self.acquire(lock_type, resource_id, options.timeout).await;
            if token.is_some() {
                acquired = token;
                break;
            }
            if result.error.is_some() {
                last_error = result.error;
            }
            if attempt < total_attempts {
                let delay = linear_delay(attempt, options.retry_delay);
                debug!(
                    lock_key = %lock_key,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "Retrying lock acquisition"
                );
                tokio::time::sleep(delay).await;
            }
        }

        let Some(token) = acquired else {
            let message = options
                .fail_message
                .or(last_error)
                .unwrap_or_else(|| {
                    format!("Could not acquire {} lock for {}", lock_type, resource_id)
                });
            warn!(
                lock_key = %lock_key,
                lock_type = %lock_type,
                resource_id = %resource_id,
                attempts = total_attempts,
                "Lock unavailable"
            );
            return Err(LockError::Unavailable { lock_key, message });
        };

        let guard = ReleaseGuard {
            coordinator: Some(self.clone()),
            key: lock_key,
            token,
        };
        let result = operation().await;
        guard.release().await;

        result.map_err(LockError::Operation)
    }

    /// Whether this coordinator currently tracks the lock.
    pub fn is_lock_held(&self, lock_type: LockType, resource_id: &str) -> bool {
        self.inner
            .held
            .contains_key(&LockKey::derive(lock_type, resource_id))
    }

    /// Tracked locks, oldest first.
    pub fn active_locks(&self) -> Vec<ActiveLock> {
        let mut locks: Vec<ActiveLock> = self
            .inner
            .held
            .iter()
            .map(|entry| ActiveLock {
                lock_key: *entry.key(),
                lock_type: entry.lock_type,
                resource_id: entry.resource_id.clone(),
                acquired_at_ms: entry.acquired_at_ms,
                auto_release: entry.auto_release.is_some(),
            })
            .collect();
        locks.sort_by_key(|l| (l.acquired_at_ms, l.lock_key));
        locks
    }

    /// Release every tracked lock. Returns how many the backend confirmed.
    pub async fn release_all_locks(&self) -> usize {
        let keys: Vec<LockKey> = self.inner.held.iter().map(|e| *e.key()).collect();
        let mut released = 0;

        for key in keys {
            if let Some((_, mut held)) = self.inner.held.remove(&key) {
                held.cancel_timer();
                if self.release_remote(key).await {
                    released += 1;
                }
            }
        }

        metrics::record_locks_held(self.inner.held.len());
        debug!(released, "Released all tracked locks");
        released
    }
}

async fn auto_release_after(
    inner: Weak<CoordinatorInner>,
    key: LockKey,
    token: u64,
    timeout: Duration,
) {
    tokio::time::sleep(timeout).await;

    let Some(inner) = inner.upgrade() else {
        return;
    };
    // Leave our own handle alone; this task is the one running.
    let Some((_, held)) = inner.held.remove_if(&key, |_, held| held.token == token) else {
        return;
    };

    let coordinator = LockCoordinator { inner };
    metrics::record_locks_held(coordinator.inner.held.len());
    metrics::record_lock_auto_release(held.lock_type.as_str());
    warn!(
        lock_key = %key,
        lock_type = %held.lock_type,
        resource_id = %held.resource_id,
        timeout_ms = timeout.as_millis() as u64,
        "Lock auto-released after timeout"
    );
    coordinator.release_remote(key).await;
}

/// Releases the guarded acquisition if dropped before [`ReleaseGuard::release`].
struct ReleaseGuard {
    coordinator: Option<LockCoordinator>,
    key: LockKey,
    token: u64,
}

impl ReleaseGuard {
    async fn release(mut self) {
        if let Some(coordinator) = self.coordinator.take() {
            coordinator.release_token(self.key, self.token).await;
        }
    }
}

impl Drop for ReleaseGuard {
    fn drop(&mut self) {
        let Some(coordinator) = self.coordinator.take() else {
            return;
        };
        let (key, token) = (self.key, self.token);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    coordinator.release_token(key, token).await;
                });
            }
            Err(_) => warn!(lock_key = %key, "No runtime to release abandoned lock"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::clock::ManualClock;
    use crate::locks::backend::{LocalLockBackend, LockBackendError};

    /// Backend answering acquisitions from a script, then granting.
    #[derive(Debug, Default)]
    struct ScriptedBackend {
        acquire: Mutex<VecDeque<Result<bool, LockBackendError>>>,
        release_fails: Mutex<bool>,
        acquire_calls: AtomicU64,
        releases: Mutex<Vec<LockKey>>,
    }

    impl ScriptedBackend {
        fn with_script(script: Vec<Result<bool, LockBackendError>>) -> Self {
            Self {
                acquire: Mutex::new(script.into()),
                ..Default::default()
            }
        }

        fn releases(&self) -> Vec<LockKey> {
            self.releases.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl LockBackend for ScriptedBackend {
        async fn try_acquire(&self, _key: LockKey) -> Result<bool, LockBackendError> {
            self.acquire_calls.fetch_add(1, Ordering::SeqCst);
            self.acquire.lock().unwrap().pop_front().unwrap_or(Ok(true))
        }

        async fn release(&self, key: LockKey) -> Result<bool, LockBackendError> {
            self.releases.lock().unwrap().push(key);
            if *self.release_fails.lock().unwrap() {
                return Err(LockBackendError::Transport("connection reset".into()));
            }
            Ok(true)
        }
    }

    fn coordinator_with(backend: Arc<dyn LockBackend>) -> (LockCoordinator, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(1_000));
        let coordinator = LockCoordinator::new(backend, LockSettings::default(), clock.clone());
        (coordinator, clock)
    }

    #[tokio::test]
    async fn test_try_lock_tracks_and_unlock_releases() {
        let backend = Arc::new(LocalLockBackend::new());
        let (coordinator, _) = coordinator_with(backend.clone());

        let attempt = coordinator
            .try_lock(LockType::PaymentProcessing, "booking-123", None)
            .await;
        assert!(attempt.acquired);
        assert_eq!(attempt.error, None);
        assert_eq!(
            attempt.lock_key,
            LockKey::derive(LockType::PaymentProcessing, "booking-123")
        );
        assert!(coordinator.is_lock_held(LockType::PaymentProcessing, "booking-123"));
        assert!(backend.is_held(attempt.lock_key));

        assert!(coordinator.unlock(LockType::PaymentProcessing, "booking-123").await);
        assert!(!coordinator.is_lock_held(LockType::PaymentProcessing, "booking-123"));
        assert!(!backend.is_held(attempt.lock_key));
    }

    #[tokio::test]
    async fn test_contention_is_not_an_error() {
        let backend = Arc::new(ScriptedBackend::with_script(vec![Ok(false)]));
        let (coordinator, _) = coordinator_with(backend);

        let attempt = coordinator
            .try_lock(LockType::WalletOperation, "wallet-9", None)
            .await;
        assert!(!attempt.acquired);
        assert_eq!(attempt.error, None);
        assert!(!coordinator.is_lock_held(LockType::WalletOperation, "wallet-9"));
    }

    #[tokio::test]
    async fn test_backend_error_is_reported() {
        let backend = Arc::new(ScriptedBackend::with_script(vec![Err(
            LockBackendError::Transport("Database error".into()),
        )]));
        let (coordinator, _) = coordinator_with(backend);

        let attempt = coordinator
            .try_lock(LockType::PaymentProcessing, "booking-1", None)
            .await;
        assert!(!attempt.acquired);
        assert!(attempt.error.unwrap().contains("Database error"));
        assert!(coordinator.active_locks().is_empty());
    }

    #[tokio::test]
    async fn test_unlock_forgets_lock_even_when_release_fails() {
        let backend = Arc::new(ScriptedBackend::default());
        *backend.release_fails.lock().unwrap() = true;
        let (coordinator, _) = coordinator_with(backend.clone());

        coordinator
            .try_lock(LockType::BookingCreate, "car-1", None)
            .await;
        assert!(!coordinator.unlock(LockType::BookingCreate, "car-1").await);
        assert!(!coordinator.is_lock_held(LockType::BookingCreate, "car-1"));
        assert_eq!(backend.releases().len(), 1);
    }

    #[tokio::test]
    async fn test_unlock_of_untracked_lock_still_asks_backend() {
        let backend = Arc::new(ScriptedBackend::default());
        let (coordinator, _) = coordinator_with(backend.clone());

        coordinator.unlock(LockType::CarAvailability, "car-7").await;
        assert_eq!(
            backend.releases(),
            vec![LockKey::derive(LockType::CarAvailability, "car-7")]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_auto_release_after_timeout() {
        let backend = Arc::new(LocalLockBackend::new());
        let (coordinator, _) = coordinator_with(backend.clone());

        let attempt = coordinator
            .try_lock(
                LockType::PayoutProcessing,
                "payout-1",
                Some(Duration::from_millis(1_000)),
            )
            .await;
        assert!(coordinator.active_locks()[0].auto_release);

        tokio::time::sleep(Duration::from_millis(999)).await;
        assert!(coordinator.is_lock_held(LockType::PayoutProcessing, "payout-1"));

        tokio::time::sleep(Duration::from_millis(2)).await;
        assert!(!coordinator.is_lock_held(LockType::PayoutProcessing, "payout-1"));
        assert!(!backend.is_held(attempt.lock_key));
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_timeout_arms_no_timer() {
        let backend = Arc::new(LocalLockBackend::new());
        let (coordinator, _) = coordinator_with(backend);

        coordinator
            .try_lock(LockType::PayoutProcessing, "payout-2", Some(Duration::ZERO))
            .await;
        assert!(!coordinator.active_locks()[0].auto_release);

        tokio::time::sleep(Duration::from_secs(3_600)).await;
        assert!(coordinator.is_lock_held(LockType::PayoutProcessing, "payout-2"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_timer_does_not_release_new_acquisition() {
        let backend = Arc::new(LocalLockBackend::new());
        let (coordinator, _) = coordinator_with(backend.clone());

        coordinator
            .try_lock(
                LockType::CarAvailability,
                "car-3",
                Some(Duration::from_millis(5_000)),
            )
            .await;
        coordinator.unlock(LockType::CarAvailability, "car-3").await;
        let attempt = coordinator
            .try_lock(LockType::CarAvailability, "car-3", Some(Duration::ZERO))
            .await;
        assert!(attempt.acquired);

        tokio::time::sleep(Duration::from_millis(6_000)).await;
        assert!(coordinator.is_lock_held(LockType::CarAvailability, "car-3"));
        assert!(backend.is_held(attempt.lock_key));
    }

    #[tokio::test]
    async fn test_with_lock_releases_after_success_and_failure() {
        let backend = Arc::new(LocalLockBackend::new());
        let (coordinator, _) = coordinator_with(backend.clone());
        let key = LockKey::derive(LockType::PaymentProcessing, "booking-5");

        let value = coordinator
            .with_lock(
                LockType::PaymentProcessing,
                "booking-5",
                LockOptions::default(),
                || async { Ok::<_, String>(42) },
            )
            .await
            .unwrap();
        assert_eq!(value, 42);
        assert!(!backend.is_held(key));

        let err = coordinator
            .with_lock(
                LockType::PaymentProcessing,
                "booking-5",
                LockOptions::default(),
                || async { Err::<(), _>("charge declined".to_string()) },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, LockError::Operation(ref msg) if msg == "charge declined"));
        assert!(!backend.is_held(key));
        assert!(coordinator.active_locks().is_empty());
    }

    #[tokio::test]
    async fn test_with_lock_unavailable_uses_fail_message() {
        let backend = Arc::new(ScriptedBackend::with_script(vec![Ok(false)]));
        let (coordinator, _) = coordinator_with(backend.clone());
        let ran = Arc::new(AtomicU64::new(0));

        let ran_op = ran.clone();
        let err = coordinator
            .with_lock(
                LockType::BookingCreate,
                "car-1",
                LockOptions::default().fail_message("Car is being booked by someone else"),
                || async move {
                    ran_op.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, String>(())
                },
            )
            .await
            .unwrap_err();

        assert!(err.is_unavailable());
        assert_eq!(err.to_string(), "Car is being booked by someone else");
        assert_eq!(ran.load(Ordering::SeqCst), 0);
        assert!(backend.releases().is_empty());
    }

    #[tokio::test]
    async fn test_with_lock_reports_last_backend_error() {
        let backend = Arc::new(ScriptedBackend::with_script(vec![
            Ok(false),
            Err(LockBackendError::Transport("Database error".into())),
        ]));
        let (coordinator, _) = coordinator_with(backend);

        let err = coordinator
            .with_lock(
                LockType::WalletOperation,
                "wallet-1",
                LockOptions::default().retry(1, Duration::from_millis(1)),
                || async { Ok::<_, String>(()) },
            )
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Database error"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_lock_retries_with_linear_delay() {
        let backend = Arc::new(ScriptedBackend::with_script(vec![Ok(false), Ok(false)]));
        let (coordinator, _) = coordinator_with(backend.clone());

        let start = tokio::time::Instant::now();
        let result = coordinator
            .with_lock(
                LockType::PaymentProcessing,
                "booking-7",
                LockOptions::default().retry(3, Duration::from_millis(100)),
                || async { Ok::<_, String>("done") },
            )
            .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(backend.acquire_calls.load(Ordering::SeqCst), 3);
        // 100ms after attempt 1, 200ms after attempt 2.
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(300));
        assert!(elapsed < Duration::from_millis(310));
        assert_eq!(backend.releases().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_lock_releases_once_when_timer_fired_first() {
        let backend = Arc::new(ScriptedBackend::default());
        let (coordinator, _) = coordinator_with(backend.clone());

        coordinator
            .with_lock(
                LockType::PayoutProcessing,
                "payout-9",
                LockOptions::default().timeout(Duration::from_millis(50)),
                || async {
                    tokio::time::sleep(Duration::from_millis(200)).await;
                    Ok::<_, String>(())
                },
            )
            .await
            .unwrap();

        assert_eq!(backend.releases().len(), 1);
    }

    #[tokio::test]
    async fn test_with_lock_releases_on_panic() {
        let backend = Arc::new(LocalLockBackend::new());
        let (coordinator, _) = coordinator_with(backend.clone());
        let key = LockKey::derive(LockType::WalletOperation, "wallet-panic");

        let task_coordinator = coordinator.clone();
        let task = tokio::spawn(async move {
            task_coordinator
                .with_lock(
                    LockType::WalletOperation,
                    "wallet-panic",
                    LockOptions::default(),
                    move || async move {
                        if key.value() != 0 {
                            panic!("operation blew up");
                        }
                        Ok::<_, String>(())
                    },
                )
                .await
        });
        assert!(task.await.is_err());

        for _ in 0..100 {
            if !backend.is_held(key) {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(!backend.is_held(key));
        assert!(!coordinator.is_lock_held(LockType::WalletOperation, "wallet-panic"));
    }

    #[tokio::test]
    async fn test_active_locks_and_release_all() {
        let backend = Arc::new(LocalLockBackend::new());
        let (coordinator, clock) = coordinator_with(backend.clone());

        coordinator
            .try_lock(LockType::PaymentProcessing, "resource-1", None)
            .await;
        clock.advance(Duration::from_millis(500));
        coordinator
            .try_lock(LockType::WalletOperation, "resource-2", None)
            .await;

        let active = coordinator.active_locks();
        assert_eq!(active.len(), 2);
        assert_eq!(active[0].resource_id, "resource-1");
        assert_eq!(active[0].acquired_at_ms, 1_000);
        assert_eq!(active[1].acquired_at_ms, 1_500);

        assert_eq!(coordinator.release_all_locks().await, 2);
        assert!(coordinator.active_locks().is_empty());
        assert_eq!(backend.held_count(), 0);
    }
}
