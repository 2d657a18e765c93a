//! Connection metrics and health score for realtime channels.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tracing::debug;

use crate::clock::Clock;

/// A recent error costs this much health for [`RECENT_ERROR_WINDOW_MS`].
const RECENT_ERROR_PENALTY: f64 = 0.2;
const RECENT_ERROR_WINDOW_MS: u64 = 60_000;
/// Latency at which the latency penalty would reach 1.0; capped at 0.3.
const LATENCY_SCALE_MS: f64 = 5_000.0;
const MAX_LATENCY_PENALTY: f64 = 0.3;

/// Snapshot of connection metrics across all channels.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConnectionMetrics {
    pub total_attempts: u64,
    pub success_count: u64,
    /// Errors and timeouts.
    pub failure_count: u64,
    pub average_latency_ms: u64,
    pub last_connected_at_ms: Option<u64>,
    pub last_error_at_ms: Option<u64>,
}

#[derive(Debug, Default)]
struct TrackerState {
    metrics: ConnectionMetrics,
    latencies: VecDeque<u64>,
}

/// Accumulates connection attempts, outcomes and a rolling latency window.
#[derive(Debug)]
pub struct HealthTracker {
    clock: Arc<dyn Clock>,
    window: usize,
    state: Mutex<TrackerState>,
}

impl HealthTracker {
    pub fn new(clock: Arc<dyn Clock>, window: usize) -> Self {
        Self {
            clock,
            window: window.max(1),
            state: Mutex::new(TrackerState::default()),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, TrackerState> {
        self.state.lock().expect("health tracker mutex poisoned")
    }

    pub fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    pub fn record_attempt(&self) {
        self.state().metrics.total_attempts += 1;
    }

    pub fn record_success(&self, latency_ms: u64) {
        let now = self.clock.now_ms();
        let mut state = self.state();

        state.latencies.push_back(latency_ms);
        while state.latencies.len() > self.window {
            state.latencies.pop_front();
        }
        let sum: u64 = state.latencies.iter().sum();
        let average = (sum as f64 / state.latencies.len() as f64).round() as u64;

        state.metrics.success_count += 1;
        state.metrics.average_latency_ms = average;
        state.metrics.last_connected_at_ms = Some(now);

        debug!(latency_ms, average_latency_ms = average, "Connection success");
    }

    pub fn record_failure(&self) {
        let now = self.clock.now_ms();
        let mut state = self.state();
        state.metrics.failure_count += 1;
        state.metrics.last_error_at_ms = Some(now);
    }

    pub fn snapshot(&self) -> ConnectionMetrics {
        self.state().metrics.clone()
    }

    /// 0-100. Success rate minus latency and recent-error penalties; 100 with no data.
    pub fn health_score(&self) -> u8 {
        let metrics = self.snapshot();
        if metrics.total_attempts == 0 {
            return 100;
        }

        let success_rate = metrics.success_count as f64 / metrics.total_attempts as f64;
        let latency_penalty =
            (metrics.average_latency_ms as f64 / LATENCY_SCALE_MS).min(MAX_LATENCY_PENALTY);
        let now = self.clock.now_ms();
        let error_penalty = match metrics.last_error_at_ms {
            Some(at) if now.saturating_sub(at) < RECENT_ERROR_WINDOW_MS => RECENT_ERROR_PENALTY,
            _ => 0.0,
        };

        let score = ((success_rate - latency_penalty - error_penalty) * 100.0).round();
        score.clamp(0.0, 100.0) as u8
    }

    pub fn reset(&self) {
        *self.state() = TrackerState::default();
        debug!("Connection metrics reset");
    }

    pub fn summary(&self) -> String {
        let metrics = self.snapshot();
        let success_rate = if metrics.total_attempts > 0 {
            format!(
                "{:.1}",
                metrics.success_count as f64 / metrics.total_attempts as f64 * 100.0
            )
        } else {
            "100".to_string()
        };

        format!(
            "Connections: {}/{} ({}%), Avg Latency: {}ms, Health: {}%",
            metrics.success_count,
            metrics.total_attempts,
            success_rate,
            metrics.average_latency_ms,
            self.health_score()
        )
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::clock::ManualClock;

    fn tracker() -> (HealthTracker, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(1_000_000));
        (HealthTracker::new(clock.clone(), 20), clock)
    }

    #[test]
    fn test_no_attempts_is_healthy() {
        let (tracker, _) = tracker();
        assert_eq!(tracker.health_score(), 100);
        assert_eq!(
            tracker.summary(),
            "Connections: 0/0 (100%), Avg Latency: 0ms, Health: 100%"
        );
    }

    #[test]
    fn test_score_penalizes_latency_and_recent_errors() {
        let (tracker, clock) = tracker();
        for _ in 0..4 {
            tracker.record_attempt();
        }
        tracker.record_success(500);
        tracker.record_success(1_500);
        tracker.record_success(1_000);
        tracker.record_failure();

        // 0.75 success rate, 1000ms avg => 0.2 latency penalty, recent error => 0.2
        assert_eq!(tracker.snapshot().average_latency_ms, 1_000);
        assert_eq!(tracker.health_score(), 35);

        clock.advance(Duration::from_millis(60_000));
        assert_eq!(tracker.health_score(), 55);
        assert_eq!(
            tracker.summary(),
            "Connections: 3/4 (75.0%), Avg Latency: 1000ms, Health: 55%"
        );
    }

    #[test]
    fn test_latency_penalty_is_capped_and_score_clamped() {
        let (tracker, _) = tracker();
        tracker.record_attempt();
        tracker.record_attempt();
        tracker.record_success(60_000);
        tracker.record_failure();
        // 0.5 - 0.3 - 0.2
        assert_eq!(tracker.health_score(), 0);
    }

    #[test]
    fn test_latency_window_is_rolling() {
        let clock = Arc::new(ManualClock::new(0));
        let tracker = HealthTracker::new(clock, 3);
        for latency in [900, 900, 900, 100, 100, 100] {
            tracker.record_attempt();
            tracker.record_success(latency);
        }
        assert_eq!(tracker.snapshot().average_latency_ms, 100);
    }

    #[test]
    fn test_reset() {
        let (tracker, clock) = tracker();
        tracker.record_attempt();
        tracker.record_success(10);
        assert_eq!(tracker.snapshot().last_connected_at_ms, Some(clock.now_ms()));

        tracker.reset();
        assert_eq!(tracker.snapshot(), ConnectionMetrics::default());
    }
}
