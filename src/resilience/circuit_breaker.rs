//! Circuit breaker for remote dependency protection.
//!
//! # States
//! - Closed: normal operation, calls pass through
//! - Open: dependency assumed down, calls fail fast
//! - Half-Open: trial calls check whether the dependency recovered
//!
//! # State Transitions
//! ```text
//! Closed → Open: failure_count >= failure_threshold
//! Open → Half-Open: first call at or after next_attempt_at
//! Half-Open → Closed: success_count >= success_threshold
//! Half-Open → Open: any failure
//! ```
//!
//! # Design Decisions
//! - Per-name circuit breaker (not global), memoized in a registry
//! - Fail fast in Open state (wrapped operation never runs)
//! - The breaker never retries; it only decides whether to attempt
//! - Outcomes are applied in completion order; no lock is held across the call

use std::future::Future;
use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use serde::Serialize;
use thiserror::Error;

use crate::clock::Clock;
use crate::config::{CircuitBreakerSettings, CircuitConfig};
use crate::observability::metrics;

/// Circuit state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "CLOSED",
            CircuitState::Open => "OPEN",
            CircuitState::HalfOpen => "HALF_OPEN",
        }
    }
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned by [`CircuitBreakerRegistry::execute`].
#[derive(Debug, Error)]
pub enum CircuitBreakerError<E> {
    /// The circuit is open; the operation was not attempted.
    #[error("circuit '{circuit}' is open, retry after {retry_after_ms}")]
    Open { circuit: String, retry_after_ms: u64 },

    /// The operation ran and failed with its own error.
    #[error("{0}")]
    Operation(E),
}

impl<E> CircuitBreakerError<E> {
    pub fn is_open(&self) -> bool {
        matches!(self, CircuitBreakerError::Open { .. })
    }

    /// Timestamp (ms) at which the circuit will allow a trial call.
    pub fn retry_after_ms(&self) -> Option<u64> {
        match self {
            CircuitBreakerError::Open { retry_after_ms, .. } => Some(*retry_after_ms),
            CircuitBreakerError::Operation(_) => None,
        }
    }

    /// The operation's own error, if it ran.
    pub fn into_operation(self) -> Option<E> {
        match self {
            CircuitBreakerError::Operation(e) => Some(e),
            CircuitBreakerError::Open { .. } => None,
        }
    }
}

/// Point-in-time snapshot of a circuit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CircuitStats {
    pub name: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    pub last_failure_at: Option<u64>,
    pub last_success_at: Option<u64>,
    pub last_state_change_at: u64,
    pub next_attempt_at: Option<u64>,
    pub total_calls: u64,
    pub total_failures: u64,
    pub total_successes: u64,
    pub total_rejected: u64,
    pub config: CircuitConfig,
}

#[derive(Debug)]
struct Circuit {
    name: String,
    config: CircuitConfig,
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    last_failure_at: Option<u64>,
    last_success_at: Option<u64>,
    last_state_change_at: u64,
    next_attempt_at: Option<u64>,
    total_calls: u64,
    total_failures: u64,
    total_successes: u64,
    total_rejected: u64,
}

impl Circuit {
    fn new(name: String, config: CircuitConfig, now: u64) -> Self {
        Self {
            name,
            config,
            state: CircuitState::Closed,
            failure_count: 0,
            success_count: 0,
            last_failure_at: None,
            last_success_at: None,
            last_state_change_at: now,
            next_attempt_at: None,
            total_calls: 0,
            total_failures: 0,
            total_successes: 0,
            total_rejected: 0,
        }
    }

    /// Decide whether a call may proceed. `Err` carries `next_attempt_at`.
    fn admit(&mut self, now: u64) -> Result<(), u64> {
        self.total_calls += 1;

        if self.state == CircuitState::Open {
            let next_attempt_at = self.next_attempt_at.unwrap_or(now);
            if now < next_attempt_at {
                self.total_rejected += 1;
                return Err(next_attempt_at);
            }
            self.transition(CircuitState::HalfOpen, now);
        }
        Ok(())
    }

    fn on_success(&mut self, now: u64) {
        self.total_successes += 1;
        self.last_success_at = Some(now);

        match self.state {
            CircuitState::HalfOpen => {
                self.success_count += 1;
                if self.success_count >= self.config.success_threshold {
                    self.transition(CircuitState::Closed, now);
                }
            }
            CircuitState::Closed => self.failure_count = 0,
            CircuitState::Open => {}
        }
    }

    fn on_failure(&mut self, now: u64) {
        self.total_failures += 1;
        self.failure_count += 1;
        self.last_failure_at = Some(now);

        match self.state {
            CircuitState::HalfOpen => self.transition(CircuitState::Open, now),
            CircuitState::Closed if self.failure_count >= self.config.failure_threshold => {
                self.transition(CircuitState::Open, now)
            }
            _ => {}
        }
    }

    fn transition(&mut self, to: CircuitState, now: u64) {
        let from = self.state;
        self.state = to;
        self.last_state_change_at = now;

        match to {
            CircuitState::Open => {
                self.success_count = 0;
                self.next_attempt_at = Some(now + self.config.reset_timeout_ms);
                tracing::warn!(
                    circuit = %self.name,
                    from = %from,
                    failures = self.failure_count,
                    next_attempt_at = now + self.config.reset_timeout_ms,
                    "Circuit opened"
                );
            }
            CircuitState::HalfOpen => {
                self.success_count = 0;
                tracing::warn!(circuit = %self.name, "Circuit half-open, allowing trial calls");
            }
            CircuitState::Closed => {
                self.failure_count = 0;
                self.success_count = 0;
                self.next_attempt_at = None;
                tracing::info!(circuit = %self.name, from = %from, "Circuit closed");
            }
        }

        metrics::record_circuit_transition(&self.name, to.as_str());
    }

    fn stats(&self) -> CircuitStats {
        CircuitStats {
            name: self.name.clone(),
            state: self.state,
            failure_count: self.failure_count,
            success_count: self.success_count,
            last_failure_at: self.last_failure_at,
            last_success_at: self.last_success_at,
            last_state_change_at: self.last_state_change_at,
            next_attempt_at: self.next_attempt_at,
            total_calls: self.total_calls,
            total_failures: self.total_failures,
            total_successes: self.total_successes,
            total_rejected: self.total_rejected,
            config: self.config,
        }
    }
}

/// Registry of named circuits.
///
/// One registry is constructed per process and shared (it is cheap to wrap in
/// an `Arc`). Circuits are created lazily on first use of a name.
#[derive(Debug)]
pub struct CircuitBreakerRegistry {
    circuits: DashMap<String, Arc<Mutex<Circuit>>>,
    settings: CircuitBreakerSettings,
    clock: Arc<dyn Clock>,
}

impl CircuitBreakerRegistry {
    pub fn new(settings: CircuitBreakerSettings, clock: Arc<dyn Clock>) -> Self {
        Self {
            circuits: DashMap::new(),
            settings,
            clock,
        }
    }

    /// Run `operation` through the circuit named `name`.
    pub async fn execute<T, E, F, Fut>(
        &self,
        name: &str,
        operation: F,
    ) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.run(name, None, operation).await
    }

    /// Like [`execute`](Self::execute), creating the circuit with `config` if it
    /// does not exist yet. An existing circuit keeps its original config.
    pub async fn execute_with_config<T, E, F, Fut>(
        &self,
        name: &str,
        config: CircuitConfig,
        operation: F,
    ) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.run(name, Some(config), operation).await
    }

    async fn run<T, E, F, Fut>(
        &self,
        name: &str,
        config: Option<CircuitConfig>,
        operation: F,
    ) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let circuit = self.circuit(name, config);

        {
            let mut guard = circuit.lock().expect("circuit mutex poisoned");
            if let Err(retry_after_ms) = guard.admit(self.clock.now_ms()) {
                drop(guard);
                tracing::debug!(circuit = %name, retry_after_ms, "Circuit open, failing fast");
                metrics::record_circuit_rejection(name);
                return Err(CircuitBreakerError::Open {
                    circuit: name.to_string(),
                    retry_after_ms,
                });
            }
        }

        let result = operation().await;

        let mut guard = circuit.lock().expect("circuit mutex poisoned");
        let now = self.clock.now_ms();
        match result {
            Ok(value) => {
                guard.on_success(now);
                Ok(value)
            }
            Err(e) => {
                guard.on_failure(now);
                Err(CircuitBreakerError::Operation(e))
            }
        }
    }

    fn circuit(&self, name: &str, config: Option<CircuitConfig>) -> Arc<Mutex<Circuit>> {
        if let Some(existing) = self.circuits.get(name) {
            return existing.value().clone();
        }

        self.circuits
            .entry(name.to_string())
            .or_insert_with(|| {
                let config = config.unwrap_or_else(|| self.settings.config_for(name));
                tracing::debug!(
                    circuit = %name,
                    failure_threshold = config.failure_threshold,
                    reset_timeout_ms = config.reset_timeout_ms,
                    success_threshold = config.success_threshold,
                    "Circuit created"
                );
                Arc::new(Mutex::new(Circuit::new(
                    name.to_string(),
                    config,
                    self.clock.now_ms(),
                )))
            })
            .value()
            .clone()
    }

    /// Snapshot of a single circuit, if it exists.
    pub fn get_stats(&self, name: &str) -> Option<CircuitStats> {
        self.circuits
            .get(name)
            .map(|c| c.value().lock().expect("circuit mutex poisoned").stats())
    }

    /// Snapshots of every circuit, sorted by name.
    pub fn all_stats(&self) -> Vec<CircuitStats> {
        let mut stats: Vec<CircuitStats> = self
            .circuits
            .iter()
            .map(|c| c.value().lock().expect("circuit mutex poisoned").stats())
            .collect();
        stats.sort_by(|a, b| a.name.cmp(&b.name));
        stats
    }

    /// True if the named circuit exists and is currently open.
    pub fn is_open(&self, name: &str) -> bool {
        self.get_stats(name)
            .map(|s| s.state == CircuitState::Open)
            .unwrap_or(false)
    }

    /// Force the named circuit back to closed. Returns false if it does not exist.
    pub fn reset(&self, name: &str) -> bool {
        match self.circuits.get(name) {
            Some(circuit) => {
                let mut guard = circuit.value().lock().expect("circuit mutex poisoned");
                guard.transition(CircuitState::Closed, self.clock.now_ms());
                true
            }
            None => false,
        }
    }

    pub fn reset_all(&self) {
        let now = self.clock.now_ms();
        for circuit in self.circuits.iter() {
            circuit
                .value()
                .lock()
                .expect("circuit mutex poisoned")
                .transition(CircuitState::Closed, now);
        }
    }

    pub fn len(&self) -> usize {
        self.circuits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.circuits.is_empty()
    }
}
