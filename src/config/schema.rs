//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the resilience layer.
//! All types derive Serde traits for deserialization from config files.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize};

/// Root configuration for the resilience layer.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ResilienceConfig {
    /// Use local/null backends instead of remote ones.
    pub offline: bool,

    /// Circuit breaker defaults and per-circuit overrides.
    pub circuit_breaker: CircuitBreakerSettings,

    /// Advisory lock settings.
    pub locks: LockSettings,

    /// Realtime subscription settings.
    pub realtime: RealtimeConfig,

    /// Durable outbox settings.
    pub outbox: OutboxConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Thresholds for a single circuit. Immutable once the circuit exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct CircuitConfig {
    /// Consecutive failures (while closed) before opening.
    pub failure_threshold: u32,

    /// Time spent open before a trial call is allowed, in milliseconds.
    pub reset_timeout_ms: u64,

    /// Consecutive half-open successes required to close.
    pub success_threshold: u32,
}

impl CircuitConfig {
    pub fn reset_timeout(&self) -> Duration {
        Duration::from_millis(self.reset_timeout_ms)
    }
}

impl Default for CircuitConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout_ms: 30_000,
            success_threshold: 2,
        }
    }
}

/// Circuit breaker registry configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CircuitBreakerSettings {
    /// Config applied to circuits with no predefined entry.
    pub default: CircuitConfig,

    /// Predefined configs keyed by circuit name. Entries from a config file
    /// are layered over the shipped ones.
    #[serde(deserialize_with = "merge_predefined_circuits")]
    pub circuits: HashMap<String, CircuitConfig>,
}

impl CircuitBreakerSettings {
    /// Config a new circuit named `name` should be created with.
    pub fn config_for(&self, name: &str) -> CircuitConfig {
        self.circuits.get(name).copied().unwrap_or(self.default)
    }
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        Self {
            default: CircuitConfig::default(),
            circuits: predefined_circuits(),
        }
    }
}

fn predefined_circuits() -> HashMap<String, CircuitConfig> {
    let mut circuits = HashMap::new();
    circuits.insert(
        "payment-gateway".to_string(),
        CircuitConfig {
            failure_threshold: 3,
            reset_timeout_ms: 60_000,
            success_threshold: 2,
        },
    );
    circuits.insert(
        "database".to_string(),
        CircuitConfig {
            failure_threshold: 5,
            reset_timeout_ms: 15_000,
            success_threshold: 1,
        },
    );
    circuits
}

fn merge_predefined_circuits<'de, D>(
    deserializer: D,
) -> Result<HashMap<String, CircuitConfig>, D::Error>
where
    D: Deserializer<'de>,
{
    let overrides = HashMap::<String, CircuitConfig>::deserialize(deserializer)?;
    let mut circuits = predefined_circuits();
    circuits.extend(overrides);
    Ok(circuits)
}

/// Advisory lock configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LockSettings {
    /// Auto-release timeout applied when the caller passes none (0 disables).
    pub default_timeout_ms: u64,

    /// Acquisition retries performed by `with_lock` on contention.
    pub retry_attempts: u32,

    /// Base delay between acquisition retries, multiplied by the attempt number.
    pub retry_delay_ms: u64,

    /// Base URL of the backend exposing the lock RPC functions.
    pub rpc_url: Option<String>,

    /// API key sent with every RPC.
    pub api_key: Option<String>,

    /// Per-request RPC timeout in milliseconds.
    pub rpc_timeout_ms: u64,
}

impl Default for LockSettings {
    fn default() -> Self {
        Self {
            default_timeout_ms: 30_000,
            retry_attempts: 0,
            retry_delay_ms: 100,
            rpc_url: None,
            api_key: None,
            rpc_timeout_ms: 5_000,
        }
    }
}

/// Realtime subscription configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RealtimeConfig {
    /// Reconnect attempts before giving up on a channel.
    pub max_retries: u32,

    /// Base delay for exponential backoff in milliseconds.
    pub base_delay_ms: u64,

    /// Maximum delay for exponential backoff in milliseconds.
    pub max_delay_ms: u64,

    /// Extra random delay as a fraction of the computed delay (0.0 = none).
    pub jitter_ratio: f64,

    /// Number of latency samples kept for the rolling average.
    pub latency_window: usize,

    /// Capacity of each subscription's event broadcast buffer.
    pub event_buffer: usize,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            max_retries: 10,
            base_delay_ms: 1_000,
            max_delay_ms: 30_000,
            jitter_ratio: 0.0,
            latency_window: 20,
            event_buffer: 256,
        }
    }
}

/// Durable outbox configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct OutboxConfig {
    /// JSON file backing the outbox. In-memory when unset.
    pub path: Option<String>,

    /// Retry budget before a message is dead-lettered.
    pub max_retries: u32,

    /// Backoff base in milliseconds; attempt `n` waits `base * 2^n`.
    pub base_backoff_ms: u64,
}

impl Default for OutboxConfig {
    fn default() -> Self {
        Self {
            path: None,
            max_retries: 5,
            base_backoff_ms: 1_000,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log line format ("full" or "compact").
    pub log_format: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: "full".to_string(),
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}
