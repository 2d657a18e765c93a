//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (thresholds >= 1, delays ordered)
//! - Check addresses and URLs parse
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ResilienceConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use thiserror::Error;

use crate::config::schema::{CircuitConfig, ResilienceConfig};

/// A single semantic problem with a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Validate a configuration, collecting every error found.
pub fn validate_config(config: &ResilienceConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    check_circuit("circuit_breaker.default", &config.circuit_breaker.default, &mut errors);
    for (name, circuit) in &config.circuit_breaker.circuits {
        check_circuit(&format!("circuit_breaker.circuits.{}", name), circuit, &mut errors);
    }

    if let Some(rpc_url) = &config.locks.rpc_url {
        if let Err(e) = url::Url::parse(rpc_url) {
            errors.push(ValidationError::new("locks.rpc_url", format!("invalid URL: {}", e)));
        }
    }
    if config.locks.rpc_timeout_ms == 0 {
        errors.push(ValidationError::new("locks.rpc_timeout_ms", "must be greater than 0"));
    }

    let realtime = &config.realtime;
    if realtime.base_delay_ms == 0 {
        errors.push(ValidationError::new("realtime.base_delay_ms", "must be greater than 0"));
    }
    if realtime.base_delay_ms > realtime.max_delay_ms {
        errors.push(ValidationError::new(
            "realtime.max_delay_ms",
            "must be greater than or equal to base_delay_ms",
        ));
    }
    if !(0.0..=1.0).contains(&realtime.jitter_ratio) {
        errors.push(ValidationError::new("realtime.jitter_ratio", "must be within [0, 1]"));
    }
    if realtime.latency_window == 0 {
        errors.push(ValidationError::new("realtime.latency_window", "must be at least 1"));
    }
    if realtime.event_buffer == 0 {
        errors.push(ValidationError::new("realtime.event_buffer", "must be at least 1"));
    }

    if config.outbox.max_retries == 0 {
        errors.push(ValidationError::new("outbox.max_retries", "must be at least 1"));
    }
    if config.outbox.base_backoff_ms == 0 {
        errors.push(ValidationError::new("outbox.base_backoff_ms", "must be greater than 0"));
    }

    let observability = &config.observability;
    if observability.metrics_enabled
        && observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("'{}' is not a socket address", observability.metrics_address),
        ));
    }
    if !matches!(observability.log_format.as_str(), "full" | "compact") {
        errors.push(ValidationError::new(
            "observability.log_format",
            "must be \"full\" or \"compact\"",
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_circuit(field: &str, circuit: &CircuitConfig, errors: &mut Vec<ValidationError>) {
    if circuit.failure_threshold == 0 {
        errors.push(ValidationError::new(
            format!("{}.failure_threshold", field),
            "must be at least 1",
        ));
    }
    if circuit.success_threshold == 0 {
        errors.push(ValidationError::new(
            format!("{}.success_threshold", field),
            "must be at least 1",
        ));
    }
    if circuit.reset_timeout_ms == 0 {
        errors.push(ValidationError::new(
            format!("{}.reset_timeout_ms", field),
            "must be greater than 0",
        ));
    }
}
