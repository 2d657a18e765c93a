//! Backoff schedules shared by the realtime, lock and outbox components.

use std::time::Duration;

use rand::Rng;

/// Exponential delay for the `retry`-th retry: `base * 2^retry`, capped at `max_ms`.
///
/// `retry` is zero-based, so the first retry waits exactly `base_ms`.
pub fn exponential_delay(retry: u32, base_ms: u64, max_ms: u64) -> Duration {
    let factor = 2u64.saturating_pow(retry);
    Duration::from_millis(base_ms.saturating_mul(factor).min(max_ms))
}

/// Uncapped exponential backoff, used for outbox eligibility.
pub fn uncapped_delay(retry: u32, base_ms: u64) -> Duration {
    exponential_delay(retry, base_ms, u64::MAX)
}

/// Linear delay before acquisition attempt `attempt` (1-based): `step * attempt`.
pub fn linear_delay(attempt: u32, step: Duration) -> Duration {
    step.saturating_mul(attempt)
}

/// Add up to `ratio * delay` of random jitter. A ratio of 0 returns `delay` unchanged.
pub fn with_jitter(delay: Duration, ratio: f64) -> Duration {
    let jitter_range = (delay.as_millis() as f64 * ratio.clamp(0.0, 1.0)) as u64;
    let jitter = if jitter_range > 0 {
        rand::thread_rng().gen_range(0..jitter_range)
    } else {
        0
    };

    delay + Duration::from_millis(jitter)
}
