use crate::discovery::{EndpointHealth, EndpointStatus, MAX_BACKOFF, MAX_BACKOFF_MULT};
use std::time::{Duration, Instant};

/// Advance `health` to reflect one more consecutive failure (spec §4.5).
///
/// First failure: interval = `check_interval`, multiplier becomes 2.
/// Subsequent failures: interval = `check_interval * multiplier`, then
/// multiplier doubles (capped at `MAX_BACKOFF_MULT`). The interval itself is
/// always capped at `MAX_BACKOFF`.
pub fn next_backoff(health: &mut EndpointHealth, now: Instant) {
    let interval = if health.consecutive_failures == 0 {
        health.check_interval
    } else {
        health.check_interval * health.backoff_multiplier
    };
    let interval = interval.min(MAX_BACKOFF);

    health.consecutive_failures += 1;
    health.backoff_multiplier = if health.backoff_multiplier < 2 {
        2
    } else {
        (health.backoff_multiplier * 2).min(MAX_BACKOFF_MULT)
    };
    health.status = EndpointStatus::Offline;
    health.last_checked = Some(now);
    health.next_check_time = Some(now + interval);
}

/// Reset a healthy endpoint's failure bookkeeping after a successful check.
pub fn reset_backoff(health: &mut EndpointHealth, now: Instant) {
    health.status = EndpointStatus::Healthy;
    health.consecutive_failures = 0;
    health.backoff_multiplier = 1;
    health.last_checked = Some(now);
    health.next_check_time = None;
}

/// Exponential backoff with optional jitter for generic retry attempts
/// (spec §4.5): `base * 2^(attempt-1)`, capped, then perturbed by
/// `±(jitter_pct/2) * value`.
pub fn exponential_with_jitter(
    base: Duration,
    attempt: u32,
    cap: Duration,
    jitter_pct: f64,
) -> Duration {
    let exp = attempt.saturating_sub(1).min(31);
    let raw = base.as_secs_f64() * 2f64.powi(exp as i32);
    let capped = raw.min(cap.as_secs_f64());

    if jitter_pct <= 0.0 {
        return Duration::from_secs_f64(capped);
    }
    let spread = capped * jitter_pct / 2.0;
    let jitter = (rand::random::<f64>() * 2.0 - 1.0) * spread;
    Duration::from_secs_f64((capped + jitter).max(0.0))
}
