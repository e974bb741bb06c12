use crate::types::Outcome;
use chrono::{DateTime, Duration, Utc};
use rand::Rng;

/// `base × factor`, scaled by a uniform draw in `[1 − jitter, 1 + jitter]`.
pub fn jittered_interval<R: Rng>(
    base: Duration,
    factor: f64,
    jitter: f64,
    rng: &mut R,
) -> Duration {
    let jitter = jitter.abs();
    let scale = factor * (1.0 + rng.gen_range(-jitter..=jitter));
    Duration::milliseconds((base.num_milliseconds() as f64 * scale).round() as i64)
}

/// When the next audit of this kind is due. Incomplete audits are due now.
pub fn next_audit_at<R: Rng>(
    now: DateTime<Utc>,
    base: Duration,
    outcome: Outcome,
    jitter: f64,
    rng: &mut R,
) -> DateTime<Utc> {
    match outcome.reschedule_factor() {
        Some(factor) => now + jittered_interval(base, factor, jitter, rng),
        None => now,
    }
}
