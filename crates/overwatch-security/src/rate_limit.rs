use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Instant;

/// Callers tracked before full buckets are dropped.
const DEFAULT_MAX_TRACKED: usize = 4_096;

#[derive(Debug, Clone, Copy)]
struct Allowance {
    tokens: f64,
    updated: Instant,
}

/// Per-principal request allowance for the HTTP API.
///
/// Each caller starts with `burst` requests and earns `per_second` more
/// over time, up to `burst`. A caller whose allowance has refilled carries
/// no state, so those entries are dropped once more than `max_tracked`
/// callers are known.
pub struct RateLimiter {
    burst: f64,
    per_second: f64,
    max_tracked: usize,
    allowances: Mutex<HashMap<String, Allowance>>,
}

impl RateLimiter {
    pub fn new(burst: f64, per_second: f64) -> Self {
        Self {
            burst: burst.max(1.0),
            per_second: per_second.max(0.0),
            max_tracked: DEFAULT_MAX_TRACKED,
            allowances: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_max_tracked(mut self, max_tracked: usize) -> Self {
        self.max_tracked = max_tracked.max(1);
        self
    }

    /// Spend one request for `caller`. `false` means the caller is over its rate.
    pub fn check(&self, caller: &str) -> bool {
        self.check_at(caller, Instant::now())
    }

    fn check_at(&self, caller: &str, now: Instant) -> bool {
        let mut allowances = self.allowances.lock();
        if allowances.len() >= self.max_tracked && !allowances.contains_key(caller) {
            allowances.retain(|_, a| self.refilled(a, now) < self.burst);
        }

        let allowance = allowances.entry(caller.to_string()).or_insert(Allowance {
            tokens: self.burst,
            updated: now,
        });
        allowance.tokens = self.refilled(allowance, now);
        allowance.updated = now;
        if allowance.tokens < 1.0 {
            return false;
        }
        allowance.tokens -= 1.0;
        true
    }

    fn refilled(&self, allowance: &Allowance, now: Instant) -> f64 {
        let earned = now.saturating_duration_since(allowance.updated).as_secs_f64() * self.per_second;
        (allowance.tokens + earned).min(self.burst)
    }
}
