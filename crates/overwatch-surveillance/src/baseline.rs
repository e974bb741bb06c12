use crate::model::MetricKind;
use chrono::{DateTime, Duration, Utc};
use overwatch_core::Metrics;
use serde::{Deserialize, Serialize};

/// Welford's online mean/variance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RunningStats {
    pub count: u64,
    pub mean: f64,
    m2: f64,
}

impl RunningStats {
    pub fn push(&mut self, value: f64) {
        self.count += 1;
        let delta = value - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (value - self.mean);
    }

    /// Population variance; 0 with fewer than two samples.
    pub fn variance(&self) -> f64 {
        if self.count < 2 {
            0.0
        } else {
            self.m2 / self.count as f64
        }
    }

    pub fn std_dev(&self) -> f64 {
        self.variance().sqrt()
    }

    /// Distance from the mean in standard deviations (σ floored at 1e-6).
    pub fn z_score(&self, value: f64) -> f64 {
        (value - self.mean).abs() / self.std_dev().max(1e-6)
    }
}

/// Per-agent behavioral baseline, one [`RunningStats`] per metric.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Baseline {
    pub first_sample_at: Option<DateTime<Utc>>,
    stats: [RunningStats; 5],
}

impl Baseline {
    pub fn update(&mut self, at: DateTime<Utc>, metrics: &Metrics) {
        self.first_sample_at.get_or_insert(at);
        for kind in MetricKind::ALL {
            self.stats[kind.index()].push(kind.extract(metrics));
        }
    }

    pub fn samples(&self) -> u64 {
        self.stats[0].count
    }

    pub fn stats(&self, kind: MetricKind) -> &RunningStats {
        &self.stats[kind.index()]
    }

    /// Scoring activates once the learning window has elapsed since the first
    /// sample and enough samples were seen.
    pub fn is_established(&self, now: DateTime<Utc>, window: Duration, min_samples: u64) -> bool {
        self.first_sample_at
            .is_some_and(|first| now - first >= window && self.samples() >= min_samples)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_welford_matches_two_pass() {
        let values = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        let mut stats = RunningStats::default();
        for v in values {
            stats.push(v);
        }
        assert!((stats.mean - 5.0).abs() < 1e-12);
        assert!((stats.std_dev() - 2.0).abs() < 1e-12);
        assert!((stats.z_score(11.0) - 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_establishment_needs_window_and_samples() {
        let start = Utc::now() - Duration::hours(30);
        let mut baseline = Baseline::default();
        for i in 0..10 {
            baseline.update(start + Duration::hours(i), &Metrics::default());
        }
        let now = start + Duration::hours(25);
        assert!(!baseline.is_established(now, Duration::hours(24), 30));
        assert!(baseline.is_established(now, Duration::hours(24), 10));
        assert!(!baseline.is_established(start + Duration::hours(9), Duration::hours(24), 10));
    }
}
