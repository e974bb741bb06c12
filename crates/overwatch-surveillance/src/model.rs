use crate::baseline::Baseline;
use overwatch_core::Metrics;
use serde::{Deserialize, Serialize};

/// Metrics tracked by the baseline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    Cpu,
    Memory,
    Latency,
    ErrorRate,
    Throughput,
}

impl MetricKind {
    pub const ALL: [MetricKind; 5] = [
        MetricKind::Cpu,
        MetricKind::Memory,
        MetricKind::Latency,
        MetricKind::ErrorRate,
        MetricKind::Throughput,
    ];

    pub(crate) fn index(self) -> usize {
        self as usize
    }

    pub fn extract(self, metrics: &Metrics) -> f64 {
        match self {
            MetricKind::Cpu => metrics.cpu_percent,
            MetricKind::Memory => metrics.memory_percent,
            MetricKind::Latency => metrics.latency_ms,
            MetricKind::ErrorRate => metrics.error_rate,
            MetricKind::Throughput => metrics.throughput,
        }
    }

    /// Contribution to the combined anomaly score. Weights sum to 1.
    pub fn weight(self) -> f64 {
        match self {
            MetricKind::Cpu => 0.2,
            MetricKind::Memory => 0.15,
            MetricKind::Latency => 0.25,
            MetricKind::ErrorRate => 0.3,
            MetricKind::Throughput => 0.1,
        }
    }
}

/// Scores a sample against an established baseline.
///
/// Implementations must return a value in `[0, 1]`.
pub trait AnomalyModel: Send + Sync {
    fn name(&self) -> &str;

    fn score(&self, baseline: &Baseline, metrics: &Metrics) -> f64;
}

/// Weighted average of per-metric z-scores, each scaled by `1/3` and clipped
/// to `[0, 1]` (3σ counts as fully anomalous).
#[derive(Debug, Clone, Copy, Default)]
pub struct ZScoreModel;

impl ZScoreModel {
    pub fn normalized(baseline: &Baseline, kind: MetricKind, metrics: &Metrics) -> f64 {
        (baseline.stats(kind).z_score(kind.extract(metrics)) / 3.0).min(1.0)
    }
}

impl AnomalyModel for ZScoreModel {
    fn name(&self) -> &str {
        "zscore"
    }

    fn score(&self, baseline: &Baseline, metrics: &Metrics) -> f64 {
        MetricKind::ALL
            .iter()
            .map(|kind| kind.weight() * Self::normalized(baseline, *kind, metrics))
            .sum::<f64>()
            .clamp(0.0, 1.0)
    }
}
