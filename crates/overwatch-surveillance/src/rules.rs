use crate::baseline::Baseline;
use crate::model::MetricKind;
use chrono::{DateTime, Duration, Utc};
use overwatch_core::config::SurveillanceConfig;
use overwatch_core::{Metrics, Severity};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::VecDeque;

/// Penalty class of a rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleClass {
    Warning,
    Critical,
}

/// Deterministic threat rules, evaluated on every heartbeat independently of
/// the statistical model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreatRule {
    ExcessiveErrorRate,
    ResourceAbuse,
    AbnormalPattern,
    RapidStateChurn,
    SuspectedExfiltration,
}

impl ThreatRule {
    pub const ALL: [ThreatRule; 5] = [
        ThreatRule::ExcessiveErrorRate,
        ThreatRule::ResourceAbuse,
        ThreatRule::AbnormalPattern,
        ThreatRule::RapidStateChurn,
        ThreatRule::SuspectedExfiltration,
    ];

    pub fn class(self) -> RuleClass {
        match self {
            ThreatRule::SuspectedExfiltration => RuleClass::Critical,
            _ => RuleClass::Warning,
        }
    }

    pub fn severity(self) -> Severity {
        match self.class() {
            RuleClass::Critical => Severity::Critical,
            RuleClass::Warning => Severity::High,
        }
    }

    /// Signature used on events and for correlation.
    pub fn pattern(self) -> &'static str {
        match self {
            ThreatRule::ExcessiveErrorRate => "excessive_error_rate",
            ThreatRule::ResourceAbuse => "resource_abuse",
            ThreatRule::AbnormalPattern => "abnormal_pattern",
            ThreatRule::RapidStateChurn => "rapid_state_churn",
            ThreatRule::SuspectedExfiltration => "suspected_exfiltration",
        }
    }

    pub(crate) fn index(self) -> usize {
        self as usize
    }
}

/// A retained heartbeat sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub at: DateTime<Utc>,
    pub metrics: Metrics,
}

/// Everything a rule may look at for one agent.
pub struct RuleInput<'a> {
    pub now: DateTime<Utc>,
    pub samples: &'a VecDeque<Sample>,
    pub transfers: &'a VecDeque<(DateTime<Utc>, u64)>,
    pub transitions: &'a VecDeque<DateTime<Utc>>,
    /// Present only once the baseline is established.
    pub baseline: Option<&'a Baseline>,
    pub latest: &'a Metrics,
}

/// Span of the unbroken run of samples, ending at the newest one, for which
/// `holds` is true. `None` when the newest sample does not hold.
fn sustained_run(samples: &VecDeque<Sample>, holds: impl Fn(&Metrics) -> bool) -> Option<(Duration, usize)> {
    let newest = samples.back()?;
    let mut earliest = None;
    let mut count = 0;
    for sample in samples.iter().rev() {
        if !holds(&sample.metrics) {
            break;
        }
        earliest = Some(sample.at);
        count += 1;
    }
    earliest.map(|first| (newest.at - first, count))
}

/// Returns evidence when `rule` currently holds.
pub fn evaluate(rule: ThreatRule, input: &RuleInput<'_>, config: &SurveillanceConfig) -> Option<Value> {
    match rule {
        ThreatRule::ExcessiveErrorRate => {
            let threshold = config.error_rate_threshold;
            let (span, count) = sustained_run(input.samples, |m| m.error_rate > threshold)?;
            (count >= 2 && span >= Duration::minutes(config.error_rate_sustain_minutes)).then(|| {
                json!({
                    "error_rate": input.latest.error_rate,
                    "threshold": threshold,
                    "sustained_secs": span.num_seconds(),
                })
            })
        }
        ThreatRule::ResourceAbuse => {
            let limit = config.resource_threshold_percent;
            let (span, count) =
                sustained_run(input.samples, |m| m.cpu_percent > limit || m.memory_percent > limit)?;
            (count >= 2 && span >= Duration::minutes(config.resource_sustain_minutes)).then(|| {
                json!({
                    "cpu_percent": input.latest.cpu_percent,
                    "memory_percent": input.latest.memory_percent,
                    "threshold": limit,
                    "sustained_secs": span.num_seconds(),
                })
            })
        }
        ThreatRule::AbnormalPattern => {
            let baseline = input.baseline?;
            let deviations: Vec<Value> = MetricKind::ALL
                .iter()
                .filter_map(|kind| {
                    let stats = baseline.stats(*kind);
                    let value = kind.extract(input.latest);
                    let z = stats.z_score(value);
                    (z >= config.deviation_sigma).then(|| {
                        json!({ "metric": kind, "value": value, "mean": stats.mean, "z": z })
                    })
                })
                .collect();
            (!deviations.is_empty()).then(|| json!({ "deviations": deviations }))
        }
        ThreatRule::RapidStateChurn => {
            let since = input.now - Duration::minutes(config.churn_window_minutes);
            let changes = input.transitions.iter().filter(|t| **t >= since).count();
            (changes > config.churn_max_changes).then(|| {
                json!({ "state_changes": changes, "window_minutes": config.churn_window_minutes })
            })
        }
        ThreatRule::SuspectedExfiltration => {
            let since = input.now - Duration::minutes(config.exfiltration_window_minutes);
            let bytes: u64 = input
                .transfers
                .iter()
                .filter(|(at, _)| *at >= since)
                .map(|(_, b)| *b)
                .sum();
            (bytes > config.exfiltration_bytes).then(|| {
                json!({ "bytes": bytes, "window_minutes": config.exfiltration_window_minutes })
            })
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn samples(start: DateTime<Utc>, minutes: i64, metrics: Metrics) -> VecDeque<Sample> {
        (0..=minutes)
            .map(|m| Sample {
                at: start + Duration::minutes(m),
                metrics,
            })
            .collect()
    }

    fn input<'a>(
        now: DateTime<Utc>,
        samples: &'a VecDeque<Sample>,
        transfers: &'a VecDeque<(DateTime<Utc>, u64)>,
        transitions: &'a VecDeque<DateTime<Utc>>,
        latest: &'a Metrics,
    ) -> RuleInput<'a> {
        RuleInput {
            now,
            samples,
            transfers,
            transitions,
            baseline: None,
            latest,
        }
    }

    #[test]
    fn test_resource_abuse_needs_ten_minutes() {
        let config = SurveillanceConfig::default();
        let start = Utc::now();
        let hot = Metrics {
            cpu_percent: 99.0,
            ..Metrics::default()
        };
        let empty = VecDeque::new();
        let none = VecDeque::new();

        let nine = samples(start, 9, hot);
        let now = start + Duration::minutes(9);
        assert!(evaluate(ThreatRule::ResourceAbuse, &input(now, &nine, &empty, &none, &hot), &config).is_none());

        let ten = samples(start, 10, hot);
        let now = start + Duration::minutes(10);
        assert!(evaluate(ThreatRule::ResourceAbuse, &input(now, &ten, &empty, &none, &hot), &config).is_some());
    }

    #[test]
    fn test_error_rate_run_breaks_on_recovery() {
        let config = SurveillanceConfig::default();
        let start = Utc::now();
        let bad = Metrics {
            error_rate: 0.3,
            ..Metrics::default()
        };
        let mut buffer = samples(start, 6, bad);
        buffer.push_back(Sample {
            at: start + Duration::minutes(7),
            metrics: Metrics::default(),
        });
        let latest = Metrics::default();
        let (empty, none) = (VecDeque::new(), VecDeque::new());
        let now = start + Duration::minutes(7);
        assert!(evaluate(ThreatRule::ExcessiveErrorRate, &input(now, &buffer, &empty, &none, &latest), &config).is_none());
    }

    #[test]
    fn test_churn_and_exfiltration() {
        let config = SurveillanceConfig::default();
        let now = Utc::now();
        let latest = Metrics::default();
        let buffer = VecDeque::new();

        let transitions: VecDeque<_> = (0..11).map(|i| now - Duration::seconds(i * 20)).collect();
        let none = VecDeque::new();
        assert!(evaluate(ThreatRule::RapidStateChurn, &input(now, &buffer, &none, &transitions, &latest), &config).is_some());

        let transfers: VecDeque<_> = (0..3).map(|i| (now - Duration::minutes(i * 10), 400_000_000)).collect();
        assert!(evaluate(ThreatRule::SuspectedExfiltration, &input(now, &buffer, &transfers, &VecDeque::new(), &latest), &config).is_some());

        let old: VecDeque<_> = (0..3).map(|i| (now - Duration::minutes(61 + i), 400_000_000)).collect();
        assert!(evaluate(ThreatRule::SuspectedExfiltration, &input(now, &buffer, &old, &VecDeque::new(), &latest), &config).is_none());
    }

    #[test]
    fn test_classes() {
        assert_eq!(ThreatRule::SuspectedExfiltration.class(), RuleClass::Critical);
        assert_eq!(ThreatRule::ResourceAbuse.class(), RuleClass::Warning);
        assert_eq!(ThreatRule::ALL.len(), 5);
    }
}
