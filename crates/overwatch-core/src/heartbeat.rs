use crate::agent::AgentId;
use crate::error::{OverwatchError, OverwatchResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Status an agent self-reports in its heartbeat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportedStatus {
    Active,
    Idle,
    Busy,
}

/// Resource and performance metrics carried by a heartbeat.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    #[serde(default)]
    pub cpu_percent: f64,
    #[serde(default)]
    pub memory_percent: f64,
    #[serde(default)]
    pub latency_ms: f64,
    /// Fraction of failed operations since the previous heartbeat, in `[0, 1]`.
    #[serde(default)]
    pub error_rate: f64,
    #[serde(default)]
    pub throughput: f64,
    /// Bytes sent since the previous heartbeat.
    #[serde(default)]
    pub bytes_transferred: u64,
}

impl Metrics {
    /// Rejects NaN, negative, and out-of-range values.
    pub fn validate(&self) -> OverwatchResult<()> {
        let checks = [
            ("cpu_percent", self.cpu_percent, 100.0),
            ("memory_percent", self.memory_percent, 100.0),
            ("error_rate", self.error_rate, 1.0),
            ("latency_ms", self.latency_ms, f64::MAX),
            ("throughput", self.throughput, f64::MAX),
        ];
        for (name, value, max) in checks {
            if !value.is_finite() || value < 0.0 || value > max {
                return Err(OverwatchError::Validation(format!(
                    "metric '{name}' out of range: {value}"
                )));
            }
        }
        Ok(())
    }
}

/// A periodic status report. Consumed, then discarded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeartbeatRecord {
    pub agent_id: AgentId,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub status: Option<ReportedStatus>,
    #[serde(default)]
    pub metrics: Metrics,
}

impl HeartbeatRecord {
    pub fn new(agent_id: impl Into<String>, timestamp: DateTime<Utc>, metrics: Metrics) -> Self {
        Self {
            agent_id: agent_id.into(),
            timestamp,
            status: None,
            metrics,
        }
    }

    pub fn with_status(mut self, status: ReportedStatus) -> Self {
        self.status = Some(status);
        self
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_validation() {
        assert!(Metrics::default().validate().is_ok());

        let bad_cpu = Metrics {
            cpu_percent: 120.0,
            ..Metrics::default()
        };
        assert!(bad_cpu.validate().is_err());

        let bad_error = Metrics {
            error_rate: f64::NAN,
            ..Metrics::default()
        };
        assert!(bad_error.validate().is_err());
    }

    #[test]
    fn test_heartbeat_deserializes_with_defaults() {
        let json = r#"{"agent_id":"a1","timestamp":"2026-01-01T00:00:00Z"}"#;
        let record: HeartbeatRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.agent_id, "a1");
        assert!(record.status.is_none());
        assert_eq!(record.metrics, Metrics::default());
    }
}
