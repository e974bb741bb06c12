use crate::agent::AgentId;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Severity shared by anomaly events and audit findings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// One level up, saturating at `Critical`.
    pub fn raised(self) -> Self {
        match self {
            Severity::Low => Severity::Medium,
            Severity::Medium => Severity::High,
            Severity::High | Severity::Critical => Severity::Critical,
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Low => write!(f, "LOW"),
            Severity::Medium => write!(f, "MEDIUM"),
            Severity::High => write!(f, "HIGH"),
            Severity::Critical => write!(f, "CRITICAL"),
        }
    }
}

/// A detected behavioral or security anomaly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnomalyEvent {
    pub id: Uuid,
    pub agent_id: AgentId,
    pub score: f64,
    /// Signature used for cross-agent correlation (rule name or model pattern).
    pub pattern_type: String,
    pub severity: Severity,
    pub evidence: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

impl AnomalyEvent {
    pub fn new(
        agent_id: impl Into<String>,
        pattern_type: impl Into<String>,
        score: f64,
        severity: Severity,
        evidence: serde_json::Value,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            agent_id: agent_id.into(),
            score: score.clamp(0.0, 1.0),
            pattern_type: pattern_type.into(),
            severity,
            evidence,
            timestamp,
        }
    }
}

/// Append-only history of anomaly events, shared by every producer and reader.
#[derive(Debug, Default)]
pub struct AnomalyLog {
    events: RwLock<Vec<AnomalyEvent>>,
}

impl AnomalyLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&self, event: AnomalyEvent) {
        tracing::info!(
            agent_id = %event.agent_id,
            pattern = %event.pattern_type,
            severity = %event.severity,
            score = event.score,
            "anomaly event recorded"
        );
        self.events.write().push(event);
    }

    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }

    pub fn all(&self) -> Vec<AnomalyEvent> {
        self.events.read().clone()
    }

    pub fn for_agent(&self, agent_id: &str) -> Vec<AnomalyEvent> {
        self.events
            .read()
            .iter()
            .filter(|e| e.agent_id == agent_id)
            .cloned()
            .collect()
    }

    /// Events with `timestamp >= since`.
    pub fn since(&self, since: DateTime<Utc>) -> Vec<AnomalyEvent> {
        self.events
            .read()
            .iter()
            .filter(|e| e.timestamp >= since)
            .cloned()
            .collect()
    }
}
