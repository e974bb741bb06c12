use chrono::{DateTime, Duration, Utc};
use overwatch_core::config::AuditConfig;
use overwatch_core::{AgentId, Severity};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditType {
    Regular,
    Surprise,
    Compliance,
    Security,
    Performance,
    Behavioral,
}

impl AuditType {
    pub const ALL: [AuditType; 6] = [
        AuditType::Regular,
        AuditType::Surprise,
        AuditType::Compliance,
        AuditType::Security,
        AuditType::Performance,
        AuditType::Behavioral,
    ];

    /// Types that run on a fixed interval; surprise audits are drawn per tick.
    pub const PERIODIC: [AuditType; 5] = [
        AuditType::Regular,
        AuditType::Compliance,
        AuditType::Security,
        AuditType::Performance,
        AuditType::Behavioral,
    ];

    /// Base rescheduling interval. Surprise audits reuse the regular interval.
    pub fn base_interval(self, config: &AuditConfig) -> Duration {
        let days = match self {
            AuditType::Regular | AuditType::Surprise => config.regular_interval_days,
            AuditType::Compliance => config.compliance_interval_days,
            AuditType::Security => config.security_interval_days,
            AuditType::Performance => config.performance_interval_days,
            AuditType::Behavioral => config.behavioral_interval_days,
        };
        Duration::days(days)
    }

    /// Names of the checks run by this audit type, in execution order.
    pub fn checklist(self) -> &'static [&'static str] {
        match self {
            AuditType::Regular => &["reporting_compliance", "state_consistency", "security_posture"],
            AuditType::Surprise => &[
                "reporting_compliance",
                "unauthorized_access",
                "anomaly_review",
                "decision_consistency",
            ],
            AuditType::Compliance => &[
                "reporting_compliance",
                "encryption_verification",
                "decision_consistency",
            ],
            AuditType::Security => &[
                "unauthorized_access",
                "encryption_verification",
                "security_posture",
                "correlated_threats",
            ],
            AuditType::Performance => &["performance_sla", "load_balance"],
            AuditType::Behavioral => &["anomaly_review", "decision_consistency", "state_consistency"],
        }
    }
}

impl fmt::Display for AuditType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AuditType::Regular => "REGULAR",
            AuditType::Surprise => "SURPRISE",
            AuditType::Compliance => "COMPLIANCE",
            AuditType::Security => "SECURITY",
            AuditType::Performance => "PERFORMANCE",
            AuditType::Behavioral => "BEHAVIORAL",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditScope {
    System,
    Tenant,
    Agent,
    Workflow,
    Interaction,
}

impl AuditScope {
    pub fn requires_target(self) -> bool {
        !matches!(self, AuditScope::System)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Outcome {
    Passed,
    PassedWithFindings,
    Failed,
    Critical,
    Incomplete,
}

/// More than this many High findings fail the audit.
pub const HIGH_FINDINGS_TOLERATED: usize = 2;

impl Outcome {
    /// Outcome of a completed run: CRITICAL beats FAILED beats
    /// PASSED_WITH_FINDINGS beats PASSED.
    pub fn determine(findings: &[Finding]) -> Self {
        if findings.iter().any(|f| f.severity == Severity::Critical) {
            return Outcome::Critical;
        }
        let high = findings
            .iter()
            .filter(|f| f.severity == Severity::High)
            .count();
        if high > HIGH_FINDINGS_TOLERATED {
            Outcome::Failed
        } else if !findings.is_empty() {
            Outcome::PassedWithFindings
        } else {
            Outcome::Passed
        }
    }

    /// Multiplier on the base interval; `None` means retry immediately.
    pub fn reschedule_factor(self) -> Option<f64> {
        match self {
            Outcome::Passed => Some(1.0),
            Outcome::PassedWithFindings => Some(0.5),
            Outcome::Failed => Some(0.25),
            Outcome::Critical => Some(0.1),
            Outcome::Incomplete => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FindingStatus {
    Open,
    Acknowledged,
    Resolved,
    FalsePositive,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    pub id: Uuid,
    /// Name of the check that produced it.
    pub check: String,
    pub severity: Severity,
    pub title: String,
    pub evidence: serde_json::Value,
    pub recommendation: String,
    pub status: FindingStatus,
    #[serde(default)]
    pub agent_ids: Vec<AgentId>,
}

impl Finding {
    pub fn new(
        check: &str,
        severity: Severity,
        title: impl Into<String>,
        evidence: serde_json::Value,
        recommendation: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            check: check.to_string(),
            severity,
            title: title.into(),
            evidence,
            recommendation: recommendation.into(),
            status: FindingStatus::Open,
            agent_ids: Vec::new(),
        }
    }

    pub fn implicating<I, S>(mut self, agent_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<AgentId>,
    {
        self.agent_ids = agent_ids.into_iter().map(Into::into).collect();
        self
    }
}

/// One audit run. Immutable once `outcome` is set, except for finding status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub audit_type: AuditType,
    pub scope: AuditScope,
    pub target_id: Option<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub outcome: Option<Outcome>,
    pub next_audit_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub findings: Vec<Finding>,
    /// Why the run could not finish.
    #[serde(default)]
    pub incomplete_reason: Option<String>,
    /// The incomplete audit this run retries.
    #[serde(default)]
    pub retry_of: Option<Uuid>,
}

impl AuditRecord {
    pub fn new(audit_type: AuditType, scope: AuditScope, target_id: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            audit_type,
            scope,
            target_id,
            start_time: Utc::now(),
            end_time: None,
            outcome: None,
            next_audit_at: None,
            findings: Vec::new(),
            incomplete_reason: None,
            retry_of: None,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.outcome.is_some()
    }

    /// Agents implicated by findings of exactly `severity`.
    pub fn implicated(&self, severity: Severity) -> Vec<AgentId> {
        let mut ids: Vec<AgentId> = self
            .findings
            .iter()
            .filter(|f| f.severity == severity)
            .flat_map(|f| f.agent_ids.iter().cloned())
            .collect();
        ids.sort();
        ids.dedup();
        ids
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn finding(severity: Severity) -> Finding {
        Finding::new("test", severity, "t", json!({}), "r")
    }

    #[test]
    fn test_outcome_rule() {
        assert_eq!(Outcome::determine(&[]), Outcome::Passed);
        assert_eq!(
            Outcome::determine(&[finding(Severity::Low), finding(Severity::High)]),
            Outcome::PassedWithFindings
        );
        let two_high = [finding(Severity::High), finding(Severity::High)];
        assert_eq!(Outcome::determine(&two_high), Outcome::PassedWithFindings);
        let three_high = [
            finding(Severity::High),
            finding(Severity::High),
            finding(Severity::High),
        ];
        assert_eq!(Outcome::determine(&three_high), Outcome::Failed);
        assert_eq!(
            Outcome::determine(&[finding(Severity::Low), finding(Severity::Critical)]),
            Outcome::Critical
        );
    }

    #[test]
    fn test_every_type_has_a_checklist() {
        for audit_type in AuditType::ALL {
            assert!(!audit_type.checklist().is_empty(), "{audit_type}");
        }
        assert_eq!(
            AuditType::Security.base_interval(&AuditConfig::default()),
            Duration::days(60)
        );
        assert_eq!(
            AuditType::Surprise.base_interval(&AuditConfig::default()),
            Duration::days(30)
        );
    }

    #[test]
    fn test_implicated_agents_are_deduplicated() {
        let mut record = AuditRecord::new(AuditType::Security, AuditScope::System, None);
        record.findings = vec![
            finding(Severity::Critical).implicating(["b", "a"]),
            finding(Severity::Critical).implicating(["a"]),
            finding(Severity::High).implicating(["c"]),
        ];
        assert_eq!(record.implicated(Severity::Critical), vec!["a", "b"]);
        assert_eq!(record.implicated(Severity::High), vec!["c"]);
    }
}
