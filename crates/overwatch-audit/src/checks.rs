use crate::data::AuditSnapshot;
use crate::types::{AuditType, Finding};
use async_trait::async_trait;
use overwatch_core::{AgentState, OverwatchError, OverwatchResult, ReportingStatus, Severity};
use overwatch_lifecycle::is_allowed;
use overwatch_security::AuditOutcome;
use serde_json::json;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Denials by one principal inside the window before it becomes a High finding.
const REPEATED_DENIALS: usize = 5;
const LOW_SECURITY_SCORE: u8 = 30;
const WEAK_SECURITY_SCORE: u8 = 60;

/// One checklist item. Returns zero or more findings; an error makes the
/// whole audit INCOMPLETE.
#[async_trait]
pub trait AuditCheck: Send + Sync {
    fn name(&self) -> &'static str;

    async fn run(&self, snapshot: &AuditSnapshot) -> OverwatchResult<Vec<Finding>>;
}

/// Checks by name, resolved into per-type checklists.
#[derive(Clone)]
pub struct CheckRegistry {
    checks: HashMap<&'static str, Arc<dyn AuditCheck>>,
}

impl CheckRegistry {
    pub fn empty() -> Self {
        Self {
            checks: HashMap::new(),
        }
    }

    /// The ten built-in checks.
    pub fn standard() -> Self {
        let mut registry = Self::empty();
        registry.register(Arc::new(ReportingCompliance));
        registry.register(Arc::new(UnauthorizedAccess));
        registry.register(Arc::new(EncryptionVerification));
        registry.register(Arc::new(DecisionConsistency));
        registry.register(Arc::new(SecurityPostureCheck));
        registry.register(Arc::new(AnomalyReview));
        registry.register(Arc::new(CorrelatedThreats));
        registry.register(Arc::new(PerformanceSla));
        registry.register(Arc::new(LoadBalance));
        registry.register(Arc::new(StateConsistency));
        registry
    }

    /// Add a check, replacing any existing check with the same name.
    pub fn register(&mut self, check: Arc<dyn AuditCheck>) {
        self.checks.insert(check.name(), check);
    }

    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.checks.keys().copied().collect();
        names.sort_unstable();
        names
    }

    pub fn checklist(&self, audit_type: AuditType) -> OverwatchResult<Vec<Arc<dyn AuditCheck>>> {
        audit_type
            .checklist()
            .iter()
            .map(|name| {
                self.checks.get(name).cloned().ok_or_else(|| {
                    OverwatchError::Config(format!("audit check '{name}' is not registered"))
                })
            })
            .collect()
    }
}

impl Default for CheckRegistry {
    fn default() -> Self {
        Self::standard()
    }
}

pub struct ReportingCompliance;

#[async_trait]
impl AuditCheck for ReportingCompliance {
    fn name(&self) -> &'static str {
        "reporting_compliance"
    }

    async fn run(&self, snapshot: &AuditSnapshot) -> OverwatchResult<Vec<Finding>> {
        let findings = snapshot
            .profiles
            .iter()
            .filter_map(|p| {
                let (severity, recommendation) = match p.reporting_status {
                    ReportingStatus::Compliant => return None,
                    ReportingStatus::Warned => (Severity::Low, "confirm the agent's reporting loop"),
                    ReportingStatus::Suspended => {
                        (Severity::Medium, "restore reporting, then unsuspend")
                    }
                    ReportingStatus::NonCompliant => {
                        (Severity::High, "decide on the pending deletion request")
                    }
                };
                Some(
                    Finding::new(
                        self.name(),
                        severity,
                        format!("agent {} is {:?}", p.id, p.reporting_status),
                        json!({
                            "missed_reports": p.missed_report_count,
                            "last_seen": p.last_seen(),
                        }),
                        recommendation,
                    )
                    .implicating([p.id.clone()]),
                )
            })
            .collect();
        Ok(findings)
    }
}

pub struct UnauthorizedAccess;

#[async_trait]
impl AuditCheck for UnauthorizedAccess {
    fn name(&self) -> &'static str {
        "unauthorized_access"
    }

    async fn run(&self, snapshot: &AuditSnapshot) -> OverwatchResult<Vec<Finding>> {
        let mut denials: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
        for entry in snapshot
            .trail
            .iter()
            .filter(|e| e.outcome == AuditOutcome::Denied)
        {
            denials
                .entry(entry.actor.as_str())
                .or_default()
                .push(entry.action.as_str());
        }

        let mut findings: Vec<Finding> = denials
            .into_iter()
            .map(|(actor, actions)| {
                let severity = if actions.len() >= REPEATED_DENIALS {
                    Severity::High
                } else {
                    Severity::Low
                };
                Finding::new(
                    self.name(),
                    severity,
                    format!("{} denied privileged actions by {actor}", actions.len()),
                    json!({ "actor": actor, "actions": actions }),
                    "review the caller's credentials and privilege",
                )
            })
            .collect();

        for event in snapshot
            .events
            .iter()
            .filter(|e| e.pattern_type == "suspected_exfiltration")
        {
            findings.push(
                Finding::new(
                    self.name(),
                    Severity::Critical,
                    format!("suspected data exfiltration by {}", event.agent_id),
                    json!({ "event_id": event.id, "evidence": event.evidence }),
                    "isolate the agent and review its outbound transfers",
                )
                .implicating([event.agent_id.clone()]),
            );
        }
        Ok(findings)
    }
}

pub struct EncryptionVerification;

#[async_trait]
impl AuditCheck for EncryptionVerification {
    fn name(&self) -> &'static str {
        "encryption_verification"
    }

    async fn run(&self, snapshot: &AuditSnapshot) -> OverwatchResult<Vec<Finding>> {
        let findings = snapshot
            .profiles
            .iter()
            .filter(|p| !p.state.is_terminal())
            .filter_map(|p| {
                let posture = &p.security_posture;
                let severity = match (posture.tls_enabled, posture.encryption_at_rest) {
                    (true, true) => return None,
                    (false, false) => Severity::High,
                    _ => Severity::Medium,
                };
                Some(
                    Finding::new(
                        self.name(),
                        severity,
                        format!("agent {} lacks required encryption", p.id),
                        json!({
                            "tls_enabled": posture.tls_enabled,
                            "encryption_at_rest": posture.encryption_at_rest,
                        }),
                        "enable TLS and encryption at rest",
                    )
                    .implicating([p.id.clone()]),
                )
            })
            .collect();
        Ok(findings)
    }
}

pub struct DecisionConsistency;

#[async_trait]
impl AuditCheck for DecisionConsistency {
    fn name(&self) -> &'static str {
        "decision_consistency"
    }

    async fn run(&self, snapshot: &AuditSnapshot) -> OverwatchResult<Vec<Finding>> {
        let mut findings = Vec::new();
        if let Some(reason) = &snapshot.chain_break {
            findings.push(Finding::new(
                self.name(),
                Severity::Critical,
                "audit trail hash chain is broken",
                json!({ "break": reason }),
                "treat the trail as tampered and investigate",
            ));
        }
        for record in snapshot
            .transitions
            .iter()
            .filter(|t| !is_allowed(t.from, t.to))
        {
            findings.push(
                Finding::new(
                    self.name(),
                    Severity::Critical,
                    format!("unlisted transition {} -> {} on {}", record.from, record.to, record.agent_id),
                    json!({ "actor": record.actor, "reason": record.reason, "at": record.at }),
                    "investigate how the transition bypassed the state machine",
                )
                .implicating([record.agent_id.clone()]),
            );
        }
        Ok(findings)
    }
}

pub struct SecurityPostureCheck;

#[async_trait]
impl AuditCheck for SecurityPostureCheck {
    fn name(&self) -> &'static str {
        "security_posture"
    }

    async fn run(&self, snapshot: &AuditSnapshot) -> OverwatchResult<Vec<Finding>> {
        let findings = snapshot
            .profiles
            .iter()
            .filter(|p| p.state != AgentState::Decommissioned)
            .filter_map(|p| {
                let severity = if p.state == AgentState::Compromised {
                    Severity::Critical
                } else if p.security_score < LOW_SECURITY_SCORE {
                    Severity::High
                } else if p.security_score < WEAK_SECURITY_SCORE {
                    Severity::Medium
                } else {
                    return None;
                };
                Some(
                    Finding::new(
                        self.name(),
                        severity,
                        format!("agent {} security score {}", p.id, p.security_score),
                        json!({ "security_score": p.security_score, "state": p.state }),
                        "review recent threat-rule violations",
                    )
                    .implicating([p.id.clone()]),
                )
            })
            .collect();
        Ok(findings)
    }
}

pub struct AnomalyReview;

#[async_trait]
impl AuditCheck for AnomalyReview {
    fn name(&self) -> &'static str {
        "anomaly_review"
    }

    async fn run(&self, snapshot: &AuditSnapshot) -> OverwatchResult<Vec<Finding>> {
        let threshold = snapshot.config.surveillance.anomaly_threshold;
        let mut critical_events: BTreeMap<&str, usize> = BTreeMap::new();
        for event in snapshot
            .events
            .iter()
            .filter(|e| e.severity == Severity::Critical)
        {
            *critical_events.entry(event.agent_id.as_str()).or_default() += 1;
        }

        let mut findings: Vec<Finding> = critical_events
            .into_iter()
            .map(|(agent_id, count)| {
                Finding::new(
                    self.name(),
                    Severity::High,
                    format!("{count} critical anomaly events for {agent_id}"),
                    json!({ "critical_events": count }),
                    "confirm the agent's containment",
                )
                .implicating([agent_id.to_string()])
            })
            .collect();

        for p in snapshot
            .profiles
            .iter()
            .filter(|p| p.anomaly_score >= threshold)
        {
            findings.push(
                Finding::new(
                    self.name(),
                    Severity::Medium,
                    format!("agent {} anomaly score {:.2}", p.id, p.anomaly_score),
                    json!({ "anomaly_score": p.anomaly_score, "threshold": threshold }),
                    "inspect recent behavior against the baseline",
                )
                .implicating([p.id.clone()]),
            );
        }
        Ok(findings)
    }
}

pub struct CorrelatedThreats;

#[async_trait]
impl AuditCheck for CorrelatedThreats {
    fn name(&self) -> &'static str {
        "correlated_threats"
    }

    async fn run(&self, snapshot: &AuditSnapshot) -> OverwatchResult<Vec<Finding>> {
        let findings = snapshot
            .clusters
            .iter()
            .map(|c| {
                Finding::new(
                    self.name(),
                    c.severity,
                    format!("coordinated {} across {} agents", c.signature, c.agent_ids.len()),
                    json!({
                        "event_ids": c.event_ids,
                        "first_seen": c.first_seen,
                        "last_seen": c.last_seen,
                    }),
                    "treat as a coordinated incident",
                )
                .implicating(c.agent_ids.iter().cloned())
            })
            .collect();
        Ok(findings)
    }
}

pub struct PerformanceSla;

#[async_trait]
impl AuditCheck for PerformanceSla {
    fn name(&self) -> &'static str {
        "performance_sla"
    }

    async fn run(&self, snapshot: &AuditSnapshot) -> OverwatchResult<Vec<Finding>> {
        let limits = &snapshot.config.lifecycle;
        let mut findings = Vec::new();
        for p in &snapshot.profiles {
            if p.state == AgentState::Maintenance {
                findings.push(
                    Finding::new(
                        self.name(),
                        Severity::Low,
                        format!("agent {} is in maintenance", p.id),
                        json!({ "remediations": p.applied_remediations }),
                        "complete repair and return the agent to service",
                    )
                    .implicating([p.id.clone()]),
                );
                continue;
            }
            if !(p.state.is_operational() || p.state == AgentState::Degraded)
                || p.performance_window.is_empty()
            {
                continue;
            }
            let latency = p.performance_window.mean_latency_ms();
            let errors = p.performance_window.mean_error_rate();
            if latency > limits.degraded_latency_ms || errors > limits.degraded_error_rate {
                findings.push(
                    Finding::new(
                        self.name(),
                        Severity::Medium,
                        format!("agent {} misses latency or error targets", p.id),
                        json!({ "mean_latency_ms": latency, "mean_error_rate": errors }),
                        "investigate the agent's degraded performance",
                    )
                    .implicating([p.id.clone()]),
                );
            }
        }
        Ok(findings)
    }
}

pub struct LoadBalance;

#[async_trait]
impl AuditCheck for LoadBalance {
    fn name(&self) -> &'static str {
        "load_balance"
    }

    async fn run(&self, snapshot: &AuditSnapshot) -> OverwatchResult<Vec<Finding>> {
        let operational: Vec<_> = snapshot
            .profiles
            .iter()
            .filter(|p| p.state.is_operational())
            .collect();
        let mut findings = Vec::new();

        if operational.len() >= 2 {
            let n = operational.len() as f64;
            let mean = operational.iter().map(|p| p.load.ratio()).sum::<f64>() / n;
            let variance = operational
                .iter()
                .map(|p| (p.load.ratio() - mean).powi(2))
                .sum::<f64>()
                / n;
            let threshold = snapshot.config.orchestrator.rebalance_variance_threshold;
            if variance > threshold {
                findings.push(Finding::new(
                    self.name(),
                    Severity::Low,
                    "load is unevenly spread across agents",
                    json!({ "variance": variance, "threshold": threshold, "mean_ratio": mean }),
                    "check that rebalancing runs",
                ));
            }
        }

        for p in snapshot
            .profiles
            .iter()
            .filter(|p| p.load.current > p.capacity_limit)
        {
            findings.push(
                Finding::new(
                    self.name(),
                    Severity::Medium,
                    format!("agent {} runs above its capacity limit", p.id),
                    json!({ "load": p.load, "capacity_limit": p.capacity_limit }),
                    "let in-flight work drain before assigning more",
                )
                .implicating([p.id.clone()]),
            );
        }
        Ok(findings)
    }
}

pub struct StateConsistency;

#[async_trait]
impl AuditCheck for StateConsistency {
    fn name(&self) -> &'static str {
        "state_consistency"
    }

    async fn run(&self, snapshot: &AuditSnapshot) -> OverwatchResult<Vec<Finding>> {
        let mut last_logged: HashMap<&str, AgentState> = HashMap::new();
        for t in &snapshot.transitions {
            last_logged.insert(t.agent_id.as_str(), t.to);
        }

        let mut findings = Vec::new();
        for p in &snapshot.profiles {
            if let Some(logged) = last_logged.get(p.id.as_str()) {
                if *logged != p.state {
                    findings.push(
                        Finding::new(
                            self.name(),
                            Severity::High,
                            format!("agent {} state differs from its transition log", p.id),
                            json!({ "state": p.state, "last_logged": logged }),
                            "reconcile the profile with the transition history",
                        )
                        .implicating([p.id.clone()]),
                    );
                }
            }
            if p.load.current > p.load.max {
                findings.push(
                    Finding::new(
                        self.name(),
                        Severity::High,
                        format!("agent {} is over-assigned", p.id),
                        json!({ "load": p.load }),
                        "reconcile task assignments",
                    )
                    .implicating([p.id.clone()]),
                );
            } else if p.state.is_excluded_from_dispatch() && p.load.current > 0 {
                findings.push(
                    Finding::new(
                        self.name(),
                        Severity::Medium,
                        format!("agent {} holds work while {}", p.id, p.state),
                        json!({ "load": p.load, "state": p.state }),
                        "reassign or cancel the agent's tasks",
                    )
                    .implicating([p.id.clone()]),
                );
            }
        }
        Ok(findings)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use chrono::Utc;
    use overwatch_core::{AgentProfile, AgentSpec, AnomalyEvent, OverwatchConfig, SecurityPosture};

    fn profile(id: &str) -> AgentProfile {
        let spec = AgentSpec::new(id, "acme", ["rust"]).with_security(SecurityPosture {
            encryption_at_rest: true,
            tls_enabled: true,
        });
        let mut profile = AgentProfile::from_spec(&spec, 20, Utc::now());
        profile.state = AgentState::Active;
        profile
    }

    fn snapshot(profiles: Vec<AgentProfile>) -> AuditSnapshot {
        let mut snapshot = AuditSnapshot::empty(OverwatchConfig::default());
        snapshot.profiles = profiles;
        snapshot
    }

    #[test]
    fn test_standard_registry_covers_every_checklist() {
        let registry = CheckRegistry::standard();
        assert_eq!(registry.names().len(), 10);
        for audit_type in AuditType::ALL {
            assert!(registry.checklist(audit_type).is_ok(), "{audit_type}");
        }
        assert!(CheckRegistry::empty().checklist(AuditType::Regular).is_err());
    }

    #[tokio::test]
    async fn test_reporting_compliance_grades_by_status() {
        let mut warned = profile("a1");
        warned.reporting_status = ReportingStatus::Warned;
        let mut lost = profile("a2");
        lost.reporting_status = ReportingStatus::NonCompliant;
        let findings = ReportingCompliance
            .run(&snapshot(vec![warned, lost, profile("a3")]))
            .await
            .unwrap();
        assert_eq!(findings.len(), 2);
        assert_eq!(findings[0].severity, Severity::Low);
        assert_eq!(findings[1].severity, Severity::High);
        assert_eq!(findings[1].agent_ids, vec!["a2"]);
    }

    #[tokio::test]
    async fn test_encryption_verification() {
        let mut plain = profile("a1");
        plain.security_posture = SecurityPosture::default();
        let mut half = profile("a2");
        half.security_posture.encryption_at_rest = false;
        let findings = EncryptionVerification
            .run(&snapshot(vec![plain, half, profile("a3")]))
            .await
            .unwrap();
        let severities: Vec<_> = findings.iter().map(|f| f.severity).collect();
        assert_eq!(severities, vec![Severity::High, Severity::Medium]);
    }

    #[tokio::test]
    async fn test_exfiltration_events_are_critical() {
        let mut snap = snapshot(vec![profile("a1")]);
        snap.events.push(AnomalyEvent::new(
            "a1",
            "suspected_exfiltration",
            1.0,
            Severity::Critical,
            json!({ "bytes": 2_000_000_000u64 }),
            Utc::now(),
        ));
        let findings = UnauthorizedAccess.run(&snap).await.unwrap();
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].severity, Severity::Critical);
        assert_eq!(findings[0].agent_ids, vec!["a1"]);
    }

    #[tokio::test]
    async fn test_broken_chain_is_critical() {
        let mut snap = snapshot(vec![]);
        snap.chain_break = Some("entry 3: hash mismatch".into());
        let findings = DecisionConsistency.run(&snap).await.unwrap();
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].severity, Severity::Critical);
    }

    #[tokio::test]
    async fn test_state_consistency_flags_overload_and_held_work() {
        let mut over = profile("a1");
        over.load.current = over.load.max + 1;
        let mut suspended = profile("a2");
        suspended.state = AgentState::Suspended;
        suspended.load.current = 1;
        let findings = StateConsistency
            .run(&snapshot(vec![over, suspended]))
            .await
            .unwrap();
        let severities: Vec<_> = findings.iter().map(|f| f.severity).collect();
        assert_eq!(severities, vec![Severity::High, Severity::Medium]);
    }

    #[tokio::test]
    async fn test_security_posture_thresholds() {
        let mut weak = profile("a1");
        weak.security_score = 50;
        let mut low = profile("a2");
        low.security_score = 10;
        let findings = SecurityPostureCheck
            .run(&snapshot(vec![weak, low, profile("a3")]))
            .await
            .unwrap();
        let severities: Vec<_> = findings.iter().map(|f| f.severity).collect();
        assert_eq!(severities, vec![Severity::Medium, Severity::High]);
    }
}
