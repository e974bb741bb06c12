use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, VecDeque};

/// Agents are addressed by caller-chosen, tag-shaped string ids.
pub type AgentId = String;

/// Lifecycle state of a registered agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AgentState {
    Registered,
    Provisioning,
    Active,
    Idle,
    Busy,
    Degraded,
    Maintenance,
    Suspended,
    Quarantined,
    Compromised,
    Offline,
    Decommissioning,
    Decommissioned,
}

impl AgentState {
    /// Every state, in declaration order.
    pub const ALL: [AgentState; 13] = [
        AgentState::Registered,
        AgentState::Provisioning,
        AgentState::Active,
        AgentState::Idle,
        AgentState::Busy,
        AgentState::Degraded,
        AgentState::Maintenance,
        AgentState::Suspended,
        AgentState::Quarantined,
        AgentState::Compromised,
        AgentState::Offline,
        AgentState::Decommissioning,
        AgentState::Decommissioned,
    ];

    /// `DECOMMISSIONED` has no outgoing edges.
    pub fn is_terminal(self) -> bool {
        self == AgentState::Decommissioned
    }

    /// The `ACTIVE ⇄ IDLE ⇄ BUSY` working set.
    pub fn is_operational(self) -> bool {
        matches!(self, AgentState::Active | AgentState::Idle | AgentState::Busy)
    }

    /// States that must never receive task assignments.
    pub fn is_excluded_from_dispatch(self) -> bool {
        matches!(
            self,
            AgentState::Suspended
                | AgentState::Quarantined
                | AgentState::Compromised
                | AgentState::Decommissioned
        )
    }

    /// States from which a new task may be accepted.
    pub fn accepts_tasks(self) -> bool {
        matches!(self, AgentState::Active | AgentState::Idle)
    }
}

impl std::fmt::Display for AgentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            AgentState::Registered => "REGISTERED",
            AgentState::Provisioning => "PROVISIONING",
            AgentState::Active => "ACTIVE",
            AgentState::Idle => "IDLE",
            AgentState::Busy => "BUSY",
            AgentState::Degraded => "DEGRADED",
            AgentState::Maintenance => "MAINTENANCE",
            AgentState::Suspended => "SUSPENDED",
            AgentState::Quarantined => "QUARANTINED",
            AgentState::Compromised => "COMPROMISED",
            AgentState::Offline => "OFFLINE",
            AgentState::Decommissioning => "DECOMMISSIONING",
            AgentState::Decommissioned => "DECOMMISSIONED",
        };
        f.write_str(name)
    }
}

/// Reporting compliance level. Ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReportingStatus {
    Compliant,
    Warned,
    Suspended,
    NonCompliant,
}

/// Automated remediation steps, applied in ladder order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Remediation {
    RestartSignal,
    ClearCache,
    ReduceLoad,
}

impl Remediation {
    /// Order in which remediation is attempted before escalating to maintenance.
    pub const LADDER: [Remediation; 3] = [
        Remediation::RestartSignal,
        Remediation::ClearCache,
        Remediation::ReduceLoad,
    ];
}

/// Hardware the agent declared at registration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HardwareSpec {
    pub cpu_cores: u32,
    pub memory_mb: u64,
}

impl Default for HardwareSpec {
    fn default() -> Self {
        Self {
            cpu_cores: 2,
            memory_mb: 4096,
        }
    }
}

/// Security controls the agent claims to run with; verified by audits.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityPosture {
    #[serde(default)]
    pub encryption_at_rest: bool,
    #[serde(default)]
    pub tls_enabled: bool,
}

fn default_max_capacity() -> u32 {
    4
}

fn default_cost_rate() -> f64 {
    1.0
}

/// Registration request for a new agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSpec {
    pub id: AgentId,
    pub tenant_id: String,
    pub capabilities: BTreeSet<String>,
    #[serde(default = "default_max_capacity")]
    pub max_capacity: u32,
    #[serde(default)]
    pub hardware: HardwareSpec,
    /// Relative cost per task-hour; lower is cheaper.
    #[serde(default = "default_cost_rate")]
    pub cost_rate: f64,
    #[serde(default)]
    pub security: SecurityPosture,
}

impl AgentSpec {
    /// Spec with default hardware, capacity and cost.
    pub fn new<I, S>(id: impl Into<String>, tenant_id: impl Into<String>, capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            id: id.into(),
            tenant_id: tenant_id.into(),
            capabilities: capabilities.into_iter().map(Into::into).collect(),
            max_capacity: default_max_capacity(),
            hardware: HardwareSpec::default(),
            cost_rate: default_cost_rate(),
            security: SecurityPosture::default(),
        }
    }

    pub fn with_capacity(mut self, max_capacity: u32) -> Self {
        self.max_capacity = max_capacity;
        self
    }

    pub fn with_cost_rate(mut self, cost_rate: f64) -> Self {
        self.cost_rate = cost_rate;
        self
    }

    pub fn with_security(mut self, security: SecurityPosture) -> Self {
        self.security = security;
        self
    }
}

/// Current task load against declared capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Load {
    pub current: u32,
    pub max: u32,
}

impl Load {
    /// Fraction of declared capacity in use, in `[0, 1]` for sane inputs.
    pub fn ratio(&self) -> f64 {
        if self.max == 0 {
            return 1.0;
        }
        f64::from(self.current) / f64::from(self.max)
    }
}

/// One entry of the rolling performance window.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PerformanceSample {
    pub at: DateTime<Utc>,
    pub latency_ms: f64,
    pub error_rate: f64,
    pub throughput: f64,
}

/// Rolling window of recent performance samples.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceWindow {
    capacity: usize,
    samples: VecDeque<PerformanceSample>,
}

impl PerformanceWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            samples: VecDeque::new(),
        }
    }

    pub fn push(&mut self, sample: PerformanceSample) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn samples(&self) -> impl Iterator<Item = &PerformanceSample> {
        self.samples.iter()
    }

    fn mean_of(&self, f: impl Fn(&PerformanceSample) -> f64) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        self.samples.iter().map(f).sum::<f64>() / self.samples.len() as f64
    }

    pub fn mean_latency_ms(&self) -> f64 {
        self.mean_of(|s| s.latency_ms)
    }

    pub fn mean_error_rate(&self) -> f64 {
        self.mean_of(|s| s.error_rate)
    }

    pub fn mean_throughput(&self) -> f64 {
        self.mean_of(|s| s.throughput)
    }
}

impl Default for PerformanceWindow {
    fn default() -> Self {
        Self::new(20)
    }
}

/// Operational record for one registered agent.
///
/// Owned exclusively by the lifecycle manager; every other component works on
/// cloned snapshots and submits requests instead of mutating it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentProfile {
    pub id: AgentId,
    pub tenant_id: String,
    pub capabilities: BTreeSet<String>,
    pub state: AgentState,
    pub security_score: u8,
    pub anomaly_score: f64,
    pub load: Load,
    /// Effective maximum after a reduce-load remediation; equals `load.max` otherwise.
    pub capacity_limit: u32,
    pub performance_window: PerformanceWindow,
    pub last_heartbeat_at: Option<DateTime<Utc>>,
    pub last_metrics: Option<crate::heartbeat::Metrics>,
    pub missed_report_count: u32,
    pub reporting_status: ReportingStatus,
    pub cluster_id: Option<String>,
    pub hardware: HardwareSpec,
    pub cost_rate: f64,
    pub security_posture: SecurityPosture,
    pub registered_at: DateTime<Utc>,
    #[serde(default)]
    pub applied_remediations: Vec<Remediation>,
    /// Timestamps of recent state changes, pruned by the lifecycle manager.
    #[serde(default)]
    pub recent_transitions: VecDeque<DateTime<Utc>>,
    #[serde(default)]
    pub frozen: bool,
    #[serde(default)]
    pub deletion_requested: bool,
}

impl AgentProfile {
    /// Builds a fresh profile in `REGISTERED` from a validated spec.
    pub fn from_spec(spec: &AgentSpec, window: usize, now: DateTime<Utc>) -> Self {
        Self {
            id: spec.id.clone(),
            tenant_id: spec.tenant_id.clone(),
            capabilities: spec.capabilities.clone(),
            state: AgentState::Registered,
            security_score: 100,
            anomaly_score: 0.0,
            load: Load {
                current: 0,
                max: spec.max_capacity,
            },
            capacity_limit: spec.max_capacity,
            performance_window: PerformanceWindow::new(window),
            last_heartbeat_at: None,
            last_metrics: None,
            missed_report_count: 0,
            reporting_status: ReportingStatus::Compliant,
            cluster_id: None,
            hardware: spec.hardware.clone(),
            cost_rate: spec.cost_rate,
            security_posture: spec.security.clone(),
            registered_at: now,
            applied_remediations: Vec::new(),
            recent_transitions: VecDeque::new(),
            frozen: false,
            deletion_requested: false,
        }
    }

    /// Returns true if every required capability is present.
    pub fn has_capabilities<'a>(&self, required: impl IntoIterator<Item = &'a String>) -> bool {
        required.into_iter().all(|c| self.capabilities.contains(c))
    }

    /// Spare slots under the effective capacity limit.
    pub fn has_spare_capacity(&self) -> bool {
        self.load.current < self.load.max && self.load.current < self.capacity_limit
    }

    /// Last time the agent was heard from, falling back to registration.
    pub fn last_seen(&self) -> DateTime<Utc> {
        self.last_heartbeat_at.unwrap_or(self.registered_at)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_state_classification() {
        assert!(AgentState::Decommissioned.is_terminal());
        assert!(!AgentState::Offline.is_terminal());
        assert!(AgentState::Idle.accepts_tasks());
        assert!(!AgentState::Busy.accepts_tasks());
        for state in AgentState::ALL {
            if state.is_excluded_from_dispatch() {
                assert!(!state.accepts_tasks(), "{state} must not accept tasks");
            }
        }
    }

    #[test]
    fn test_state_serialization() {
        let json = serde_json::to_string(&AgentState::Decommissioning).unwrap();
        assert_eq!(json, "\"DECOMMISSIONING\"");
        let parsed: ReportingStatus = serde_json::from_str("\"NON_COMPLIANT\"").unwrap();
        assert_eq!(parsed, ReportingStatus::NonCompliant);
    }

    #[test]
    fn test_reporting_status_ordering() {
        assert!(ReportingStatus::Compliant < ReportingStatus::Warned);
        assert!(ReportingStatus::Warned < ReportingStatus::Suspended);
        assert!(ReportingStatus::Suspended < ReportingStatus::NonCompliant);
    }

    #[test]
    fn test_performance_window_rolls() {
        let mut window = PerformanceWindow::new(2);
        let now = Utc::now();
        for latency in [10.0, 20.0, 30.0] {
            window.push(PerformanceSample {
                at: now,
                latency_ms: latency,
                error_rate: 0.0,
                throughput: 1.0,
            });
        }
        assert_eq!(window.len(), 2);
        assert!((window.mean_latency_ms() - 25.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_profile_from_spec() {
        let spec = AgentSpec::new("coder-1", "acme", ["rust", "python"]).with_capacity(2);
        let profile = AgentProfile::from_spec(&spec, 10, Utc::now());
        assert_eq!(profile.state, AgentState::Registered);
        assert_eq!(profile.security_score, 100);
        assert_eq!(profile.load.max, 2);
        assert!(profile.has_spare_capacity());
        assert!(profile.has_capabilities(&["rust".to_string()]));
        assert!(!profile.has_capabilities(&["go".to_string()]));
    }

    #[test]
    fn test_load_ratio() {
        assert!((Load { current: 1, max: 4 }.ratio() - 0.25).abs() < f64::EPSILON);
        assert!((Load { current: 0, max: 0 }.ratio() - 1.0).abs() < f64::EPSILON);
    }
}
