use crate::state_machine::is_allowed;
use crate::validation::validate_spec;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use overwatch_core::{
    AgentId, AgentProfile, AgentSpec, AgentState, ConfigHandle, HeartbeatRecord, HeartbeatSink,
    OverwatchError, OverwatchResult, PerformanceSample, Remediation, ReportedStatus,
    ReportingStatus,
};
use overwatch_security::{AuditOutcome, AuditTrail};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// How long state-change timestamps are kept on the profile for churn detection.
const TRANSITION_HISTORY: i64 = 60;

/// Actor name used for changes the manager makes on its own.
const LIFECYCLE_ACTOR: &str = "lifecycle";

/// Actor for the IDLE/ACTIVE/BUSY flips made by load accounting. These are
/// routine and stay out of the churn ledger.
const LOAD_ACTOR: &str = "load";

const REPORTING_ACTOR: &str = "reporting";

/// Transition records kept in memory; the audit trail holds the full history.
const DEFAULT_HISTORY_LIMIT: usize = 10_000;

/// A logged state change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub agent_id: AgentId,
    pub from: AgentState,
    pub to: AgentState,
    pub reason: String,
    pub actor: String,
    pub at: DateTime<Utc>,
}

/// Remediation an audit can ask for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemediationRequest {
    /// Isolate the agent (`QUARANTINED`).
    Quarantine,
    /// Take the agent out of service for repair (`MAINTENANCE`).
    Maintenance,
}

type Slot = Arc<Mutex<AgentProfile>>;

/// Owns every agent profile and the lifecycle state machine.
///
/// Profiles live in a sharded map, each behind its own mutex, so work on one
/// agent never blocks another. Callers receive cloned snapshots.
pub struct LifecycleManager {
    agents: DashMap<AgentId, Slot>,
    tenants: Mutex<HashMap<String, usize>>,
    history: RwLock<VecDeque<TransitionRecord>>,
    history_limit: usize,
    config: ConfigHandle,
    trail: Arc<AuditTrail>,
}

impl LifecycleManager {
    pub fn new(config: ConfigHandle, trail: Arc<AuditTrail>) -> Self {
        Self {
            agents: DashMap::new(),
            tenants: Mutex::new(HashMap::new()),
            history: RwLock::new(VecDeque::new()),
            history_limit: DEFAULT_HISTORY_LIMIT,
            config,
            trail,
        }
    }

    /// Keep at most `limit` transition records in memory, dropping the oldest.
    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit.max(1);
        self
    }

    pub fn trail(&self) -> &Arc<AuditTrail> {
        &self.trail
    }

    fn slot(&self, agent_id: &str) -> OverwatchResult<Slot> {
        self.agents
            .get(agent_id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| OverwatchError::NotFound(format!("agent '{agent_id}'")))
    }

    // --- Registry ---

    /// Validate `spec` and create a profile in `PROVISIONING`.
    pub fn register(&self, spec: AgentSpec) -> OverwatchResult<AgentProfile> {
        self.register_at(spec, Utc::now())
    }

    pub fn register_at(&self, spec: AgentSpec, now: DateTime<Utc>) -> OverwatchResult<AgentProfile> {
        validate_spec(&spec)?;
        let (limit, window) = {
            let config = self.config.read();
            (
                config.lifecycle.max_agents_per_tenant,
                config.lifecycle.performance_window,
            )
        };

        let mut tenants = self.tenants.lock();
        if self.agents.contains_key(&spec.id) {
            return Err(OverwatchError::Validation(format!(
                "agent '{}' is already registered",
                spec.id
            )));
        }
        let count = tenants.entry(spec.tenant_id.clone()).or_insert(0);
        if *count >= limit {
            warn!(tenant_id = %spec.tenant_id, limit, "Tenant agent limit reached");
            return Err(OverwatchError::CapacityExceeded {
                tenant_id: spec.tenant_id.clone(),
                limit,
            });
        }

        let mut profile = AgentProfile::from_spec(&spec, window, now);
        self.apply_transition(
            &mut profile,
            AgentState::Provisioning,
            "registered",
            LIFECYCLE_ACTOR,
            now,
        )?;
        *count += 1;
        self.agents
            .insert(profile.id.clone(), Arc::new(Mutex::new(profile.clone())));
        drop(tenants);

        info!(
            agent_id = %profile.id,
            tenant_id = %profile.tenant_id,
            capabilities = profile.capabilities.len(),
            "Agent registered"
        );
        Ok(profile)
    }

    pub fn get(&self, agent_id: &str) -> OverwatchResult<AgentProfile> {
        Ok(self.slot(agent_id)?.lock().clone())
    }

    pub fn contains(&self, agent_id: &str) -> bool {
        self.agents.contains_key(agent_id)
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    /// Point-in-time copies of every profile, sorted by id.
    pub fn snapshot(&self) -> Vec<AgentProfile> {
        let slots: Vec<Slot> = self.agents.iter().map(|e| Arc::clone(e.value())).collect();
        let mut profiles: Vec<AgentProfile> = slots.iter().map(|s| s.lock().clone()).collect();
        profiles.sort_by(|a, b| a.id.cmp(&b.id));
        profiles
    }

    pub fn agent_ids(&self) -> Vec<AgentId> {
        let mut ids: Vec<AgentId> = self.agents.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    // --- Transitions ---

    /// Apply a whitelisted state change requested by `actor`.
    pub fn transition(
        &self,
        agent_id: &str,
        target: AgentState,
        reason: &str,
        actor: &str,
    ) -> OverwatchResult<AgentProfile> {
        let slot = self.slot(agent_id)?;
        let mut profile = slot.lock();
        if profile.frozen {
            return Err(OverwatchError::Frozen(format!(
                "agent '{agent_id}' awaits a deletion decision"
            )));
        }
        self.apply_transition(&mut profile, target, reason, actor, Utc::now())?;
        Ok(profile.clone())
    }

    /// Recent transition history, oldest first, optionally for one agent.
    /// Older records are only in the audit trail.
    pub fn transition_log(&self, agent_id: Option<&str>) -> Vec<TransitionRecord> {
        self.history
            .read()
            .iter()
            .filter(|r| agent_id.map_or(true, |id| r.agent_id == id))
            .cloned()
            .collect()
    }

    fn apply_transition(
        &self,
        profile: &mut AgentProfile,
        to: AgentState,
        reason: &str,
        actor: &str,
        at: DateTime<Utc>,
    ) -> OverwatchResult<()> {
        let from = profile.state;
        if !is_allowed(from, to) {
            warn!(agent_id = %profile.id, %from, %to, actor, "Rejected illegal transition");
            return Err(OverwatchError::IllegalTransition {
                agent_id: profile.id.clone(),
                from,
                to,
            });
        }

        profile.state = to;
        if actor != LOAD_ACTOR {
            profile.recent_transitions.push_back(at);
        }
        let horizon = at - Duration::minutes(TRANSITION_HISTORY);
        while profile
            .recent_transitions
            .front()
            .is_some_and(|t| *t < horizon)
        {
            profile.recent_transitions.pop_front();
        }

        info!(agent_id = %profile.id, %from, %to, actor, reason, "Agent state changed");
        {
            let mut history = self.history.write();
            if history.len() >= self.history_limit {
                history.pop_front();
            }
            history.push_back(TransitionRecord {
                agent_id: profile.id.clone(),
                from,
                to,
                reason: reason.to_string(),
                actor: actor.to_string(),
                at,
            });
        }
        self.trail.record(
            actor,
            "transition",
            Some(profile.id.clone()),
            json!({ "from": from, "to": to, "reason": reason, "at": at }),
            AuditOutcome::Success,
        );
        Ok(())
    }

    // --- Heartbeats and remediation ---

    /// Fold a heartbeat into the profile.
    ///
    /// Updates `last_heartbeat_at` and the performance window, follows the
    /// reported status along the working-set edges, and drives the
    /// degradation ladder when latency or error rate breach their thresholds.
    pub fn apply_heartbeat(&self, record: &HeartbeatRecord) -> OverwatchResult<AgentProfile> {
        let (error_limit, latency_limit) = {
            let config = self.config.read();
            (
                config.lifecycle.degraded_error_rate,
                config.lifecycle.degraded_latency_ms,
            )
        };

        let slot = self.slot(&record.agent_id)?;
        let mut profile = slot.lock();
        if profile.frozen {
            return Err(OverwatchError::Frozen(format!(
                "agent '{}' is frozen; heartbeat rejected",
                record.agent_id
            )));
        }
        if let Some(recorded) = profile.last_heartbeat_at {
            if record.timestamp <= recorded {
                return Err(OverwatchError::StaleData {
                    agent_id: record.agent_id.clone(),
                    received: record.timestamp,
                    recorded,
                });
            }
        }

        let at = record.timestamp;
        let metrics = record.metrics;
        profile.last_heartbeat_at = Some(at);
        profile.last_metrics = Some(metrics);
        profile.performance_window.push(PerformanceSample {
            at,
            latency_ms: metrics.latency_ms,
            error_rate: metrics.error_rate,
            throughput: metrics.throughput,
        });

        let state = profile.state;
        match state {
            AgentState::Provisioning => {
                self.apply_transition(&mut profile, AgentState::Active, "first heartbeat", LIFECYCLE_ACTOR, at)?;
            }
            AgentState::Offline => {
                self.apply_transition(&mut profile, AgentState::Active, "heartbeat resumed", LIFECYCLE_ACTOR, at)?;
            }
            _ => {}
        }

        let breach = metrics.error_rate > error_limit || metrics.latency_ms > latency_limit;
        let state = profile.state;
        match state {
            AgentState::Active | AgentState::Idle | AgentState::Busy if breach => {
                if state != AgentState::Active {
                    self.apply_transition(&mut profile, AgentState::Active, "threshold breach", LIFECYCLE_ACTOR, at)?;
                }
                self.apply_transition(&mut profile, AgentState::Degraded, "threshold breach", LIFECYCLE_ACTOR, at)?;
                self.advance_remediation(&mut profile, at)?;
            }
            AgentState::Degraded if breach => {
                self.advance_remediation(&mut profile, at)?;
            }
            AgentState::Degraded => {
                self.apply_transition(&mut profile, AgentState::Active, "remediation succeeded", LIFECYCLE_ACTOR, at)?;
                profile.applied_remediations.clear();
                profile.capacity_limit = profile.load.max;
            }
            state if state.is_operational() => {
                if let Some(target) = record.status.map(reported_state) {
                    if target != state && is_allowed(state, target) {
                        self.apply_transition(&mut profile, target, "reported status", "agent", at)?;
                    }
                }
            }
            _ => {}
        }

        debug!(agent_id = %profile.id, state = %profile.state, "Heartbeat applied");
        Ok(profile.clone())
    }

    /// Apply the next remediation step, or escalate to `MAINTENANCE` once the
    /// ladder is exhausted.
    fn advance_remediation(&self, profile: &mut AgentProfile, at: DateTime<Utc>) -> OverwatchResult<()> {
        let next = Remediation::LADDER
            .into_iter()
            .find(|step| !profile.applied_remediations.contains(step));
        match next {
            Some(step) => {
                self.remediate(profile, step, LIFECYCLE_ACTOR);
                Ok(())
            }
            None => self.apply_transition(
                profile,
                AgentState::Maintenance,
                "remediation exhausted",
                LIFECYCLE_ACTOR,
                at,
            ),
        }
    }

    /// Returns false when the step was already applied.
    fn remediate(&self, profile: &mut AgentProfile, step: Remediation, actor: &str) -> bool {
        if profile.applied_remediations.contains(&step) {
            return false;
        }
        if step == Remediation::ReduceLoad {
            profile.capacity_limit = (profile.load.max / 2).max(1);
        }
        profile.applied_remediations.push(step);
        info!(agent_id = %profile.id, remediation = ?step, "Remediation applied");
        self.trail.record(
            actor,
            "remediation",
            Some(profile.id.clone()),
            json!({ "step": step, "capacity_limit": profile.capacity_limit }),
            AuditOutcome::Success,
        );
        true
    }

    /// Apply a remediation step explicitly. Re-applying is a no-op that
    /// returns `false`.
    pub fn apply_remediation(
        &self,
        agent_id: &str,
        step: Remediation,
        actor: &str,
    ) -> OverwatchResult<bool> {
        let slot = self.slot(agent_id)?;
        let mut profile = slot.lock();
        Ok(self.remediate(&mut profile, step, actor))
    }

    /// Remediation submitted by an audit outcome.
    pub fn request_remediation(
        &self,
        agent_id: &str,
        request: RemediationRequest,
        reason: &str,
        actor: &str,
    ) -> OverwatchResult<AgentProfile> {
        let slot = self.slot(agent_id)?;
        let mut profile = slot.lock();
        let now = Utc::now();
        match request {
            RemediationRequest::Quarantine => {
                if !matches!(
                    profile.state,
                    AgentState::Quarantined
                        | AgentState::Compromised
                        | AgentState::Decommissioning
                        | AgentState::Decommissioned
                ) {
                    self.apply_transition(&mut profile, AgentState::Quarantined, reason, actor, now)?;
                }
            }
            RemediationRequest::Maintenance => {
                if profile.state.is_operational() {
                    if profile.state != AgentState::Active {
                        self.apply_transition(&mut profile, AgentState::Active, reason, actor, now)?;
                    }
                    self.apply_transition(&mut profile, AgentState::Degraded, reason, actor, now)?;
                }
                if profile.state == AgentState::Degraded {
                    self.apply_transition(&mut profile, AgentState::Maintenance, reason, actor, now)?;
                } else {
                    debug!(agent_id, state = %profile.state, "Maintenance request ignored in current state");
                }
            }
        }
        Ok(profile.clone())
    }

    // --- Stale detection ---

    /// Force `OFFLINE` on every agent silent for longer than the stale timeout.
    /// Returns the ids that were moved.
    pub fn sweep_stale(&self, now: DateTime<Utc>) -> Vec<AgentId> {
        let timeout = self.config.read().surveillance.stale_timeout();
        let slots: Vec<Slot> = self.agents.iter().map(|e| Arc::clone(e.value())).collect();

        let mut moved = Vec::new();
        for slot in slots {
            let mut profile = slot.lock();
            if matches!(
                profile.state,
                AgentState::Offline
                    | AgentState::Suspended
                    | AgentState::Quarantined
                    | AgentState::Compromised
                    | AgentState::Decommissioning
                    | AgentState::Decommissioned
            ) {
                continue;
            }
            let silent = now - profile.last_seen();
            if silent > timeout {
                let reason = format!("no heartbeat for {}s", silent.num_seconds());
                if self
                    .apply_transition(&mut profile, AgentState::Offline, &reason, LIFECYCLE_ACTOR, now)
                    .is_ok()
                {
                    moved.push(profile.id.clone());
                }
            }
        }
        if !moved.is_empty() {
            warn!(count = moved.len(), "Stale agents forced offline");
        }
        moved
    }

    // --- Requests from surveillance ---

    /// Deduct `penalty` from the security score, floored at 0. Reaching 0
    /// forces `QUARANTINED`.
    pub fn apply_security_penalty(
        &self,
        agent_id: &str,
        penalty: u8,
        reason: &str,
        at: DateTime<Utc>,
    ) -> OverwatchResult<AgentProfile> {
        let slot = self.slot(agent_id)?;
        let mut profile = slot.lock();
        let before = profile.security_score;
        profile.security_score = before.saturating_sub(penalty);
        info!(
            agent_id,
            before,
            after = profile.security_score,
            reason,
            "Security score reduced"
        );
        self.trail.record(
            "surveillance",
            "security_penalty",
            Some(agent_id.to_string()),
            json!({ "before": before, "after": profile.security_score, "reason": reason }),
            AuditOutcome::Success,
        );

        if profile.security_score == 0 && is_allowed(profile.state, AgentState::Quarantined) {
            self.apply_transition(
                &mut profile,
                AgentState::Quarantined,
                "security score exhausted",
                "surveillance",
                at,
            )?;
        }
        Ok(profile.clone())
    }

    pub fn record_anomaly_score(&self, agent_id: &str, score: f64) -> OverwatchResult<()> {
        let slot = self.slot(agent_id)?;
        slot.lock().anomaly_score = score.clamp(0.0, 1.0);
        Ok(())
    }

    // --- Requests from reporting ---

    pub fn update_reporting(
        &self,
        agent_id: &str,
        missed: u32,
        status: ReportingStatus,
    ) -> OverwatchResult<AgentProfile> {
        let slot = self.slot(agent_id)?;
        let mut profile = slot.lock();
        profile.missed_report_count = missed;
        profile.reporting_status = status;
        Ok(profile.clone())
    }

    /// Raise the reporting level computed from a profile last heard from at
    /// `seen`, together with its state effects: crossing `SUSPENDED` suspends
    /// the agent, crossing `NON_COMPLIANT` requests deletion and freezes it.
    ///
    /// Returns `None` without touching the profile when it is frozen or a
    /// heartbeat arrived after `seen`. Otherwise returns the level the
    /// profile held before and the updated snapshot.
    pub fn escalate_reporting(
        &self,
        agent_id: &str,
        seen: DateTime<Utc>,
        missed: u32,
        level: ReportingStatus,
        reason: &str,
    ) -> OverwatchResult<Option<(ReportingStatus, AgentProfile)>> {
        let slot = self.slot(agent_id)?;
        let mut profile = slot.lock();
        if profile.frozen || profile.last_seen() != seen {
            return Ok(None);
        }

        let from = profile.reporting_status;
        let level = level.max(from);
        profile.missed_report_count = missed;
        profile.reporting_status = level;

        if from < ReportingStatus::Suspended && level >= ReportingStatus::Suspended {
            match self.apply_transition(&mut profile, AgentState::Suspended, reason, REPORTING_ACTOR, Utc::now()) {
                Ok(()) => {}
                Err(OverwatchError::IllegalTransition { from, .. }) => {
                    debug!(agent_id, state = %from, "Agent not suspendable from current state");
                }
                Err(e) => return Err(e),
            }
        }
        if from < ReportingStatus::NonCompliant && level >= ReportingStatus::NonCompliant {
            self.mark_deletion_requested(&mut profile, reason);
            self.mark_frozen(&mut profile, reason);
        }
        Ok(Some((from, profile.clone())))
    }

    /// Block heartbeats and transitions until an admin decides on deletion.
    pub fn freeze(&self, agent_id: &str, reason: &str) -> OverwatchResult<()> {
        let slot = self.slot(agent_id)?;
        let mut profile = slot.lock();
        self.mark_frozen(&mut profile, reason);
        Ok(())
    }

    pub fn request_deletion(&self, agent_id: &str, reason: &str) -> OverwatchResult<()> {
        let slot = self.slot(agent_id)?;
        let mut profile = slot.lock();
        self.mark_deletion_requested(&mut profile, reason);
        Ok(())
    }

    fn mark_frozen(&self, profile: &mut AgentProfile, reason: &str) {
        if !profile.frozen {
            profile.frozen = true;
            warn!(agent_id = %profile.id, reason, "Agent profile frozen");
            self.trail.record(
                REPORTING_ACTOR,
                "freeze",
                Some(profile.id.clone()),
                json!({ "reason": reason }),
                AuditOutcome::Success,
            );
        }
    }

    fn mark_deletion_requested(&self, profile: &mut AgentProfile, reason: &str) {
        if !profile.deletion_requested {
            profile.deletion_requested = true;
            self.trail.record(
                REPORTING_ACTOR,
                "deletion_requested",
                Some(profile.id.clone()),
                json!({ "reason": reason }),
                AuditOutcome::Success,
            );
        }
    }

    // --- Admin actions ---

    /// Complete a pending deletion request: `DECOMMISSIONING`, then
    /// `DECOMMISSIONED`. Works on frozen profiles.
    pub fn approve_deletion(&self, agent_id: &str, actor: &str) -> OverwatchResult<AgentProfile> {
        let slot = self.slot(agent_id)?;
        let mut profile = slot.lock();
        if !profile.deletion_requested {
            return Err(OverwatchError::Validation(format!(
                "no deletion request pending for agent '{agent_id}'"
            )));
        }
        let now = Utc::now();
        self.apply_transition(&mut profile, AgentState::Decommissioning, "deletion approved", actor, now)?;
        self.apply_transition(&mut profile, AgentState::Decommissioned, "deletion approved", actor, now)?;
        profile.deletion_requested = false;

        if let Some(count) = self.tenants.lock().get_mut(&profile.tenant_id) {
            *count = count.saturating_sub(1);
        }
        Ok(profile.clone())
    }

    /// Return a `SUSPENDED` agent to service once its reporting has recovered.
    pub fn unsuspend(&self, agent_id: &str, actor: &str) -> OverwatchResult<AgentProfile> {
        let slot = self.slot(agent_id)?;
        let mut profile = slot.lock();
        if profile.frozen {
            return Err(OverwatchError::Frozen(format!(
                "agent '{agent_id}' awaits a deletion decision"
            )));
        }
        if profile.state != AgentState::Suspended {
            return Err(OverwatchError::IllegalTransition {
                agent_id: agent_id.to_string(),
                from: profile.state,
                to: AgentState::Active,
            });
        }
        if profile.reporting_status != ReportingStatus::Compliant {
            return Err(OverwatchError::Validation(format!(
                "agent '{agent_id}' is still {:?}; reporting must recover first",
                profile.reporting_status
            )));
        }
        self.apply_transition(&mut profile, AgentState::Active, "unsuspended by admin", actor, Utc::now())?;
        Ok(profile.clone())
    }

    // --- Requests from the orchestrator ---

    /// Check eligibility and take one load slot in a single critical section.
    ///
    /// `eligible` sees the live profile under the agent's lock; the slot is
    /// taken only if it returns true, the agent accepts tasks and capacity
    /// remains. Returns the updated snapshot, or `None` if the agent no
    /// longer qualifies.
    pub fn try_reserve<F>(&self, agent_id: &str, eligible: F) -> OverwatchResult<Option<AgentProfile>>
    where
        F: FnOnce(&AgentProfile) -> bool,
    {
        let slot = self.slot(agent_id)?;
        let mut profile = slot.lock();
        if profile.frozen
            || !profile.state.accepts_tasks()
            || !profile.has_spare_capacity()
            || !eligible(&profile)
        {
            return Ok(None);
        }

        profile.load.current += 1;
        let now = Utc::now();
        if profile.state == AgentState::Idle {
            self.apply_transition(&mut profile, AgentState::Active, "task assigned", LOAD_ACTOR, now)?;
        }
        if !profile.has_spare_capacity() {
            self.apply_transition(&mut profile, AgentState::Busy, "at capacity", LOAD_ACTOR, now)?;
        }
        Ok(Some(profile.clone()))
    }

    /// Give back a load slot taken by [`LifecycleManager::try_reserve`].
    pub fn release(&self, agent_id: &str) -> OverwatchResult<AgentProfile> {
        let slot = self.slot(agent_id)?;
        let mut profile = slot.lock();
        profile.load.current = profile.load.current.saturating_sub(1);
        if profile.state == AgentState::Busy && profile.has_spare_capacity() {
            self.apply_transition(&mut profile, AgentState::Active, "capacity freed", LOAD_ACTOR, Utc::now())?;
        }
        Ok(profile.clone())
    }

    pub fn set_cluster(&self, agent_id: &str, cluster_id: Option<String>) -> OverwatchResult<()> {
        let slot = self.slot(agent_id)?;
        slot.lock().cluster_id = cluster_id;
        Ok(())
    }
}

fn reported_state(status: ReportedStatus) -> AgentState {
    match status {
        ReportedStatus::Active => AgentState::Active,
        ReportedStatus::Idle => AgentState::Idle,
        ReportedStatus::Busy => AgentState::Busy,
    }
}

impl HeartbeatSink for LifecycleManager {
    fn name(&self) -> &'static str {
        "lifecycle"
    }

    fn on_heartbeat(&self, record: &HeartbeatRecord) -> OverwatchResult<()> {
        self.apply_heartbeat(record).map(|_| ())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use overwatch_core::{Metrics, OverwatchConfig};

    fn manager() -> LifecycleManager {
        LifecycleManager::new(OverwatchConfig::default().into_handle(), Arc::new(AuditTrail::new()))
    }

    fn healthy() -> Metrics {
        Metrics {
            cpu_percent: 30.0,
            memory_percent: 40.0,
            latency_ms: 120.0,
            error_rate: 0.01,
            throughput: 10.0,
            bytes_transferred: 0,
        }
    }

    fn breaching() -> Metrics {
        Metrics {
            error_rate: 0.5,
            ..healthy()
        }
    }

    fn active(m: &LifecycleManager, id: &str, now: DateTime<Utc>) {
        m.register_at(AgentSpec::new(id, "acme", ["rust"]), now - Duration::minutes(1))
            .unwrap();
        m.apply_heartbeat(&HeartbeatRecord::new(id, now, healthy()))
            .unwrap();
    }

    #[test]
    fn test_register_starts_provisioning() {
        let m = manager();
        let profile = m.register(AgentSpec::new("a1", "acme", ["rust"])).unwrap();
        assert_eq!(profile.state, AgentState::Provisioning);
        assert_eq!(profile.security_score, 100);
        let log = m.transition_log(Some("a1"));
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].from, AgentState::Registered);
        assert_eq!(m.trail().entries_for("a1").len(), 1);
    }

    #[test]
    fn test_register_rejects_duplicates_and_tenant_limit() {
        let m = manager();
        m.config.write().lifecycle.max_agents_per_tenant = 2;
        m.register(AgentSpec::new("a1", "acme", ["rust"])).unwrap();
        assert!(matches!(
            m.register(AgentSpec::new("a1", "acme", ["rust"])),
            Err(OverwatchError::Validation(_))
        ));
        m.register(AgentSpec::new("a2", "acme", ["rust"])).unwrap();
        assert!(matches!(
            m.register(AgentSpec::new("a3", "acme", ["rust"])),
            Err(OverwatchError::CapacityExceeded { limit: 2, .. })
        ));
        // Other tenants are unaffected.
        assert!(m.register(AgentSpec::new("b1", "globex", ["rust"])).is_ok());
    }

    #[test]
    fn test_illegal_transition_leaves_state() {
        let m = manager();
        m.register(AgentSpec::new("a1", "acme", ["rust"])).unwrap();
        let err = m
            .transition("a1", AgentState::Maintenance, "manual", "admin")
            .unwrap_err();
        assert!(matches!(err, OverwatchError::IllegalTransition { .. }));
        assert_eq!(m.get("a1").unwrap().state, AgentState::Provisioning);
    }

    #[test]
    fn test_first_heartbeat_activates_and_stale_is_rejected() {
        let m = manager();
        let now = Utc::now();
        active(&m, "a1", now);
        assert_eq!(m.get("a1").unwrap().state, AgentState::Active);

        let dup = HeartbeatRecord::new("a1", now, healthy());
        assert!(matches!(m.apply_heartbeat(&dup), Err(OverwatchError::StaleData { .. })));
        let older = HeartbeatRecord::new("a1", now - Duration::seconds(5), healthy());
        assert!(matches!(m.apply_heartbeat(&older), Err(OverwatchError::StaleData { .. })));
        assert_eq!(m.get("a1").unwrap().last_heartbeat_at, Some(now));
    }

    #[test]
    fn test_reported_status_moves_working_set() {
        let m = manager();
        let now = Utc::now() - Duration::minutes(5);
        active(&m, "a1", now);
        let idle = HeartbeatRecord::new("a1", now + Duration::seconds(30), healthy())
            .with_status(ReportedStatus::Idle);
        assert_eq!(m.apply_heartbeat(&idle).unwrap().state, AgentState::Idle);
        let busy = HeartbeatRecord::new("a1", now + Duration::seconds(60), healthy())
            .with_status(ReportedStatus::Busy);
        assert_eq!(m.apply_heartbeat(&busy).unwrap().state, AgentState::Busy);
    }

    #[test]
    fn test_degradation_ladder_then_maintenance() {
        let m = manager();
        let start = Utc::now() - Duration::minutes(10);
        active(&m, "a1", start);

        let beat = |secs: i64, metrics: Metrics| {
            m.apply_heartbeat(&HeartbeatRecord::new("a1", start + Duration::seconds(secs), metrics))
                .unwrap()
        };

        let p = beat(30, breaching());
        assert_eq!(p.state, AgentState::Degraded);
        assert_eq!(p.applied_remediations, vec![Remediation::RestartSignal]);

        let p = beat(60, breaching());
        assert_eq!(p.applied_remediations.len(), 2);
        let p = beat(90, breaching());
        assert_eq!(p.applied_remediations, Remediation::LADDER.to_vec());
        assert_eq!(p.capacity_limit, 2);
        assert_eq!(p.state, AgentState::Degraded);

        let p = beat(120, breaching());
        assert_eq!(p.state, AgentState::Maintenance);
    }

    #[test]
    fn test_healthy_heartbeat_recovers_from_degraded() {
        let m = manager();
        let start = Utc::now() - Duration::minutes(10);
        active(&m, "a1", start);
        m.apply_heartbeat(&HeartbeatRecord::new("a1", start + Duration::seconds(30), breaching()))
            .unwrap();
        let p = m
            .apply_heartbeat(&HeartbeatRecord::new("a1", start + Duration::seconds(60), healthy()))
            .unwrap();
        assert_eq!(p.state, AgentState::Active);
        assert!(p.applied_remediations.is_empty());
        assert_eq!(p.capacity_limit, p.load.max);
    }

    #[test]
    fn test_remediation_is_idempotent() {
        let m = manager();
        m.register(AgentSpec::new("a1", "acme", ["rust"]).with_capacity(6))
            .unwrap();
        assert!(m.apply_remediation("a1", Remediation::ReduceLoad, "admin").unwrap());
        let once = m.get("a1").unwrap();
        assert!(!m.apply_remediation("a1", Remediation::ReduceLoad, "admin").unwrap());
        let twice = m.get("a1").unwrap();
        assert_eq!(once.capacity_limit, 3);
        assert_eq!(once.capacity_limit, twice.capacity_limit);
        assert_eq!(once.applied_remediations, twice.applied_remediations);
    }

    #[test]
    fn test_stale_sweep_forces_offline() {
        let m = manager();
        let now = Utc::now();
        active(&m, "fresh", now - Duration::minutes(2));
        active(&m, "silent", now - Duration::minutes(11));

        let moved = m.sweep_stale(now);
        assert_eq!(moved, vec!["silent".to_string()]);
        assert_eq!(m.get("silent").unwrap().state, AgentState::Offline);
        assert_eq!(m.get("fresh").unwrap().state, AgentState::Active);
        // Already offline: not moved again.
        assert!(m.sweep_stale(now).is_empty());

        let back = HeartbeatRecord::new("silent", now + Duration::seconds(1), healthy());
        assert_eq!(m.apply_heartbeat(&back).unwrap().state, AgentState::Active);
    }

    #[test]
    fn test_security_penalty_floors_and_quarantines() {
        let m = manager();
        let now = Utc::now();
        active(&m, "a1", now);
        for _ in 0..3 {
            m.apply_security_penalty("a1", 30, "exfiltration", now).unwrap();
        }
        let p = m.get("a1").unwrap();
        assert_eq!(p.security_score, 10);
        assert_eq!(p.state, AgentState::Active);

        let p = m.apply_security_penalty("a1", 30, "exfiltration", now).unwrap();
        assert_eq!(p.security_score, 0);
        assert_eq!(p.state, AgentState::Quarantined);
        let p = m.apply_security_penalty("a1", 15, "churn", now).unwrap();
        assert_eq!(p.security_score, 0);
    }

    #[test]
    fn test_freeze_and_deletion() {
        let m = manager();
        let now = Utc::now();
        active(&m, "a1", now);
        m.transition("a1", AgentState::Suspended, "missed reports", "reporting")
            .unwrap();
        m.freeze("a1", "non-compliant").unwrap();

        assert!(matches!(
            m.transition("a1", AgentState::Active, "x", "admin"),
            Err(OverwatchError::Frozen(_))
        ));
        assert!(matches!(
            m.apply_heartbeat(&HeartbeatRecord::new("a1", now + Duration::seconds(1), healthy())),
            Err(OverwatchError::Frozen(_))
        ));
        assert!(m.approve_deletion("a1", "admin").is_err());

        m.request_deletion("a1", "non-compliant").unwrap();
        let p = m.approve_deletion("a1", "admin").unwrap();
        assert_eq!(p.state, AgentState::Decommissioned);
        assert!(m.register(AgentSpec::new("a2", "acme", ["rust"])).is_ok());
    }

    #[test]
    fn test_unsuspend_requires_recovered_reporting() {
        let m = manager();
        active(&m, "a1", Utc::now());
        m.transition("a1", AgentState::Suspended, "missed reports", "reporting")
            .unwrap();
        m.update_reporting("a1", 6, ReportingStatus::Suspended).unwrap();
        assert!(m.unsuspend("a1", "admin").is_err());

        m.update_reporting("a1", 0, ReportingStatus::Compliant).unwrap();
        assert_eq!(m.unsuspend("a1", "admin").unwrap().state, AgentState::Active);
        assert!(matches!(
            m.unsuspend("a1", "admin"),
            Err(OverwatchError::IllegalTransition { .. })
        ));
    }

    #[test]
    fn test_reserve_and_release() {
        let m = manager();
        m.register(AgentSpec::new("a1", "acme", ["rust"]).with_capacity(2))
            .unwrap();
        // Provisioning agents take no work.
        assert!(m.try_reserve("a1", |_| true).unwrap().is_none());

        m.apply_heartbeat(&HeartbeatRecord::new("a1", Utc::now(), healthy()))
            .unwrap();
        assert!(m.try_reserve("a1", |_| false).unwrap().is_none());

        let p = m.try_reserve("a1", |_| true).unwrap().unwrap();
        assert_eq!(p.load.current, 1);
        assert_eq!(p.state, AgentState::Active);
        let p = m.try_reserve("a1", |_| true).unwrap().unwrap();
        assert_eq!(p.state, AgentState::Busy);
        assert!(m.try_reserve("a1", |_| true).unwrap().is_none());

        let p = m.release("a1").unwrap();
        assert_eq!(p.load.current, 1);
        assert_eq!(p.state, AgentState::Active);
    }

    #[test]
    fn test_audit_remediation_requests() {
        let m = manager();
        let now = Utc::now();
        active(&m, "a1", now);
        active(&m, "a2", now);
        let p = m
            .request_remediation("a1", RemediationRequest::Maintenance, "audit failed", "audit")
            .unwrap();
        assert_eq!(p.state, AgentState::Maintenance);
        let p = m
            .request_remediation("a2", RemediationRequest::Quarantine, "audit critical", "audit")
            .unwrap();
        assert_eq!(p.state, AgentState::Quarantined);
    }

    #[test]
    fn test_redelivered_breach_does_not_advance_ladder() {
        let m = manager();
        let now = Utc::now() - Duration::minutes(5);
        active(&m, "a1", now);
        let breach = HeartbeatRecord::new("a1", now + Duration::seconds(30), breaching());
        let first = m.apply_heartbeat(&breach).unwrap();
        assert_eq!(first.state, AgentState::Degraded);
        assert_eq!(first.applied_remediations.len(), 1);

        for _ in 0..3 {
            assert!(matches!(m.apply_heartbeat(&breach), Err(OverwatchError::StaleData { .. })));
        }
        let after = m.get("a1").unwrap();
        assert_eq!(after.state, AgentState::Degraded);
        assert_eq!(after.applied_remediations, first.applied_remediations);
        assert_eq!(after.capacity_limit, first.capacity_limit);
    }

    #[test]
    fn test_load_flips_stay_out_of_churn_ledger() {
        let m = manager();
        m.register(AgentSpec::new("w1", "acme", ["rust"]).with_capacity(1))
            .unwrap();
        m.apply_heartbeat(&HeartbeatRecord::new("w1", Utc::now(), healthy()))
            .unwrap();
        let baseline = m.get("w1").unwrap().recent_transitions.len();

        for _ in 0..20 {
            assert_eq!(m.try_reserve("w1", |_| true).unwrap().unwrap().state, AgentState::Busy);
            assert_eq!(m.release("w1").unwrap().state, AgentState::Active);
        }
        assert_eq!(m.get("w1").unwrap().recent_transitions.len(), baseline);
        // Still logged for audits.
        assert!(m.transition_log(Some("w1")).iter().any(|t| t.actor == LOAD_ACTOR));
    }

    #[test]
    fn test_transition_log_is_bounded() {
        let m = manager().with_history_limit(8);
        m.register(AgentSpec::new("w1", "acme", ["rust"]).with_capacity(1))
            .unwrap();
        m.apply_heartbeat(&HeartbeatRecord::new("w1", Utc::now(), healthy()))
            .unwrap();
        for _ in 0..10 {
            m.try_reserve("w1", |_| true).unwrap();
            m.release("w1").unwrap();
        }
        let log = m.transition_log(None);
        assert_eq!(log.len(), 8);
        assert_eq!(log.last().unwrap().reason, "capacity freed");
        assert!(m.trail().len() > 8);
    }

    #[test]
    fn test_escalate_reporting_skips_fresh_heartbeat() {
        let m = manager();
        let t0 = Utc::now() - Duration::minutes(30);
        active(&m, "a1", t0);
        let seen = m.get("a1").unwrap().last_seen();

        m.apply_heartbeat(&HeartbeatRecord::new("a1", t0 + Duration::minutes(25), healthy()))
            .unwrap();
        let skipped = m
            .escalate_reporting("a1", seen, 5, ReportingStatus::Suspended, "5 reports missed")
            .unwrap();
        assert!(skipped.is_none());
        let profile = m.get("a1").unwrap();
        assert_eq!(profile.state, AgentState::Active);
        assert_eq!(profile.reporting_status, ReportingStatus::Compliant);

        let seen = profile.last_seen();
        let (from, profile) = m
            .escalate_reporting("a1", seen, 10, ReportingStatus::NonCompliant, "10 reports missed")
            .unwrap()
            .unwrap();
        assert_eq!(from, ReportingStatus::Compliant);
        assert_eq!(profile.state, AgentState::Suspended);
        assert!(profile.frozen);
        assert!(profile.deletion_requested);
    }
}
