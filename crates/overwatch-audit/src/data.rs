use crate::types::AuditScope;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use overwatch_core::{AgentProfile, AnomalyEvent, AnomalyLog, ConfigHandle, OverwatchConfig, OverwatchResult};
use overwatch_lifecycle::{LifecycleManager, TransitionRecord};
use overwatch_security::{AuditEntry, AuditTrail};
use overwatch_surveillance::{CorrelatedCluster, SurveillanceEngine};
use std::collections::HashSet;
use std::sync::Arc;

/// Read-only view of the fleet that checks evaluate.
#[derive(Debug, Clone)]
pub struct AuditSnapshot {
    pub taken_at: DateTime<Utc>,
    /// Start of the lookback window for events and trail entries.
    pub since: DateTime<Utc>,
    pub profiles: Vec<AgentProfile>,
    pub events: Vec<AnomalyEvent>,
    pub clusters: Vec<CorrelatedCluster>,
    pub transitions: Vec<TransitionRecord>,
    pub trail: Vec<AuditEntry>,
    /// Result of verifying the full trail hash chain.
    pub chain_break: Option<String>,
    pub config: OverwatchConfig,
}

impl AuditSnapshot {
    /// An empty fleet; useful as a starting point in tests.
    pub fn empty(config: OverwatchConfig) -> Self {
        let now = Utc::now();
        Self {
            taken_at: now,
            since: now,
            profiles: Vec::new(),
            events: Vec::new(),
            clusters: Vec::new(),
            transitions: Vec::new(),
            trail: Vec::new(),
            chain_break: None,
            config,
        }
    }

    /// Restrict the snapshot to what `scope`/`target` covers.
    ///
    /// AGENT keeps one agent, TENANT that tenant's agents; SYSTEM, WORKFLOW
    /// and INTERACTION audits look at the whole fleet.
    pub fn scoped(mut self, scope: AuditScope, target: Option<&str>) -> Self {
        let keep: HashSet<String> = match (scope, target) {
            (AuditScope::Agent, Some(agent_id)) => self
                .profiles
                .iter()
                .filter(|p| p.id == agent_id)
                .map(|p| p.id.clone())
                .collect(),
            (AuditScope::Tenant, Some(tenant_id)) => self
                .profiles
                .iter()
                .filter(|p| p.tenant_id == tenant_id)
                .map(|p| p.id.clone())
                .collect(),
            _ => return self,
        };

        self.profiles.retain(|p| keep.contains(&p.id));
        self.events.retain(|e| keep.contains(&e.agent_id));
        self.transitions.retain(|t| keep.contains(&t.agent_id));
        self.clusters
            .retain(|c| c.agent_ids.iter().any(|id| keep.contains(id)));
        self.trail.retain(|entry| {
            entry.subject.as_ref().map_or(false, |s| keep.contains(s)) || keep.contains(&entry.actor)
        });
        self
    }
}

/// Where audits read fleet state from. A failure makes the audit INCOMPLETE.
#[async_trait]
pub trait AuditDataSource: Send + Sync {
    async fn snapshot(&self, since: DateTime<Utc>) -> OverwatchResult<AuditSnapshot>;
}

/// Snapshots the live components.
pub struct FleetDataSource {
    lifecycle: Arc<LifecycleManager>,
    events: Arc<AnomalyLog>,
    surveillance: Option<Arc<SurveillanceEngine>>,
    trail: Arc<AuditTrail>,
    config: ConfigHandle,
}

impl FleetDataSource {
    pub fn new(
        lifecycle: Arc<LifecycleManager>,
        events: Arc<AnomalyLog>,
        trail: Arc<AuditTrail>,
        config: ConfigHandle,
    ) -> Self {
        Self {
            lifecycle,
            events,
            surveillance: None,
            trail,
            config,
        }
    }

    pub fn with_surveillance(mut self, surveillance: Arc<SurveillanceEngine>) -> Self {
        self.surveillance = Some(surveillance);
        self
    }
}

#[async_trait]
impl AuditDataSource for FleetDataSource {
    async fn snapshot(&self, since: DateTime<Utc>) -> OverwatchResult<AuditSnapshot> {
        let chain_break = self
            .trail
            .verify_chain()
            .err()
            .map(|b| format!("entry {}: {}", b.seq, b.reason));
        let trail = self
            .trail
            .entries()
            .into_iter()
            .filter(|e| e.timestamp >= since)
            .collect();
        let clusters = self
            .surveillance
            .as_ref()
            .map(|s| {
                s.clusters()
                    .into_iter()
                    .filter(|c| c.last_seen >= since)
                    .collect()
            })
            .unwrap_or_default();

        Ok(AuditSnapshot {
            taken_at: Utc::now(),
            since,
            profiles: self.lifecycle.snapshot(),
            events: self.events.since(since),
            clusters,
            transitions: self
                .lifecycle
                .transition_log(None)
                .into_iter()
                .filter(|t| t.at >= since)
                .collect(),
            trail,
            chain_break,
            config: self.config.read().clone(),
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use overwatch_core::AgentSpec;

    fn profile(id: &str, tenant: &str) -> AgentProfile {
        AgentProfile::from_spec(&AgentSpec::new(id, tenant, ["rust"]), 20, Utc::now())
    }

    #[test]
    fn test_scope_filters_profiles() {
        let mut snapshot = AuditSnapshot::empty(OverwatchConfig::default());
        snapshot.profiles = vec![profile("a1", "acme"), profile("a2", "acme"), profile("b1", "beta")];

        let agent = snapshot.clone().scoped(AuditScope::Agent, Some("a2"));
        assert_eq!(agent.profiles.len(), 1);
        assert_eq!(agent.profiles[0].id, "a2");

        let tenant = snapshot.clone().scoped(AuditScope::Tenant, Some("acme"));
        assert_eq!(tenant.profiles.len(), 2);

        let system = snapshot.scoped(AuditScope::System, None);
        assert_eq!(system.profiles.len(), 3);
    }

    #[tokio::test]
    async fn test_fleet_source_reads_live_state() {
        let config = OverwatchConfig::default().into_handle();
        let trail = Arc::new(AuditTrail::new());
        let lifecycle = Arc::new(LifecycleManager::new(config.clone(), trail.clone()));
        lifecycle.register(AgentSpec::new("a1", "acme", ["rust"])).unwrap();
        let source = FleetDataSource::new(lifecycle, Arc::new(AnomalyLog::new()), trail, config);

        let snapshot = source
            .snapshot(Utc::now() - chrono::Duration::hours(1))
            .await
            .unwrap();
        assert_eq!(snapshot.profiles.len(), 1);
        assert_eq!(snapshot.transitions.len(), 1);
        assert!(snapshot.chain_break.is_none());
        assert!(!snapshot.trail.is_empty());
    }
}
