use crate::checks::CheckRegistry;
use crate::data::AuditDataSource;
use crate::schedule::{jittered_interval, next_audit_at};
use crate::store::AuditStore;
use crate::types::{AuditRecord, AuditScope, AuditType, Finding, FindingStatus, Outcome};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use overwatch_core::{
    retry_with_backoff, AgentId, ConfigHandle, OverwatchError, OverwatchResult, RetryPolicy,
    Severity,
};
use overwatch_lifecycle::{LifecycleManager, RemediationRequest};
use overwatch_security::{AuditOutcome, AuditTrail};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde_json::json;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use uuid::Uuid;

const AUDIT_ACTOR: &str = "audit";

/// Runs audits, keeps their records and drives the audit schedule.
///
/// Periodic audit types each have a next-due time; [`AuditEngine::tick`] runs
/// the due ones at SYSTEM scope, retries incomplete audits and, with the
/// configured probability, launches an unannounced SURPRISE audit of a random
/// agent. Jitter and surprise draws come from one seeded generator.
pub struct AuditEngine {
    lifecycle: Arc<LifecycleManager>,
    source: Arc<dyn AuditDataSource>,
    store: Arc<dyn AuditStore>,
    checks: CheckRegistry,
    trail: Arc<AuditTrail>,
    config: ConfigHandle,
    rng: Mutex<StdRng>,
    records: DashMap<Uuid, AuditRecord>,
    in_flight: DashMap<Uuid, watch::Sender<bool>>,
    schedules: Mutex<BTreeMap<AuditType, DateTime<Utc>>>,
    retries: Mutex<VecDeque<Uuid>>,
    retry_policy: RetryPolicy,
}

impl AuditEngine {
    pub fn new(
        lifecycle: Arc<LifecycleManager>,
        source: Arc<dyn AuditDataSource>,
        store: Arc<dyn AuditStore>,
        trail: Arc<AuditTrail>,
        config: ConfigHandle,
    ) -> Self {
        let audit = config.read().audit.clone();
        let mut rng = match audit.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let now = Utc::now();
        let schedules = AuditType::PERIODIC
            .into_iter()
            .map(|t| {
                let first = now + jittered_interval(t.base_interval(&audit), 1.0, audit.jitter, &mut rng);
                (t, first)
            })
            .collect();

        Self {
            lifecycle,
            source,
            store,
            checks: CheckRegistry::standard(),
            trail,
            config,
            rng: Mutex::new(rng),
            records: DashMap::new(),
            in_flight: DashMap::new(),
            schedules: Mutex::new(schedules),
            retries: Mutex::new(VecDeque::new()),
            retry_policy: RetryPolicy::default(),
        }
    }

    pub fn with_checks(mut self, checks: CheckRegistry) -> Self {
        self.checks = checks;
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    // --- Initiation ---

    fn create(
        &self,
        audit_type: AuditType,
        scope: AuditScope,
        target_id: Option<String>,
        retry_of: Option<Uuid>,
    ) -> OverwatchResult<AuditRecord> {
        if scope.requires_target() && target_id.as_deref().map_or(true, |t| t.trim().is_empty()) {
            return Err(OverwatchError::Validation(format!(
                "{scope:?} audits need a target_id"
            )));
        }
        if scope == AuditScope::Agent {
            if let Some(agent_id) = target_id.as_deref() {
                if !self.lifecycle.contains(agent_id) {
                    return Err(OverwatchError::NotFound(format!("agent '{agent_id}'")));
                }
            }
        }

        let mut record = AuditRecord::new(audit_type, scope, target_id);
        record.retry_of = retry_of;
        self.records.insert(record.id, record.clone());
        self.trail.record(
            AUDIT_ACTOR,
            "audit_initiated",
            Some(record.id.to_string()),
            json!({
                "type": audit_type,
                "scope": scope,
                "target_id": record.target_id,
                "announced": audit_type != AuditType::Surprise,
                "retry_of": retry_of,
            }),
            AuditOutcome::Success,
        );
        debug!(audit_id = %record.id, audit_type = %audit_type, ?scope, "Audit initiated");
        Ok(record)
    }

    /// Create and run an audit to completion.
    pub async fn run_audit(
        &self,
        audit_type: AuditType,
        scope: AuditScope,
        target_id: Option<String>,
    ) -> OverwatchResult<AuditRecord> {
        let record = self.create(audit_type, scope, target_id, None)?;
        self.persist(&record).await;
        self.execute(record.id).await
    }

    /// Create an audit and run it in the background. Returns its id at once.
    pub fn launch(
        self: &Arc<Self>,
        audit_type: AuditType,
        scope: AuditScope,
        target_id: Option<String>,
    ) -> OverwatchResult<Uuid> {
        let record = self.create(audit_type, scope, target_id, None)?;
        let id = record.id;
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            engine.persist(&record).await;
            match engine.execute(id).await {
                Ok(done) if done.outcome == Some(Outcome::Incomplete) => {
                    engine.run_retries().await;
                }
                Ok(_) => {}
                Err(e) => warn!(audit_id = %id, error = %e, "Background audit failed"),
            }
        });
        Ok(id)
    }

    // --- Execution ---

    async fn execute(&self, id: Uuid) -> OverwatchResult<AuditRecord> {
        let record = self.cached(id)?;
        if record.is_complete() {
            return Err(OverwatchError::Validation(format!("audit {id} already completed")));
        }
        let since = record.start_time - record.audit_type.base_interval(&self.config.read().audit);

        let (cancel_tx, mut cancel_rx) = watch::channel(false);
        self.in_flight.insert(id, cancel_tx);
        let result = tokio::select! {
            findings = self.collect_findings(&record, since) => findings,
            _ = cancel_rx.changed() => Err(OverwatchError::Cancelled(format!("audit {id} cancelled"))),
        };
        self.in_flight.remove(&id);

        Ok(self.complete(record, result).await)
    }

    async fn collect_findings(
        &self,
        record: &AuditRecord,
        since: DateTime<Utc>,
    ) -> OverwatchResult<Vec<Finding>> {
        let checklist = self.checks.checklist(record.audit_type)?;
        let snapshot = self
            .source
            .snapshot(since)
            .await?
            .scoped(record.scope, record.target_id.as_deref());

        let mut findings = Vec::new();
        for check in checklist {
            let mut produced = check.run(&snapshot).await.map_err(|e| {
                warn!(audit_id = %record.id, check = check.name(), error = %e, "Audit check failed");
                e
            })?;
            findings.append(&mut produced);
        }
        Ok(findings)
    }

    async fn complete(
        &self,
        mut record: AuditRecord,
        result: OverwatchResult<Vec<Finding>>,
    ) -> AuditRecord {
        let now = Utc::now();
        let outcome = match result {
            Ok(findings) => {
                let outcome = Outcome::determine(&findings);
                record.findings = findings;
                outcome
            }
            Err(e) => {
                record.incomplete_reason = Some(e.to_string());
                Outcome::Incomplete
            }
        };
        let (base, jitter) = {
            let config = self.config.read();
            (record.audit_type.base_interval(&config.audit), config.audit.jitter)
        };
        let next = next_audit_at(now, base, outcome, jitter, &mut *self.rng.lock());
        record.outcome = Some(outcome);
        record.end_time = Some(now);
        record.next_audit_at = Some(next);
        self.records.insert(record.id, record.clone());

        if outcome == Outcome::Incomplete {
            self.retries.lock().push_back(record.id);
        }
        if record.scope == AuditScope::System && record.audit_type != AuditType::Surprise {
            // An incomplete run is retried through the queue; keep the
            // periodic slot a full interval out so it is not run twice.
            let due = if outcome == Outcome::Incomplete {
                now + base
            } else {
                next
            };
            self.schedules.lock().insert(record.audit_type, due);
        }

        info!(
            audit_id = %record.id,
            audit_type = %record.audit_type,
            ?outcome,
            findings = record.findings.len(),
            next_audit_at = %next,
            "Audit completed"
        );
        self.trail.record(
            AUDIT_ACTOR,
            "audit_completed",
            Some(record.id.to_string()),
            json!({
                "type": record.audit_type,
                "scope": record.scope,
                "target_id": record.target_id,
                "outcome": outcome,
                "findings": record.findings.len(),
                "incomplete_reason": record.incomplete_reason,
            }),
            if outcome == Outcome::Incomplete {
                AuditOutcome::Error
            } else {
                AuditOutcome::Success
            },
        );

        self.remediate(&record, outcome);
        self.persist(&record).await;
        record
    }

    /// CRITICAL quarantines agents named by Critical findings; FAILED sends
    /// agents named by High findings to maintenance.
    fn remediate(&self, record: &AuditRecord, outcome: Outcome) {
        let (agents, request): (Vec<AgentId>, RemediationRequest) = match outcome {
            Outcome::Critical => (
                record.implicated(Severity::Critical),
                RemediationRequest::Quarantine,
            ),
            Outcome::Failed => (
                record.implicated(Severity::High),
                RemediationRequest::Maintenance,
            ),
            _ => return,
        };
        let reason = format!("{} audit {} outcome {:?}", record.audit_type, record.id, outcome);
        for agent_id in agents {
            match self
                .lifecycle
                .request_remediation(&agent_id, request, &reason, AUDIT_ACTOR)
            {
                Ok(profile) => {
                    warn!(agent_id = %agent_id, ?request, state = %profile.state, "Audit remediation applied");
                }
                Err(e) => {
                    warn!(agent_id = %agent_id, ?request, error = %e, "Audit remediation rejected");
                }
            }
        }
    }

    async fn persist(&self, record: &AuditRecord) {
        let saved = retry_with_backoff(&self.retry_policy, "audit_store.save", || {
            self.store.save(record)
        })
        .await;
        if let Err(e) = saved {
            warn!(audit_id = %record.id, error = %e, "Audit record not persisted");
        }
    }

    /// Re-run every audit that ended INCOMPLETE since the last call.
    pub async fn run_retries(&self) -> Vec<AuditRecord> {
        let pending: Vec<Uuid> = self.retries.lock().drain(..).collect();
        let mut done = Vec::new();
        for failed_id in pending {
            let Some(failed) = self.records.get(&failed_id).map(|r| r.value().clone()) else {
                continue;
            };
            let record = match self.create(
                failed.audit_type,
                failed.scope,
                failed.target_id.clone(),
                Some(failed_id),
            ) {
                Ok(record) => record,
                Err(e) => {
                    warn!(audit_id = %failed_id, error = %e, "Dropping audit retry");
                    continue;
                }
            };
            self.persist(&record).await;
            match self.execute(record.id).await {
                Ok(record) => done.push(record),
                Err(e) => warn!(audit_id = %record.id, error = %e, "Audit retry failed"),
            }
        }
        done
    }

    /// Cancel an in-flight audit; it completes as INCOMPLETE and is retried.
    pub fn cancel(&self, audit_id: Uuid, actor: &str) -> OverwatchResult<()> {
        let Some(sender) = self.in_flight.get(&audit_id) else {
            return if self.records.contains_key(&audit_id) {
                Err(OverwatchError::Validation(format!(
                    "audit {audit_id} is not running"
                )))
            } else {
                Err(OverwatchError::NotFound(format!("audit {audit_id}")))
            };
        };
        let _ = sender.send(true);
        drop(sender);
        self.trail.record(
            actor,
            "audit_cancelled",
            Some(audit_id.to_string()),
            json!({}),
            AuditOutcome::Success,
        );
        info!(audit_id = %audit_id, actor, "Audit cancelled");
        Ok(())
    }

    // --- Scheduling ---

    /// One scheduling cycle: retries, due periodic audits, then the surprise draw.
    pub async fn tick(&self, now: DateTime<Utc>) -> Vec<AuditRecord> {
        let mut ran = self.run_retries().await;

        let due: Vec<AuditType> = self
            .schedules
            .lock()
            .iter()
            .filter(|(_, at)| **at <= now)
            .map(|(t, _)| *t)
            .collect();
        for audit_type in due {
            match self.run_audit(audit_type, AuditScope::System, None).await {
                Ok(record) => ran.push(record),
                Err(e) => warn!(audit_type = %audit_type, error = %e, "Scheduled audit failed"),
            }
        }

        let probability = self.config.read().audit.surprise_probability;
        let candidates: Vec<AgentId> = self
            .lifecycle
            .snapshot()
            .into_iter()
            .filter(|p| !p.state.is_terminal())
            .map(|p| p.id)
            .collect();
        let target = {
            let mut rng = self.rng.lock();
            if rng.gen_bool(probability.clamp(0.0, 1.0)) {
                Some(candidates.choose(&mut *rng).cloned())
            } else {
                None
            }
        };
        if let Some(target) = target {
            let scope = if target.is_some() {
                AuditScope::Agent
            } else {
                AuditScope::System
            };
            match self.run_audit(AuditType::Surprise, scope, target).await {
                Ok(record) => ran.push(record),
                Err(e) => warn!(error = %e, "Surprise audit failed"),
            }
        }
        ran
    }

    pub fn next_due(&self, audit_type: AuditType) -> Option<DateTime<Utc>> {
        self.schedules.lock().get(&audit_type).copied()
    }

    // --- Queries ---

    fn cached(&self, id: Uuid) -> OverwatchResult<AuditRecord> {
        self.records
            .get(&id)
            .map(|r| r.value().clone())
            .ok_or_else(|| OverwatchError::NotFound(format!("audit {id}")))
    }

    /// Look an audit up in memory, then in the store.
    pub async fn get(&self, id: Uuid) -> OverwatchResult<AuditRecord> {
        if let Ok(record) = self.cached(id) {
            return Ok(record);
        }
        self.store
            .load(id)
            .await?
            .ok_or_else(|| OverwatchError::NotFound(format!("audit {id}")))
    }

    pub fn is_running(&self, id: Uuid) -> bool {
        self.in_flight.contains_key(&id)
    }

    pub fn records(&self) -> Vec<AuditRecord> {
        let mut records: Vec<AuditRecord> = self.records.iter().map(|r| r.value().clone()).collect();
        records.sort_by_key(|r| r.start_time);
        records
    }

    pub fn pending_retries(&self) -> usize {
        self.retries.lock().len()
    }

    /// Change a finding's status. The only mutation allowed on a completed audit.
    pub async fn update_finding_status(
        &self,
        audit_id: Uuid,
        finding_id: Uuid,
        status: FindingStatus,
        actor: &str,
    ) -> OverwatchResult<Finding> {
        let (record, finding) = {
            let mut record = self
                .records
                .get_mut(&audit_id)
                .ok_or_else(|| OverwatchError::NotFound(format!("audit {audit_id}")))?;
            if !record.is_complete() {
                return Err(OverwatchError::Validation(format!(
                    "audit {audit_id} is still running"
                )));
            }
            let finding = {
                let finding = record
                    .findings
                    .iter_mut()
                    .find(|f| f.id == finding_id)
                    .ok_or_else(|| OverwatchError::NotFound(format!("finding {finding_id}")))?;
                finding.status = status;
                finding.clone()
            };
            (record.clone(), finding)
        };

        self.trail.record(
            actor,
            "finding_status",
            Some(audit_id.to_string()),
            json!({ "finding_id": finding_id, "status": status }),
            AuditOutcome::Success,
        );
        self.persist(&record).await;
        Ok(finding)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::data::FleetDataSource;
    use crate::store::InMemoryAuditStore;
    use overwatch_core::{AnomalyLog, OverwatchConfig};

    fn engine(config: OverwatchConfig) -> AuditEngine {
        let config = config.into_handle();
        let trail = Arc::new(AuditTrail::new());
        let lifecycle = Arc::new(LifecycleManager::new(config.clone(), trail.clone()));
        let source = FleetDataSource::new(lifecycle.clone(), Arc::new(AnomalyLog::new()), trail.clone(), config.clone());
        AuditEngine::new(
            lifecycle,
            Arc::new(source),
            Arc::new(InMemoryAuditStore::new()),
            trail,
            config,
        )
    }

    fn seeded(seed: u64) -> OverwatchConfig {
        let mut config = OverwatchConfig::default();
        config.audit.seed = Some(seed);
        config
    }

    #[test]
    fn test_initial_schedule_within_jitter() {
        let engine = engine(seeded(11));
        let now = Utc::now();
        for audit_type in AuditType::PERIODIC {
            let due = engine.next_due(audit_type).unwrap();
            let base = audit_type.base_interval(&OverwatchConfig::default().audit);
            let days = (due - now).num_seconds() as f64 / 86_400.0;
            let base_days = base.num_days() as f64;
            assert!(days >= base_days * 0.9 - 0.01 && days <= base_days * 1.1, "{audit_type}");
        }
        assert!(engine.next_due(AuditType::Surprise).is_none());
    }

    #[tokio::test]
    async fn test_scope_needs_target() {
        let engine = engine(seeded(1));
        let err = engine
            .run_audit(AuditType::Regular, AuditScope::Tenant, None)
            .await
            .unwrap_err();
        assert!(matches!(err, OverwatchError::Validation(_)));
        let err = engine
            .run_audit(AuditType::Regular, AuditScope::Agent, Some("ghost".into()))
            .await
            .unwrap_err();
        assert!(matches!(err, OverwatchError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_empty_fleet_passes_and_reschedules() {
        let engine = engine(seeded(5));
        let record = engine
            .run_audit(AuditType::Regular, AuditScope::System, None)
            .await
            .unwrap();
        assert_eq!(record.outcome, Some(Outcome::Passed));
        let end = record.end_time.unwrap();
        let next = record.next_audit_at.unwrap();
        let days = (next - end).num_seconds() as f64 / 86_400.0;
        assert!((27.0..=33.0).contains(&days));
        assert_eq!(engine.next_due(AuditType::Regular), Some(next));
        assert_eq!(engine.get(record.id).await.unwrap(), record);
    }

    #[tokio::test]
    async fn test_cancel_unknown_or_finished() {
        let engine = engine(seeded(2));
        assert!(matches!(
            engine.cancel(Uuid::new_v4(), "admin"),
            Err(OverwatchError::NotFound(_))
        ));
        let record = engine
            .run_audit(AuditType::Performance, AuditScope::System, None)
            .await
            .unwrap();
        assert!(matches!(
            engine.cancel(record.id, "admin"),
            Err(OverwatchError::Validation(_))
        ));
    }
}
