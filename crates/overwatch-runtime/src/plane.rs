use chrono::{DateTime, Utc};
use overwatch_audit::{
    AuditEngine, AuditStore, CheckRegistry, FleetDataSource, InMemoryAuditStore, JsonAuditStore,
};
use overwatch_core::{
    AgentProfile, AgentSpec, AnomalyLog, ConfigHandle, HeartbeatIngest, HeartbeatRecord,
    IngestOutcome, OverwatchConfig, OverwatchResult, TaskRequest,
};
use overwatch_lifecycle::LifecycleManager;
use overwatch_orchestrator::{Orchestrator, Predictor, SubmitOutcome};
use overwatch_reporting::{Notifier, ReportingEnforcer, TracingNotifier};
use overwatch_security::AuditTrail;
use overwatch_surveillance::SurveillanceEngine;
use std::sync::Arc;
use tracing::{debug, info};

/// All governance components sharing one configuration, trail and event log.
///
/// Heartbeats flow through lifecycle, surveillance and reporting in that
/// order, so state is updated before behavior is scored and compliance is
/// reset last.
pub struct ControlPlane {
    pub(crate) config: ConfigHandle,
    pub(crate) trail: Arc<AuditTrail>,
    pub(crate) events: Arc<AnomalyLog>,
    pub(crate) lifecycle: Arc<LifecycleManager>,
    pub(crate) surveillance: Arc<SurveillanceEngine>,
    pub(crate) reporting: Arc<ReportingEnforcer>,
    pub(crate) orchestrator: Arc<Orchestrator>,
    pub(crate) audit: Arc<AuditEngine>,
    ingest: HeartbeatIngest,
}

/// Optional overrides for [`ControlPlane`] construction.
pub struct ControlPlaneBuilder {
    config: OverwatchConfig,
    trail: Option<Arc<AuditTrail>>,
    notifier: Option<Arc<dyn Notifier>>,
    predictor: Option<Arc<dyn Predictor>>,
    audit_store: Option<Arc<dyn AuditStore>>,
    audit_checks: Option<CheckRegistry>,
}

impl ControlPlaneBuilder {
    pub fn new(config: OverwatchConfig) -> Self {
        Self {
            config,
            trail: None,
            notifier: None,
            predictor: None,
            audit_store: None,
            audit_checks: None,
        }
    }

    /// Use an existing (e.g. persistent) audit trail.
    pub fn with_trail(mut self, trail: Arc<AuditTrail>) -> Self {
        self.trail = Some(trail);
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn with_predictor(mut self, predictor: Arc<dyn Predictor>) -> Self {
        self.predictor = Some(predictor);
        self
    }

    pub fn with_audit_store(mut self, store: Arc<dyn AuditStore>) -> Self {
        self.audit_store = Some(store);
        self
    }

    pub fn with_audit_checks(mut self, checks: CheckRegistry) -> Self {
        self.audit_checks = Some(checks);
        self
    }

    /// Validate the configuration and wire every component.
    pub fn build(self) -> OverwatchResult<ControlPlane> {
        self.config.validate()?;
        let audit_store: Arc<dyn AuditStore> = match (self.audit_store, &self.config.audit.store_dir) {
            (Some(store), _) => store,
            (None, Some(dir)) => Arc::new(JsonAuditStore::new(dir.clone())),
            (None, None) => Arc::new(InMemoryAuditStore::new()),
        };
        let config = self.config.into_handle();
        let trail = self.trail.unwrap_or_else(|| Arc::new(AuditTrail::new()));
        let events = Arc::new(AnomalyLog::new());

        let lifecycle = Arc::new(LifecycleManager::new(config.clone(), trail.clone()));
        let surveillance = Arc::new(SurveillanceEngine::new(
            lifecycle.clone(),
            events.clone(),
            config.clone(),
        ));
        let reporting = Arc::new(ReportingEnforcer::new(
            lifecycle.clone(),
            events.clone(),
            self.notifier.unwrap_or_else(|| Arc::new(TracingNotifier)),
            config.clone(),
        ));

        let mut orchestrator = Orchestrator::new(lifecycle.clone(), config.clone());
        if let Some(predictor) = self.predictor {
            orchestrator = orchestrator.with_predictor(predictor);
        }

        let source = FleetDataSource::new(lifecycle.clone(), events.clone(), trail.clone(), config.clone())
            .with_surveillance(surveillance.clone());
        let mut audit = AuditEngine::new(
            lifecycle.clone(),
            Arc::new(source),
            audit_store,
            trail.clone(),
            config.clone(),
        );
        if let Some(checks) = self.audit_checks {
            audit = audit.with_checks(checks);
        }

        let mut ingest = HeartbeatIngest::new();
        ingest.add(lifecycle.clone());
        ingest.add(surveillance.clone());
        ingest.add(reporting.clone());

        info!(sinks = ingest.sink_count(), "Control plane assembled");
        Ok(ControlPlane {
            config,
            trail,
            events,
            lifecycle,
            surveillance,
            reporting,
            orchestrator: Arc::new(orchestrator),
            audit: Arc::new(audit),
            ingest,
        })
    }
}

impl ControlPlane {
    /// Default wiring for `config`.
    pub fn new(config: OverwatchConfig) -> OverwatchResult<Self> {
        ControlPlaneBuilder::new(config).build()
    }

    pub fn builder(config: OverwatchConfig) -> ControlPlaneBuilder {
        ControlPlaneBuilder::new(config)
    }

    pub fn config(&self) -> &ConfigHandle {
        &self.config
    }

    pub fn trail(&self) -> &Arc<AuditTrail> {
        &self.trail
    }

    pub fn events(&self) -> &Arc<AnomalyLog> {
        &self.events
    }

    pub fn lifecycle(&self) -> &Arc<LifecycleManager> {
        &self.lifecycle
    }

    pub fn surveillance(&self) -> &Arc<SurveillanceEngine> {
        &self.surveillance
    }

    pub fn reporting(&self) -> &Arc<ReportingEnforcer> {
        &self.reporting
    }

    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }

    pub fn audit(&self) -> &Arc<AuditEngine> {
        &self.audit
    }

    pub fn register(&self, spec: AgentSpec) -> OverwatchResult<AgentProfile> {
        self.lifecycle.register(spec)
    }

    /// Ingest one heartbeat. An accepted report may return an agent to
    /// service, so queued tasks get another placement attempt.
    pub async fn heartbeat(&self, record: &HeartbeatRecord) -> OverwatchResult<IngestOutcome> {
        let outcome = self.ingest.ingest(record)?;
        if outcome == IngestOutcome::Accepted && self.orchestrator.queue_len() > 0 {
            let placed = self.orchestrator.drain_queue().await;
            debug!(agent_id = %record.agent_id, placed, "Queue drained after heartbeat");
        }
        Ok(outcome)
    }

    pub async fn submit(&self, request: TaskRequest) -> OverwatchResult<SubmitOutcome> {
        self.orchestrator.submit(request).await
    }

    /// Agents silent past the stale timeout go OFFLINE.
    pub fn sweep_stale(&self, now: DateTime<Utc>) -> usize {
        self.lifecycle.sweep_stale(now).len()
    }
}
