use crate::cluster::{leader_clusters, AgentCluster};
use crate::forecast::{project, CapacityForecast};
use crate::predictor::{
    capability_signature, AgentFeatures, ModelTrainer, Predictor, StatisticalTrainer,
    TaskFeatures, TrainingSample,
};
use crate::scoring::{heuristic_order, is_eligible, score_candidates, ScoredCandidate};
use crate::task_queue::PendingQueue;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use overwatch_core::{
    AgentId, AgentProfile, ConfigHandle, OverwatchError, OverwatchResult, TaskAssignment,
    TaskOutcome, TaskRequest, TaskStatus,
};
use overwatch_lifecycle::LifecycleManager;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Upper bound between capacity re-checks while waiting on a deadline.
const CAPACITY_POLL: std::time::Duration = std::time::Duration::from_millis(250);

const MAX_TRAINING_SAMPLES: usize = 50_000;

/// Everything the orchestrator knows about one task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    pub request: TaskRequest,
    pub status: TaskStatus,
    pub assignment: Option<TaskAssignment>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl TaskRecord {
    fn pending(request: TaskRequest) -> Self {
        Self {
            request,
            status: TaskStatus::Pending,
            assignment: None,
            started_at: None,
            finished_at: None,
        }
    }

    fn assigned(request: TaskRequest, assignment: TaskAssignment) -> Self {
        Self {
            status: TaskStatus::Assigned,
            assignment: Some(assignment),
            ..Self::pending(request)
        }
    }

    /// Assigned but not yet started; the only state rebalancing may move.
    fn is_movable(&self) -> bool {
        self.status == TaskStatus::Assigned && self.started_at.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum SubmitOutcome {
    Assigned(TaskAssignment),
    Queued { task_id: Uuid, position: usize },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RebalanceMove {
    pub task_id: Uuid,
    pub from: AgentId,
    pub to: AgentId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RebalanceReport {
    pub variance: f64,
    pub moves: Vec<RebalanceMove>,
}

/// Population variance of load ratios.
fn load_variance(profiles: &[AgentProfile]) -> f64 {
    if profiles.is_empty() {
        return 0.0;
    }
    let n = profiles.len() as f64;
    let mean = profiles.iter().map(|p| p.load.ratio()).sum::<f64>() / n;
    profiles
        .iter()
        .map(|p| (p.load.ratio() - mean).powi(2))
        .sum::<f64>()
        / n
}

fn seconds(d: Duration) -> f64 {
    d.num_milliseconds() as f64 / 1000.0
}

/// Places tasks on agents.
///
/// Load accounting lives in the lifecycle manager: every placement goes
/// through [`LifecycleManager::try_reserve`], which checks eligibility and
/// takes the slot under the agent's lock. The orchestrator itself only keeps
/// task records, the pending queue and model state.
pub struct Orchestrator {
    lifecycle: Arc<LifecycleManager>,
    config: ConfigHandle,
    predictor: RwLock<Option<Arc<dyn Predictor>>>,
    trainer: Arc<dyn ModelTrainer>,
    tasks: DashMap<Uuid, TaskRecord>,
    queue: Mutex<PendingQueue>,
    drain_lock: tokio::sync::Mutex<()>,
    capacity_freed: Notify,
    training: Mutex<Vec<TrainingSample>>,
    arrivals: Mutex<VecDeque<DateTime<Utc>>>,
    last_trained_at: Mutex<Option<DateTime<Utc>>>,
    clusters: RwLock<Vec<AgentCluster>>,
}

impl Orchestrator {
    /// Starts without a model; placement is heuristic until the first retrain
    /// or an explicit [`Orchestrator::with_predictor`].
    pub fn new(lifecycle: Arc<LifecycleManager>, config: ConfigHandle) -> Self {
        let capacity = config.read().orchestrator.queue_capacity;
        Self {
            lifecycle,
            config,
            predictor: RwLock::new(None),
            trainer: Arc::new(StatisticalTrainer),
            tasks: DashMap::new(),
            queue: Mutex::new(PendingQueue::new(capacity)),
            drain_lock: tokio::sync::Mutex::new(()),
            capacity_freed: Notify::new(),
            training: Mutex::new(Vec::new()),
            arrivals: Mutex::new(VecDeque::new()),
            last_trained_at: Mutex::new(None),
            clusters: RwLock::new(Vec::new()),
        }
    }

    pub fn with_predictor(self, predictor: Arc<dyn Predictor>) -> Self {
        *self.predictor.write() = Some(predictor);
        self
    }

    pub fn with_trainer(mut self, trainer: Arc<dyn ModelTrainer>) -> Self {
        self.trainer = trainer;
        self
    }

    pub fn has_model(&self) -> bool {
        self.predictor.read().is_some()
    }

    // --- Placement ---

    /// Assign `request` to the best eligible agent, or queue it.
    ///
    /// Fails with `NoCapacity` when nothing is eligible and the pending queue
    /// is full.
    pub async fn submit(&self, request: TaskRequest) -> OverwatchResult<SubmitOutcome> {
        request.validate()?;
        if self.tasks.contains_key(&request.id) {
            return Err(OverwatchError::Validation(format!(
                "task {} already submitted",
                request.id
            )));
        }
        let now = Utc::now();
        self.record_arrival(now);

        if let Some(assignment) = self.place(&request, now).await? {
            self.tasks
                .insert(request.id, TaskRecord::assigned(request, assignment.clone()));
            return Ok(SubmitOutcome::Assigned(assignment));
        }

        let task_id = request.id;
        let capacity = self.config.read().orchestrator.queue_capacity;
        self.tasks.insert(task_id, TaskRecord::pending(request.clone()));
        let pushed = {
            let mut queue = self.queue.lock();
            queue.set_capacity(capacity);
            queue.push(request)
        };
        match pushed {
            Ok(position) => {
                info!(task_id = %task_id, position, "No eligible agent, task queued");
                Ok(SubmitOutcome::Queued { task_id, position })
            }
            Err(e) => {
                self.tasks.remove(&task_id);
                warn!(task_id = %task_id, "Task rejected: no capacity");
                Err(e)
            }
        }
    }

    /// Assign `request`, waiting for freed capacity until `deadline`.
    pub async fn assign_before(
        &self,
        request: TaskRequest,
        deadline: DateTime<Utc>,
    ) -> OverwatchResult<TaskAssignment> {
        request.validate()?;
        self.record_arrival(Utc::now());
        loop {
            let now = Utc::now();
            if let Some(assignment) = self.place(&request, now).await? {
                self.tasks
                    .insert(request.id, TaskRecord::assigned(request, assignment.clone()));
                return Ok(assignment);
            }
            let remaining = match (deadline - now).to_std() {
                Ok(remaining) if !remaining.is_zero() => remaining,
                _ => {
                    return Err(OverwatchError::NoCapacity(format!(
                        "no eligible agent for task {} before {deadline}",
                        request.id
                    )))
                }
            };
            let _ = tokio::time::timeout(
                remaining.min(CAPACITY_POLL),
                self.capacity_freed.notified(),
            )
            .await;
        }
    }

    /// Rank eligible agents and reserve the best one still eligible.
    async fn place(
        &self,
        request: &TaskRequest,
        now: DateTime<Utc>,
    ) -> OverwatchResult<Option<TaskAssignment>> {
        let candidates: Vec<AgentProfile> = self
            .lifecycle
            .snapshot()
            .into_iter()
            .filter(|p| is_eligible(p, request))
            .collect();
        if candidates.is_empty() {
            debug!(task_id = %request.id, "No eligible agents");
            return Ok(None);
        }

        for candidate in self.rank(request, &candidates, now).await {
            match self
                .lifecycle
                .try_reserve(&candidate.agent_id, |p| is_eligible(p, request))
            {
                Ok(Some(_)) => {
                    info!(
                        task_id = %request.id,
                        agent_id = %candidate.agent_id,
                        score = candidate.score,
                        "Task assigned"
                    );
                    return Ok(Some(TaskAssignment {
                        task_id: request.id,
                        agent_id: candidate.agent_id,
                        confidence: candidate.score,
                        predicted_duration_secs: candidate.predicted_duration_secs,
                        assigned_at: Utc::now(),
                    }));
                }
                Ok(None) | Err(OverwatchError::NotFound(_)) => {
                    debug!(agent_id = %candidate.agent_id, "Candidate changed before reservation");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(None)
    }

    async fn rank(
        &self,
        request: &TaskRequest,
        candidates: &[AgentProfile],
        now: DateTime<Utc>,
    ) -> Vec<ScoredCandidate> {
        let predictor = self.predictor.read().clone();
        if let Some(predictor) = predictor {
            let task = TaskFeatures::from(request);
            let mut predicted = Vec::with_capacity(candidates.len());
            let mut failure = None;
            for profile in candidates {
                match predictor.predict(&AgentFeatures::from(profile), &task).await {
                    Ok(prediction) => predicted.push((profile.clone(), prediction)),
                    Err(e) => {
                        failure = Some(OverwatchError::ModelUnavailable(e.to_string()));
                        break;
                    }
                }
            }
            match failure {
                None => return score_candidates(&predicted, request.deadline, now),
                Some(e) => {
                    warn!(model = predictor.name(), error = %e, "Falling back to heuristic placement");
                }
            }
        }

        let history = self.mean_duration_by_agent();
        let fallback = request
            .resource_requirements
            .estimated_duration_secs
            .map(|s| s as f64)
            .unwrap_or(self.config.read().orchestrator.default_task_duration_secs);
        heuristic_order(candidates, |p| {
            history.get(&p.id).copied().unwrap_or(fallback)
        })
    }

    fn mean_duration_by_agent(&self) -> HashMap<AgentId, f64> {
        let mut totals: HashMap<AgentId, (f64, u32)> = HashMap::new();
        for sample in self.training.lock().iter() {
            let entry = totals.entry(sample.agent_id.clone()).or_default();
            entry.0 += sample.duration_secs;
            entry.1 += 1;
        }
        totals
            .into_iter()
            .map(|(id, (sum, n))| (id, sum / f64::from(n)))
            .collect()
    }

    fn record_arrival(&self, at: DateTime<Utc>) {
        let horizon = Duration::days(self.config.read().orchestrator.forecast_history_days);
        let mut arrivals = self.arrivals.lock();
        arrivals.push_back(at);
        while arrivals.front().map_or(false, |t| at - *t > horizon) {
            arrivals.pop_front();
        }
    }

    // --- Task lifecycle ---

    pub fn task(&self, task_id: Uuid) -> OverwatchResult<TaskRecord> {
        self.tasks
            .get(&task_id)
            .map(|r| r.value().clone())
            .ok_or_else(|| OverwatchError::NotFound(format!("task {task_id}")))
    }

    pub fn queue_len(&self) -> usize {
        self.queue.lock().len()
    }

    /// Mark an assigned task as running. Started tasks are never rebalanced.
    pub fn start_task(&self, task_id: Uuid) -> OverwatchResult<TaskRecord> {
        let mut record = self
            .tasks
            .get_mut(&task_id)
            .ok_or_else(|| OverwatchError::NotFound(format!("task {task_id}")))?;
        if !record.is_movable() {
            return Err(OverwatchError::Validation(format!(
                "task {task_id} is {:?} and cannot be started",
                record.status
            )));
        }
        record.started_at = Some(Utc::now());
        debug!(task_id = %task_id, "Task started");
        Ok(record.clone())
    }

    /// Record the outcome, free the agent's slot and place queued work.
    ///
    /// `duration_secs` defaults to the time since start.
    pub async fn complete_task(
        &self,
        task_id: Uuid,
        outcome: TaskOutcome,
        duration_secs: Option<f64>,
    ) -> OverwatchResult<TaskRecord> {
        if let Some(d) = duration_secs {
            if !d.is_finite() || d < 0.0 {
                return Err(OverwatchError::Validation(format!(
                    "task duration out of range: {d}"
                )));
            }
        }

        let now = Utc::now();
        let (record, sample) = {
            let mut record = self
                .tasks
                .get_mut(&task_id)
                .ok_or_else(|| OverwatchError::NotFound(format!("task {task_id}")))?;
            let assignment = match (&record.status, &record.assignment) {
                (TaskStatus::Assigned, Some(assignment)) => assignment.clone(),
                _ => {
                    return Err(OverwatchError::Validation(format!(
                        "task {task_id} is {:?}, not assigned",
                        record.status
                    )))
                }
            };
            let duration = duration_secs
                .or_else(|| record.started_at.map(|s| seconds(now - s)))
                .unwrap_or_else(|| seconds(now - assignment.assigned_at));
            record.status = outcome.into();
            record.finished_at = Some(now);
            let sample = TrainingSample {
                agent_id: assignment.agent_id,
                signature: capability_signature(&record.request.required_capabilities),
                success: outcome == TaskOutcome::Completed,
                duration_secs: duration,
                completed_at: now,
            };
            (record.clone(), sample)
        };

        if let Err(e) = self.lifecycle.release(&sample.agent_id) {
            warn!(task_id = %task_id, agent_id = %sample.agent_id, error = %e, "Could not release load slot");
        }
        info!(task_id = %task_id, agent_id = %sample.agent_id, ?outcome, "Task finished");
        {
            let mut training = self.training.lock();
            training.push(sample);
            if training.len() > MAX_TRAINING_SAMPLES {
                let excess = training.len() - MAX_TRAINING_SAMPLES;
                training.drain(..excess);
            }
        }
        self.capacity_freed.notify_waiters();
        self.drain_queue().await;
        Ok(record)
    }

    /// Try to place every queued task once, in priority order. Tasks whose
    /// deadline already passed are timed out. Returns how many were placed.
    pub async fn drain_queue(&self) -> usize {
        let _draining = self.drain_lock.lock().await;
        let pending: Vec<(TaskRequest, u64)> = {
            let mut queue = self.queue.lock();
            std::iter::from_fn(|| queue.pop()).collect()
        };

        let mut placed = 0;
        let mut unplaced = Vec::new();
        for (request, seq) in pending {
            let now = Utc::now();
            if request.deadline.map_or(false, |d| d <= now) {
                if let Some(mut record) = self.tasks.get_mut(&request.id) {
                    record.status = TaskStatus::Timeout;
                    record.finished_at = Some(now);
                }
                info!(task_id = %request.id, "Queued task passed its deadline");
                continue;
            }
            match self.place(&request, now).await {
                Ok(Some(assignment)) => {
                    if let Some(mut record) = self.tasks.get_mut(&request.id) {
                        record.status = TaskStatus::Assigned;
                        record.assignment = Some(assignment);
                    }
                    placed += 1;
                }
                Ok(None) => unplaced.push((request, seq)),
                Err(e) => {
                    warn!(task_id = %request.id, error = %e, "Queued task placement failed");
                    unplaced.push((request, seq));
                }
            }
        }

        let mut queue = self.queue.lock();
        for (request, seq) in unplaced {
            queue.restore(request, seq);
        }
        if placed > 0 {
            info!(placed, remaining = queue.len(), "Drained pending queue");
        }
        placed
    }

    // --- Periodic jobs ---

    /// Move pending (not yet started) assignments off overloaded agents when
    /// the spread of load ratios exceeds the configured variance.
    pub fn rebalance(&self) -> RebalanceReport {
        let threshold = self.config.read().orchestrator.rebalance_variance_threshold;
        let operational: Vec<AgentProfile> = self
            .lifecycle
            .snapshot()
            .into_iter()
            .filter(|p| p.state.is_operational())
            .collect();
        let variance = load_variance(&operational);
        let mut report = RebalanceReport {
            variance,
            moves: Vec::new(),
        };
        if operational.len() < 2 || variance <= threshold {
            debug!(variance, threshold, "Load balanced, nothing to move");
            return report;
        }

        let ratios: HashMap<&str, f64> = operational
            .iter()
            .map(|p| (p.id.as_str(), p.load.ratio()))
            .collect();
        let mut movable: Vec<(Uuid, TaskRequest, AgentId)> = self
            .tasks
            .iter()
            .filter(|r| r.is_movable())
            .filter_map(|r| {
                r.assignment
                    .as_ref()
                    .map(|a| (*r.key(), r.request.clone(), a.agent_id.clone()))
            })
            .collect();
        movable.sort_by(|a, b| {
            let ra = ratios.get(a.2.as_str()).copied().unwrap_or(0.0);
            let rb = ratios.get(b.2.as_str()).copied().unwrap_or(0.0);
            rb.total_cmp(&ra)
        });

        for (task_id, request, from) in movable {
            let live = self.lifecycle.snapshot();
            let Some(source) = live.iter().find(|p| p.id == from) else {
                continue;
            };
            let source_ratio = source.load.ratio();
            let target = live
                .iter()
                .filter(|p| p.id != from && is_eligible(p, &request))
                .min_by(|a, b| {
                    a.load
                        .ratio()
                        .total_cmp(&b.load.ratio())
                        .then_with(|| a.id.cmp(&b.id))
                });
            let Some(target) = target else {
                continue;
            };
            let target_after = f64::from(target.load.current + 1) / f64::from(target.load.max.max(1));
            if target_after >= source_ratio {
                continue;
            }
            if !matches!(
                self.lifecycle.try_reserve(&target.id, |p| is_eligible(p, &request)),
                Ok(Some(_))
            ) {
                continue;
            }

            let moved = match self.tasks.get_mut(&task_id) {
                Some(mut record) if record.is_movable() => {
                    if let Some(assignment) = record.assignment.as_mut() {
                        assignment.agent_id = target.id.clone();
                        assignment.assigned_at = Utc::now();
                    }
                    true
                }
                _ => false,
            };
            let released = if moved { &from } else { &target.id };
            if let Err(e) = self.lifecycle.release(released) {
                warn!(agent_id = %released, error = %e, "Could not release load slot");
            }
            if moved {
                info!(task_id = %task_id, from = %from, to = %target.id, "Rebalanced pending task");
                report.moves.push(RebalanceMove {
                    task_id,
                    from,
                    to: target.id.clone(),
                });
            }
        }
        report
    }

    /// Regroup agents by capability similarity and performance tier, writing
    /// cluster ids back to their profiles.
    pub fn recluster(&self) -> Vec<AgentCluster> {
        let similarity = self.config.read().orchestrator.cluster_similarity;
        let profiles: Vec<AgentProfile> = self
            .lifecycle
            .snapshot()
            .into_iter()
            .filter(|p| !p.state.is_terminal())
            .collect();
        let clusters = leader_clusters(&profiles, similarity);
        for cluster in &clusters {
            for agent_id in &cluster.agent_ids {
                if let Err(e) = self.lifecycle.set_cluster(agent_id, Some(cluster.id.clone())) {
                    debug!(agent_id = %agent_id, error = %e, "Agent vanished during clustering");
                }
            }
        }
        info!(clusters = clusters.len(), agents = profiles.len(), "Agents reclustered");
        *self.clusters.write() = clusters.clone();
        clusters
    }

    pub fn clusters(&self) -> Vec<AgentCluster> {
        self.clusters.read().clone()
    }

    /// Project task arrivals and required capacity over the configured horizon.
    pub fn forecast(&self, now: DateTime<Utc>) -> CapacityForecast {
        let (history_days, horizon_days, default_duration) = {
            let config = self.config.read();
            (
                config.orchestrator.forecast_history_days,
                config.orchestrator.forecast_horizon_days,
                config.orchestrator.default_task_duration_secs,
            )
        };
        let arrivals: Vec<DateTime<Utc>> = self.arrivals.lock().iter().copied().collect();
        let mean_duration = {
            let training = self.training.lock();
            if training.is_empty() {
                default_duration
            } else {
                training.iter().map(|s| s.duration_secs).sum::<f64>() / training.len() as f64
            }
        };
        let slots = self
            .lifecycle
            .snapshot()
            .iter()
            .filter(|p| p.state.is_operational())
            .map(|p| p.capacity_limit)
            .sum();
        project(&arrivals, now, history_days, horizon_days, mean_duration, slots)
    }

    /// Retrain once enough completed tasks exist and the retrain interval
    /// has elapsed. Returns whether a new model was installed.
    pub async fn maybe_retrain(&self, now: DateTime<Utc>) -> OverwatchResult<bool> {
        let (min_samples, interval) = {
            let config = self.config.read();
            (
                config.orchestrator.min_training_samples,
                Duration::hours(config.orchestrator.retrain_interval_hours),
            )
        };
        let samples = self.training.lock().clone();
        if samples.len() < min_samples {
            debug!(samples = samples.len(), min_samples, "Not enough samples to train");
            return Ok(false);
        }
        if let Some(last) = *self.last_trained_at.lock() {
            if now - last < interval {
                return Ok(false);
            }
        }

        let model = self.trainer.train(&samples).await?;
        info!(model = model.name(), samples = samples.len(), "Prediction model retrained");
        *self.predictor.write() = Some(model);
        *self.last_trained_at.lock() = Some(now);
        Ok(true)
    }

    pub fn training_sample_count(&self) -> usize {
        self.training.lock().len()
    }
}
