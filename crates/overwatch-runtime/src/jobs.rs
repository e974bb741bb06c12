use crate::plane::ControlPlane;
use chrono::{DateTime, Utc};
use cron::Schedule;
use overwatch_core::config::JobsConfig;
use overwatch_core::{OverwatchError, OverwatchResult};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Background work, each on its own cron schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Job {
    StaleSweep,
    ReportingSweep,
    SurveillanceScan,
    Rebalance,
    Recluster,
    Retrain,
    AuditTick,
}

impl Job {
    pub const ALL: [Job; 7] = [
        Job::StaleSweep,
        Job::ReportingSweep,
        Job::SurveillanceScan,
        Job::Rebalance,
        Job::Recluster,
        Job::Retrain,
        Job::AuditTick,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Job::StaleSweep => "stale_sweep",
            Job::ReportingSweep => "reporting_sweep",
            Job::SurveillanceScan => "surveillance_scan",
            Job::Rebalance => "rebalance",
            Job::Recluster => "recluster",
            Job::Retrain => "retrain",
            Job::AuditTick => "audit_tick",
        }
    }

    pub fn cron_expression(self, jobs: &JobsConfig) -> &str {
        match self {
            Job::StaleSweep => &jobs.stale_sweep,
            Job::ReportingSweep => &jobs.reporting_sweep,
            Job::SurveillanceScan => &jobs.surveillance_scan,
            Job::Rebalance => &jobs.rebalance,
            Job::Recluster => &jobs.recluster,
            Job::Retrain => &jobs.retrain,
            Job::AuditTick => &jobs.audit_tick,
        }
    }
}

/// Parse a 7-field cron expression: sec min hour day-of-month month day-of-week year.
pub fn parse_cron(expr: &str) -> OverwatchResult<Schedule> {
    Schedule::from_str(expr)
        .map_err(|e| OverwatchError::Config(format!("Invalid cron expression '{expr}': {e}")))
}

impl ControlPlane {
    /// Run one job to completion. Returns how many items it touched
    /// (agents moved, escalations, clusters, audits, ...).
    pub async fn run_job(&self, job: Job, now: DateTime<Utc>) -> usize {
        match job {
            Job::StaleSweep => self.sweep_stale(now),
            Job::ReportingSweep => self.reporting.sweep(now).await.len(),
            Job::SurveillanceScan => self.surveillance.scan(now).len(),
            Job::Rebalance => self.orchestrator.rebalance().moves.len(),
            Job::Recluster => self.orchestrator.recluster().len(),
            Job::Retrain => match self.orchestrator.maybe_retrain(now).await {
                Ok(trained) => usize::from(trained),
                Err(e) => {
                    warn!(error = %e, "Model retraining failed; keeping the current model");
                    0
                }
            },
            Job::AuditTick => self.audit.tick(now).await.len(),
        }
    }
}

/// Drives every [`Job`] on its configured schedule until shutdown.
pub struct JobScheduler {
    plane: Arc<ControlPlane>,
    jobs: Vec<(Job, Schedule)>,
}

impl JobScheduler {
    /// Parse every schedule up front; an invalid expression fails the whole set.
    pub fn new(plane: Arc<ControlPlane>) -> OverwatchResult<Self> {
        let config = plane.config().read().jobs.clone();
        let jobs = Job::ALL
            .into_iter()
            .map(|job| parse_cron(job.cron_expression(&config)).map(|s| (job, s)))
            .collect::<OverwatchResult<Vec<_>>>()?;
        Ok(Self { plane, jobs })
    }

    pub fn job_count(&self) -> usize {
        self.jobs.len()
    }

    /// Next fire time of every job.
    pub fn next_fire_times(&self) -> Vec<(Job, Option<DateTime<Utc>>)> {
        self.jobs
            .iter()
            .map(|(job, schedule)| (*job, schedule.upcoming(Utc).next()))
            .collect()
    }

    /// Spawn one task per job. Each stops when `shutdown` flips or its
    /// sender is dropped.
    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        self.jobs
            .into_iter()
            .map(|(job, schedule)| {
                let plane = Arc::clone(&self.plane);
                let mut shutdown = shutdown.clone();
                tokio::spawn(async move {
                    info!(job = job.name(), "Job started");
                    loop {
                        let Some(next) = schedule.upcoming(Utc).next() else {
                            warn!(job = job.name(), "Schedule has no upcoming fire times");
                            break;
                        };
                        let wait = (next - Utc::now()).to_std().unwrap_or_default();
                        tokio::select! {
                            _ = tokio::time::sleep(wait) => {}
                            _ = shutdown.changed() => break,
                        }
                        if *shutdown.borrow() {
                            break;
                        }
                        let touched = plane.run_job(job, Utc::now()).await;
                        debug!(job = job.name(), touched, "Job run finished");
                    }
                    info!(job = job.name(), "Job stopped");
                })
            })
            .collect()
    }
}
