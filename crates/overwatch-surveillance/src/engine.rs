use crate::baseline::Baseline;
use crate::correlation::{correlate, CorrelatedCluster};
use crate::model::{AnomalyModel, MetricKind, ZScoreModel};
use crate::rules::{evaluate, RuleClass, RuleInput, Sample, ThreatRule};
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use overwatch_core::{
    AgentId, AnomalyEvent, AnomalyLog, ConfigHandle, HeartbeatRecord, HeartbeatSink,
    OverwatchResult, Severity,
};
use overwatch_lifecycle::LifecycleManager;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Signature of events raised by the statistical model.
pub const STATISTICAL_PATTERN: &str = "statistical_anomaly";

#[derive(Default)]
struct AgentTrack {
    baseline: Baseline,
    samples: VecDeque<Sample>,
    transfers: VecDeque<(DateTime<Utc>, u64)>,
    last_kept: Option<DateTime<Utc>>,
    last_seen: Option<DateTime<Utc>>,
    /// Rules currently inside a breach episode.
    active_rules: [bool; 5],
    statistical_active: bool,
}

/// What one heartbeat produced.
#[derive(Debug, Clone, Default)]
pub struct Observation {
    /// `None` while the baseline is still being learned or scoring is paused.
    pub anomaly_score: Option<f64>,
    pub events: Vec<AnomalyEvent>,
    pub penalty: u32,
}

/// Baseline learning progress for one agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaselineStatus {
    pub agent_id: AgentId,
    pub samples: u64,
    pub first_sample_at: Option<DateTime<Utc>>,
    pub established: bool,
}

/// Behavioral and security monitoring over the heartbeat stream.
///
/// Each agent's track sits behind its own mutex, so updates for one agent are
/// serialized while different agents proceed in parallel.
pub struct SurveillanceEngine {
    tracks: DashMap<AgentId, Arc<Mutex<AgentTrack>>>,
    lifecycle: Arc<LifecycleManager>,
    events: Arc<AnomalyLog>,
    config: ConfigHandle,
    model: Arc<dyn AnomalyModel>,
    paused: AtomicBool,
    clusters: RwLock<Vec<CorrelatedCluster>>,
}

impl SurveillanceEngine {
    pub fn new(lifecycle: Arc<LifecycleManager>, events: Arc<AnomalyLog>, config: ConfigHandle) -> Self {
        Self {
            tracks: DashMap::new(),
            lifecycle,
            events,
            config,
            model: Arc::new(ZScoreModel),
            paused: AtomicBool::new(false),
            clusters: RwLock::new(Vec::new()),
        }
    }

    /// Replace the statistical scorer.
    pub fn with_model(mut self, model: Arc<dyn AnomalyModel>) -> Self {
        self.model = model;
        self
    }

    /// Stop scoring and penalising; samples are still buffered.
    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
        warn!("Surveillance scoring paused");
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
        info!("Surveillance scoring resumed");
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    pub fn events(&self) -> &Arc<AnomalyLog> {
        &self.events
    }

    fn track(&self, agent_id: &str) -> Arc<Mutex<AgentTrack>> {
        if let Some(track) = self.tracks.get(agent_id) {
            return Arc::clone(track.value());
        }
        Arc::clone(
            self.tracks
                .entry(agent_id.to_string())
                .or_default()
                .value(),
        )
    }

    /// Process one accepted heartbeat.
    pub fn observe(&self, record: &HeartbeatRecord) -> OverwatchResult<Observation> {
        let config = self.config.read().surveillance.clone();
        let profile = self.lifecycle.get(&record.agent_id)?;
        let agent_id = profile.id.as_str();
        let at = record.timestamp;
        let metrics = record.metrics;

        let slot = self.track(agent_id);
        let mut track = slot.lock();
        if track.last_seen.is_some_and(|seen| at <= seen) {
            return Ok(Observation::default());
        }
        track.last_seen = Some(at);

        // Time-series buffer and transfer ledger.
        track.transfers.push_back((at, metrics.bytes_transferred));
        let transfer_horizon = at - Duration::minutes(config.exfiltration_window_minutes);
        while track.transfers.front().is_some_and(|(t, _)| *t < transfer_horizon) {
            track.transfers.pop_front();
        }
        let interval = Duration::seconds(config.sample_interval_secs);
        if track.last_kept.map_or(true, |last| at - last >= interval) {
            track.samples.push_back(Sample { at, metrics });
            track.last_kept = Some(at);
        }
        let retention = at - Duration::minutes(config.retention_minutes);
        while track.samples.front().is_some_and(|s| s.at < retention) {
            track.samples.pop_front();
        }

        if self.is_paused() {
            return Ok(Observation::default());
        }

        let mut observation = Observation::default();
        let established =
            track
                .baseline
                .is_established(at, config.learning_window(), config.min_baseline_samples);
        let score = established.then(|| self.model.score(&track.baseline, &metrics));

        let verdicts: Vec<(ThreatRule, Option<serde_json::Value>)> = {
            let input = RuleInput {
                now: at,
                samples: &track.samples,
                transfers: &track.transfers,
                transitions: &profile.recent_transitions,
                baseline: established.then_some(&track.baseline),
                latest: &metrics,
            };
            ThreatRule::ALL
                .into_iter()
                .map(|rule| (rule, evaluate(rule, &input, &config)))
                .collect()
        };
        let deviates = verdicts
            .iter()
            .any(|(rule, evidence)| *rule == ThreatRule::AbnormalPattern && evidence.is_some());

        match score {
            Some(score) => {
                observation.anomaly_score = Some(score);
                if let Err(e) = self.lifecycle.record_anomaly_score(agent_id, score) {
                    warn!(agent_id, error = %e, "Could not record anomaly score");
                }
                if score >= config.anomaly_threshold {
                    if !track.statistical_active {
                        track.statistical_active = true;
                        let event = self.statistical_event(agent_id, &track.baseline, &metrics, score, at);
                        observation.events.push(event);
                    }
                } else {
                    track.statistical_active = false;
                }
                // Anomalous samples never shift an established baseline.
                if score < config.anomaly_threshold && !deviates {
                    track.baseline.update(at, &metrics);
                }
            }
            None => {
                track.baseline.update(at, &metrics);
                debug!(agent_id, samples = track.baseline.samples(), "Baseline learning");
            }
        }

        let mut warning_open = verdicts.iter().any(|(rule, evidence)| {
            rule.class() == RuleClass::Warning && evidence.is_some() && track.active_rules[rule.index()]
        });

        for (rule, evidence) in verdicts {
            let idx = rule.index();
            let Some(evidence) = evidence else {
                track.active_rules[idx] = false;
                continue;
            };
            if track.active_rules[idx] {
                continue;
            }
            track.active_rules[idx] = true;

            let penalty = match rule.class() {
                RuleClass::Critical => config.critical_penalty,
                RuleClass::Warning if !warning_open => {
                    warning_open = true;
                    config.warning_penalty
                }
                RuleClass::Warning => 0,
            };

            let event = AnomalyEvent::new(
                agent_id,
                rule.pattern(),
                observation.anomaly_score.unwrap_or(1.0),
                rule.severity(),
                json!({ "rule": rule, "penalty": penalty, "details": evidence }),
                at,
            );
            self.events.append(event.clone());
            observation.events.push(event);

            if penalty > 0 {
                observation.penalty += u32::from(penalty);
                if let Err(e) = self
                    .lifecycle
                    .apply_security_penalty(agent_id, penalty, rule.pattern(), at)
                {
                    warn!(agent_id, rule = rule.pattern(), error = %e, "Security penalty not applied");
                }
            }
        }

        Ok(observation)
    }

    fn statistical_event(
        &self,
        agent_id: &str,
        baseline: &Baseline,
        metrics: &overwatch_core::Metrics,
        score: f64,
        at: DateTime<Utc>,
    ) -> AnomalyEvent {
        let severity = if score >= 0.9 {
            Severity::High
        } else {
            Severity::Medium
        };
        let normalized: serde_json::Map<String, serde_json::Value> = MetricKind::ALL
            .iter()
            .map(|kind| {
                (
                    format!("{kind:?}").to_lowercase(),
                    json!(ZScoreModel::normalized(baseline, *kind, metrics)),
                )
            })
            .collect();
        let event = AnomalyEvent::new(
            agent_id,
            STATISTICAL_PATTERN,
            score,
            severity,
            json!({ "model": self.model.name(), "score": score, "normalized": normalized }),
            at,
        );
        self.events.append(event.clone());
        event
    }

    pub fn baseline_status(&self, agent_id: &str) -> Option<BaselineStatus> {
        let config = self.config.read().surveillance.clone();
        let slot = self.tracks.get(agent_id).map(|t| Arc::clone(t.value()))?;
        let track = slot.lock();
        let now = track.last_seen.unwrap_or_else(Utc::now);
        Some(BaselineStatus {
            agent_id: agent_id.to_string(),
            samples: track.baseline.samples(),
            first_sample_at: track.baseline.first_sample_at,
            established: track.baseline.is_established(
                now,
                config.learning_window(),
                config.min_baseline_samples,
            ),
        })
    }

    /// Number of samples currently held in the agent's time-series buffer.
    pub fn buffered_samples(&self, agent_id: &str) -> usize {
        self.tracks
            .get(agent_id)
            .map(|t| Arc::clone(t.value()))
            .map_or(0, |slot| slot.lock().samples.len())
    }

    /// Periodic scan: drop tracks of decommissioned agents and correlate recent
    /// events across the fleet. Returns clusters that are new or gained members
    /// since the previous scan.
    pub fn scan(&self, now: DateTime<Utc>) -> Vec<CorrelatedCluster> {
        let (window, min_agents, retention) = {
            let config = self.config.read();
            (
                Duration::seconds(config.surveillance.correlation_window_secs),
                config.surveillance.correlation_min_agents,
                Duration::minutes(config.surveillance.retention_minutes),
            )
        };

        self.tracks.retain(|agent_id, _| {
            self.lifecycle
                .get(agent_id)
                .is_ok_and(|p| !p.state.is_terminal())
        });

        let recent = self.events.since(now - retention);
        let found = correlate(&recent, window, min_agents);

        let mut known = self.clusters.write();
        let mut surfaced = Vec::new();
        for cluster in found {
            let key = cluster.key();
            let existing = known.iter().position(|k| k.key() == key).or_else(|| {
                known.iter().position(|k| {
                    k.signature == cluster.signature
                        && cluster.event_ids.iter().any(|id| k.event_ids.contains(id))
                })
            });
            match existing {
                Some(index) => {
                    let agents_before = known[index].agent_ids.len();
                    if known[index].absorb(cluster) {
                        let merged = known[index].clone();
                        if merged.agent_ids.len() > agents_before {
                            warn!(
                                signature = %merged.signature,
                                agents = merged.agent_ids.len(),
                                severity = %merged.severity,
                                "Correlated anomaly cluster grew"
                            );
                        }
                        surfaced.push(merged);
                    }
                }
                None => {
                    warn!(
                        signature = %cluster.signature,
                        agents = cluster.agent_ids.len(),
                        severity = %cluster.severity,
                        "Correlated anomaly cluster detected"
                    );
                    known.push(cluster.clone());
                    surfaced.push(cluster);
                }
            }
        }
        surfaced
    }

    /// Every cluster detected so far.
    pub fn clusters(&self) -> Vec<CorrelatedCluster> {
        self.clusters.read().clone()
    }
}

impl HeartbeatSink for SurveillanceEngine {
    fn name(&self) -> &'static str {
        "surveillance"
    }

    fn on_heartbeat(&self, record: &HeartbeatRecord) -> OverwatchResult<()> {
        self.observe(record).map(|_| ())
    }
}
