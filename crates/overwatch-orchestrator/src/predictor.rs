use async_trait::async_trait;
use chrono::{DateTime, Utc};
use overwatch_core::{AgentId, AgentProfile, OverwatchError, OverwatchResult, TaskRequest};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::info;

/// What the predictor sees about a candidate agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentFeatures {
    pub agent_id: AgentId,
    pub capabilities: BTreeSet<String>,
    pub load_ratio: f64,
    pub mean_latency_ms: f64,
    pub mean_error_rate: f64,
    pub cost_rate: f64,
    pub cluster_id: Option<String>,
}

impl From<&AgentProfile> for AgentFeatures {
    fn from(profile: &AgentProfile) -> Self {
        Self {
            agent_id: profile.id.clone(),
            capabilities: profile.capabilities.clone(),
            load_ratio: profile.load.ratio(),
            mean_latency_ms: profile.performance_window.mean_latency_ms(),
            mean_error_rate: profile.performance_window.mean_error_rate(),
            cost_rate: profile.cost_rate,
            cluster_id: profile.cluster_id.clone(),
        }
    }
}

/// What the predictor sees about the task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskFeatures {
    /// Sorted, comma-joined required capabilities.
    pub signature: String,
    pub priority: u8,
    pub estimated_duration_secs: Option<f64>,
}

impl From<&TaskRequest> for TaskFeatures {
    fn from(request: &TaskRequest) -> Self {
        Self {
            signature: capability_signature(&request.required_capabilities),
            priority: request.priority,
            estimated_duration_secs: request
                .resource_requirements
                .estimated_duration_secs
                .map(|s| s as f64),
        }
    }
}

pub fn capability_signature(capabilities: &BTreeSet<String>) -> String {
    capabilities.iter().cloned().collect::<Vec<_>>().join(",")
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    /// In `[0, 1]`.
    pub success_probability: f64,
    pub duration_secs: f64,
}

/// Pluggable success/duration model used to score candidates.
///
/// Any error is treated as `ModelUnavailable` and the request falls back to
/// the load-based heuristic.
#[async_trait]
pub trait Predictor: Send + Sync {
    fn name(&self) -> &str;

    async fn predict(
        &self,
        agent: &AgentFeatures,
        task: &TaskFeatures,
    ) -> OverwatchResult<Prediction>;
}

/// One finished task, used as training data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingSample {
    pub agent_id: AgentId,
    pub signature: String,
    pub success: bool,
    pub duration_secs: f64,
    pub completed_at: DateTime<Utc>,
}

/// Builds a predictor from completed-task history.
#[async_trait]
pub trait ModelTrainer: Send + Sync {
    async fn train(&self, samples: &[TrainingSample]) -> OverwatchResult<Arc<dyn Predictor>>;
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
struct Tally {
    runs: u32,
    successes: u32,
    total_duration_secs: f64,
}

impl Tally {
    fn add(&mut self, sample: &TrainingSample) {
        self.runs += 1;
        if sample.success {
            self.successes += 1;
        }
        self.total_duration_secs += sample.duration_secs;
    }

    /// Laplace-smoothed success rate.
    fn success_rate(&self) -> f64 {
        (f64::from(self.successes) + 1.0) / (f64::from(self.runs) + 2.0)
    }

    fn mean_duration(&self) -> Option<f64> {
        (self.runs > 0).then(|| self.total_duration_secs / f64::from(self.runs))
    }
}

/// Frequency model: smoothed success rate and mean duration per agent and
/// capability signature, backed off to per-agent and fleet-wide tallies.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatisticalPredictor {
    by_pair: HashMap<String, Tally>,
    by_agent: HashMap<AgentId, Tally>,
    fleet: Tally,
}

impl StatisticalPredictor {
    fn pair_key(agent_id: &str, signature: &str) -> String {
        format!("{agent_id}|{signature}")
    }

    pub fn fit(samples: &[TrainingSample]) -> Self {
        let mut model = Self::default();
        for sample in samples {
            model
                .by_pair
                .entry(Self::pair_key(&sample.agent_id, &sample.signature))
                .or_default()
                .add(sample);
            model
                .by_agent
                .entry(sample.agent_id.clone())
                .or_default()
                .add(sample);
            model.fleet.add(sample);
        }
        model
    }

    pub fn sample_count(&self) -> u32 {
        self.fleet.runs
    }
}

#[async_trait]
impl Predictor for StatisticalPredictor {
    fn name(&self) -> &str {
        "statistical"
    }

    async fn predict(
        &self,
        agent: &AgentFeatures,
        task: &TaskFeatures,
    ) -> OverwatchResult<Prediction> {
        if self.fleet.runs == 0 {
            return Err(OverwatchError::ModelUnavailable(
                "statistical model has no samples".into(),
            ));
        }
        let tally = self
            .by_pair
            .get(&Self::pair_key(&agent.agent_id, &task.signature))
            .or_else(|| self.by_agent.get(&agent.agent_id))
            .unwrap_or(&self.fleet);

        let duration_secs = tally
            .mean_duration()
            .or(task.estimated_duration_secs)
            .or_else(|| self.fleet.mean_duration())
            .unwrap_or_default();
        Ok(Prediction {
            success_probability: tally.success_rate(),
            duration_secs,
        })
    }
}

/// Reference trainer producing a [`StatisticalPredictor`].
#[derive(Debug, Default)]
pub struct StatisticalTrainer;

#[async_trait]
impl ModelTrainer for StatisticalTrainer {
    async fn train(&self, samples: &[TrainingSample]) -> OverwatchResult<Arc<dyn Predictor>> {
        let model = StatisticalPredictor::fit(samples);
        info!(
            samples = model.sample_count(),
            agents = model.by_agent.len(),
            "Statistical model trained"
        );
        Ok(Arc::new(model))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn sample(agent: &str, signature: &str, success: bool, duration: f64) -> TrainingSample {
        TrainingSample {
            agent_id: agent.into(),
            signature: signature.into(),
            success,
            duration_secs: duration,
            completed_at: Utc::now(),
        }
    }

    fn features(agent: &str) -> AgentFeatures {
        AgentFeatures {
            agent_id: agent.into(),
            capabilities: BTreeSet::new(),
            load_ratio: 0.0,
            mean_latency_ms: 0.0,
            mean_error_rate: 0.0,
            cost_rate: 1.0,
            cluster_id: None,
        }
    }

    fn task(signature: &str) -> TaskFeatures {
        TaskFeatures {
            signature: signature.into(),
            priority: 0,
            estimated_duration_secs: None,
        }
    }

    #[tokio::test]
    async fn test_pair_statistics_win_over_agent_statistics() {
        let model = StatisticalPredictor::fit(&[
            sample("a1", "rust", true, 10.0),
            sample("a1", "rust", true, 20.0),
            sample("a1", "python", false, 100.0),
        ]);

        let rust = model.predict(&features("a1"), &task("rust")).await.unwrap();
        assert!((rust.success_probability - 0.75).abs() < 1e-9);
        assert!((rust.duration_secs - 15.0).abs() < 1e-9);

        // Unknown signature backs off to the agent's overall record.
        let go = model.predict(&features("a1"), &task("go")).await.unwrap();
        assert!((go.success_probability - 0.6).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_unknown_agent_uses_fleet_prior() {
        let model = StatisticalPredictor::fit(&[sample("a1", "rust", false, 30.0)]);
        let p = model.predict(&features("zz"), &task("rust")).await.unwrap();
        assert!((p.success_probability - 1.0 / 3.0).abs() < 1e-9);
        assert!((p.duration_secs - 30.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_empty_model_is_unavailable() {
        let model = StatisticalPredictor::default();
        let err = model.predict(&features("a1"), &task("rust")).await.unwrap_err();
        assert!(matches!(err, OverwatchError::ModelUnavailable(_)));
    }
}
