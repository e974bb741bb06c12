//! Task placement for the Overwatch control plane.
//!
//! The [`Orchestrator`] scores eligible agents, reserves capacity through the
//! lifecycle manager and queues work it cannot place. Periodic jobs rebalance
//! pending assignments, regroup agents into clusters, project capacity needs
//! and retrain the prediction model.

pub mod cluster;
pub mod engine;
pub mod forecast;
pub mod predictor;
pub mod scoring;
pub mod task_queue;

pub use cluster::{AgentCluster, PerformanceTier};
pub use engine::{Orchestrator, RebalanceMove, RebalanceReport, SubmitOutcome, TaskRecord};
pub use forecast::{CapacityForecast, ForecastPoint};
pub use predictor::{
    AgentFeatures, ModelTrainer, Prediction, Predictor, StatisticalPredictor, StatisticalTrainer,
    TaskFeatures, TrainingSample,
};
pub use scoring::{is_eligible, score_candidates, ScoredCandidate};
pub use task_queue::PendingQueue;
