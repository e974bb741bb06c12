//! Continuous behavioral, security and performance monitoring.
//!
//! The [`SurveillanceEngine`] consumes heartbeats after the lifecycle manager,
//! learns a per-agent statistical baseline, scores deviations through a
//! pluggable [`AnomalyModel`], evaluates deterministic [`ThreatRule`]s and
//! correlates events across agents. Every consequence (score updates,
//! penalties, quarantine) is submitted to the lifecycle manager.
//!
//! # Main types
//!
//! - [`SurveillanceEngine`]: Per-agent tracking behind sharded locks.
//! - [`Baseline`]: Welford running statistics per metric.
//! - [`ThreatRule`]: The deterministic rule set and its severity classes.
//! - [`CorrelatedCluster`]: Events sharing a signature across several agents.

/// Running statistics and baseline establishment.
pub mod baseline;
/// Cross-agent event correlation.
pub mod correlation;
/// The engine and its heartbeat sink.
pub mod engine;
/// Metric extraction, weights and the pluggable scorer.
pub mod model;
/// Deterministic threat rules.
pub mod rules;

pub use baseline::{Baseline, RunningStats};
pub use correlation::{correlate, CorrelatedCluster};
pub use engine::{BaselineStatus, Observation, SurveillanceEngine};
pub use model::{AnomalyModel, MetricKind, ZScoreModel};
pub use rules::{RuleClass, ThreatRule};
