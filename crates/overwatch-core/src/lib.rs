//! Core types and error definitions for the Overwatch control plane.
//!
//! This crate provides the foundational types shared across all Overwatch crates:
//! the error taxonomy, the agent/task/event data model, configuration, the
//! heartbeat ingest chain and the retry policy used at component boundaries.
//!
//! # Main types
//!
//! - [`OverwatchError`]: Unified error enum for all Overwatch components.
//! - [`OverwatchResult`]: Convenience alias for `Result<T, OverwatchError>`.
//! - [`AgentProfile`]: Per-agent operational record owned by the lifecycle manager.
//! - [`HeartbeatRecord`]: A periodic status report emitted by an agent.
//! - [`TaskRequest`] / [`TaskAssignment`]: Work submitted to and placed by the orchestrator.
//! - [`AnomalyEvent`] / [`AnomalyLog`]: Append-only behavioral event history.
//! - [`HeartbeatIngest`]: Validates heartbeats and fans them out to [`HeartbeatSink`]s.
//! - [`OverwatchConfig`]: Enumerated configuration with runtime threshold overrides.

/// Agent profile, lifecycle states and registration specs.
pub mod agent;
/// Configuration sections, defaults and runtime overrides.
pub mod config;
/// Error taxonomy.
pub mod error;
/// Anomaly events and the append-only event log.
pub mod event;
/// Heartbeat records and reported metrics.
pub mod heartbeat;
/// Heartbeat validation and sink dispatch.
pub mod ingest;
/// Bounded exponential backoff for transient failures.
pub mod retry;
/// Task requests, assignments and outcomes.
pub mod task;

pub use agent::{
    AgentId, AgentProfile, AgentSpec, AgentState, HardwareSpec, Load, PerformanceSample,
    PerformanceWindow, Remediation, ReportingStatus, SecurityPosture,
};
pub use config::{ConfigHandle, OverwatchConfig};
pub use error::{OverwatchError, OverwatchResult};
pub use event::{AnomalyEvent, AnomalyLog, Severity};
pub use heartbeat::{HeartbeatRecord, Metrics, ReportedStatus};
pub use ingest::{HeartbeatIngest, HeartbeatSink, IngestOutcome};
pub use retry::{retry_with_backoff, RetryPolicy};
pub use task::{ResourceRequirements, TaskAssignment, TaskOutcome, TaskRequest, TaskStatus};
