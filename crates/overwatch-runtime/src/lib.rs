//! Runtime assembly of the Overwatch control plane.
//!
//! [`ControlPlane`] owns one instance of every governance component, wires
//! the heartbeat ingest chain and exposes the privileged admin actions.
//! [`JobScheduler`] drives the periodic sweeps, scans, rebalancing,
//! retraining and audit ticks on cron schedules until shutdown.

/// Privileged, audit-trailed admin actions.
pub mod admin;
/// Cron-driven background jobs.
pub mod jobs;
/// Component wiring.
pub mod plane;

pub use jobs::{parse_cron, Job, JobScheduler};
pub use plane::{ControlPlane, ControlPlaneBuilder};
