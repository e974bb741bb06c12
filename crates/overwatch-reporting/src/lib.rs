//! Reporting compliance for the Overwatch control plane.
//!
//! Agents must report every `reporting.interval`. The [`ReportingEnforcer`]
//! counts missed reports on a periodic sweep and walks each agent up the
//! escalation ladder (warn, suspend, non-compliant), funnelling every state
//! change through the lifecycle manager. A fresh report resets the count.
//!
//! # Main types
//!
//! - [`ReportingEnforcer`]: Sweep, escalation and recovery.
//! - [`Notifier`]: Delivery seam for agent and admin notifications.
//! - [`Escalation`]: One level change produced by a sweep.

/// Sweep, escalation ladder and recovery.
pub mod enforcer;
/// Notification delivery.
pub mod notify;

pub use enforcer::{missed_reports, status_for, Escalation, ReportingEnforcer};
pub use notify::{Notification, Notifier, Recipient, RecordingNotifier, TracingNotifier};
