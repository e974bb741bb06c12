//! Fleet auditing for the Overwatch control plane.
//!
//! The [`AuditEngine`] runs periodic and surprise audits. Each audit type maps
//! to a fixed checklist of [`AuditCheck`]s evaluated against an
//! [`AuditSnapshot`]; the findings determine the [`Outcome`], the jittered
//! date of the next audit and any remediation submitted to the lifecycle
//! manager.
//!
//! # Main types
//!
//! - [`AuditEngine`]: Scheduling, execution, cancellation and retries.
//! - [`AuditRecord`] / [`Finding`]: What an audit produced.
//! - [`AuditCheck`]: One checklist item; ten standard checks ship here.
//! - [`AuditDataSource`]: Where snapshots come from ([`FleetDataSource`] in production).
//! - [`AuditStore`]: Durable records ([`InMemoryAuditStore`], [`JsonAuditStore`]).

/// The standard checks and the checklist registry.
pub mod checks;
/// Snapshot collection and scope filtering.
pub mod data;
/// Execution, scheduling and remediation.
pub mod engine;
/// Jittered rescheduling.
pub mod schedule;
/// Record persistence.
pub mod store;
/// Audit types, scopes, records and findings.
pub mod types;

pub use checks::{AuditCheck, CheckRegistry};
pub use data::{AuditDataSource, AuditSnapshot, FleetDataSource};
pub use engine::AuditEngine;
pub use schedule::{jittered_interval, next_audit_at};
pub use store::{AuditStore, InMemoryAuditStore, JsonAuditStore};
pub use types::{AuditRecord, AuditScope, AuditType, Finding, FindingStatus, Outcome};
