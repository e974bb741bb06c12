//! Agent lifecycle management for the Overwatch control plane.
//!
//! The [`LifecycleManager`] is the only component allowed to mutate an
//! [`AgentProfile`](overwatch_core::AgentProfile). Every other component reads
//! cloned snapshots and goes through the narrow request API exposed here.
//!
//! # Main types
//!
//! - [`LifecycleManager`]: Registry of agent profiles with per-agent locking.
//! - [`TransitionRecord`]: Logged state change (actor, reason, timestamp).
//! - [`RemediationRequest`]: Remediation submitted by audits.

/// Registry, transitions, heartbeats, reservations and escalation hooks.
pub mod manager;
/// Whitelisted edges of the lifecycle graph.
pub mod state_machine;
/// Registration spec validation.
pub mod validation;

pub use manager::{LifecycleManager, RemediationRequest, TransitionRecord};
pub use state_machine::{allowed_targets, is_allowed};
pub use validation::validate_spec;
