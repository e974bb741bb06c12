use crate::agent::AgentState;
use chrono::{DateTime, Utc};
use thiserror::Error;

/// A convenience `Result` alias using [`OverwatchError`].
pub type OverwatchResult<T> = Result<T, OverwatchError>;

/// Top-level error type for the Overwatch control plane.
///
/// Each variant maps to one category of the error taxonomy; callers decide on
/// retry behaviour with [`OverwatchError::is_transient`].
#[derive(Error, Debug)]
pub enum OverwatchError {
    /// Malformed registration, heartbeat or task input. Never retried.
    #[error("Validation error: {0}")]
    Validation(String),

    /// A requested state change is not an edge of the lifecycle graph.
    #[error("Illegal transition for agent '{agent_id}': {from} -> {to}")]
    IllegalTransition {
        agent_id: String,
        from: AgentState,
        to: AgentState,
    },

    /// No eligible agent, or the pending queue is full.
    #[error("No capacity: {0}")]
    NoCapacity(String),

    /// The prediction capability is down; scoring falls back to the heuristic.
    #[error("Model unavailable: {0}")]
    ModelUnavailable(String),

    /// A heartbeat older than (or identical to) the recorded one.
    #[error("Stale heartbeat for agent '{agent_id}': {received} <= {recorded}")]
    StaleData {
        agent_id: String,
        received: DateTime<Utc>,
        recorded: DateTime<Utc>,
    },

    /// The tenant reached its registered-agent limit.
    #[error("Capacity exceeded for tenant '{tenant_id}': limit {limit}")]
    CapacityExceeded { tenant_id: String, limit: usize },

    /// Unknown agent, task or audit id.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The profile is frozen pending an admin deletion decision.
    #[error("Profile frozen: {0}")]
    Frozen(String),

    /// The caller lacks the privilege required for the action.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// A durable-store operation failed (transient).
    #[error("Store error: {0}")]
    Store(String),

    /// An in-flight operation was cancelled by an operator.
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// Invalid configuration or threshold override.
    #[error("Config error: {0}")]
    Config(String),

    /// A JSON serialization or deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A standard I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl OverwatchError {
    /// Returns `true` for infrastructure failures worth retrying with backoff.
    pub fn is_transient(&self) -> bool {
        matches!(self, OverwatchError::Store(_) | OverwatchError::Io(_))
    }

    /// Short machine-readable code used by the HTTP surface and the audit trail.
    pub fn code(&self) -> &'static str {
        match self {
            OverwatchError::Validation(_) => "validation_error",
            OverwatchError::IllegalTransition { .. } => "illegal_transition",
            OverwatchError::NoCapacity(_) => "no_capacity",
            OverwatchError::ModelUnavailable(_) => "model_unavailable",
            OverwatchError::StaleData { .. } => "stale_data",
            OverwatchError::CapacityExceeded { .. } => "capacity_exceeded",
            OverwatchError::NotFound(_) => "not_found",
            OverwatchError::Frozen(_) => "frozen",
            OverwatchError::Unauthorized(_) => "unauthorized",
            OverwatchError::Store(_) => "store_error",
            OverwatchError::Cancelled(_) => "cancelled",
            OverwatchError::Config(_) => "config_error",
            OverwatchError::Json(_) => "json_error",
            OverwatchError::Io(_) => "io_error",
        }
    }
}
