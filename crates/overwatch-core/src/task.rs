use crate::agent::AgentId;
use crate::error::{OverwatchError, OverwatchResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

/// Highest accepted task priority.
pub const MAX_PRIORITY: u8 = 10;

/// Resources a task expects to consume.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceRequirements {
    #[serde(default)]
    pub cpu_cores: f64,
    #[serde(default)]
    pub memory_mb: u64,
    /// Caller's own estimate, used when no model is trained.
    #[serde(default)]
    pub estimated_duration_secs: Option<u64>,
}

/// Work submitted by an external caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRequest {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    pub required_capabilities: BTreeSet<String>,
    /// 0 (lowest) to [`MAX_PRIORITY`].
    #[serde(default)]
    pub priority: u8,
    #[serde(default)]
    pub deadline: Option<DateTime<Utc>>,
    #[serde(default)]
    pub resource_requirements: ResourceRequirements,
    pub tenant_id: String,
    #[serde(default = "Utc::now")]
    pub submitted_at: DateTime<Utc>,
}

impl TaskRequest {
    pub fn new<I, S>(tenant_id: impl Into<String>, capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            id: Uuid::new_v4(),
            required_capabilities: capabilities.into_iter().map(Into::into).collect(),
            priority: 0,
            deadline: None,
            resource_requirements: ResourceRequirements::default(),
            tenant_id: tenant_id.into(),
            submitted_at: Utc::now(),
        }
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_deadline(mut self, deadline: DateTime<Utc>) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_resources(mut self, resources: ResourceRequirements) -> Self {
        self.resource_requirements = resources;
        self
    }

    /// Rejects malformed requests; never retried.
    pub fn validate(&self) -> OverwatchResult<()> {
        if self.tenant_id.trim().is_empty() {
            return Err(OverwatchError::Validation("task tenant_id is empty".into()));
        }
        if self.priority > MAX_PRIORITY {
            return Err(OverwatchError::Validation(format!(
                "task priority {} exceeds {MAX_PRIORITY}",
                self.priority
            )));
        }
        if self.required_capabilities.iter().any(|c| c.trim().is_empty()) {
            return Err(OverwatchError::Validation(
                "task lists an empty capability".into(),
            ));
        }
        let cpu = self.resource_requirements.cpu_cores;
        if !cpu.is_finite() || cpu < 0.0 {
            return Err(OverwatchError::Validation(format!(
                "task cpu requirement out of range: {cpu}"
            )));
        }
        Ok(())
    }
}

/// Status of a task as tracked by the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Pending,
    Assigned,
    Completed,
    Failed,
    Timeout,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Timeout
        )
    }
}

/// Terminal outcome reported by the agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskOutcome {
    Completed,
    Failed,
    Timeout,
}

impl From<TaskOutcome> for TaskStatus {
    fn from(outcome: TaskOutcome) -> Self {
        match outcome {
            TaskOutcome::Completed => TaskStatus::Completed,
            TaskOutcome::Failed => TaskStatus::Failed,
            TaskOutcome::Timeout => TaskStatus::Timeout,
        }
    }
}

/// Placement of a task on an agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskAssignment {
    pub task_id: Uuid,
    pub agent_id: AgentId,
    /// Weighted score of the chosen agent, in `[0, 1]`.
    pub confidence: f64,
    pub predicted_duration_secs: f64,
    pub assigned_at: DateTime<Utc>,
}
