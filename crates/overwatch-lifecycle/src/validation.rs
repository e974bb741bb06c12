use overwatch_core::{AgentSpec, OverwatchError, OverwatchResult};
use regex::Regex;
use std::sync::LazyLock;

#[allow(clippy::expect_used)]
static TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9][a-z0-9_.:-]{0,63}$").expect("valid tag pattern"));

/// Agent ids and capability tags share the same shape.
pub fn is_valid_tag(value: &str) -> bool {
    TAG.is_match(value)
}

/// Rejects malformed registration specs.
pub fn validate_spec(spec: &AgentSpec) -> OverwatchResult<()> {
    if !is_valid_tag(&spec.id) {
        return Err(OverwatchError::Validation(format!(
            "agent id '{}' must match [a-z0-9][a-z0-9_.:-]{{0,63}}",
            spec.id
        )));
    }
    if spec.tenant_id.trim().is_empty() {
        return Err(OverwatchError::Validation("tenant_id is empty".into()));
    }
    if spec.capabilities.is_empty() {
        return Err(OverwatchError::Validation(format!(
            "agent '{}' declares no capabilities",
            spec.id
        )));
    }
    if let Some(bad) = spec.capabilities.iter().find(|c| !is_valid_tag(c)) {
        return Err(OverwatchError::Validation(format!("invalid capability tag '{bad}'")));
    }
    if spec.max_capacity == 0 {
        return Err(OverwatchError::Validation("max_capacity must be at least 1".into()));
    }
    if spec.hardware.cpu_cores == 0 {
        return Err(OverwatchError::Validation("hardware.cpu_cores must be at least 1".into()));
    }
    if spec.hardware.memory_mb < 128 {
        return Err(OverwatchError::Validation(format!(
            "hardware.memory_mb {} is below 128",
            spec.hardware.memory_mb
        )));
    }
    if !spec.cost_rate.is_finite() || spec.cost_rate <= 0.0 {
        return Err(OverwatchError::Validation(format!(
            "cost_rate must be positive, got {}",
            spec.cost_rate
        )));
    }
    Ok(())
}
