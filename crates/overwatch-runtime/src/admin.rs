use crate::plane::ControlPlane;
use overwatch_core::{AgentProfile, OverwatchResult};
use overwatch_security::{AuditOutcome, Principal, Privilege};
use serde_json::{json, Value};
use tracing::{info, warn};

/// Privileged operations. Each requires an `Admin` principal and leaves an
/// entry in the audit trail whether it is denied, fails or succeeds.
impl ControlPlane {
    fn authorize(&self, principal: &Principal, action: &str, subject: Option<&str>) -> OverwatchResult<()> {
        if let Err(e) = principal.require(Privilege::Admin) {
            warn!(principal = %principal.name, action, subject, "Admin action denied");
            self.trail.record(
                &principal.name,
                action,
                subject.map(str::to_string),
                json!({ "reason": e.to_string() }),
                AuditOutcome::Denied,
            );
            return Err(e);
        }
        Ok(())
    }

    fn record_result<T>(
        &self,
        principal: &Principal,
        action: &str,
        subject: Option<&str>,
        details: Value,
        result: &OverwatchResult<T>,
    ) {
        let (outcome, details) = match result {
            Ok(_) => (AuditOutcome::Success, details),
            Err(e) => (
                AuditOutcome::Error,
                json!({ "request": details, "error": e.to_string() }),
            ),
        };
        self.trail
            .record(&principal.name, action, subject.map(str::to_string), details, outcome);
    }

    /// Return a SUSPENDED agent whose reporting has recovered to service.
    pub async fn unsuspend(&self, principal: &Principal, agent_id: &str) -> OverwatchResult<AgentProfile> {
        const ACTION: &str = "admin_unsuspend";
        self.authorize(principal, ACTION, Some(agent_id))?;
        let result = self.lifecycle.unsuspend(agent_id, &principal.name);
        self.record_result(principal, ACTION, Some(agent_id), json!({}), &result);
        let profile = result?;
        info!(agent_id, admin = %principal.name, "Agent unsuspended");
        if self.orchestrator.queue_len() > 0 {
            self.orchestrator.drain_queue().await;
        }
        Ok(profile)
    }

    /// Approve the pending deletion of a frozen NON_COMPLIANT agent.
    pub fn approve_deletion(&self, principal: &Principal, agent_id: &str) -> OverwatchResult<AgentProfile> {
        const ACTION: &str = "admin_approve_deletion";
        self.authorize(principal, ACTION, Some(agent_id))?;
        let result = self.lifecycle.approve_deletion(agent_id, &principal.name);
        self.record_result(principal, ACTION, Some(agent_id), json!({}), &result);
        let profile = result?;
        info!(agent_id, admin = %principal.name, "Agent deletion approved");
        Ok(profile)
    }

    /// Change one named threshold at runtime. Takes effect on the next
    /// operation that reads it.
    pub fn override_threshold(&self, principal: &Principal, name: &str, value: f64) -> OverwatchResult<()> {
        const ACTION: &str = "admin_override_threshold";
        self.authorize(principal, ACTION, Some(name))?;
        let result = self.config.write().set_threshold(name, value);
        self.record_result(principal, ACTION, Some(name), json!({ "value": value }), &result);
        result?;
        info!(name, value, admin = %principal.name, "Threshold overridden");
        Ok(())
    }
}
