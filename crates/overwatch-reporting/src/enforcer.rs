use crate::notify::Notifier;
use chrono::{DateTime, Utc};
use overwatch_core::config::ReportingConfig;
use overwatch_core::{
    AgentId, AgentProfile, AgentState, AnomalyEvent, AnomalyLog, ConfigHandle, HeartbeatRecord,
    HeartbeatSink, OverwatchError, OverwatchResult, ReportingStatus, Severity,
};
use overwatch_lifecycle::LifecycleManager;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// A reporting-status change produced by a sweep.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Escalation {
    pub agent_id: AgentId,
    pub from: ReportingStatus,
    pub to: ReportingStatus,
    pub missed: u32,
}

/// Reports missed by `profile` as of `now`.
///
/// Zero while the silence is within `interval × grace_factor`; afterwards the
/// number of whole intervals elapsed since the agent was last heard from.
pub fn missed_reports(profile: &AgentProfile, now: DateTime<Utc>, config: &ReportingConfig) -> u32 {
    let elapsed_ms = (now - profile.last_seen()).num_milliseconds();
    let interval_ms = config.interval().num_milliseconds();
    if interval_ms <= 0 || elapsed_ms as f64 <= interval_ms as f64 * config.grace_factor {
        return 0;
    }
    u32::try_from(elapsed_ms / interval_ms).unwrap_or(u32::MAX)
}

/// Ladder level for a missed-report count.
pub fn status_for(missed: u32, config: &ReportingConfig) -> ReportingStatus {
    if missed >= config.noncompliant_threshold {
        ReportingStatus::NonCompliant
    } else if missed >= config.suspend_threshold {
        ReportingStatus::Suspended
    } else if missed >= config.warn_threshold {
        ReportingStatus::Warned
    } else {
        ReportingStatus::Compliant
    }
}

/// Tracks reporting compliance and escalates through the lifecycle manager.
pub struct ReportingEnforcer {
    lifecycle: Arc<LifecycleManager>,
    events: Arc<AnomalyLog>,
    notifier: Arc<dyn Notifier>,
    config: ConfigHandle,
}

impl ReportingEnforcer {
    pub fn new(
        lifecycle: Arc<LifecycleManager>,
        events: Arc<AnomalyLog>,
        notifier: Arc<dyn Notifier>,
        config: ConfigHandle,
    ) -> Self {
        Self {
            lifecycle,
            events,
            notifier,
            config,
        }
    }

    /// Recount missed reports for every agent and escalate those whose level
    /// rose. Repeated sweeps at the same level have no side effects.
    ///
    /// Counts come from a snapshot; each escalation is applied under the
    /// agent's lock and skipped if the agent reported in the meantime.
    pub async fn sweep(&self, now: DateTime<Utc>) -> Vec<Escalation> {
        let config = self.config.read().reporting.clone();
        let mut escalations = Vec::new();

        for profile in self.lifecycle.snapshot() {
            if profile.frozen
                || matches!(
                    profile.state,
                    AgentState::Decommissioning | AgentState::Decommissioned
                )
            {
                continue;
            }
            let missed = missed_reports(&profile, now, &config);
            let level = status_for(missed, &config).max(profile.reporting_status);
            if missed == profile.missed_report_count && level == profile.reporting_status {
                continue;
            }
            let reason = format!("{missed} reports missed");
            let applied = self.lifecycle.escalate_reporting(
                &profile.id,
                profile.last_seen(),
                missed,
                level,
                &reason,
            );
            let (from, updated) = match applied {
                Ok(Some(applied)) => applied,
                Ok(None) => {
                    debug!(agent_id = %profile.id, "Agent reported during sweep; skipped");
                    continue;
                }
                Err(e) => {
                    warn!(agent_id = %profile.id, error = %e, "Could not update reporting status");
                    continue;
                }
            };
            if updated.reporting_status > from {
                self.escalate(&updated, from, missed, now).await;
                escalations.push(Escalation {
                    agent_id: updated.id.clone(),
                    from,
                    to: updated.reporting_status,
                    missed,
                });
            }
        }

        if !escalations.is_empty() {
            info!(count = escalations.len(), "Reporting sweep escalated agents");
        }
        escalations
    }

    /// Notifications and events for every ladder step between `from`
    /// (exclusive) and the profile's new level (inclusive). State changes
    /// were already applied by the lifecycle manager.
    async fn escalate(
        &self,
        profile: &AgentProfile,
        from: ReportingStatus,
        missed: u32,
        now: DateTime<Utc>,
    ) {
        let agent_id = profile.id.as_str();
        let to = profile.reporting_status;
        warn!(agent_id, ?from, ?to, missed, state = %profile.state, "Reporting escalation");

        if from < ReportingStatus::Warned && to >= ReportingStatus::Warned {
            self.notifier
                .notify_agent(
                    agent_id,
                    &format!("{missed} reports missed; reporting status WARNED"),
                )
                .await;
        }

        if from < ReportingStatus::Suspended && to >= ReportingStatus::Suspended {
            self.notifier
                .notify_admin(
                    agent_id,
                    &format!("{missed} reports missed; agent suspended and removed from dispatch"),
                )
                .await;
        }

        if from < ReportingStatus::NonCompliant && to >= ReportingStatus::NonCompliant {
            self.events.append(AnomalyEvent::new(
                agent_id,
                "reporting_non_compliant",
                1.0,
                Severity::Critical,
                json!({ "missed_reports": missed, "last_seen": profile.last_seen() }),
                now,
            ));
            self.notifier
                .notify_admin(
                    agent_id,
                    &format!("{missed} reports missed; NON_COMPLIANT, deletion approval requested"),
                )
                .await;
        }
    }

    /// A report arrived: reset the count. Suspended agents additionally need
    /// an admin `unsuspend` before they receive work again.
    pub fn on_report(&self, agent_id: &str) -> OverwatchResult<()> {
        let profile = self.lifecycle.get(agent_id)?;
        if profile.missed_report_count == 0 && profile.reporting_status == ReportingStatus::Compliant {
            return Ok(());
        }
        if profile.reporting_status == ReportingStatus::NonCompliant {
            return Err(OverwatchError::Frozen(format!(
                "agent '{agent_id}' is non-compliant"
            )));
        }

        self.lifecycle
            .update_reporting(agent_id, 0, ReportingStatus::Compliant)?;
        if profile.state == AgentState::Suspended {
            info!(agent_id, "Reporting recovered; awaiting admin unsuspend");
        } else {
            info!(agent_id, previous = ?profile.reporting_status, "Reporting recovered");
        }
        Ok(())
    }
}

impl HeartbeatSink for ReportingEnforcer {
    fn name(&self) -> &'static str {
        "reporting"
    }

    fn on_heartbeat(&self, record: &HeartbeatRecord) -> OverwatchResult<()> {
        self.on_report(&record.agent_id)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use chrono::Duration;
    use overwatch_core::{AgentSpec, OverwatchConfig};

    fn profile_seen(minutes_ago: i64, now: DateTime<Utc>) -> AgentProfile {
        let mut profile =
            AgentProfile::from_spec(&AgentSpec::new("a1", "acme", ["rust"]), 20, now - Duration::days(1));
        profile.last_heartbeat_at = Some(now - Duration::minutes(minutes_ago));
        profile
    }

    #[test]
    fn test_missed_reports_respects_grace() {
        let config = ReportingConfig::default();
        let now = Utc::now();
        assert_eq!(missed_reports(&profile_seen(4, now), now, &config), 0);
        assert_eq!(missed_reports(&profile_seen(10, now), now, &config), 0);
        assert_eq!(missed_reports(&profile_seen(11, now), now, &config), 2);
        assert_eq!(missed_reports(&profile_seen(15, now), now, &config), 3);
        assert_eq!(missed_reports(&profile_seen(25, now), now, &config), 5);
        assert_eq!(missed_reports(&profile_seen(50, now), now, &config), 10);
    }

    #[test]
    fn test_missed_reports_falls_back_to_registration() {
        let config = ReportingConfig::default();
        let now = Utc::now();
        let profile = AgentProfile::from_spec(
            &AgentSpec::new("a1", "acme", ["rust"]),
            20,
            now - Duration::minutes(30),
        );
        assert_eq!(missed_reports(&profile, now, &config), 6);
    }

    #[test]
    fn test_ladder_thresholds() {
        let config = OverwatchConfig::default().reporting;
        assert_eq!(status_for(0, &config), ReportingStatus::Compliant);
        assert_eq!(status_for(2, &config), ReportingStatus::Compliant);
        assert_eq!(status_for(3, &config), ReportingStatus::Warned);
        assert_eq!(status_for(4, &config), ReportingStatus::Warned);
        assert_eq!(status_for(5, &config), ReportingStatus::Suspended);
        assert_eq!(status_for(9, &config), ReportingStatus::Suspended);
        assert_eq!(status_for(10, &config), ReportingStatus::NonCompliant);
        assert_eq!(status_for(40, &config), ReportingStatus::NonCompliant);
    }
}
