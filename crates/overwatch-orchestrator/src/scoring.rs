use crate::predictor::Prediction;
use chrono::{DateTime, Utc};
use overwatch_core::{AgentId, AgentProfile, AgentState, ReportingStatus, TaskRequest};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

pub const PERFORMANCE_WEIGHT: f64 = 0.4;
pub const COST_WEIGHT: f64 = 0.3;
pub const AVAILABILITY_WEIGHT: f64 = 0.2;
pub const SLA_WEIGHT: f64 = 0.1;

/// Confidence reported for heuristic placements.
pub const HEURISTIC_CONFIDENCE: f64 = 0.5;

/// Whether `profile` may receive `request` right now.
pub fn is_eligible(profile: &AgentProfile, request: &TaskRequest) -> bool {
    matches!(profile.state, AgentState::Active | AgentState::Idle)
        && !profile.frozen
        && profile.reporting_status == ReportingStatus::Compliant
        && profile.tenant_id == request.tenant_id
        && profile.has_capabilities(&request.required_capabilities)
        && profile.has_spare_capacity()
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub performance: f64,
    pub cost_fit: f64,
    pub availability_fit: f64,
    pub sla_fit: f64,
}

impl ScoreBreakdown {
    pub fn total(&self) -> f64 {
        PERFORMANCE_WEIGHT * self.performance
            + COST_WEIGHT * self.cost_fit
            + AVAILABILITY_WEIGHT * self.availability_fit
            + SLA_WEIGHT * self.sla_fit
    }
}

/// A candidate agent with its placement score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredCandidate {
    pub agent_id: AgentId,
    pub score: f64,
    pub load_ratio: f64,
    pub predicted_duration_secs: f64,
    pub breakdown: Option<ScoreBreakdown>,
}

fn sla_fit(predicted_secs: f64, deadline: Option<DateTime<Utc>>, now: DateTime<Utc>) -> f64 {
    let Some(deadline) = deadline else {
        return 1.0;
    };
    let remaining = (deadline - now).num_milliseconds() as f64 / 1000.0;
    if remaining <= 0.0 || predicted_secs > remaining {
        return 0.0;
    }
    (1.0 - predicted_secs / remaining).clamp(0.0, 1.0)
}

/// Best first: highest score, then lowest load, then agent id.
fn by_rank(a: &ScoredCandidate, b: &ScoredCandidate) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| a.load_ratio.total_cmp(&b.load_ratio))
        .then_with(|| a.agent_id.cmp(&b.agent_id))
}

/// Score every candidate with its model prediction and rank them.
pub fn score_candidates(
    candidates: &[(AgentProfile, Prediction)],
    deadline: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Vec<ScoredCandidate> {
    let max_cost = candidates
        .iter()
        .map(|(p, _)| p.cost_rate)
        .fold(0.0_f64, f64::max);

    let mut scored: Vec<ScoredCandidate> = candidates
        .iter()
        .map(|(profile, prediction)| {
            let cost_fit = if candidates.len() == 1 || max_cost <= 0.0 {
                1.0
            } else {
                1.0 - profile.cost_rate / max_cost
            };
            let breakdown = ScoreBreakdown {
                performance: prediction.success_probability.clamp(0.0, 1.0),
                cost_fit,
                availability_fit: (1.0 - profile.load.ratio()).clamp(0.0, 1.0),
                sla_fit: sla_fit(prediction.duration_secs, deadline, now),
            };
            ScoredCandidate {
                agent_id: profile.id.clone(),
                score: breakdown.total(),
                load_ratio: profile.load.ratio(),
                predicted_duration_secs: prediction.duration_secs,
                breakdown: Some(breakdown),
            }
        })
        .collect();
    scored.sort_by(by_rank);
    scored
}

/// Rank candidates without a model: least loaded first.
pub fn heuristic_order(
    candidates: &[AgentProfile],
    duration_for: impl Fn(&AgentProfile) -> f64,
) -> Vec<ScoredCandidate> {
    let mut scored: Vec<ScoredCandidate> = candidates
        .iter()
        .map(|profile| ScoredCandidate {
            agent_id: profile.id.clone(),
            score: HEURISTIC_CONFIDENCE,
            load_ratio: profile.load.ratio(),
            predicted_duration_secs: duration_for(profile),
            breakdown: None,
        })
        .collect();
    scored.sort_by(by_rank);
    scored
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use chrono::Duration;
    use overwatch_core::AgentSpec;

    fn agent(id: &str, cost: f64, current: u32) -> AgentProfile {
        let spec = AgentSpec::new(id, "acme", ["rust", "sql"])
            .with_capacity(4)
            .with_cost_rate(cost);
        let mut profile = AgentProfile::from_spec(&spec, 20, Utc::now());
        profile.state = AgentState::Active;
        profile.load.current = current;
        profile
    }

    fn prediction(p: f64, secs: f64) -> Prediction {
        Prediction {
            success_probability: p,
            duration_secs: secs,
        }
    }

    #[test]
    fn test_eligibility() {
        let request = TaskRequest::new("acme", ["rust"]);
        let mut profile = agent("a1", 1.0, 0);
        assert!(is_eligible(&profile, &request));

        profile.state = AgentState::Busy;
        assert!(!is_eligible(&profile, &request));
        profile.state = AgentState::Idle;
        assert!(is_eligible(&profile, &request));

        profile.reporting_status = ReportingStatus::Warned;
        assert!(!is_eligible(&profile, &request));
        profile.reporting_status = ReportingStatus::Compliant;

        assert!(!is_eligible(&profile, &TaskRequest::new("other", ["rust"])));
        assert!(!is_eligible(&profile, &TaskRequest::new("acme", ["gpu"])));

        profile.load.current = 2;
        profile.capacity_limit = 2;
        assert!(!is_eligible(&profile, &request));
    }

    #[test]
    fn test_weighted_score() {
        let now = Utc::now();
        let ranked = score_candidates(
            &[
                (agent("cheap", 1.0, 2), prediction(0.8, 10.0)),
                (agent("pricey", 4.0, 0), prediction(0.9, 10.0)),
            ],
            None,
            now,
        );
        // cheap: 0.4*0.8 + 0.3*0.75 + 0.2*0.5 + 0.1 = 0.745
        // pricey: 0.4*0.9 + 0 + 0.2*1.0 + 0.1 = 0.66
        assert_eq!(ranked[0].agent_id, "cheap");
        assert!((ranked[0].score - 0.745).abs() < 1e-9);
        assert!((ranked[1].score - 0.66).abs() < 1e-9);
    }

    #[test]
    fn test_sla_fit_penalises_overrun() {
        let now = Utc::now();
        let deadline = Some(now + Duration::seconds(100));
        assert!((sla_fit(25.0, deadline, now) - 0.75).abs() < 1e-6);
        assert_eq!(sla_fit(150.0, deadline, now), 0.0);
        assert_eq!(sla_fit(150.0, None, now), 1.0);
    }

    #[test]
    fn test_ties_prefer_lowest_load() {
        let now = Utc::now();
        let ranked = score_candidates(
            &[
                (agent("a1", 1.0, 1), prediction(0.8, 10.0)),
                (agent("a2", 1.0, 1), prediction(0.8, 10.0)),
            ],
            None,
            now,
        );
        assert_eq!(ranked[0].score, ranked[1].score);
        assert_eq!(ranked[0].agent_id, "a1");

        let ranked = heuristic_order(&[agent("busy", 1.0, 3), agent("quiet", 1.0, 0)], |_| 60.0);
        assert_eq!(ranked[0].agent_id, "quiet");
        assert_eq!(ranked[0].score, HEURISTIC_CONFIDENCE);
    }
}
