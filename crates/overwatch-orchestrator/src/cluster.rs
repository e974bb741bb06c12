use overwatch_core::{AgentId, AgentProfile};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Coarse performance band derived from the rolling window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PerformanceTier {
    Fast,
    Standard,
    Slow,
}

impl PerformanceTier {
    pub fn of(profile: &AgentProfile) -> Self {
        let window = &profile.performance_window;
        if window.is_empty() {
            return PerformanceTier::Standard;
        }
        let latency = window.mean_latency_ms();
        let errors = window.mean_error_rate();
        if latency > 2_000.0 || errors > 0.15 {
            PerformanceTier::Slow
        } else if latency < 500.0 && errors < 0.05 {
            PerformanceTier::Fast
        } else {
            PerformanceTier::Standard
        }
    }
}

impl fmt::Display for PerformanceTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PerformanceTier::Fast => "fast",
            PerformanceTier::Standard => "standard",
            PerformanceTier::Slow => "slow",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentCluster {
    pub id: String,
    pub tier: PerformanceTier,
    /// Capabilities of the agent that founded the cluster.
    pub leader_capabilities: BTreeSet<String>,
    pub agent_ids: Vec<AgentId>,
}

pub fn jaccard(a: &BTreeSet<String>, b: &BTreeSet<String>) -> f64 {
    let union = a.union(b).count();
    if union == 0 {
        return 1.0;
    }
    a.intersection(b).count() as f64 / union as f64
}

/// Greedy leader clustering: each agent joins the first cluster of its tier
/// whose leader's capabilities are at least `similarity` Jaccard-similar,
/// otherwise it founds a new one. Input order is by agent id.
pub fn leader_clusters(profiles: &[AgentProfile], similarity: f64) -> Vec<AgentCluster> {
    let mut sorted: Vec<&AgentProfile> = profiles.iter().collect();
    sorted.sort_by(|a, b| a.id.cmp(&b.id));

    let mut clusters: Vec<AgentCluster> = Vec::new();
    for profile in sorted {
        let tier = PerformanceTier::of(profile);
        let home = clusters.iter_mut().find(|c| {
            c.tier == tier && jaccard(&c.leader_capabilities, &profile.capabilities) >= similarity
        });
        match home {
            Some(cluster) => cluster.agent_ids.push(profile.id.clone()),
            None => {
                let id = format!("{tier}-{}", clusters.len() + 1);
                clusters.push(AgentCluster {
                    id,
                    tier,
                    leader_capabilities: profile.capabilities.clone(),
                    agent_ids: vec![profile.id.clone()],
                });
            }
        }
    }
    clusters
}
