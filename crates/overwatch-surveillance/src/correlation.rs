use chrono::{DateTime, Duration, Utc};
use overwatch_core::{AgentId, AnomalyEvent, Severity};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use uuid::Uuid;

/// Events sharing one signature, raised by several agents inside one window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrelatedCluster {
    pub signature: String,
    pub agent_ids: BTreeSet<AgentId>,
    pub event_ids: Vec<Uuid>,
    /// Highest member severity, raised one level.
    pub severity: Severity,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

impl CorrelatedCluster {
    /// Stable key for de-duplicating repeated scans of the same history.
    pub fn key(&self) -> (String, DateTime<Utc>) {
        (self.signature.clone(), self.first_seen)
    }

    /// Fold a recomputed view of the same cluster into this one. Returns
    /// `true` when it brought agents or events not already recorded.
    pub fn absorb(&mut self, other: CorrelatedCluster) -> bool {
        let agents_before = self.agent_ids.len();
        let events_before = self.event_ids.len();
        self.agent_ids.extend(other.agent_ids);
        for id in other.event_ids {
            if !self.event_ids.contains(&id) {
                self.event_ids.push(id);
            }
        }
        self.severity = self.severity.max(other.severity);
        self.first_seen = self.first_seen.min(other.first_seen);
        self.last_seen = self.last_seen.max(other.last_seen);
        self.agent_ids.len() > agents_before || self.event_ids.len() > events_before
    }
}

/// Group `events` by signature into windows of length `window`, anchored at
/// the first event of each window, and keep windows that span at least
/// `min_agents` distinct agents.
pub fn correlate(events: &[AnomalyEvent], window: Duration, min_agents: usize) -> Vec<CorrelatedCluster> {
    let mut by_signature: BTreeMap<&str, Vec<&AnomalyEvent>> = BTreeMap::new();
    for event in events {
        by_signature
            .entry(event.pattern_type.as_str())
            .or_default()
            .push(event);
    }

    let mut clusters = Vec::new();
    for (signature, mut group) in by_signature {
        group.sort_by_key(|e| e.timestamp);
        let mut start = 0;
        while start < group.len() {
            let anchor = group[start].timestamp;
            let end = group[start..]
                .iter()
                .position(|e| e.timestamp - anchor > window)
                .map_or(group.len(), |offset| start + offset);
            let members = &group[start..end];

            let agent_ids: BTreeSet<AgentId> = members.iter().map(|e| e.agent_id.clone()).collect();
            if agent_ids.len() >= min_agents.max(2) {
                let severity = members
                    .iter()
                    .map(|e| e.severity)
                    .max()
                    .unwrap_or(Severity::Low)
                    .raised();
                clusters.push(CorrelatedCluster {
                    signature: signature.to_string(),
                    agent_ids,
                    event_ids: members.iter().map(|e| e.id).collect(),
                    severity,
                    first_seen: anchor,
                    last_seen: members.last().map_or(anchor, |e| e.timestamp),
                });
            }
            start = end;
        }
    }
    clusters
}
