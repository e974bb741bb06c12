use overwatch_core::AgentState;

/// Targets reachable from every non-terminal state except `DECOMMISSIONING`.
const WILDCARD_TARGETS: [AgentState; 4] = [
    AgentState::Quarantined,
    AgentState::Offline,
    AgentState::Suspended,
    AgentState::Decommissioning,
];

/// Returns true if `from -> to` is an edge of the lifecycle graph.
pub fn is_allowed(from: AgentState, to: AgentState) -> bool {
    use AgentState::*;

    if from == to || from.is_terminal() {
        return false;
    }
    if from == Decommissioning {
        return to == Decommissioned;
    }
    if WILDCARD_TARGETS.contains(&to) {
        return true;
    }
    matches!(
        (from, to),
        (Registered, Provisioning)
            | (Provisioning, Active)
            | (Active, Idle)
            | (Active, Busy)
            | (Active, Degraded)
            | (Idle, Active)
            | (Idle, Busy)
            | (Busy, Active)
            | (Busy, Idle)
            | (Degraded, Maintenance)
            | (Degraded, Active)
            | (Maintenance, Active)
            | (Quarantined, Compromised)
            | (Quarantined, Active)
            | (Offline, Active)
            | (Suspended, Active)
    )
}

/// Every state reachable from `from` in one step.
pub fn allowed_targets(from: AgentState) -> Vec<AgentState> {
    AgentState::ALL
        .into_iter()
        .filter(|to| is_allowed(from, *to))
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use AgentState::*;

    #[test]
    fn test_happy_path() {
        assert!(is_allowed(Registered, Provisioning));
        assert!(is_allowed(Provisioning, Active));
        assert!(is_allowed(Active, Idle));
        assert!(is_allowed(Idle, Busy));
        assert!(is_allowed(Busy, Active));
        assert!(is_allowed(Active, Degraded));
        assert!(is_allowed(Degraded, Maintenance));
        assert!(is_allowed(Maintenance, Active));
    }

    #[test]
    fn test_wildcard_edges() {
        for from in AgentState::ALL {
            if from.is_terminal() || from == Decommissioning {
                continue;
            }
            for to in WILDCARD_TARGETS {
                assert_eq!(is_allowed(from, to), from != to, "{from} -> {to}");
            }
        }
    }

    #[test]
    fn test_terminal_and_decommissioning() {
        assert!(allowed_targets(Decommissioned).is_empty());
        assert_eq!(allowed_targets(Decommissioning), vec![Decommissioned]);
        assert!(!is_allowed(Active, Decommissioned));
    }

    #[test]
    fn test_illegal_edges() {
        assert!(!is_allowed(Registered, Active));
        assert!(!is_allowed(Idle, Degraded));
        assert!(!is_allowed(Maintenance, Busy));
        assert!(!is_allowed(Compromised, Active));
        assert!(!is_allowed(Suspended, Idle));
        assert!(!is_allowed(Offline, Busy));
    }
}
