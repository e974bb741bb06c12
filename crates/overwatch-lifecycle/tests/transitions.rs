#![allow(clippy::unwrap_used, clippy::expect_used)]
//! Integration tests for the lifecycle manager: transition legality over
//! arbitrary request traces and per-agent concurrency.

use chrono::{Duration, Utc};
use overwatch_core::{AgentSpec, AgentState, HeartbeatRecord, Metrics, OverwatchConfig, OverwatchError};
use overwatch_lifecycle::{is_allowed, LifecycleManager};
use overwatch_security::AuditTrail;
use std::sync::Arc;

fn manager() -> Arc<LifecycleManager> {
    Arc::new(LifecycleManager::new(
        OverwatchConfig::default().into_handle(),
        Arc::new(AuditTrail::new()),
    ))
}

#[test]
fn test_every_logged_transition_is_a_graph_edge() {
    let m = manager();
    m.register(AgentSpec::new("a1", "acme", ["rust"])).unwrap();

    // Walk a long pseudo-random request trace; each request is either applied
    // or rejected without touching the state.
    let mut seed: u64 = 0x2545_f491_4f6c_dd1d;
    for _ in 0..500 {
        seed ^= seed << 13;
        seed ^= seed >> 7;
        seed ^= seed << 17;
        let target = AgentState::ALL[(seed % AgentState::ALL.len() as u64) as usize];
        let before = m.get("a1").unwrap().state;
        match m.transition("a1", target, "trace", "test") {
            Ok(profile) => {
                assert!(is_allowed(before, target));
                assert_eq!(profile.state, target);
            }
            Err(OverwatchError::IllegalTransition { from, to, .. }) => {
                assert_eq!((from, to), (before, target));
                assert_eq!(m.get("a1").unwrap().state, before);
            }
            Err(e) => panic!("unexpected error: {e}"),
        }
    }

    let log = m.transition_log(Some("a1"));
    assert!(!log.is_empty());
    for pair in log.windows(2) {
        assert_eq!(pair[0].to, pair[1].from);
    }
    for record in &log {
        assert!(is_allowed(record.from, record.to));
    }
    // Every transition is mirrored into the tamper-evident trail.
    assert_eq!(m.trail().entries_with_action("transition").len(), log.len());
    assert!(m.trail().verify_chain().is_ok());
}

#[test]
fn test_decommissioned_is_terminal() {
    let m = manager();
    m.register(AgentSpec::new("a1", "acme", ["rust"])).unwrap();
    m.transition("a1", AgentState::Decommissioning, "retire", "admin").unwrap();
    m.transition("a1", AgentState::Decommissioned, "retire", "admin").unwrap();
    for target in AgentState::ALL {
        assert!(m.transition("a1", target, "revive", "admin").is_err());
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_reservations_never_exceed_capacity() {
    let m = manager();
    m.register(AgentSpec::new("a1", "acme", ["rust"]).with_capacity(5)).unwrap();
    m.apply_heartbeat(&HeartbeatRecord::new("a1", Utc::now() - Duration::seconds(1), Metrics::default()))
        .unwrap();

    let mut handles = Vec::new();
    for _ in 0..32 {
        let m = Arc::clone(&m);
        handles.push(tokio::spawn(async move {
            m.try_reserve("a1", |_| true).unwrap().is_some()
        }));
    }
    let mut granted = 0;
    for handle in handles {
        if handle.await.unwrap() {
            granted += 1;
        }
    }
    assert_eq!(granted, 5);
    let profile = m.get("a1").unwrap();
    assert_eq!(profile.load.current, 5);
    assert_eq!(profile.state, AgentState::Busy);
}
