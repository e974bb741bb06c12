#![allow(clippy::unwrap_used, clippy::expect_used)]
//! End-to-end surveillance scenarios driven through the heartbeat ingest chain.

use chrono::{DateTime, Duration, Utc};
use overwatch_core::{
    AgentSpec, AnomalyLog, HeartbeatIngest, HeartbeatRecord, Metrics, OverwatchConfig, Severity,
};
use overwatch_lifecycle::LifecycleManager;
use overwatch_security::AuditTrail;
use overwatch_surveillance::SurveillanceEngine;
use std::sync::Arc;

struct Fleet {
    lifecycle: Arc<LifecycleManager>,
    engine: Arc<SurveillanceEngine>,
    ingest: HeartbeatIngest,
}

fn fleet() -> Fleet {
    let config = OverwatchConfig::default().into_handle();
    let lifecycle = Arc::new(LifecycleManager::new(config.clone(), Arc::new(AuditTrail::new())));
    let engine = Arc::new(SurveillanceEngine::new(
        lifecycle.clone(),
        Arc::new(AnomalyLog::new()),
        config,
    ));
    let mut ingest = HeartbeatIngest::new();
    ingest.add(lifecycle.clone());
    ingest.add(engine.clone());
    Fleet {
        lifecycle,
        engine,
        ingest,
    }
}

fn normal(i: i64) -> Metrics {
    let jitter = (i % 5) as f64;
    Metrics {
        cpu_percent: 30.0 + jitter,
        memory_percent: 45.0 + jitter,
        latency_ms: 150.0 + jitter * 5.0,
        error_rate: 0.01,
        throughput: 40.0 + jitter,
        bytes_transferred: 1_000,
    }
}

/// Register `id` and feed 26 hours of half-hourly normal heartbeats ending at
/// `until`, which establishes the baseline.
fn learn(fleet: &Fleet, id: &str, until: DateTime<Utc>) {
    let start = until - Duration::hours(26);
    fleet
        .lifecycle
        .register_at(AgentSpec::new(id, "acme", ["rust"]), start - Duration::minutes(1))
        .unwrap();
    for i in 0..=52 {
        let record = HeartbeatRecord::new(id, start + Duration::minutes(30 * i), normal(i));
        fleet.ingest.ingest(&record).unwrap();
    }
    assert!(fleet.engine.baseline_status(id).unwrap().established);
}

#[test]
fn test_sustained_cpu_spike_costs_one_warning_penalty() {
    let fleet = fleet();
    let spike_start = Utc::now() - Duration::minutes(30);
    learn(&fleet, "a2", spike_start - Duration::minutes(1));

    let hot = Metrics {
        cpu_percent: 99.0,
        ..normal(0)
    };
    for minute in 0..=12 {
        let record = HeartbeatRecord::new("a2", spike_start + Duration::minutes(minute), hot);
        fleet.ingest.ingest(&record).unwrap();
    }

    let profile = fleet.lifecycle.get("a2").unwrap();
    assert_eq!(profile.security_score, 85);

    let events = fleet.engine.events().for_agent("a2");
    let patterns: Vec<&str> = events.iter().map(|e| e.pattern_type.as_str()).collect();
    assert!(patterns.contains(&"resource_abuse"), "{patterns:?}");
    assert!(events.iter().all(|e| e.severity < Severity::Critical));
}

#[test]
fn test_security_score_stays_in_bounds_and_quarantines_at_zero() {
    let fleet = fleet();
    let start = Utc::now() - Duration::hours(10);
    fleet
        .lifecycle
        .register_at(AgentSpec::new("leaky", "acme", ["rust"]), start - Duration::minutes(1))
        .unwrap();

    // Alternate bursts and quiet hours so exfiltration re-arms every cycle.
    let mut t = start;
    for _ in 0..5 {
        let burst = Metrics {
            bytes_transferred: 1_500_000_000,
            ..Metrics::default()
        };
        fleet.ingest.ingest(&HeartbeatRecord::new("leaky", t, burst)).unwrap();
        let score = fleet.lifecycle.get("leaky").unwrap().security_score;
        assert!(score <= 100);
        t += Duration::minutes(61);
        fleet
            .ingest
            .ingest(&HeartbeatRecord::new("leaky", t, Metrics::default()))
            .ok();
        t += Duration::minutes(1);
    }

    let profile = fleet.lifecycle.get("leaky").unwrap();
    assert_eq!(profile.security_score, 0);
    assert_eq!(profile.state, overwatch_core::AgentState::Quarantined);
}

#[test]
fn test_coordinated_exfiltration_forms_one_cluster() {
    let fleet = fleet();
    let t = Utc::now() - Duration::minutes(10);
    for (i, id) in ["n1", "n2", "n3"].iter().enumerate() {
        fleet
            .lifecycle
            .register_at(AgentSpec::new(*id, "acme", ["rust"]), t - Duration::minutes(5))
            .unwrap();
        let burst = Metrics {
            bytes_transferred: 2_000_000_000,
            ..Metrics::default()
        };
        let at = t + Duration::seconds(30 * i as i64);
        fleet.ingest.ingest(&HeartbeatRecord::new(*id, at, burst)).unwrap();
    }

    let clusters = fleet.engine.scan(Utc::now());
    assert_eq!(clusters.len(), 1);
    assert_eq!(clusters[0].signature, "suspected_exfiltration");
    assert_eq!(clusters[0].agent_ids.len(), 3);
    assert_eq!(clusters[0].severity, Severity::Critical);

    // A second scan over the same history reports nothing new.
    assert!(fleet.engine.scan(Utc::now()).is_empty());
    assert_eq!(fleet.engine.clusters().len(), 1);
}

#[test]
fn test_late_member_joins_known_cluster() {
    let fleet = fleet();
    let t = Utc::now() - Duration::minutes(10);
    let burst = Metrics {
        bytes_transferred: 2_000_000_000,
        ..Metrics::default()
    };
    for (i, id) in ["n1", "n2", "n3", "n4"].iter().enumerate() {
        fleet
            .lifecycle
            .register_at(AgentSpec::new(*id, "acme", ["rust"]), t - Duration::minutes(5))
            .unwrap();
        if i < 3 {
            let at = t + Duration::seconds(30 * i as i64);
            fleet.ingest.ingest(&HeartbeatRecord::new(*id, at, burst)).unwrap();
        }
    }
    let first = fleet.engine.scan(Utc::now());
    assert_eq!(first.len(), 1);
    assert_eq!(first[0].agent_ids.len(), 3);

    // n4 leaks inside the same window after the cluster was reported.
    fleet
        .ingest
        .ingest(&HeartbeatRecord::new("n4", t + Duration::minutes(2), burst))
        .unwrap();
    let grown = fleet.engine.scan(Utc::now());
    assert_eq!(grown.len(), 1);
    assert_eq!(grown[0].key(), first[0].key());
    assert!(grown[0].agent_ids.contains("n4"));
    assert_eq!(grown[0].agent_ids.len(), 4);
    assert_eq!(grown[0].event_ids.len(), 4);

    assert_eq!(fleet.engine.clusters().len(), 1);
    assert!(fleet.engine.scan(Utc::now()).is_empty());
}
