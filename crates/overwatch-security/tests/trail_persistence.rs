#![allow(clippy::unwrap_used, clippy::expect_used)]
//! Integration tests for the persisted audit trail.

use overwatch_security::audit::{verify_entries, AuditEntry};
use overwatch_security::{AuditOutcome, AuditTrail};

#[tokio::test]
async fn test_persistent_trail_round_trips_and_verifies() {
    let tmp = tempfile::tempdir().unwrap();
    let log_dir = tmp.path().join("audit");
    let trail = AuditTrail::persistent(log_dir.clone());

    for i in 0..4 {
        trail.record(
            "system",
            "transition",
            Some(format!("agent-{i}")),
            serde_json::json!({"from": "ACTIVE", "to": "OFFLINE"}),
            AuditOutcome::Success,
        );
    }

    // Give the background writer time to flush
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;

    let contents = tokio::fs::read_to_string(log_dir.join("audit.jsonl"))
        .await
        .unwrap();
    let reloaded: Vec<AuditEntry> = contents
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    assert_eq!(reloaded.len(), 4);
    assert!(verify_entries(&reloaded).is_ok());
    assert_eq!(reloaded, trail.entries());
}
