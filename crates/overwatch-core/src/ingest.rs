use crate::error::{OverwatchError, OverwatchResult};
use crate::heartbeat::HeartbeatRecord;
use chrono::{Duration, Utc};
use std::sync::Arc;
use tracing::debug;

/// A component that consumes accepted heartbeats.
///
/// Sinks run in registration order. Returning [`OverwatchError::StaleData`]
/// stops the chain without surfacing an error to the caller.
pub trait HeartbeatSink: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &'static str;

    /// Consume one heartbeat.
    fn on_heartbeat(&self, record: &HeartbeatRecord) -> OverwatchResult<()>;
}

/// Result of a single ingest call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    /// Every sink consumed the record.
    Accepted,
    /// The record was older than (or identical to) the recorded heartbeat.
    Dropped,
}

/// Entry point for agent status reports.
///
/// Validates the record and dispatches it through the sink chain.
pub struct HeartbeatIngest {
    sinks: Vec<Arc<dyn HeartbeatSink>>,
    max_clock_skew: Duration,
}

impl HeartbeatIngest {
    pub fn new() -> Self {
        Self {
            sinks: Vec::new(),
            max_clock_skew: Duration::minutes(5),
        }
    }

    /// Tolerated amount by which a heartbeat may lie in the future.
    pub fn with_max_clock_skew(mut self, skew: Duration) -> Self {
        self.max_clock_skew = skew;
        self
    }

    /// Append a sink to the chain.
    pub fn add(&mut self, sink: Arc<dyn HeartbeatSink>) {
        self.sinks.push(sink);
    }

    pub fn sink_count(&self) -> usize {
        self.sinks.len()
    }

    /// Validate and dispatch one heartbeat.
    pub fn ingest(&self, record: &HeartbeatRecord) -> OverwatchResult<IngestOutcome> {
        if record.agent_id.trim().is_empty() {
            return Err(OverwatchError::Validation("heartbeat agent_id is empty".into()));
        }
        if record.timestamp > Utc::now() + self.max_clock_skew {
            return Err(OverwatchError::Validation(format!(
                "heartbeat timestamp {} is in the future",
                record.timestamp
            )));
        }
        record.metrics.validate()?;

        for sink in &self.sinks {
            match sink.on_heartbeat(record) {
                Ok(()) => {}
                Err(OverwatchError::StaleData { .. }) => {
                    debug!(
                        agent_id = %record.agent_id,
                        sink = sink.name(),
                        timestamp = %record.timestamp,
                        "Dropping stale heartbeat"
                    );
                    return Ok(IngestOutcome::Dropped);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(IngestOutcome::Accepted)
    }
}

impl Default for HeartbeatIngest {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::heartbeat::Metrics;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingSink(Arc<AtomicUsize>);

    impl HeartbeatSink for CountingSink {
        fn name(&self) -> &'static str {
            "counting"
        }

        fn on_heartbeat(&self, _record: &HeartbeatRecord) -> OverwatchResult<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct StaleSink;

    impl HeartbeatSink for StaleSink {
        fn name(&self) -> &'static str {
            "stale"
        }

        fn on_heartbeat(&self, record: &HeartbeatRecord) -> OverwatchResult<()> {
            Err(OverwatchError::StaleData {
                agent_id: record.agent_id.clone(),
                received: record.timestamp,
                recorded: record.timestamp,
            })
        }
    }

    #[test]
    fn test_dispatch_to_all_sinks() {
        let count = Arc::new(AtomicUsize::new(0));
        let mut ingest = HeartbeatIngest::new();
        ingest.add(Arc::new(CountingSink(count.clone())));
        ingest.add(Arc::new(CountingSink(count.clone())));

        let record = HeartbeatRecord::new("a1", Utc::now(), Metrics::default());
        assert_eq!(ingest.ingest(&record).unwrap(), IngestOutcome::Accepted);
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_stale_stops_chain_silently() {
        let count = Arc::new(AtomicUsize::new(0));
        let mut ingest = HeartbeatIngest::new();
        ingest.add(Arc::new(StaleSink));
        ingest.add(Arc::new(CountingSink(count.clone())));

        let record = HeartbeatRecord::new("a1", Utc::now(), Metrics::default());
        assert_eq!(ingest.ingest(&record).unwrap(), IngestOutcome::Dropped);
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_rejects_future_and_malformed() {
        let ingest = HeartbeatIngest::new();
        let future = HeartbeatRecord::new("a1", Utc::now() + Duration::hours(1), Metrics::default());
        assert!(matches!(
            ingest.ingest(&future),
            Err(OverwatchError::Validation(_))
        ));

        let empty = HeartbeatRecord::new("", Utc::now(), Metrics::default());
        assert!(ingest.ingest(&empty).is_err());

        let bad = HeartbeatRecord::new(
            "a1",
            Utc::now(),
            Metrics {
                error_rate: 2.0,
                ..Metrics::default()
            },
        );
        assert!(ingest.ingest(&bad).is_err());
    }
}
