use crate::error::{OverwatchError, OverwatchResult};
use chrono::Duration;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

/// Shared, runtime-overridable configuration.
pub type ConfigHandle = Arc<RwLock<OverwatchConfig>>;

/// Complete control-plane configuration, loaded from TOML and the environment.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OverwatchConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub lifecycle: LifecycleConfig,
    #[serde(default)]
    pub surveillance: SurveillanceConfig,
    #[serde(default)]
    pub reporting: ReportingConfig,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub audit: AuditConfig,
    #[serde(default)]
    pub jobs: JobsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_rps")]
    pub max_requests_per_second: f64,
    #[serde(default = "default_burst")]
    pub max_burst: f64,
    /// Keys granting operator privilege. Empty with no admin keys = auth disabled.
    #[serde(default)]
    pub operator_keys: Vec<String>,
    /// Keys granting admin privilege.
    #[serde(default)]
    pub admin_keys: Vec<String>,
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            max_requests_per_second: default_rps(),
            max_burst: default_burst(),
            operator_keys: vec![],
            admin_keys: vec![],
            data_dir: default_data_dir(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleConfig {
    #[serde(default = "default_max_agents_per_tenant")]
    pub max_agents_per_tenant: usize,
    #[serde(default = "default_degraded_error_rate")]
    pub degraded_error_rate: f64,
    #[serde(default = "default_degraded_latency_ms")]
    pub degraded_latency_ms: f64,
    #[serde(default = "default_performance_window")]
    pub performance_window: usize,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            max_agents_per_tenant: default_max_agents_per_tenant(),
            degraded_error_rate: default_degraded_error_rate(),
            degraded_latency_ms: default_degraded_latency_ms(),
            performance_window: default_performance_window(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SurveillanceConfig {
    #[serde(default = "default_anomaly_threshold")]
    pub anomaly_threshold: f64,
    #[serde(default = "default_stale_timeout_minutes")]
    pub stale_timeout_minutes: i64,
    #[serde(default = "default_learning_window_hours")]
    pub learning_window_hours: i64,
    #[serde(default = "default_min_baseline_samples")]
    pub min_baseline_samples: u64,
    #[serde(default = "default_retention_minutes")]
    pub retention_minutes: i64,
    #[serde(default)]
    pub sample_interval_secs: i64,
    #[serde(default = "default_correlation_window_secs")]
    pub correlation_window_secs: i64,
    #[serde(default = "default_correlation_min_agents")]
    pub correlation_min_agents: usize,
    #[serde(default = "default_error_rate_threshold")]
    pub error_rate_threshold: f64,
    #[serde(default = "default_error_rate_sustain_minutes")]
    pub error_rate_sustain_minutes: i64,
    #[serde(default = "default_resource_threshold_percent")]
    pub resource_threshold_percent: f64,
    #[serde(default = "default_resource_sustain_minutes")]
    pub resource_sustain_minutes: i64,
    #[serde(default = "default_deviation_sigma")]
    pub deviation_sigma: f64,
    #[serde(default = "default_churn_max_changes")]
    pub churn_max_changes: usize,
    #[serde(default = "default_churn_window_minutes")]
    pub churn_window_minutes: i64,
    #[serde(default = "default_exfiltration_bytes")]
    pub exfiltration_bytes: u64,
    #[serde(default = "default_exfiltration_window_minutes")]
    pub exfiltration_window_minutes: i64,
    #[serde(default = "default_critical_penalty")]
    pub critical_penalty: u8,
    #[serde(default = "default_warning_penalty")]
    pub warning_penalty: u8,
}

impl SurveillanceConfig {
    pub fn stale_timeout(&self) -> Duration {
        Duration::minutes(self.stale_timeout_minutes)
    }

    pub fn learning_window(&self) -> Duration {
        Duration::hours(self.learning_window_hours)
    }
}

impl Default for SurveillanceConfig {
    fn default() -> Self {
        Self {
            anomaly_threshold: default_anomaly_threshold(),
            stale_timeout_minutes: default_stale_timeout_minutes(),
            learning_window_hours: default_learning_window_hours(),
            min_baseline_samples: default_min_baseline_samples(),
            retention_minutes: default_retention_minutes(),
            sample_interval_secs: 0,
            correlation_window_secs: default_correlation_window_secs(),
            correlation_min_agents: default_correlation_min_agents(),
            error_rate_threshold: default_error_rate_threshold(),
            error_rate_sustain_minutes: default_error_rate_sustain_minutes(),
            resource_threshold_percent: default_resource_threshold_percent(),
            resource_sustain_minutes: default_resource_sustain_minutes(),
            deviation_sigma: default_deviation_sigma(),
            churn_max_changes: default_churn_max_changes(),
            churn_window_minutes: default_churn_window_minutes(),
            exfiltration_bytes: default_exfiltration_bytes(),
            exfiltration_window_minutes: default_exfiltration_window_minutes(),
            critical_penalty: default_critical_penalty(),
            warning_penalty: default_warning_penalty(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportingConfig {
    /// Expected reporting interval in seconds (`reporting.interval`).
    #[serde(default = "default_reporting_interval_secs")]
    pub interval_secs: i64,
    #[serde(default = "default_grace_factor")]
    pub grace_factor: f64,
    #[serde(default = "default_warn_threshold")]
    pub warn_threshold: u32,
    #[serde(default = "default_suspend_threshold")]
    pub suspend_threshold: u32,
    #[serde(default = "default_noncompliant_threshold")]
    pub noncompliant_threshold: u32,
}

impl ReportingConfig {
    pub fn interval(&self) -> Duration {
        Duration::seconds(self.interval_secs)
    }
}

impl Default for ReportingConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_reporting_interval_secs(),
            grace_factor: default_grace_factor(),
            warn_threshold: default_warn_threshold(),
            suspend_threshold: default_suspend_threshold(),
            noncompliant_threshold: default_noncompliant_threshold(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_rebalance_variance_threshold")]
    pub rebalance_variance_threshold: f64,
    #[serde(default = "default_cluster_similarity")]
    pub cluster_similarity: f64,
    #[serde(default = "default_retrain_interval_hours")]
    pub retrain_interval_hours: i64,
    #[serde(default = "default_min_training_samples")]
    pub min_training_samples: usize,
    #[serde(default = "default_forecast_days")]
    pub forecast_history_days: i64,
    #[serde(default = "default_forecast_days")]
    pub forecast_horizon_days: i64,
    #[serde(default = "default_task_duration_secs")]
    pub default_task_duration_secs: f64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            rebalance_variance_threshold: default_rebalance_variance_threshold(),
            cluster_similarity: default_cluster_similarity(),
            retrain_interval_hours: default_retrain_interval_hours(),
            min_training_samples: default_min_training_samples(),
            forecast_history_days: default_forecast_days(),
            forecast_horizon_days: default_forecast_days(),
            default_task_duration_secs: default_task_duration_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditConfig {
    #[serde(default = "default_surprise_probability")]
    pub surprise_probability: f64,
    /// Relative jitter applied to every reschedule (0.1 = ±10 %).
    #[serde(default = "default_jitter")]
    pub jitter: f64,
    /// Seed for jitter and surprise draws; random when absent.
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default = "default_regular_days")]
    pub regular_interval_days: i64,
    #[serde(default = "default_compliance_days")]
    pub compliance_interval_days: i64,
    #[serde(default = "default_security_days")]
    pub security_interval_days: i64,
    #[serde(default = "default_performance_days")]
    pub performance_interval_days: i64,
    #[serde(default = "default_behavioral_days")]
    pub behavioral_interval_days: i64,
    /// Directory for the JSON audit store; in-memory when absent.
    #[serde(default)]
    pub store_dir: Option<PathBuf>,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            surprise_probability: default_surprise_probability(),
            jitter: default_jitter(),
            seed: None,
            regular_interval_days: default_regular_days(),
            compliance_interval_days: default_compliance_days(),
            security_interval_days: default_security_days(),
            performance_interval_days: default_performance_days(),
            behavioral_interval_days: default_behavioral_days(),
            store_dir: None,
        }
    }
}

/// Cron expressions (7-field, seconds first) for the background jobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobsConfig {
    #[serde(default = "every_minute")]
    pub stale_sweep: String,
    #[serde(default = "every_minute")]
    pub reporting_sweep: String,
    #[serde(default = "every_minute")]
    pub surveillance_scan: String,
    #[serde(default = "every_fifteen_minutes")]
    pub rebalance: String,
    #[serde(default = "hourly")]
    pub recluster: String,
    #[serde(default = "hourly")]
    pub retrain: String,
    #[serde(default = "every_five_minutes")]
    pub audit_tick: String,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            stale_sweep: every_minute(),
            reporting_sweep: every_minute(),
            surveillance_scan: every_minute(),
            rebalance: every_fifteen_minutes(),
            recluster: hourly(),
            retrain: hourly(),
            audit_tick: every_five_minutes(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8700
}
fn default_rps() -> f64 {
    50.0
}
fn default_burst() -> f64 {
    200.0
}
fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}
fn default_max_agents_per_tenant() -> usize {
    100
}
fn default_degraded_error_rate() -> f64 {
    0.25
}
fn default_degraded_latency_ms() -> f64 {
    5_000.0
}
fn default_performance_window() -> usize {
    20
}
fn default_anomaly_threshold() -> f64 {
    0.7
}
fn default_stale_timeout_minutes() -> i64 {
    10
}
fn default_learning_window_hours() -> i64 {
    24
}
fn default_min_baseline_samples() -> u64 {
    30
}
fn default_retention_minutes() -> i64 {
    120
}
fn default_correlation_window_secs() -> i64 {
    300
}
fn default_correlation_min_agents() -> usize {
    3
}
fn default_error_rate_threshold() -> f64 {
    0.2
}
fn default_error_rate_sustain_minutes() -> i64 {
    5
}
fn default_resource_threshold_percent() -> f64 {
    95.0
}
fn default_resource_sustain_minutes() -> i64 {
    10
}
fn default_deviation_sigma() -> f64 {
    3.0
}
fn default_churn_max_changes() -> usize {
    10
}
fn default_churn_window_minutes() -> i64 {
    5
}
fn default_exfiltration_bytes() -> u64 {
    1_000_000_000
}
fn default_exfiltration_window_minutes() -> i64 {
    60
}
fn default_critical_penalty() -> u8 {
    30
}
fn default_warning_penalty() -> u8 {
    15
}
fn default_reporting_interval_secs() -> i64 {
    300
}
fn default_grace_factor() -> f64 {
    2.0
}
fn default_warn_threshold() -> u32 {
    3
}
fn default_suspend_threshold() -> u32 {
    5
}
fn default_noncompliant_threshold() -> u32 {
    10
}
fn default_queue_capacity() -> usize {
    256
}
fn default_rebalance_variance_threshold() -> f64 {
    0.05
}
fn default_cluster_similarity() -> f64 {
    0.5
}
fn default_retrain_interval_hours() -> i64 {
    24
}
fn default_min_training_samples() -> usize {
    1000
}
fn default_forecast_days() -> i64 {
    30
}
fn default_task_duration_secs() -> f64 {
    60.0
}
fn default_surprise_probability() -> f64 {
    0.2
}
fn default_jitter() -> f64 {
    0.1
}
fn default_regular_days() -> i64 {
    30
}
fn default_compliance_days() -> i64 {
    90
}
fn default_security_days() -> i64 {
    60
}
fn default_performance_days() -> i64 {
    45
}
fn default_behavioral_days() -> i64 {
    30
}
fn every_minute() -> String {
    "0 * * * * * *".to_string()
}
fn every_five_minutes() -> String {
    "0 */5 * * * * *".to_string()
}
fn every_fifteen_minutes() -> String {
    "0 */15 * * * * *".to_string()
}
fn hourly() -> String {
    "0 0 * * * * *".to_string()
}

/// Names accepted by [`OverwatchConfig::set_threshold`] and the `OVERWATCH_*` overrides.
pub const THRESHOLD_NAMES: &[&str] = &[
    "reporting.interval",
    "reporting.grace_factor",
    "reporting.warn_threshold",
    "reporting.suspend_threshold",
    "reporting.noncompliant_threshold",
    "surveillance.anomaly_threshold",
    "surveillance.stale_timeout_minutes",
    "surveillance.correlation_min_agents",
    "lifecycle.max_agents_per_tenant",
    "lifecycle.degraded_error_rate",
    "lifecycle.degraded_latency_ms",
    "orchestrator.queue_capacity",
    "orchestrator.rebalance_variance_threshold",
    "audit.surprise_probability",
    "audit.regular_interval_days",
    "audit.compliance_interval_days",
    "audit.security_interval_days",
    "audit.performance_interval_days",
    "audit.behavioral_interval_days",
];

fn whole(name: &str, value: f64) -> OverwatchResult<u64> {
    if value.fract() != 0.0 || value < 0.0 || !value.is_finite() {
        return Err(OverwatchError::Config(format!(
            "'{name}' expects a non-negative whole number, got {value}"
        )));
    }
    Ok(value as u64)
}

fn fraction(name: &str, value: f64) -> OverwatchResult<f64> {
    if !(0.0..=1.0).contains(&value) {
        return Err(OverwatchError::Config(format!(
            "'{name}' expects a value in [0, 1], got {value}"
        )));
    }
    Ok(value)
}

impl OverwatchConfig {
    /// Parse a TOML document and validate it.
    pub fn from_toml(source: &str) -> OverwatchResult<Self> {
        let config: Self = toml::from_str(source)
            .map_err(|e| OverwatchError::Config(format!("invalid config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Wrap in a shared handle.
    pub fn into_handle(self) -> ConfigHandle {
        Arc::new(RwLock::new(self))
    }

    /// Cross-field checks.
    pub fn validate(&self) -> OverwatchResult<()> {
        let r = &self.reporting;
        if !(r.warn_threshold < r.suspend_threshold
            && r.suspend_threshold < r.noncompliant_threshold)
        {
            return Err(OverwatchError::Config(format!(
                "reporting thresholds must increase: warn {} < suspend {} < noncompliant {}",
                r.warn_threshold, r.suspend_threshold, r.noncompliant_threshold
            )));
        }
        if r.interval_secs <= 0 {
            return Err(OverwatchError::Config("reporting.interval must be positive".into()));
        }
        if r.grace_factor < 1.0 {
            return Err(OverwatchError::Config("reporting.grace_factor must be >= 1".into()));
        }
        if self.surveillance.stale_timeout_minutes <= 0 {
            return Err(OverwatchError::Config(
                "surveillance.stale_timeout_minutes must be positive".into(),
            ));
        }
        fraction("surveillance.anomaly_threshold", self.surveillance.anomaly_threshold)?;
        fraction("audit.surprise_probability", self.audit.surprise_probability)?;
        fraction("audit.jitter", self.audit.jitter)?;
        let intervals = [
            self.audit.regular_interval_days,
            self.audit.compliance_interval_days,
            self.audit.security_interval_days,
            self.audit.performance_interval_days,
            self.audit.behavioral_interval_days,
        ];
        if intervals.iter().any(|d| *d <= 0) {
            return Err(OverwatchError::Config("audit intervals must be positive".into()));
        }
        Ok(())
    }

    /// Override one named threshold, rejecting unknown names and invalid values.
    ///
    /// The change is applied to a copy and only committed if the whole
    /// configuration still validates.
    pub fn set_threshold(&mut self, name: &str, value: f64) -> OverwatchResult<()> {
        if !value.is_finite() {
            return Err(OverwatchError::Config(format!("'{name}' must be finite")));
        }
        let mut next = self.clone();
        match name {
            "reporting.interval" => next.reporting.interval_secs = whole(name, value)? as i64,
            "reporting.grace_factor" => next.reporting.grace_factor = value,
            "reporting.warn_threshold" => next.reporting.warn_threshold = whole(name, value)? as u32,
            "reporting.suspend_threshold" => {
                next.reporting.suspend_threshold = whole(name, value)? as u32;
            }
            "reporting.noncompliant_threshold" => {
                next.reporting.noncompliant_threshold = whole(name, value)? as u32;
            }
            "surveillance.anomaly_threshold" => next.surveillance.anomaly_threshold = value,
            "surveillance.stale_timeout_minutes" => {
                next.surveillance.stale_timeout_minutes = whole(name, value)? as i64;
            }
            "surveillance.correlation_min_agents" => {
                next.surveillance.correlation_min_agents = whole(name, value)? as usize;
            }
            "lifecycle.max_agents_per_tenant" => {
                next.lifecycle.max_agents_per_tenant = whole(name, value)? as usize;
            }
            "lifecycle.degraded_error_rate" => {
                next.lifecycle.degraded_error_rate = fraction(name, value)?;
            }
            "lifecycle.degraded_latency_ms" => next.lifecycle.degraded_latency_ms = value,
            "orchestrator.queue_capacity" => {
                next.orchestrator.queue_capacity = whole(name, value)? as usize;
            }
            "orchestrator.rebalance_variance_threshold" => {
                next.orchestrator.rebalance_variance_threshold = value;
            }
            "audit.surprise_probability" => next.audit.surprise_probability = value,
            "audit.regular_interval_days" => {
                next.audit.regular_interval_days = whole(name, value)? as i64;
            }
            "audit.compliance_interval_days" => {
                next.audit.compliance_interval_days = whole(name, value)? as i64;
            }
            "audit.security_interval_days" => {
                next.audit.security_interval_days = whole(name, value)? as i64;
            }
            "audit.performance_interval_days" => {
                next.audit.performance_interval_days = whole(name, value)? as i64;
            }
            "audit.behavioral_interval_days" => {
                next.audit.behavioral_interval_days = whole(name, value)? as i64;
            }
            other => {
                return Err(OverwatchError::Config(format!("unknown threshold '{other}'")));
            }
        }
        next.validate()?;
        *self = next;
        Ok(())
    }

    /// Apply `OVERWATCH_<SECTION>_<KEY>` variables, e.g.
    /// `OVERWATCH_REPORTING_WARN_THRESHOLD=4` or `OVERWATCH_REPORTING_INTERVAL=600`.
    ///
    /// Variables that do not name a known threshold are ignored. Returns the
    /// names that were applied.
    pub fn apply_env<I>(&mut self, vars: I) -> OverwatchResult<Vec<String>>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut applied = Vec::new();
        for (key, raw) in vars {
            let Some(rest) = key.strip_prefix("OVERWATCH_") else {
                continue;
            };
            let lowered = rest.to_lowercase();
            let Some(name) = lowered.split_once('_').map(|(s, k)| format!("{s}.{k}")) else {
                continue;
            };
            if !THRESHOLD_NAMES.contains(&name.as_str()) {
                continue;
            }
            let value: f64 = raw.trim().parse().map_err(|_| {
                OverwatchError::Config(format!("{key} is not a number: '{raw}'"))
            })?;
            self.set_threshold(&name, value)?;
            applied.push(name);
        }
        Ok(applied)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_values() {
        let config = OverwatchConfig::default();
        assert_eq!(config.reporting.interval_secs, 300);
        assert_eq!(config.reporting.warn_threshold, 3);
        assert_eq!(config.reporting.suspend_threshold, 5);
        assert_eq!(config.reporting.noncompliant_threshold, 10);
        assert!((config.surveillance.anomaly_threshold - 0.7).abs() < f64::EPSILON);
        assert_eq!(config.surveillance.stale_timeout_minutes, 10);
        assert!((config.audit.surprise_probability - 0.2).abs() < f64::EPSILON);
        assert_eq!(config.audit.regular_interval_days, 30);
        assert_eq!(config.audit.compliance_interval_days, 90);
        assert_eq!(config.audit.security_interval_days, 60);
        assert_eq!(config.audit.performance_interval_days, 45);
        assert_eq!(config.audit.behavioral_interval_days, 30);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_toml_partial() {
        let config = OverwatchConfig::from_toml(
            r#"
            [reporting]
            interval_secs = 60

            [server]
            port = 9000
            admin_keys = ["root"]
            "#,
        )
        .unwrap();
        assert_eq!(config.reporting.interval_secs, 60);
        assert_eq!(config.reporting.warn_threshold, 3);
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.admin_keys, vec!["root".to_string()]);
    }

    #[test]
    fn test_from_toml_rejects_inverted_ladder() {
        let err = OverwatchConfig::from_toml(
            r#"
            [reporting]
            warn_threshold = 6
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, OverwatchError::Config(_)));
    }

    #[test]
    fn test_set_threshold() {
        let mut config = OverwatchConfig::default();
        config.set_threshold("surveillance.anomaly_threshold", 0.9).unwrap();
        assert!((config.surveillance.anomaly_threshold - 0.9).abs() < f64::EPSILON);

        assert!(config.set_threshold("surveillance.anomaly_threshold", 1.5).is_err());
        assert!(config.set_threshold("reporting.warn_threshold", 2.5).is_err());
        assert!(config.set_threshold("nope", 1.0).is_err());

        // Would invert the ladder; rejected and nothing changes.
        assert!(config.set_threshold("reporting.suspend_threshold", 2.0).is_err());
        assert_eq!(config.reporting.suspend_threshold, 5);
    }

    #[test]
    fn test_apply_env() {
        let mut config = OverwatchConfig::default();
        let applied = config
            .apply_env(vec![
                ("OVERWATCH_REPORTING_INTERVAL".to_string(), "600".to_string()),
                ("OVERWATCH_SURVEILLANCE_ANOMALY_THRESHOLD".to_string(), "0.8".to_string()),
                ("OVERWATCH_UNKNOWN_THING".to_string(), "1".to_string()),
                ("PATH".to_string(), "/usr/bin".to_string()),
            ])
            .unwrap();
        assert_eq!(applied.len(), 2);
        assert_eq!(config.reporting.interval_secs, 600);
        assert!((config.surveillance.anomaly_threshold - 0.8).abs() < f64::EPSILON);

        let err = config.apply_env(vec![(
            "OVERWATCH_REPORTING_WARN_THRESHOLD".to_string(),
            "three".to_string(),
        )]);
        assert!(err.is_err());
    }
}
