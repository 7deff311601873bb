use eyre::WrapErr;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::path::Path;
use std::time::Duration;

use crate::cli::RunArgs;
use crate::events::EventBusConfig;
use crate::task_manager::{RetryPolicy, SchedulerConfig, ShutdownConfig};

/// Application configuration, loaded from an optional YAML file and overridden from
/// the command line. Durations are written in milliseconds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub scheduler: SchedulerSettings,
    pub event_bus: EventBusSettings,
    pub workload: WorkloadSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerSettings {
    pub workers: usize,
    pub max_queue_size: usize,
    pub poll_interval_ms: u64,
    pub history_size: usize,
    pub default_retries: u32,
    pub default_retry_delay_ms: u64,
    pub backoff_multiplier: f64,
    pub max_retry_delay_ms: u64,
    pub jitter_factor: f64,
    pub default_timeout_ms: Option<u64>,
    pub graceful_shutdown_ms: u64,
    pub force_shutdown_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventBusSettings {
    pub history_size: usize,
    pub dispatch_pool_size: usize,
    pub handler_timeout_ms: u64,
    pub drain_timeout_ms: u64,
}

/// Parameters of the simulated import, analysis and export pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkloadSettings {
    /// Number of CSV files to import
    pub imports: usize,
    /// Probability that a single attempt of any stage fails
    pub fail_rate: f64,
    /// Retries granted to every stage
    pub retries: u32,
    pub retry_delay_ms: u64,
    /// Per-attempt timeout of every stage
    pub stage_timeout_ms: u64,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        let defaults = SchedulerConfig::default();
        Self {
            workers: defaults.workers,
            max_queue_size: defaults.max_queue_size,
            poll_interval_ms: defaults.poll_interval.as_millis() as u64,
            history_size: defaults.history_size,
            default_retries: defaults.default_retry_policy.retries,
            default_retry_delay_ms: defaults.default_retry_policy.retry_delay.as_millis() as u64,
            backoff_multiplier: defaults.default_retry_policy.backoff_multiplier,
            max_retry_delay_ms: defaults.default_retry_policy.max_delay.as_millis() as u64,
            jitter_factor: defaults.default_retry_policy.jitter_factor,
            default_timeout_ms: None,
            graceful_shutdown_ms: defaults.shutdown_config.graceful_timeout.as_millis() as u64,
            force_shutdown_ms: defaults.shutdown_config.force_timeout.as_millis() as u64,
        }
    }
}

impl Default for EventBusSettings {
    fn default() -> Self {
        let defaults = EventBusConfig::default();
        Self {
            history_size: defaults.history_size,
            dispatch_pool_size: defaults.dispatch_pool_size,
            handler_timeout_ms: defaults.handler_timeout.as_millis() as u64,
            drain_timeout_ms: defaults.drain_timeout.as_millis() as u64,
        }
    }
}

impl Default for WorkloadSettings {
    fn default() -> Self {
        Self {
            imports: 5,
            fail_rate: 0.1,
            retries: 2,
            retry_delay_ms: 50,
            stage_timeout_ms: 2_000,
        }
    }
}

impl AppConfig {
    /// Load from `path` when given, otherwise start from defaults
    pub fn load(path: Option<&Path>) -> eyre::Result<Self> {
        match path {
            Some(path) => read_config(path),
            None => Ok(Self::default()),
        }
    }

    /// Apply command line overrides of the `run` subcommand
    pub fn apply_run_args(&mut self, args: &RunArgs) {
        if let Some(workers) = args.workers {
            self.scheduler.workers = workers;
        }
        if let Some(max_queue_size) = args.max_queue_size {
            self.scheduler.max_queue_size = max_queue_size;
        }
        if let Some(imports) = args.imports {
            self.workload.imports = imports;
        }
        if let Some(fail_rate) = args.fail_rate {
            self.workload.fail_rate = fail_rate;
        }
    }

    pub fn validate(&self) -> eyre::Result<()> {
        eyre::ensure!(self.scheduler.workers > 0, "scheduler.workers must be at least 1");
        eyre::ensure!(
            self.scheduler.max_queue_size > 0,
            "scheduler.max_queue_size must be at least 1"
        );
        eyre::ensure!(
            (0.0..=1.0).contains(&self.scheduler.jitter_factor),
            "scheduler.jitter_factor must be within 0.0..=1.0"
        );
        eyre::ensure!(
            self.scheduler.max_retry_delay_ms >= self.scheduler.default_retry_delay_ms,
            "scheduler.max_retry_delay_ms ({}) must not be below scheduler.default_retry_delay_ms ({})",
            self.scheduler.max_retry_delay_ms,
            self.scheduler.default_retry_delay_ms
        );
        eyre::ensure!(
            self.event_bus.dispatch_pool_size > 0,
            "event_bus.dispatch_pool_size must be at least 1"
        );
        eyre::ensure!(
            (0.0..=1.0).contains(&self.workload.fail_rate),
            "workload.fail_rate must be within 0.0..=1.0, got {}",
            self.workload.fail_rate
        );
        Ok(())
    }

    /// Create SchedulerConfig from the current AppConfig
    pub fn scheduler_config(&self) -> SchedulerConfig {
        let settings = &self.scheduler;
        SchedulerConfig {
            workers: settings.workers,
            max_queue_size: settings.max_queue_size,
            poll_interval: Duration::from_millis(settings.poll_interval_ms),
            history_size: settings.history_size,
            default_retry_policy: RetryPolicy {
                retries: settings.default_retries,
                retry_delay: Duration::from_millis(settings.default_retry_delay_ms),
                backoff_multiplier: settings.backoff_multiplier,
                max_delay: Duration::from_millis(settings.max_retry_delay_ms),
                jitter_factor: settings.jitter_factor,
            },
            default_timeout: settings.default_timeout_ms.map(Duration::from_millis),
            shutdown_config: ShutdownConfig {
                graceful_timeout: Duration::from_millis(settings.graceful_shutdown_ms),
                force_timeout: Duration::from_millis(settings.force_shutdown_ms),
            },
        }
    }

    pub fn event_bus_config(&self) -> EventBusConfig {
        let settings = &self.event_bus;
        EventBusConfig {
            history_size: settings.history_size,
            dispatch_pool_size: settings.dispatch_pool_size,
            handler_timeout: Duration::from_millis(settings.handler_timeout_ms),
            drain_timeout: Duration::from_millis(settings.drain_timeout_ms),
        }
    }
}

/// Read configuration from a YAML file
pub fn read_config(path: &Path) -> eyre::Result<AppConfig> {
    let file = File::open(path)
        .wrap_err_with(|| format!("Failed to open config file {}", path.display()))?;
    serde_yaml::from_reader(file)
        .wrap_err_with(|| format!("Failed to parse config file {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_app_config_default() {
        let config = AppConfig::default();
        assert_eq!(config.scheduler.workers, 4);
        assert_eq!(config.scheduler.max_queue_size, 1000);
        assert_eq!(config.workload.imports, 5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "scheduler:\n  workers: 2\n  default_timeout_ms: 750\nworkload:\n  fail_rate: 0.5"
        )
        .unwrap();

        let config = AppConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.scheduler.workers, 2);
        assert_eq!(config.scheduler.max_queue_size, 1000);
        assert_eq!(config.workload.fail_rate, 0.5);
        assert_eq!(config.workload.imports, 5);
        assert_eq!(config.event_bus, EventBusSettings::default());

        let scheduler = config.scheduler_config();
        assert_eq!(scheduler.workers, 2);
        assert_eq!(scheduler.default_timeout, Some(Duration::from_millis(750)));
    }

    #[test]
    fn test_read_config_file_not_found() {
        let result = AppConfig::load(Some(Path::new("nonexistent.yaml")));
        assert!(result.is_err());
    }

    #[test]
    fn test_invalid_yaml_is_reported() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "scheduler: [not, a, map]").unwrap();

        let error = AppConfig::load(Some(file.path())).unwrap_err();
        assert!(format!("{error:#}").contains("Failed to parse config file"));
    }

    #[test]
    fn test_run_args_override_file() {
        let mut config = AppConfig::default();
        let args = RunArgs {
            config: None,
            workers: Some(8),
            max_queue_size: Some(16),
            imports: None,
            fail_rate: Some(0.0),
        };

        config.apply_run_args(&args);
        assert_eq!(config.scheduler.workers, 8);
        assert_eq!(config.scheduler.max_queue_size, 16);
        assert_eq!(config.workload.imports, 5);
        assert_eq!(config.workload.fail_rate, 0.0);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = AppConfig::default();
        config.workload.fail_rate = 1.5;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.scheduler.workers = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.scheduler.default_retry_delay_ms = 120_000;
        let error = config.validate().unwrap_err();
        assert!(error.to_string().contains("max_retry_delay_ms"));
    }

    #[test]
    fn test_yaml_round_trip_of_effective_config() {
        let config = AppConfig::default();
        let yaml = serde_yaml::to_string(&config).unwrap();
        let parsed: AppConfig = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed, config);

        let bus = parsed.event_bus_config();
        assert_eq!(bus.handler_timeout, Duration::from_secs(5));
    }
}
