//! Supervisor configuration.
//!
//! All knobs are fixed at construction; only the autoscaling `enabled`
//! flag can change while the supervisor runs. The daemon can load a TOML
//! file and override individual fields from the command line.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use flexpool_autoscale::{AutoScaleConfig, ConfigError};
use flexpool_balance::Strategy;

/// Constructor-time options for a supervisor.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Host core count; sizes the initial worker complement.
    pub cpu_limit: u32,
    pub strategy: Strategy,
    pub autoscale: AutoScaleConfig,
    /// Worker-side heartbeat period.
    pub heartbeat_interval: Duration,
    /// Metrics aggregation period (independent of the scaling check).
    pub aggregate_interval: Duration,
    /// Window a worker gets to exit voluntarily before a forced kill.
    pub grace_period: Duration,
    /// Delay before a crashed worker's replacement is spawned.
    pub restart_delay: Duration,
    /// Explicit startup pool size; defaults to `cpu_limit` clamped into
    /// the autoscaling bounds.
    pub initial_workers: Option<u32>,
    /// Default log filter, consumed by the daemon.
    pub log_level: String,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            cpu_limit: host_cores(),
            strategy: Strategy::default(),
            autoscale: AutoScaleConfig::default(),
            heartbeat_interval: Duration::from_secs(10),
            aggregate_interval: Duration::from_secs(60),
            grace_period: Duration::from_secs(10),
            restart_delay: Duration::from_secs(1),
            initial_workers: None,
            log_level: "info".to_string(),
        }
    }
}

impl SupervisorConfig {
    /// Reject configurations the control loop cannot honor.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.autoscale.validate()
    }

    /// Number of workers spawned at startup.
    pub fn initial_complement(&self) -> u32 {
        match self.initial_workers {
            Some(n) => n.min(self.autoscale.max_workers),
            None => self
                .cpu_limit
                .clamp(self.autoscale.min_workers, self.autoscale.max_workers),
        }
    }

    /// Load a config file, filling unset fields from the defaults.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let file: FileConfig = toml::from_str(&content)?;
        file.into_config()
    }
}

/// On-disk shape of the config file; every field is optional.
#[derive(Debug, Deserialize)]
struct FileConfig {
    cpu_limit: Option<u32>,
    strategy: Option<String>,
    min_workers: Option<u32>,
    max_workers: Option<u32>,
    scale_up_threshold: Option<f64>,
    scale_down_threshold: Option<f64>,
    scale_check_interval_secs: Option<u64>,
    autoscaling: Option<bool>,
    heartbeat_interval_secs: Option<u64>,
    aggregate_interval_secs: Option<u64>,
    grace_period_secs: Option<u64>,
    restart_delay_ms: Option<u64>,
    initial_workers: Option<u32>,
    log_level: Option<String>,
}

impl FileConfig {
    fn into_config(self) -> anyhow::Result<SupervisorConfig> {
        let mut config = SupervisorConfig::default();

        if let Some(limit) = self.cpu_limit {
            config.cpu_limit = limit;
        }
        if let Some(strategy) = self.strategy {
            config.strategy = strategy.parse()?;
        }
        if let Some(min) = self.min_workers {
            config.autoscale.min_workers = min;
        }
        if let Some(max) = self.max_workers {
            config.autoscale.max_workers = max;
        }
        if let Some(up) = self.scale_up_threshold {
            config.autoscale.scale_up_threshold = up;
        }
        if let Some(down) = self.scale_down_threshold {
            config.autoscale.scale_down_threshold = down;
        }
        if let Some(secs) = self.scale_check_interval_secs {
            config.autoscale.check_interval = Duration::from_secs(secs);
        }
        if let Some(enabled) = self.autoscaling {
            config.autoscale.enabled = enabled;
        }
        if let Some(secs) = self.heartbeat_interval_secs {
            config.heartbeat_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = self.aggregate_interval_secs {
            config.aggregate_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = self.grace_period_secs {
            config.grace_period = Duration::from_secs(secs);
        }
        if let Some(ms) = self.restart_delay_ms {
            config.restart_delay = Duration::from_millis(ms);
        }
        if self.initial_workers.is_some() {
            config.initial_workers = self.initial_workers;
        }
        if let Some(level) = self.log_level {
            config.log_level = level;
        }

        Ok(config)
    }
}

fn host_cores() -> u32 {
    std::thread::available_parallelism()
        .map(|n| n.get() as u32)
        .unwrap_or(1)
}
