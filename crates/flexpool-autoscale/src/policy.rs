//! Scaling policy evaluation.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Auto-scaling parameters, fixed at construction.
///
/// Only `enabled` may change afterwards; the supervisor flips it when
/// auto-scaling is toggled or shutdown begins.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AutoScaleConfig {
    /// Floor for the running pool (must be > 0 to enable cold restore).
    pub min_workers: u32,
    /// Hard cap on the pool.
    pub max_workers: u32,
    /// Percentage above which any single average triggers growth.
    pub scale_up_threshold: f64,
    /// Percentage below which all averages must fall to allow shrinking.
    pub scale_down_threshold: f64,
    /// Period of the control loop.
    #[serde(with = "secs")]
    pub check_interval: Duration,
    pub enabled: bool,
}

mod secs {
    use super::Duration;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(d)?))
    }
}

impl Default for AutoScaleConfig {
    fn default() -> Self {
        Self {
            min_workers: 2,
            max_workers: 8,
            scale_up_threshold: 80.0,
            scale_down_threshold: 30.0,
            check_interval: Duration::from_secs(30),
            enabled: true,
        }
    }
}

/// Errors raised by [`AutoScaleConfig::validate`].
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("worker bounds must satisfy 0 < min <= max (got min={min}, max={max})")]
    InvalidBounds { min: u32, max: u32 },

    #[error("scale-down threshold {down} must be below scale-up threshold {up}")]
    InvalidThresholds { up: f64, down: f64 },
}

impl AutoScaleConfig {
    /// Reject configurations that would make the control loop misbehave.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.min_workers == 0 || self.min_workers > self.max_workers {
            return Err(ConfigError::InvalidBounds {
                min: self.min_workers,
                max: self.max_workers,
            });
        }
        if self.scale_down_threshold >= self.scale_up_threshold {
            return Err(ConfigError::InvalidThresholds {
                up: self.scale_up_threshold,
                down: self.scale_down_threshold,
            });
        }
        Ok(())
    }
}

/// Pool-wide averages over the running set, as computed by the metrics
/// aggregator. All zero when nothing is running.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PoolAverages {
    /// Average CPU utilization (percent).
    pub cpu_pct: f64,
    /// Average memory usage (MB, compared against the thresholds as-is).
    pub memory_mb: f64,
    /// Average per-worker load accrued this window.
    pub load: f64,
}

impl PoolAverages {
    fn any_above(&self, threshold: f64) -> bool {
        self.cpu_pct > threshold || self.memory_mb > threshold || self.load > threshold
    }

    fn all_below(&self, threshold: f64) -> bool {
        self.cpu_pct < threshold && self.memory_mb < threshold && self.load < threshold
    }
}

/// One control-loop decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScaleAction {
    /// Pool is empty: bring it back to the floor immediately.
    RestoreFloor(u32),
    /// Spawn this many additional workers.
    Grow(u32),
    /// Terminate this many workers (always one per cycle).
    Shrink(u32),
    /// Hot but already at `max_workers`; warn only.
    AtCapacity,
    /// No action this cycle.
    Hold,
}

/// Evaluate one control-loop cycle.
///
/// `running` is the current running-worker count. The caller is expected
/// to have checked `config.enabled`.
pub fn plan(config: &AutoScaleConfig, averages: &PoolAverages, running: u32) -> ScaleAction {
    // An empty pool short-circuits every other check.
    if running == 0 && config.min_workers > 0 {
        return ScaleAction::RestoreFloor(config.min_workers);
    }

    if averages.any_above(config.scale_up_threshold) {
        if running >= config.max_workers {
            return ScaleAction::AtCapacity;
        }
        // Grow by 20% of the current pool, at least within the cap.
        let step = ((running as f64) * 0.2).ceil() as u32;
        let count = step.min(config.max_workers - running);
        if count == 0 {
            return ScaleAction::Hold;
        }
        debug!(running, count, "pool hot, growing");
        return ScaleAction::Grow(count);
    }

    if averages.all_below(config.scale_down_threshold) && running > config.min_workers {
        debug!(running, "pool cold, shrinking by one");
        return ScaleAction::Shrink(1);
    }

    ScaleAction::Hold
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(min: u32, max: u32) -> AutoScaleConfig {
        AutoScaleConfig {
            min_workers: min,
            max_workers: max,
            scale_up_threshold: 80.0,
            scale_down_threshold: 30.0,
            check_interval: Duration::from_secs(30),
            enabled: true,
        }
    }

    fn averages(cpu: f64, memory: f64, load: f64) -> PoolAverages {
        PoolAverages {
            cpu_pct: cpu,
            memory_mb: memory,
            load,
        }
    }

    // ── Validation ─────────────────────────────────────────────────

    #[test]
    fn validate_accepts_defaults() {
        assert!(AutoScaleConfig::default().validate().is_ok());
    }

    #[test]
    fn validate_rejects_zero_min() {
        let cfg = config(0, 4);
        assert_eq!(
            cfg.validate(),
            Err(ConfigError::InvalidBounds { min: 0, max: 4 })
        );
    }

    #[test]
    fn validate_rejects_min_above_max() {
        let cfg = config(5, 4);
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::InvalidBounds { .. })
        ));
    }

    #[test]
    fn validate_rejects_inverted_thresholds() {
        let mut cfg = config(1, 4);
        cfg.scale_down_threshold = 90.0;
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::InvalidThresholds { .. })
        ));
    }

    // ── Cold restore ───────────────────────────────────────────────

    #[test]
    fn empty_pool_restores_floor() {
        // minWorkers=2, maxWorkers=6, zero running → exactly 2 spawns.
        let cfg = config(2, 6);
        let action = plan(&cfg, &averages(0.0, 0.0, 0.0), 0);
        assert_eq!(action, ScaleAction::RestoreFloor(2));
    }

    #[test]
    fn empty_pool_restore_skips_other_checks() {
        // Even with hot averages the cold path wins.
        let cfg = config(2, 6);
        let action = plan(&cfg, &averages(95.0, 95.0, 95.0), 0);
        assert_eq!(action, ScaleAction::RestoreFloor(2));
    }

    // ── Scale up ───────────────────────────────────────────────────

    #[test]
    fn hot_cpu_grows_twenty_percent() {
        // 5 running, avg CPU 85 > 80 → ceil(5 * 0.2) = 1, pool becomes 6.
        let cfg = config(2, 6);
        let action = plan(&cfg, &averages(85.0, 10.0, 1.0), 5);
        assert_eq!(action, ScaleAction::Grow(1));
    }

    #[test]
    fn any_single_hot_resource_triggers_growth() {
        let cfg = config(2, 10);
        assert_eq!(plan(&cfg, &averages(85.0, 10.0, 1.0), 5), ScaleAction::Grow(1));
        assert_eq!(plan(&cfg, &averages(10.0, 85.0, 1.0), 5), ScaleAction::Grow(1));
        assert_eq!(plan(&cfg, &averages(10.0, 10.0, 85.0), 5), ScaleAction::Grow(1));
    }

    #[test]
    fn growth_is_clamped_to_cap() {
        // 9 running, max 10: step would be ceil(1.8) = 2, clamped to 1.
        let cfg = config(2, 10);
        let action = plan(&cfg, &averages(95.0, 10.0, 1.0), 9);
        assert_eq!(action, ScaleAction::Grow(1));
    }

    #[test]
    fn hot_at_capacity_only_warns() {
        let cfg = config(2, 6);
        let action = plan(&cfg, &averages(95.0, 10.0, 1.0), 6);
        assert_eq!(action, ScaleAction::AtCapacity);
    }

    #[test]
    fn repeated_hot_cycles_never_exceed_cap() {
        let cfg = config(2, 6);
        let mut running = 2u32;
        for _ in 0..20 {
            match plan(&cfg, &averages(99.0, 99.0, 99.0), running) {
                ScaleAction::Grow(n) => running += n,
                ScaleAction::AtCapacity => {}
                other => panic!("unexpected action {other:?}"),
            }
            assert!(running <= cfg.max_workers);
        }
        assert_eq!(running, 6);
    }

    // ── Scale down ─────────────────────────────────────────────────

    #[test]
    fn all_cold_shrinks_by_one() {
        let cfg = config(2, 6);
        let action = plan(&cfg, &averages(5.0, 5.0, 0.0), 4);
        assert_eq!(action, ScaleAction::Shrink(1));
    }

    #[test]
    fn one_warm_resource_blocks_shrinking() {
        // Scale-down needs all three below the threshold.
        let cfg = config(2, 6);
        assert_eq!(plan(&cfg, &averages(50.0, 5.0, 0.0), 4), ScaleAction::Hold);
        assert_eq!(plan(&cfg, &averages(5.0, 50.0, 0.0), 4), ScaleAction::Hold);
        assert_eq!(plan(&cfg, &averages(5.0, 5.0, 50.0), 4), ScaleAction::Hold);
    }

    #[test]
    fn repeated_cold_cycles_never_undershoot_floor() {
        let cfg = config(2, 6);
        let mut running = 6u32;
        for _ in 0..20 {
            match plan(&cfg, &averages(1.0, 1.0, 0.0), running) {
                ScaleAction::Shrink(n) => running -= n,
                ScaleAction::Hold => {}
                other => panic!("unexpected action {other:?}"),
            }
            assert!(running >= cfg.min_workers);
        }
        assert_eq!(running, 2);
    }

    #[test]
    fn cold_at_floor_holds() {
        let cfg = config(2, 6);
        let action = plan(&cfg, &averages(1.0, 1.0, 0.0), 2);
        assert_eq!(action, ScaleAction::Hold);
    }

    // ── Hold ───────────────────────────────────────────────────────

    #[test]
    fn midrange_averages_hold() {
        let cfg = config(2, 6);
        let action = plan(&cfg, &averages(50.0, 50.0, 50.0), 4);
        assert_eq!(action, ScaleAction::Hold);
    }

    #[test]
    fn config_round_trips_through_serde() {
        let cfg = AutoScaleConfig::default();
        let json = serde_json::to_string(&cfg).unwrap();
        let back: AutoScaleConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, cfg);
    }
}
