//! flexpool-autoscale — threshold-driven pool sizing.
//!
//! The policy is a pure function from (config, pool-wide averages, running
//! count) to a scaling action; the supervisor's control loop applies the
//! action on its own timer.
//!
//! # Scaling Algorithm
//!
//! ```text
//! if running == 0 and min_workers > 0:
//!     RestoreFloor(min_workers)           // cold pool, skip other checks
//!
//! if avg_cpu OR avg_memory OR avg_load > scale_up_threshold:
//!     step = ceil(running * 0.2)
//!     Grow(min(max_workers - running, step))   // AtCapacity if no headroom
//!
//! if avg_cpu AND avg_memory AND avg_load < scale_down_threshold
//!    and running > min_workers:
//!     Shrink(1)
//! ```
//!
//! Scale-up triggers on *any* hot resource, scale-down requires *all*
//! resources cold: capacity errs toward availability, shrinking errs
//! toward stability.

pub mod policy;

pub use policy::{AutoScaleConfig, ConfigError, PoolAverages, ScaleAction, plan};
