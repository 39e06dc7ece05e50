//! flexpool-balance — work distribution across the running worker set.
//!
//! The balancer is a small owned struct, mutated only from the supervisor
//! task. It tracks one load counter per live worker; the counter is bumped
//! on every selection and every completed request, and zeroed by the
//! metrics aggregator at the end of each window. "Load" therefore means
//! work accrued since the last aggregation, not lifetime work.
//!
//! # Strategies
//!
//! - `round-robin`: rotating cursor, re-wrapped against the running set on
//!   every call so membership changes cost at most one rotation.
//! - `least-connections`: smallest current load counter, first-encountered
//!   tie break.
//! - `random`: uniform choice over the running set.

pub mod balancer;

pub use balancer::{LoadBalancer, Strategy, StrategyParseError};
