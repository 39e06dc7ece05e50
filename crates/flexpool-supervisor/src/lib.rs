//! flexpool-supervisor — the worker pool control plane.
//!
//! The supervisor owns a bounded pool of worker actors, load-balances
//! dispatched work across them, ingests their telemetry, and resizes the
//! pool under a periodic control loop.
//!
//! # Architecture
//!
//! ```text
//! SupervisorHandle ──commands──▶ Supervisor (single event-loop task)
//!                                  ├── WorkerPool     (id → record + handle)
//!                                  ├── LoadBalancer   (per-window load map)
//!                                  ├── scaling policy (flexpool-autoscale)
//!                                  └── RecordStore    (flexpool-state)
//!                                        ▲
//!            worker actors ──reports─────┘ (heartbeats, completions, exits)
//! ```
//!
//! Workers are tokio tasks. Each one talks to the supervisor only through
//! channels: a shared mpsc carries worker reports and internal timer
//! events in, a per-worker mpsc carries commands out. Every state
//! mutation happens serially on the supervisor task, so the pool needs no
//! locks. Grace-period deadlines and delayed crash replacements are
//! one-shot sleeper tasks that post events back into the same inbox.

pub mod config;
pub mod error;
pub mod messages;
mod metrics;
mod pool;
mod supervisor;
mod worker;

pub use config::SupervisorConfig;
pub use error::{SupervisorError, SupervisorResult};
pub use messages::{Job, WorkerCommand, WorkerReport};
pub use supervisor::{ClusterSnapshot, Supervisor, SupervisorHandle};
pub use worker::WorkerOptions;
