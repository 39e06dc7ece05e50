//! Record types for the flexpool store.
//!
//! These are the shapes the orchestrator persists: worker rows, request
//! log entries, and cluster events. All types are serializable to/from
//! JSON for storage in redb tables.

use serde::{Deserialize, Serialize};

/// Opaque worker identifier, unique for the pool's lifetime.
pub type WorkerId = String;

// ── Workers ───────────────────────────────────────────────────────

/// Lifecycle status of a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    Starting,
    Running,
    Stopping,
    Stopped,
    Failed,
}

/// One row per live or recently-live worker.
///
/// Created `Starting` at spawn, flipped to `Running` by the first
/// heartbeat. Rows outlive the worker: after exit the row stays in the
/// store with its final status for audit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkerRecord {
    pub id: WorkerId,
    /// Identifier of the underlying unit of execution.
    pub pid: u32,
    pub status: WorkerStatus,
    /// Most recently reported CPU utilization (percent).
    pub cpu_usage: f64,
    /// Most recently reported memory usage (MB).
    pub memory_usage: f64,
    /// Unix timestamp (seconds) when this worker was spawned.
    pub started_at: u64,
    /// Unix timestamp (seconds) of the most recent heartbeat.
    pub last_heartbeat: u64,
    /// Monotonically increasing request counter.
    pub total_requests: u64,
    /// Monotonically increasing error counter.
    pub error_count: u64,
    /// Derived quality figure, refreshed every aggregation window.
    pub performance_score: f64,
}

impl WorkerRecord {
    /// Fresh record for a worker spawned at `now` (epoch seconds).
    pub fn new(id: impl Into<WorkerId>, pid: u32, now: u64) -> Self {
        Self {
            id: id.into(),
            pid,
            status: WorkerStatus::Starting,
            cpu_usage: 0.0,
            memory_usage: 0.0,
            started_at: now,
            last_heartbeat: 0,
            total_requests: 0,
            error_count: 0,
            performance_score: 100.0,
        }
    }

    /// Whether this worker counts toward the running set.
    pub fn is_running(&self) -> bool {
        self.status == WorkerStatus::Running
    }
}

// ── Request log ───────────────────────────────────────────────────

/// One row per completed unit of work, reported by the worker.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RequestLog {
    pub worker_id: WorkerId,
    /// Unix timestamp (milliseconds) of completion.
    pub timestamp: u64,
    pub response_time_ms: u64,
    pub success: bool,
    pub endpoint: String,
    pub http_method: String,
}

// ── Cluster events ────────────────────────────────────────────────

/// Severity of a cluster event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventSeverity {
    Info,
    Warning,
    Error,
}

/// Journal entry for a lifecycle or scaling transition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClusterEvent {
    /// Unix timestamp (milliseconds).
    pub timestamp: u64,
    /// Short machine-readable tag, e.g. `worker_spawned`, `scale_up`.
    pub event_type: String,
    pub severity: EventSeverity,
    pub description: String,
    pub worker_id: Option<WorkerId>,
    /// Free-form structured context.
    pub details: Option<serde_json::Value>,
}

impl RequestLog {
    /// Build the composite key for the request log table.
    pub fn table_key(&self, seq: u64) -> String {
        format!("{}:{:013}:{seq:08}", self.worker_id, self.timestamp)
    }
}

impl ClusterEvent {
    /// Build the composite key for the events table.
    pub fn table_key(&self, seq: u64) -> String {
        format!("{:013}:{seq:08}", self.timestamp)
    }
}
