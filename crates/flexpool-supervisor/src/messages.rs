//! Message types exchanged between the supervisor and its workers.
//!
//! All sends are fire-and-forget: the supervisor never blocks on a
//! worker's response, and workers push telemetry without awaiting an
//! acknowledgement.

use serde::{Deserialize, Serialize};

use flexpool_state::WorkerId;

/// A unit of work routed to one worker.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Job {
    pub endpoint: String,
    pub method: String,
    /// Handler cost in milliseconds; zero completes immediately.
    #[serde(default)]
    pub work_ms: u64,
    /// Force the handler to fail, for failure drills.
    #[serde(default)]
    pub fail: bool,
}

impl Job {
    pub fn new(endpoint: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            method: method.into(),
            work_ms: 0,
            fail: false,
        }
    }

    pub fn with_work_ms(mut self, work_ms: u64) -> Self {
        self.work_ms = work_ms;
        self
    }

    pub fn failing(mut self) -> Self {
        self.fail = true;
        self
    }
}

/// Telemetry pushed from a worker to the supervisor.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerReport {
    /// Periodic status sample.
    Heartbeat {
        /// CPU utilization over the last heartbeat window (percent).
        cpu_usage: f64,
        /// Resident memory estimate (MB).
        memory_usage: f64,
        uptime_secs: f64,
        /// Unix timestamp (seconds) the sample was taken.
        timestamp: u64,
    },
    /// One unit of work finished.
    RequestCompleted {
        response_time_ms: u64,
        success: bool,
        endpoint: String,
        method: String,
    },
    /// Runtime error that did not take the worker down.
    Errored { message: String },
}

/// Commands sent from the supervisor to one worker.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerCommand {
    Dispatch(Job),
    /// The recipient must wind down and exit promptly; the supervisor
    /// escalates to a kill after the grace period.
    GracefulShutdown,
    /// Exit immediately with the given code (failure drills).
    Exit { code: i32 },
}

/// Everything that wakes the supervisor loop.
#[derive(Debug)]
pub(crate) enum Event {
    /// Telemetry from a worker.
    Report {
        worker_id: WorkerId,
        report: WorkerReport,
    },
    /// A worker task finished; posted by its monitor.
    Exited { worker_id: WorkerId, code: i32 },
    /// A terminated worker's grace window ran out.
    GraceExpired { worker_id: WorkerId },
    /// The delayed crash-replacement timer fired.
    ReplacementDue,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_builder_sets_fields() {
        let job = Job::new("/api/data", "GET").with_work_ms(25).failing();
        assert_eq!(job.endpoint, "/api/data");
        assert_eq!(job.method, "GET");
        assert_eq!(job.work_ms, 25);
        assert!(job.fail);
    }

    #[test]
    fn heartbeat_wire_shape() {
        let report = WorkerReport::Heartbeat {
            cpu_usage: 42.5,
            memory_usage: 128.0,
            uptime_secs: 3.5,
            timestamp: 1000,
        };
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["type"], "heartbeat");
        assert_eq!(json["cpu_usage"], 42.5);

        let back: WorkerReport = serde_json::from_value(json).unwrap();
        assert_eq!(back, report);
    }

    #[test]
    fn graceful_shutdown_wire_shape() {
        let json = serde_json::to_value(&WorkerCommand::GracefulShutdown).unwrap();
        assert_eq!(json["type"], "graceful_shutdown");
    }

    #[test]
    fn dispatch_defaults_fill_optional_fields() {
        let cmd: WorkerCommand = serde_json::from_str(
            r#"{"type": "dispatch", "endpoint": "/x", "method": "POST"}"#,
        )
        .unwrap();
        assert_eq!(cmd, WorkerCommand::Dispatch(Job::new("/x", "POST")));
    }
}
