//! Worker actors.
//!
//! Each worker is an isolated tokio task that processes dispatched jobs
//! serially and pushes telemetry to the supervisor over the shared event
//! channel. A companion monitor task awaits the worker's `JoinHandle` and
//! posts the exit event, so the supervisor observes exits the same way a
//! parent process reaps children.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tokio::time::{Instant, interval_at, sleep};
use tracing::{debug, warn};

use flexpool_state::WorkerId;

use crate::messages::{Event, WorkerCommand, WorkerReport};

/// Exit code reported when a worker is forcefully killed.
pub(crate) const KILL_EXIT_CODE: i32 = 137;

/// Exit code reported when a worker task panics.
pub(crate) const PANIC_EXIT_CODE: i32 = 101;

/// Tunables for a worker actor.
#[derive(Debug, Clone)]
pub struct WorkerOptions {
    /// Heartbeat emission period.
    pub heartbeat_interval: Duration,
    /// Baseline resident memory reported in heartbeats (MB).
    pub base_memory_mb: f64,
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(10),
            base_memory_mb: 64.0,
        }
    }
}

/// Supervisor-side handle to one worker actor.
#[derive(Debug)]
pub(crate) struct WorkerHandle {
    pub id: WorkerId,
    pub pid: u32,
    cmd_tx: mpsc::Sender<WorkerCommand>,
    abort: AbortHandle,
}

impl WorkerHandle {
    /// Fire-and-forget send; the supervisor never blocks on a worker.
    pub fn send(&self, command: WorkerCommand) -> bool {
        match self.cmd_tx.try_send(command) {
            Ok(()) => true,
            Err(e) => {
                warn!(worker_id = %self.id, error = %e, "worker mailbox rejected command");
                false
            }
        }
    }

    /// Unconditional kill. The monitor reports the exit as
    /// [`KILL_EXIT_CODE`].
    pub fn kill(&self) {
        self.abort.abort();
    }
}

/// Allocate a virtual pid. Workers are in-process actors, so this stands
/// in for the OS process identifier the worker row carries.
fn next_pid() -> u32 {
    static NEXT: AtomicU32 = AtomicU32::new(1000);
    NEXT.fetch_add(1, Ordering::Relaxed)
}

/// Spawn a worker actor plus the monitor task that reports its exit.
pub(crate) fn spawn_worker(
    id: &str,
    options: WorkerOptions,
    events_tx: mpsc::Sender<Event>,
) -> WorkerHandle {
    let (cmd_tx, cmd_rx) = mpsc::channel(64);
    let pid = next_pid();

    let task = tokio::spawn(run_worker(id.to_string(), options, cmd_rx, events_tx.clone()));
    let abort = task.abort_handle();

    let worker_id = id.to_string();
    tokio::spawn(async move {
        let code = match task.await {
            Ok(code) => code,
            Err(e) if e.is_cancelled() => KILL_EXIT_CODE,
            Err(e) => {
                warn!(worker_id = %worker_id, error = %e, "worker task panicked");
                PANIC_EXIT_CODE
            }
        };
        let _ = events_tx.send(Event::Exited { worker_id, code }).await;
    });

    WorkerHandle {
        id: id.to_string(),
        pid,
        cmd_tx,
        abort,
    }
}

/// The worker's serial event loop. Returns the exit code.
async fn run_worker(
    id: WorkerId,
    options: WorkerOptions,
    mut cmd_rx: mpsc::Receiver<WorkerCommand>,
    reports: mpsc::Sender<Event>,
) -> i32 {
    let started = Instant::now();
    let interval_ms = options.heartbeat_interval.as_millis().max(1) as u64;
    // First beat lands one full interval after spawn; the supervisor keeps
    // the record in `starting` until then.
    let mut beat = interval_at(
        Instant::now() + options.heartbeat_interval,
        options.heartbeat_interval,
    );
    // Milliseconds spent handling jobs since the last beat; the ratio to
    // the interval is the reported CPU figure.
    let mut busy_ms: u64 = 0;
    let mut handled: u64 = 0;

    debug!(worker_id = %id, "worker started");

    loop {
        tokio::select! {
            _ = beat.tick() => {
                let report = WorkerReport::Heartbeat {
                    cpu_usage: (busy_ms as f64 / interval_ms as f64 * 100.0).min(100.0),
                    memory_usage: options.base_memory_mb + handled as f64 * 0.01,
                    uptime_secs: started.elapsed().as_secs_f64(),
                    timestamp: epoch_secs(),
                };
                busy_ms = 0;
                if reports.send(Event::Report { worker_id: id.clone(), report }).await.is_err() {
                    // Supervisor is gone.
                    return 0;
                }
            }
            command = cmd_rx.recv() => match command {
                Some(WorkerCommand::Dispatch(job)) => {
                    let begun = Instant::now();
                    if job.work_ms > 0 {
                        sleep(Duration::from_millis(job.work_ms)).await;
                    }
                    let elapsed = begun.elapsed();
                    busy_ms += elapsed.as_millis() as u64;
                    handled += 1;

                    if job.fail {
                        let errored = WorkerReport::Errored {
                            message: format!("handler failed for {} {}", job.method, job.endpoint),
                        };
                        if reports.send(Event::Report { worker_id: id.clone(), report: errored }).await.is_err() {
                            return 0;
                        }
                    }

                    let completed = WorkerReport::RequestCompleted {
                        response_time_ms: elapsed.as_millis() as u64,
                        success: !job.fail,
                        endpoint: job.endpoint,
                        method: job.method,
                    };
                    if reports.send(Event::Report { worker_id: id.clone(), report: completed }).await.is_err() {
                        return 0;
                    }
                }
                Some(WorkerCommand::GracefulShutdown) => {
                    debug!(worker_id = %id, "graceful shutdown received");
                    return 0;
                }
                Some(WorkerCommand::Exit { code }) => {
                    debug!(worker_id = %id, code, "exit requested");
                    return code;
                }
                // The supervisor dropped the handle.
                None => return 0,
            }
        }
    }
}

fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
