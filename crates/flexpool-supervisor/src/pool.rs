//! Worker pool manager.
//!
//! Authoritative in-memory map from worker id to record + handle. The
//! pool spawns and terminates workers, reacts to exits and errors, and
//! persists every transition through the record store. Persistence is
//! best-effort: a failed write is logged and the in-memory transition
//! stands.

use std::collections::HashMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde_json::json;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use flexpool_balance::LoadBalancer;
use flexpool_state::{
    ClusterEvent, EventSeverity, RecordStore, WorkerId, WorkerRecord, WorkerStatus,
};

use crate::messages::{Event, WorkerCommand};
use crate::metrics::performance_score;
use crate::worker::{WorkerHandle, WorkerOptions, spawn_worker};

/// Pool-manager tunables, derived from `SupervisorConfig`.
#[derive(Debug, Clone)]
pub(crate) struct PoolSettings {
    pub max_workers: u32,
    pub grace_period: Duration,
    pub restart_delay: Duration,
    pub worker: WorkerOptions,
}

struct PoolEntry {
    record: WorkerRecord,
    handle: WorkerHandle,
}

/// The live worker set.
pub(crate) struct WorkerPool {
    entries: HashMap<WorkerId, PoolEntry>,
    /// Spawn order of live workers; keeps the running set stable for the
    /// round-robin cursor.
    order: Vec<WorkerId>,
    next_id: u64,
    settings: PoolSettings,
    store: RecordStore,
    events_tx: mpsc::Sender<Event>,
}

impl WorkerPool {
    pub fn new(settings: PoolSettings, store: RecordStore, events_tx: mpsc::Sender<Event>) -> Self {
        Self {
            entries: HashMap::new(),
            order: Vec::new(),
            next_id: 1,
            settings,
            store,
            events_tx,
        }
    }

    pub fn store(&self) -> &RecordStore {
        &self.store
    }

    /// Workers currently tracked, whatever their status.
    pub fn live_count(&self) -> u32 {
        self.entries.len() as u32
    }

    /// Ids of workers in `running` status, in spawn order.
    pub fn running_ids(&self) -> Vec<WorkerId> {
        self.order
            .iter()
            .filter(|id| {
                self.entries
                    .get(*id)
                    .is_some_and(|e| e.record.is_running())
            })
            .cloned()
            .collect()
    }

    /// Records of running workers, in spawn order.
    pub fn running_records(&self) -> Vec<&WorkerRecord> {
        self.order
            .iter()
            .filter_map(|id| self.entries.get(id).map(|e| &e.record))
            .filter(|r| r.is_running())
            .collect()
    }

    /// All live records, in spawn order.
    pub fn records(&self) -> Vec<WorkerRecord> {
        self.order
            .iter()
            .filter_map(|id| self.entries.get(id).map(|e| e.record.clone()))
            .collect()
    }

    pub fn record_mut(&mut self, worker_id: &str) -> Option<&mut WorkerRecord> {
        self.entries.get_mut(worker_id).map(|e| &mut e.record)
    }

    /// Fire-and-forget command to one worker.
    pub fn send_to(&self, worker_id: &str, command: WorkerCommand) -> bool {
        self.entries
            .get(worker_id)
            .is_some_and(|e| e.handle.send(command))
    }

    /// Spawn up to `count` workers, silently dropping what the cap does
    /// not allow. Returns the number actually spawned.
    pub fn spawn(&mut self, count: u32, balancer: &mut LoadBalancer) -> u32 {
        let mut spawned = 0;
        for _ in 0..count {
            if self.live_count() >= self.settings.max_workers {
                // Excess spawns are dropped, not queued.
                debug!(
                    requested = count,
                    spawned,
                    cap = self.settings.max_workers,
                    "pool at capacity, dropping remaining spawns"
                );
                break;
            }
            let id = format!("w-{}", self.next_id);
            self.next_id += 1;

            let handle = spawn_worker(&id, self.settings.worker.clone(), self.events_tx.clone());
            let record = WorkerRecord::new(id.clone(), handle.pid, epoch_secs());
            self.persist(&record);
            balancer.track(&id);
            self.log_event(
                "worker_spawned",
                EventSeverity::Info,
                format!("worker {id} spawned"),
                Some(id.clone()),
                Some(json!({ "pid": handle.pid })),
            );
            info!(worker_id = %id, pid = handle.pid, "worker spawned");

            self.order.push(id.clone());
            self.entries.insert(id, PoolEntry { record, handle });
            spawned += 1;
        }
        spawned
    }

    /// Gracefully terminate the `count` least-loaded running workers.
    pub fn terminate(&mut self, count: u32, balancer: &mut LoadBalancer) -> Vec<WorkerId> {
        let victims = balancer.least_loaded(&self.running_ids(), count as usize);
        for id in &victims {
            self.begin_shutdown(id, balancer);
        }
        victims
    }

    /// Request a graceful exit and arm this worker's grace timer.
    pub fn begin_shutdown(&mut self, worker_id: &str, balancer: &mut LoadBalancer) {
        let Some(entry) = self.entries.get_mut(worker_id) else {
            return;
        };
        if entry.record.status == WorkerStatus::Stopping {
            return; // already draining, one grace timer is enough
        }
        entry.record.status = WorkerStatus::Stopping;
        entry.handle.send(WorkerCommand::GracefulShutdown);
        let record = entry.record.clone();

        balancer.untrack(worker_id);
        self.persist(&record);
        self.arm_grace_timer(worker_id);
        self.log_event(
            "worker_stopping",
            EventSeverity::Info,
            format!("graceful shutdown requested for {worker_id}"),
            Some(worker_id.to_string()),
            None,
        );
        info!(worker_id, "graceful shutdown requested");
    }

    /// Broadcast graceful shutdown to every live worker.
    pub fn shutdown_all(&mut self, balancer: &mut LoadBalancer) {
        let ids = self.order.clone();
        for id in ids {
            self.begin_shutdown(&id, balancer);
        }
    }

    /// Escalate a worker whose grace window ran out. Returns true when a
    /// kill was actually issued.
    pub fn on_grace_expired(&mut self, worker_id: &str) -> bool {
        let Some(entry) = self.entries.get(worker_id) else {
            return false; // exited within the window
        };
        warn!(
            worker_id,
            grace = ?self.settings.grace_period,
            "grace period expired, killing worker"
        );
        entry.handle.kill();
        self.log_event(
            "worker_killed",
            EventSeverity::Warning,
            format!("worker {worker_id} did not exit within the grace period"),
            Some(worker_id.to_string()),
            None,
        );
        true
    }

    /// Handle an observed worker exit.
    ///
    /// Removes the worker from the live set; its row settles on `stopped`
    /// (via `failed` when the exit was abnormal) and is kept for audit.
    /// An abnormal exit of a worker we did not ask to stop schedules a
    /// single delayed replacement when `restart` is set.
    pub fn on_exit(&mut self, worker_id: &str, code: i32, restart: bool, balancer: &mut LoadBalancer) {
        let Some(mut entry) = self.entries.remove(worker_id) else {
            return;
        };
        self.order.retain(|id| id != worker_id);
        balancer.untrack(worker_id);

        let was_stopping = entry.record.status == WorkerStatus::Stopping;
        let abnormal = code != 0;
        if abnormal {
            entry.record.status = WorkerStatus::Failed;
            self.persist(&entry.record);
            self.log_event(
                "worker_failed",
                EventSeverity::Error,
                format!("worker {worker_id} exited abnormally"),
                Some(worker_id.to_string()),
                Some(json!({ "exit_code": code })),
            );
            warn!(worker_id, code, "worker exited abnormally");
        } else {
            info!(worker_id, "worker exited cleanly");
        }

        entry.record.status = WorkerStatus::Stopped;
        self.persist(&entry.record);
        self.log_event(
            "worker_exited",
            if abnormal { EventSeverity::Warning } else { EventSeverity::Info },
            format!("worker {worker_id} removed from the pool"),
            Some(worker_id.to_string()),
            Some(json!({ "exit_code": code })),
        );

        if abnormal && !was_stopping && restart {
            // Crash replacement rides its own timer, decoupled from the
            // scaling control loop.
            self.log_event(
                "replacement_scheduled",
                EventSeverity::Info,
                format!("replacement for {worker_id} scheduled"),
                Some(worker_id.to_string()),
                None,
            );
            let events_tx = self.events_tx.clone();
            let delay = self.settings.restart_delay;
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                let _ = events_tx.send(Event::ReplacementDue).await;
            });
        }
    }

    /// Record a runtime error that did not take the worker down.
    ///
    /// The worker stays tracked; its next heartbeat restores `running`.
    pub fn on_error(&mut self, worker_id: &str, message: &str) {
        let Some(entry) = self.entries.get_mut(worker_id) else {
            return;
        };
        entry.record.status = WorkerStatus::Failed;
        entry.record.error_count += 1;
        let record = entry.record.clone();
        self.persist(&record);
        warn!(worker_id, message, "worker reported an error");
        self.log_event(
            "worker_error",
            EventSeverity::Error,
            format!("worker {worker_id}: {message}"),
            Some(worker_id.to_string()),
            None,
        );
    }

    /// Refresh every live worker's performance score and persist.
    pub fn refresh_scores(&mut self) {
        let ids = self.order.clone();
        for id in ids {
            if let Some(entry) = self.entries.get_mut(&id) {
                entry.record.performance_score = performance_score(&entry.record);
                let record = entry.record.clone();
                self.persist(&record);
            }
        }
    }

    /// Best-effort persist; in-memory state stays authoritative.
    pub fn persist(&self, record: &WorkerRecord) {
        if let Err(e) = self.store.put_worker(record) {
            warn!(worker_id = %record.id, error = %e, "worker record persist failed");
        }
    }

    /// Best-effort event journal write.
    pub fn log_event(
        &self,
        event_type: &str,
        severity: EventSeverity,
        description: String,
        worker_id: Option<WorkerId>,
        details: Option<serde_json::Value>,
    ) {
        let event = ClusterEvent {
            timestamp: epoch_millis(),
            event_type: event_type.to_string(),
            severity,
            description,
            worker_id,
            details,
        };
        if let Err(e) = self.store.append_event(&event) {
            warn!(event_type, error = %e, "cluster event persist failed");
        }
    }

    fn arm_grace_timer(&self, worker_id: &str) {
        let events_tx = self.events_tx.clone();
        let worker_id = worker_id.to_string();
        let grace = self.settings.grace_period;
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            let _ = events_tx.send(Event::GraceExpired { worker_id }).await;
        });
    }
}

fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
