//! The supervisor event loop.
//!
//! A single task owns every mutable structure — the worker pool, the load
//! balancer, and the rolling response-time window — and mutates them
//! serially in response to worker reports, handle commands, and its two
//! timers (metrics aggregation and the scaling check). Handlers are plain
//! synchronous methods, which keeps the loop free of interleaving and the
//! handlers directly testable.

use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::json;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, interval_at};
use tracing::{debug, info, warn};

use flexpool_autoscale::{PoolAverages, ScaleAction, plan};
use flexpool_balance::LoadBalancer;
use flexpool_state::{EventSeverity, RecordStore, RequestLog, WorkerId, WorkerRecord, WorkerStatus};

use crate::config::SupervisorConfig;
use crate::error::{SupervisorError, SupervisorResult};
use crate::messages::{Event, Job, WorkerCommand, WorkerReport};
use crate::metrics::{mean_ms, pool_averages};
use crate::pool::{PoolSettings, WorkerPool};
use crate::worker::WorkerOptions;

/// Requests accepted by a running supervisor.
enum Command {
    Dispatch {
        job: Job,
        reply: oneshot::Sender<SupervisorResult<WorkerId>>,
    },
    Snapshot {
        reply: oneshot::Sender<ClusterSnapshot>,
    },
    SetAutoscaling {
        enabled: bool,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Point-in-time view of the pool.
#[derive(Debug, Clone)]
pub struct ClusterSnapshot {
    /// Live worker records, in spawn order.
    pub workers: Vec<WorkerRecord>,
    /// Size of the running set.
    pub running: u32,
    pub averages: PoolAverages,
    pub autoscaling: bool,
}

/// Client half of a running supervisor.
pub struct SupervisorHandle {
    cmd_tx: mpsc::Sender<Command>,
    join: tokio::task::JoinHandle<()>,
}

impl SupervisorHandle {
    /// Route one job to a worker chosen by the balancer.
    pub async fn dispatch(&self, job: Job) -> SupervisorResult<WorkerId> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Dispatch { job, reply: tx })
            .await
            .map_err(|_| SupervisorError::ChannelClosed)?;
        rx.await.map_err(|_| SupervisorError::ChannelClosed)?
    }

    /// Current pool view.
    pub async fn snapshot(&self) -> SupervisorResult<ClusterSnapshot> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Snapshot { reply: tx })
            .await
            .map_err(|_| SupervisorError::ChannelClosed)?;
        rx.await.map_err(|_| SupervisorError::ChannelClosed)
    }

    /// Flip the autoscaling flag; every other config field is fixed.
    pub async fn set_autoscaling(&self, enabled: bool) -> SupervisorResult<()> {
        self.cmd_tx
            .send(Command::SetAutoscaling { enabled })
            .await
            .map_err(|_| SupervisorError::ChannelClosed)
    }

    /// Graceful shutdown: stop the timers, broadcast shutdown to every
    /// worker (each with its own grace escalation), and wait for the
    /// pool to drain.
    pub async fn shutdown(self) -> SupervisorResult<()> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Shutdown { reply: tx })
            .await
            .map_err(|_| SupervisorError::ChannelClosed)?;
        rx.await.map_err(|_| SupervisorError::ChannelClosed)?;
        let _ = self.join.await;
        Ok(())
    }
}

/// The supervisor state machine. Constructed via [`Supervisor::start`].
pub struct Supervisor {
    config: SupervisorConfig,
    pool: WorkerPool,
    balancer: LoadBalancer,
    /// Response times reported since the last aggregation.
    response_samples: Vec<u64>,
    autoscaling: bool,
    shutting_down: bool,
    shutdown_reply: Option<oneshot::Sender<()>>,
}

impl Supervisor {
    /// Validate the config, spawn the initial worker complement, and
    /// start the event loop.
    pub fn start(config: SupervisorConfig, store: RecordStore) -> SupervisorResult<SupervisorHandle> {
        config.validate()?;

        let (events_tx, events_rx) = mpsc::channel(256);
        let (cmd_tx, cmd_rx) = mpsc::channel(64);
        let mut supervisor = Self::new(config, store, events_tx);

        let initial = supervisor.config.initial_complement();
        if initial > 0 {
            let spawned = supervisor.pool.spawn(initial, &mut supervisor.balancer);
            info!(spawned, "initial worker complement spawned");
        }

        let join = tokio::spawn(supervisor.run(cmd_rx, events_rx));
        Ok(SupervisorHandle { cmd_tx, join })
    }

    fn new(config: SupervisorConfig, store: RecordStore, events_tx: mpsc::Sender<Event>) -> Self {
        let settings = PoolSettings {
            max_workers: config.autoscale.max_workers,
            grace_period: config.grace_period,
            restart_delay: config.restart_delay,
            worker: WorkerOptions {
                heartbeat_interval: config.heartbeat_interval,
                ..WorkerOptions::default()
            },
        };
        Self {
            balancer: LoadBalancer::new(config.strategy),
            pool: WorkerPool::new(settings, store, events_tx),
            response_samples: Vec::new(),
            autoscaling: config.autoscale.enabled,
            shutting_down: false,
            shutdown_reply: None,
            config,
        }
    }

    async fn run(mut self, mut cmd_rx: mpsc::Receiver<Command>, mut events_rx: mpsc::Receiver<Event>) {
        // Aggregation and the scaling check run on independent timers;
        // the worker-side heartbeat is the third.
        let mut aggregate = interval_at(
            Instant::now() + self.config.aggregate_interval,
            self.config.aggregate_interval,
        );
        let mut scale = interval_at(
            Instant::now() + self.config.autoscale.check_interval,
            self.config.autoscale.check_interval,
        );

        info!(strategy = %self.balancer.strategy(), "supervisor loop started");

        loop {
            tokio::select! {
                Some(event) = events_rx.recv() => self.handle_event(event),
                Some(command) = cmd_rx.recv(), if !self.shutting_down => self.handle_command(command),
                _ = aggregate.tick(), if !self.shutting_down => self.aggregate(),
                _ = scale.tick(), if !self.shutting_down => self.scale_check(),
            }

            if self.shutting_down && self.pool.live_count() == 0 {
                if let Some(reply) = self.shutdown_reply.take() {
                    let _ = reply.send(());
                }
                info!("supervisor stopped");
                return;
            }
        }
    }

    // ── Worker events ──────────────────────────────────────────────

    fn handle_event(&mut self, event: Event) {
        match event {
            Event::Report { worker_id, report } => match report {
                WorkerReport::Heartbeat {
                    cpu_usage,
                    memory_usage,
                    uptime_secs,
                    timestamp,
                } => self.handle_heartbeat(&worker_id, cpu_usage, memory_usage, uptime_secs, timestamp),
                WorkerReport::RequestCompleted {
                    response_time_ms,
                    success,
                    endpoint,
                    method,
                } => self.handle_request_completed(&worker_id, response_time_ms, success, &endpoint, &method),
                WorkerReport::Errored { message } => self.pool.on_error(&worker_id, &message),
            },
            Event::Exited { worker_id, code } => {
                let restart = self.autoscaling && !self.shutting_down;
                self.pool.on_exit(&worker_id, code, restart, &mut self.balancer);
            }
            Event::GraceExpired { worker_id } => {
                self.pool.on_grace_expired(&worker_id);
            }
            Event::ReplacementDue => self.handle_replacement(),
        }
    }

    /// Ingest one heartbeat: refresh the utilization samples and force
    /// the worker into the running set.
    ///
    /// There is deliberately no staleness check on the other side: a
    /// worker that stops heartbeating without exiting stays tracked until
    /// an exit event arrives.
    fn handle_heartbeat(
        &mut self,
        worker_id: &str,
        cpu_usage: f64,
        memory_usage: f64,
        uptime_secs: f64,
        timestamp: u64,
    ) {
        let Some(record) = self.pool.record_mut(worker_id) else {
            debug!(worker_id, "heartbeat from unknown worker ignored");
            return;
        };
        record.cpu_usage = cpu_usage;
        record.memory_usage = memory_usage;
        record.last_heartbeat = timestamp;
        if record.status != WorkerStatus::Running {
            record.status = WorkerStatus::Running;
            self.balancer.track(worker_id);
        }
        let record = record.clone();
        debug!(worker_id, cpu_usage, memory_usage, uptime_secs, "heartbeat");
        self.pool.persist(&record);
    }

    /// Ingest one completed unit of work.
    fn handle_request_completed(
        &mut self,
        worker_id: &str,
        response_time_ms: u64,
        success: bool,
        endpoint: &str,
        method: &str,
    ) {
        let Some(record) = self.pool.record_mut(worker_id) else {
            debug!(worker_id, "completion from unknown worker ignored");
            return;
        };
        record.total_requests += 1;
        if !success {
            record.error_count += 1;
        }
        let record = record.clone();
        self.pool.persist(&record);

        self.response_samples.push(response_time_ms);
        self.balancer.bump(worker_id);

        let log = RequestLog {
            worker_id: worker_id.to_string(),
            timestamp: epoch_millis(),
            response_time_ms,
            success,
            endpoint: endpoint.to_string(),
            http_method: method.to_string(),
        };
        if let Err(e) = self.pool.store().append_request(&log) {
            warn!(worker_id, error = %e, "request log persist failed");
        }
    }

    /// Spawn the single delayed replacement for a crashed worker.
    fn handle_replacement(&mut self) {
        if !self.autoscaling || self.shutting_down {
            return;
        }
        if self.pool.spawn(1, &mut self.balancer) == 0 {
            debug!("crash replacement dropped, pool at capacity");
        } else {
            info!("crash replacement spawned");
        }
    }

    // ── Timers ─────────────────────────────────────────────────────

    /// Reduce the window into pool figures, refresh worker scores, and
    /// zero the load counters. Runs on the aggregation timer.
    fn aggregate(&mut self) {
        let averages = self.averages();
        let avg_response_ms = mean_ms(&self.response_samples);
        self.response_samples.clear();

        self.pool.refresh_scores();
        self.balancer.reset();

        debug!(
            cpu = averages.cpu_pct,
            memory = averages.memory_mb,
            load = averages.load,
            avg_response_ms,
            running = self.pool.running_ids().len(),
            "metrics window aggregated"
        );
    }

    /// One control-loop cycle. Runs on the scaling timer.
    fn scale_check(&mut self) {
        if !self.autoscaling {
            return;
        }
        let running = self.pool.running_ids().len() as u32;
        let averages = self.averages();

        match plan(&self.config.autoscale, &averages, running) {
            ScaleAction::RestoreFloor(n) => {
                warn!(min = n, "no running workers, restoring floor");
                let spawned = self.pool.spawn(n, &mut self.balancer);
                self.pool.log_event(
                    "scale_up",
                    EventSeverity::Info,
                    format!("restored floor with {spawned} workers"),
                    None,
                    Some(json!({ "spawned": spawned })),
                );
            }
            ScaleAction::Grow(n) => {
                let spawned = self.pool.spawn(n, &mut self.balancer);
                info!(spawned, cpu = averages.cpu_pct, load = averages.load, "scaled up");
                self.pool.log_event(
                    "scale_up",
                    EventSeverity::Info,
                    format!("scaled up by {spawned} workers"),
                    None,
                    Some(json!({
                        "cpu": averages.cpu_pct,
                        "memory": averages.memory_mb,
                        "load": averages.load,
                    })),
                );
            }
            ScaleAction::Shrink(n) => {
                let victims = self.pool.terminate(n, &mut self.balancer);
                info!(?victims, "scaled down");
                self.pool.log_event(
                    "scale_down",
                    EventSeverity::Info,
                    format!("scaled down by {} workers", victims.len()),
                    None,
                    None,
                );
            }
            ScaleAction::AtCapacity => {
                warn!(max = self.config.autoscale.max_workers, "pool hot but already at capacity");
                self.pool.log_event(
                    "at_capacity",
                    EventSeverity::Warning,
                    "pool hot but already at max capacity".to_string(),
                    None,
                    None,
                );
            }
            ScaleAction::Hold => {}
        }
    }

    // ── Commands ───────────────────────────────────────────────────

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Dispatch { job, reply } => {
                let _ = reply.send(self.dispatch(job));
            }
            Command::Snapshot { reply } => {
                let _ = reply.send(self.snapshot());
            }
            Command::SetAutoscaling { enabled } => {
                info!(enabled, "autoscaling toggled");
                self.autoscaling = enabled;
            }
            Command::Shutdown { reply } => self.begin_shutdown(reply),
        }
    }

    fn dispatch(&mut self, job: Job) -> SupervisorResult<WorkerId> {
        let running = self.pool.running_ids();
        let Some(worker_id) = self.balancer.select(&running) else {
            return Err(SupervisorError::NoWorkerAvailable);
        };
        if self.pool.send_to(&worker_id, WorkerCommand::Dispatch(job)) {
            Ok(worker_id)
        } else {
            Err(SupervisorError::WorkerUnavailable(worker_id))
        }
    }

    fn snapshot(&self) -> ClusterSnapshot {
        ClusterSnapshot {
            workers: self.pool.records(),
            running: self.pool.running_ids().len() as u32,
            averages: self.averages(),
            autoscaling: self.autoscaling,
        }
    }

    fn begin_shutdown(&mut self, reply: oneshot::Sender<()>) {
        info!(live = self.pool.live_count(), "supervisor shutdown requested");
        self.autoscaling = false;
        self.shutting_down = true;
        self.shutdown_reply = Some(reply);
        self.pool.log_event(
            "shutdown",
            EventSeverity::Info,
            "supervisor shutdown".to_string(),
            None,
            None,
        );
        self.pool.shutdown_all(&mut self.balancer);
    }

    /// Fresh averages over the running set; load comes from the
    /// balancer's current window.
    fn averages(&self) -> PoolAverages {
        let running = self.pool.running_ids();
        pool_averages(&self.pool.running_records(), self.balancer.average_load(&running))
    }
}

fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
