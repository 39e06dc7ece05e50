//! Pool-wide metric reduction.
//!
//! Pure helpers the supervisor runs on its aggregation timer. Averages
//! cover the running set only; an empty pool reduces to all-zero
//! figures so the scaling policy sees a cold pool rather than NaNs.

use flexpool_autoscale::PoolAverages;
use flexpool_state::WorkerRecord;

/// Averages over the running set. `average_load` comes from the
/// balancer's per-window counters.
pub(crate) fn pool_averages(running: &[&WorkerRecord], average_load: f64) -> PoolAverages {
    if running.is_empty() {
        return PoolAverages::default();
    }
    let n = running.len() as f64;
    PoolAverages {
        cpu_pct: running.iter().map(|r| r.cpu_usage).sum::<f64>() / n,
        memory_mb: running.iter().map(|r| r.memory_usage).sum::<f64>() / n,
        load: average_load,
    }
}

/// Mean response time for the window, zero when no samples arrived.
pub(crate) fn mean_ms(samples: &[u64]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    samples.iter().sum::<u64>() as f64 / samples.len() as f64
}

/// Success-ratio score in `[0, 100]`. Workers that have not served
/// anything yet score a full 100.
pub(crate) fn performance_score(record: &WorkerRecord) -> f64 {
    if record.total_requests == 0 {
        return 100.0;
    }
    // error_count can outrun total_requests via non-request errors.
    let errors = record.error_count.min(record.total_requests);
    (1.0 - errors as f64 / record.total_requests as f64) * 100.0
}
