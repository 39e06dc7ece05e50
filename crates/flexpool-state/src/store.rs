//! RecordStore — redb-backed persistence for the flexpool supervisor.
//!
//! Provides typed operations over worker rows, the request log, and the
//! cluster event journal. All values are JSON-serialized into redb's
//! `&[u8]` value columns. The store supports both on-disk and in-memory
//! backends (the latter for testing).

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use redb::{Database, ReadableDatabase, ReadableTable};
use tracing::debug;

use crate::error::{StoreError, StoreResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StoreError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StoreError::$variant(e.to_string())
    };
}

/// Thread-safe record store backed by redb.
#[derive(Clone)]
pub struct RecordStore {
    db: Arc<Database>,
    /// Tie-breaker appended to log keys sharing a timestamp.
    seq: Arc<AtomicU64>,
}

impl RecordStore {
    /// Open (or create) a persistent record store at the given path.
    pub fn open(path: &Path) -> StoreResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self {
            db: Arc::new(db),
            seq: Arc::new(AtomicU64::new(0)),
        };
        store.ensure_tables()?;
        debug!(?path, "record store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory record store (for testing).
    pub fn open_in_memory() -> StoreResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self {
            db: Arc::new(db),
            seq: Arc::new(AtomicU64::new(0)),
        };
        store.ensure_tables()?;
        debug!("in-memory record store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StoreResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(WORKERS).map_err(map_err!(Table))?;
        txn.open_table(REQUESTS).map_err(map_err!(Table))?;
        txn.open_table(EVENTS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Workers ────────────────────────────────────────────────────

    /// Insert or update a worker row.
    ///
    /// There is no delete counterpart: rows of departed workers are kept
    /// with their final status for audit.
    pub fn put_worker(&self, record: &WorkerRecord) -> StoreResult<()> {
        let value = serde_json::to_vec(record).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(WORKERS).map_err(map_err!(Table))?;
            table
                .insert(record.id.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Get a worker row by id.
    pub fn get_worker(&self, worker_id: &str) -> StoreResult<Option<WorkerRecord>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(WORKERS).map_err(map_err!(Table))?;
        match table.get(worker_id).map_err(map_err!(Read))? {
            Some(guard) => {
                let record: WorkerRecord =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    /// List all worker rows, live and departed.
    pub fn list_workers(&self) -> StoreResult<Vec<WorkerRecord>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(WORKERS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let record: WorkerRecord =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(record);
        }
        Ok(results)
    }

    // ── Request log ────────────────────────────────────────────────

    /// Append a request log row.
    pub fn append_request(&self, log: &RequestLog) -> StoreResult<()> {
        let key = log.table_key(self.seq.fetch_add(1, Ordering::Relaxed));
        let value = serde_json::to_vec(log).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(REQUESTS).map_err(map_err!(Table))?;
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// List request log rows for one worker, oldest first (by key prefix scan).
    pub fn list_requests_for_worker(
        &self,
        worker_id: &str,
        limit: usize,
    ) -> StoreResult<Vec<RequestLog>> {
        let prefix = format!("{worker_id}:");
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(REQUESTS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            if key.value().starts_with(&prefix) {
                let log: RequestLog =
                    serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
                results.push(log);
                if results.len() >= limit {
                    break;
                }
            }
        }
        Ok(results)
    }

    // ── Cluster events ─────────────────────────────────────────────

    /// Append a cluster event row.
    pub fn append_event(&self, event: &ClusterEvent) -> StoreResult<()> {
        let key = event.table_key(self.seq.fetch_add(1, Ordering::Relaxed));
        let value = serde_json::to_vec(event).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(EVENTS).map_err(map_err!(Table))?;
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// The most recent `limit` cluster events, oldest first.
    pub fn recent_events(&self, limit: usize) -> StoreResult<Vec<ClusterEvent>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(EVENTS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let event: ClusterEvent =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(event);
            if results.len() > limit {
                results.remove(0);
            }
        }
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_worker(id: &str) -> WorkerRecord {
        WorkerRecord::new(id, 4242, 1000)
    }

    fn test_request(worker_id: &str, timestamp: u64) -> RequestLog {
        RequestLog {
            worker_id: worker_id.to_string(),
            timestamp,
            response_time_ms: 12,
            success: true,
            endpoint: "/api/data".to_string(),
            http_method: "GET".to_string(),
        }
    }

    fn test_event(timestamp: u64, event_type: &str) -> ClusterEvent {
        ClusterEvent {
            timestamp,
            event_type: event_type.to_string(),
            severity: EventSeverity::Info,
            description: format!("{event_type} happened"),
            worker_id: Some("w-1".to_string()),
            details: None,
        }
    }

    // ── Worker rows ────────────────────────────────────────────────

    #[test]
    fn worker_put_and_get() {
        let store = RecordStore::open_in_memory().unwrap();
        let record = test_worker("w-1");

        store.put_worker(&record).unwrap();
        let retrieved = store.get_worker("w-1").unwrap();

        assert_eq!(retrieved, Some(record));
    }

    #[test]
    fn worker_get_nonexistent_returns_none() {
        let store = RecordStore::open_in_memory().unwrap();
        assert!(store.get_worker("w-99").unwrap().is_none());
    }

    #[test]
    fn worker_update_in_place() {
        let store = RecordStore::open_in_memory().unwrap();
        let mut record = test_worker("w-1");
        store.put_worker(&record).unwrap();

        record.status = WorkerStatus::Running;
        record.total_requests = 7;
        record.last_heartbeat = 1010;
        store.put_worker(&record).unwrap();

        let retrieved = store.get_worker("w-1").unwrap().unwrap();
        assert_eq!(retrieved.status, WorkerStatus::Running);
        assert_eq!(retrieved.total_requests, 7);
    }

    #[test]
    fn departed_worker_row_is_retained() {
        let store = RecordStore::open_in_memory().unwrap();
        let mut record = test_worker("w-1");
        store.put_worker(&record).unwrap();

        record.status = WorkerStatus::Stopped;
        store.put_worker(&record).unwrap();

        // The row outlives the worker for audit.
        let retrieved = store.get_worker("w-1").unwrap().unwrap();
        assert_eq!(retrieved.status, WorkerStatus::Stopped);
        assert_eq!(store.list_workers().unwrap().len(), 1);
    }

    #[test]
    fn worker_list_all() {
        let store = RecordStore::open_in_memory().unwrap();
        store.put_worker(&test_worker("w-1")).unwrap();
        store.put_worker(&test_worker("w-2")).unwrap();
        store.put_worker(&test_worker("w-3")).unwrap();

        assert_eq!(store.list_workers().unwrap().len(), 3);
    }

    // ── Request log ────────────────────────────────────────────────

    #[test]
    fn request_append_and_list() {
        let store = RecordStore::open_in_memory().unwrap();
        store.append_request(&test_request("w-1", 1000)).unwrap();
        store.append_request(&test_request("w-1", 1001)).unwrap();
        store.append_request(&test_request("w-2", 1002)).unwrap();

        let w1 = store.list_requests_for_worker("w-1", 10).unwrap();
        assert_eq!(w1.len(), 2);
        assert!(w1.iter().all(|r| r.worker_id == "w-1"));

        let w2 = store.list_requests_for_worker("w-2", 10).unwrap();
        assert_eq!(w2.len(), 1);
    }

    #[test]
    fn request_list_respects_limit() {
        let store = RecordStore::open_in_memory().unwrap();
        for ts in 1000..1010 {
            store.append_request(&test_request("w-1", ts)).unwrap();
        }

        let limited = store.list_requests_for_worker("w-1", 4).unwrap();
        assert_eq!(limited.len(), 4);
    }

    #[test]
    fn requests_with_same_timestamp_all_kept() {
        let store = RecordStore::open_in_memory().unwrap();
        // The seq tie-breaker keeps same-millisecond rows distinct.
        store.append_request(&test_request("w-1", 1000)).unwrap();
        store.append_request(&test_request("w-1", 1000)).unwrap();
        store.append_request(&test_request("w-1", 1000)).unwrap();

        assert_eq!(store.list_requests_for_worker("w-1", 10).unwrap().len(), 3);
    }

    // ── Cluster events ─────────────────────────────────────────────

    #[test]
    fn event_append_and_recent() {
        let store = RecordStore::open_in_memory().unwrap();
        store.append_event(&test_event(1000, "worker_spawned")).unwrap();
        store.append_event(&test_event(2000, "worker_exited")).unwrap();

        let events = store.recent_events(10).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event_type, "worker_spawned");
        assert_eq!(events[1].event_type, "worker_exited");
    }

    #[test]
    fn recent_events_keeps_newest() {
        let store = RecordStore::open_in_memory().unwrap();
        for ts in 1000..1010 {
            store.append_event(&test_event(ts, "tick")).unwrap();
        }

        let events = store.recent_events(3).unwrap();
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].timestamp, 1007);
        assert_eq!(events[2].timestamp, 1009);
    }

    #[test]
    fn event_details_round_trip() {
        let store = RecordStore::open_in_memory().unwrap();
        let mut event = test_event(1000, "scale_up");
        event.details = Some(serde_json::json!({"from": 2, "to": 3}));
        store.append_event(&event).unwrap();

        let events = store.recent_events(1).unwrap();
        assert_eq!(events[0].details, event.details);
    }

    // ── Persistence (on-disk) ──────────────────────────────────────

    #[test]
    fn persistence_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test.redb");

        {
            let store = RecordStore::open(&db_path).unwrap();
            store.put_worker(&test_worker("w-1")).unwrap();
            store.append_event(&test_event(1000, "worker_spawned")).unwrap();
        }

        // Reopen the same database file.
        let store = RecordStore::open(&db_path).unwrap();
        let record = store.get_worker("w-1").unwrap();
        assert!(record.is_some());
        assert_eq!(store.recent_events(10).unwrap().len(), 1);
    }

    // ── Edge cases ─────────────────────────────────────────────────

    #[test]
    fn empty_store_operations() {
        let store = RecordStore::open_in_memory().unwrap();

        assert!(store.list_workers().unwrap().is_empty());
        assert!(store.list_requests_for_worker("any", 10).unwrap().is_empty());
        assert!(store.recent_events(10).unwrap().is_empty());
    }
}
