//! redb table definitions for the worker record store.
//!
//! Each table uses `&str` keys and `&[u8]` values (JSON-serialized record
//! types). Log tables carry composite keys so that iteration order matches
//! insertion order and per-worker prefix scans stay cheap.

use redb::TableDefinition;

/// Worker rows keyed by `{worker_id}`.
pub const WORKERS: TableDefinition<&str, &[u8]> = TableDefinition::new("cluster_workers");

/// Request log rows keyed by `{worker_id}:{timestamp_ms}:{seq}`.
pub const REQUESTS: TableDefinition<&str, &[u8]> = TableDefinition::new("worker_requests");

/// Cluster event rows keyed by `{timestamp_ms}:{seq}`.
pub const EVENTS: TableDefinition<&str, &[u8]> = TableDefinition::new("cluster_events");
