//! flexpool-state — durable worker records for the flexpool supervisor.
//!
//! Backed by [redb](https://docs.rs/redb), holds the audit trail the
//! orchestrator writes through: one row per worker ever spawned, an
//! append-only request log, and a cluster event journal.
//!
//! # Architecture
//!
//! All record types are JSON-serialized into redb's `&[u8]` value columns.
//! Worker rows are keyed by worker id; request log rows carry a composite
//! `{worker_id}:{timestamp_ms}:{seq}` key so prefix scans return a
//! worker's history in insertion order, and event rows are keyed by
//! `{timestamp_ms}:{seq}` so iteration follows the journal.
//!
//! Worker rows are never deleted: a worker that leaves the live pool keeps
//! its row (final status `stopped` or `failed`) for audit.
//!
//! The `RecordStore` is `Clone` + `Send` + `Sync` (backed by
//! `Arc<Database>`) and can be shared across async tasks.

pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StoreError, StoreResult};
pub use store::RecordStore;
pub use types::*;
