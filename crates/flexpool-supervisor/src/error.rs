//! Error types for the supervisor.

use thiserror::Error;

use flexpool_state::WorkerId;

/// Result type alias for supervisor operations.
pub type SupervisorResult<T> = Result<T, SupervisorError>;

/// Errors surfaced by the supervisor and its handle.
#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error(transparent)]
    Config(#[from] flexpool_autoscale::ConfigError),

    #[error("no running worker available for dispatch")]
    NoWorkerAvailable,

    #[error("worker {0} did not accept the dispatch")]
    WorkerUnavailable(WorkerId),

    #[error("supervisor is no longer running")]
    ChannelClosed,
}
