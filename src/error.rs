use thiserror::Error;

/// Errors surfaced to control-plane callers. Probe and notifier
/// failures never reach this type: they are encoded as `Status::Fail`
/// or logged and swallowed, respectively.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("no such service: {id}")]
    ServiceNotFound { id: u64 },

    #[error("failed to persist snapshot: {0}")]
    Persistence(#[from] std::io::Error),

    #[error("failed to (de)serialize snapshot: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;
