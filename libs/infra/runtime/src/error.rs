// [libs/infra/runtime/src/error.rs]
use thiserror::Error;

/// Spec §4.2: callers branch on this, never on the message text.
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// Caller may retry with backoff.
    #[error("transient runtime error: {0}")]
    Transient(String),

    /// Caller must transition the lab to FAILED with the reported cause.
    #[error("fatal runtime error: {0}")]
    Fatal(String),

    /// The handle belongs to another runtime, or is already destroyed.
    /// The caller treats this identically to "already destroyed".
    #[error("handle does not belong to this runtime")]
    NotMyHandle,
}

impl RuntimeError {
    pub fn is_transient(&self) -> bool {
        matches!(self, RuntimeError::Transient(_))
    }
}
