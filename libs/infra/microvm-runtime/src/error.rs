// [libs/infra/microvm-runtime/src/error.rs]
use thiserror::Error;

#[derive(Error, Debug)]
pub enum VmmError {
    #[error("failed to spawn VMM process: {0}")]
    SpawnFailed(String),

    #[error("VMM API socket never appeared")]
    SocketTimeout,

    #[error("VMM API call failed: {0}")]
    ApiCallFailed(String),

    #[error("filesystem error: {0}")]
    Io(#[from] std::io::Error),
}

impl VmmError {
    pub fn is_transient(&self) -> bool {
        matches!(self, VmmError::SocketTimeout | VmmError::ApiCallFailed(_))
    }
}
