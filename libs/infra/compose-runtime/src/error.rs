// [libs/infra/compose-runtime/src/error.rs]
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("container engine is unresponsive: {0}")]
    Unresponsive(String),

    #[error("build failed: {0}")]
    BuildFailed(String),

    #[error("compose operation failed: {0}")]
    ComposeFailed(String),

    #[error("container not found: {0}")]
    NotFound(String),

    #[error("filesystem error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    pub fn is_transient(&self) -> bool {
        matches!(self, EngineError::Unresponsive(_))
    }
}
