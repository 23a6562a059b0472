// [libs/infra/evidence/src/error.rs]
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EvidenceError {
    #[error("filesystem error reading evidence source: {0}")]
    Io(#[from] std::io::Error),

    #[error("bundle size {actual} exceeds the cap of {cap} bytes")]
    TooLarge { actual: u64, cap: u64 },

    #[error("bundle not found for lab {0}")]
    NotFound(String),

    #[error("caller does not own lab {0}")]
    NotOwner(String),

    #[error("repository error: {0}")]
    Repository(String),
}
