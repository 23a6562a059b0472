// [libs/infra/repository/src/lib.rs]
//! The repository port (C1): the only way any other component reads or
//! writes a `Lab`, `Recipe`, build-cache entry, or `EvidenceBundle`.
//! `update_status` is the sole mutation primitive for lab state, and it is
//! always a compare-and-set over `(id, expected_from)` — a mismatch never
//! writes and always returns `RepositoryError::StaleState`.

pub mod error;
pub mod memory;
pub mod port;
pub mod sqlstore;

pub use error::RepositoryError;
pub use memory::InMemoryRepository;
pub use port::{BuildCacheEntry, RepositoryPort, StatusUpdate};
pub use sqlstore::LibsqlRepository;
