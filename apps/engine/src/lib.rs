// [apps/engine/src/lib.rs]
//! The lab lifecycle engine: admission, provisioning, health/expiry
//! tickers, teardown, startup reconciliation, preflight checks, and a
//! minimal admin HTTP surface, all driven off a `RepositoryPort` and a
//! `Runtime` implementation chosen at startup.

pub mod admission;
pub mod build_cache_adapter;
pub mod config;
pub mod doctor;
pub mod error;
pub mod expiry;
pub mod handle;
pub mod handle_codec;
pub mod health;
pub mod kernel;
pub mod locks;
pub mod provisioning;
pub mod reconcile;
pub mod retry;
pub mod router;
pub mod state;
pub mod teardown;

#[cfg(feature = "test-support")]
pub mod test_support;

pub use error::EngineError;
pub use handle::EngineHandle;
pub use kernel::Kernel;
