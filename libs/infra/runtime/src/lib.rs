// [libs/infra/runtime/src/lib.rs]
//! The runtime abstraction (C2): a single `Runtime` trait the lifecycle
//! engine drives through `prepare -> start -> (probe)* -> stop? ->
//! destroy`, implemented by the Compose runtime, the microVM runtime, and
//! a `Noop` runtime that exists only so tests and the doctor's dry-run
//! never touch the host.

pub mod error;
pub mod noop;
pub mod types;

pub use error::RuntimeError;
pub use noop::NoopRuntime;
pub use types::{ConnectionInfo, Handle, ProbeResult};

use async_trait::async_trait;
use octolab_domain_models::lab::Lab;
use octolab_domain_models::recipe::Recipe;

/// Capability set exposed to the lifecycle engine (spec §4.2). Every
/// method is idempotent or at least safe to retry per the error
/// classification it returns; the engine never needs runtime-specific
/// retry logic.
#[async_trait]
pub trait Runtime: Send + Sync {
    /// Allocates host resources and materializes build artifacts; does
    /// not start workloads. Idempotent per lab id.
    async fn prepare(&self, lab: &Lab, recipe: &Recipe) -> Result<Handle, RuntimeError>;

    /// Runs workloads and returns once they are observably alive.
    async fn start(&self, handle: &Handle) -> Result<(), RuntimeError>;

    /// Cheap liveness check.
    async fn probe(&self, handle: &Handle) -> Result<ProbeResult, RuntimeError>;

    /// Best-effort cooperative stop.
    async fn stop(&self, handle: &Handle, reason: &str) -> Result<(), RuntimeError>;

    /// Releases all resources. Must be safe to call repeatedly and after
    /// a crash; never fails from the caller's perspective.
    async fn destroy(&self, handle: &Handle);

    async fn connection_info(&self, handle: &Handle) -> Result<ConnectionInfo, RuntimeError>;
}
