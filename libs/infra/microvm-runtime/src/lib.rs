// [libs/infra/microvm-runtime/src/lib.rs]
//! microVM-based lab runtime (C5): one microVM per lab, booting a shared
//! kernel and a copy-on-write rootfs clone, driven over a Firecracker-
//! shaped VMM API and the guest agent protocol (C6).

pub mod error;
pub mod runtime;
pub mod vmm;

pub use error::VmmError;
pub use runtime::{MicroVmRuntime, MicroVmRuntimeConfig};
pub use vmm::{ProcessVmm, Vmm};
