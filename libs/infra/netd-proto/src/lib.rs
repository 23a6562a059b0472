// [libs/infra/netd-proto/src/lib.rs]
//! Shared between `octolab-netd` (the privileged daemon, C3) and the
//! microVM runtime (its client): wire types, the deterministic bridge/TAP
//! naming function, and a retrying Unix-socket client.

pub mod client;
pub mod error;
pub mod naming;
pub mod wire;

pub use client::NetdClient;
pub use error::NetdError;
pub use naming::{derive_device_names, DeviceNames};
pub use wire::{NetworkAllocation, Request, RequestBody, Response, ResponseBody};
