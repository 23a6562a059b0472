// [libs/infra/guest-protocol/src/lib.rs]
//! Line-delimited JSON protocol between the host-side microVM runtime
//! and the in-guest agent (C6): wire types, a client used by the
//! runtime, and a connection-serving helper used by the agent binary.

pub mod client;
pub mod error;
pub mod server;
pub mod transport;
pub mod wire;

pub use client::{wait_until_reachable, AgentClient};
pub use error::AgentError;
pub use server::{serve_connection, ActionHandler};
pub use transport::{AgentTransport, FallbackTransport, SerialTransport, VsockTransport};
pub use wire::{Action, AgentRequest, AgentResponse};
