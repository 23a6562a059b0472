// [libs/infra/guest-protocol/src/wire.rs]
//! Wire types shared by the agent server and its client. `token` travels
//! on every request and is the only field the server ever checks before
//! dispatching; it is never logged by either side.

use serde::{Deserialize, Serialize};

/// Closed allowlist (spec §4.6). Anything else must be rejected by
/// construction — there is deliberately no `Other(String)` variant.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    Ping,
    Uname,
    Id,
    Setup { compose_spec: String },
    Status,
    Shutdown,
}

impl Action {
    pub fn deadline(&self) -> std::time::Duration {
        match self {
            Action::Setup { .. } => std::time::Duration::from_secs(120),
            _ => std::time::Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRequest {
    pub token: String,
    #[serde(flatten)]
    pub action: Action,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AgentResponse {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stdout: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl AgentResponse {
    pub fn ok() -> Self {
        AgentResponse { ok: true, ..Default::default() }
    }

    pub fn ok_with_data(data: serde_json::Value) -> Self {
        AgentResponse { ok: true, data: Some(data), ..Default::default() }
    }

    pub fn failure(stderr: impl Into<String>) -> Self {
        AgentResponse { ok: false, stderr: Some(stderr.into()), ..Default::default() }
    }

    pub fn rejected() -> Self {
        AgentResponse { ok: false, ..Default::default() }
    }
}

pub const MAX_RESPONSE_BYTES: usize = 64 * 1024;
