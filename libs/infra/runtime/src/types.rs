// [libs/infra/runtime/src/types.rs]
use octolab_domain_models::cause::Cause;
use serde::{Deserialize, Serialize};

/// Opaque per-runtime reference. Each runtime encodes whatever it needs
/// (container ids, a VMM pid and state directory, ...) as JSON inside
/// `payload` and is the only code that ever decodes it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Handle {
    pub runtime_kind: String,
    pub payload: String,
}

impl Handle {
    pub fn new(runtime_kind: &str, payload: impl serde::Serialize) -> Self {
        Self {
            runtime_kind: runtime_kind.to_string(),
            payload: serde_json::to_string(&payload).expect("handle payload must serialize"),
        }
    }

    pub fn decode<T: for<'de> Deserialize<'de>>(&self) -> Result<T, crate::RuntimeError> {
        serde_json::from_str(&self.payload).map_err(|e| crate::RuntimeError::Fatal(format!("corrupt handle: {e}")))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeResult {
    Ok,
    Unreachable,
    Dead(Option<Cause>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionInfo {
    pub remote_desktop_url: String,
    pub exposed_ports: Vec<u16>,
}
