// [apps/engine/src/handle_codec.rs]
//! `Lab.backend_handle` stores a runtime `Handle` serialized as JSON; these
//! two functions are the only place that (de)serializes it.

use octolab_runtime::Handle;

pub fn encode(handle: &Handle) -> String {
    serde_json::to_string(handle).expect("Handle always serializes")
}

pub fn decode(raw: &str) -> Result<Handle, crate::error::EngineError> {
    serde_json::from_str(raw).map_err(|e| crate::error::EngineError::Internal(format!("corrupt backend_handle: {e}")))
}
