// [libs/infra/runtime/src/noop.rs]
use async_trait::async_trait;
use octolab_domain_models::lab::Lab;
use octolab_domain_models::recipe::Recipe;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::RuntimeError;
use crate::types::{ConnectionInfo, Handle, ProbeResult};
use crate::Runtime;

#[derive(Serialize, Deserialize)]
struct NoopPayload {
    lab_id: String,
}

/// Exists only so tests and the doctor's dry-run can exercise the engine
/// without touching the host (spec §4.2). `prepare`/`start` never fail,
/// `probe` always reports `Ok`.
#[derive(Default)]
pub struct NoopRuntime;

#[async_trait]
impl Runtime for NoopRuntime {
    async fn prepare(&self, lab: &Lab, _recipe: &Recipe) -> Result<Handle, RuntimeError> {
        debug!(lab_id = %lab.id, "noop runtime: prepare");
        Ok(Handle::new("noop", NoopPayload { lab_id: lab.id.clone() }))
    }

    async fn start(&self, handle: &Handle) -> Result<(), RuntimeError> {
        let _payload: NoopPayload = handle.decode()?;
        Ok(())
    }

    async fn probe(&self, handle: &Handle) -> Result<ProbeResult, RuntimeError> {
        let _payload: NoopPayload = handle.decode()?;
        Ok(ProbeResult::Ok)
    }

    async fn stop(&self, handle: &Handle, _reason: &str) -> Result<(), RuntimeError> {
        let _payload: NoopPayload = handle.decode()?;
        Ok(())
    }

    async fn destroy(&self, handle: &Handle) {
        if let Ok(payload) = handle.decode::<NoopPayload>() {
            debug!(lab_id = %payload.lab_id, "noop runtime: destroy");
        }
    }

    async fn connection_info(&self, handle: &Handle) -> Result<ConnectionInfo, RuntimeError> {
        let payload: NoopPayload = handle.decode()?;
        Ok(ConnectionInfo {
            remote_desktop_url: format!("noop://{}", payload.lab_id),
            exposed_ports: vec![],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use octolab_domain_models::lab::{LabStatus, RuntimeKind};

    fn lab() -> Lab {
        let now = Utc::now();
        Lab {
            id: "lab-1".into(),
            owner_id: "u1".into(),
            recipe_id: "r1".into(),
            status: LabStatus::Provisioning,
            runtime_kind: RuntimeKind::Noop,
            backend_handle: None,
            connection_url: None,
            expires_at: Some(now),
            created_at: now,
            updated_at: now,
            build_id: None,
            cause: None,
        }
    }

    fn recipe() -> Recipe {
        Recipe {
            id: "r1".into(),
            name: "sample".into(),
            software: "x".into(),
            version_constraint: "*".into(),
            exploit_family: "x".into(),
            base_image: "x".into(),
            dockerfile: "FROM scratch\n".into(),
            source_files: vec![],
            exposed_ports: vec![],
            exploit_hint: "x".into(),
            aliases: vec![],
            review_state: octolab_domain_models::recipe::ReviewState::Approved,
        }
    }

    #[tokio::test]
    async fn full_lifecycle_never_touches_host() {
        let runtime = NoopRuntime::default();
        let handle = runtime.prepare(&lab(), &recipe()).await.unwrap();
        runtime.start(&handle).await.unwrap();
        assert_eq!(runtime.probe(&handle).await.unwrap(), ProbeResult::Ok);
        let info = runtime.connection_info(&handle).await.unwrap();
        assert!(info.remote_desktop_url.starts_with("noop://"));
        runtime.destroy(&handle).await;
        runtime.destroy(&handle).await; // idempotent
    }
}
