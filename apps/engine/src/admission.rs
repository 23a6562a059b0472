// [apps/engine/src/admission.rs]
//! The admission path (spec §4.7): synchronous with the external request.
//! Quota and severity gates are evaluated via C10 in a single pass before
//! any row is persisted, so a denied intent never creates a lab.

use std::sync::Arc;

use chrono::Utc;
use octolab_domain_models::intent::Intent;
use octolab_domain_models::lab::{counts_against_quota, Lab, LabStatus, RuntimeKind};
use octolab_policy::{evaluate_admission, Decision};
use tracing::{info, instrument};
use uuid::Uuid;

use crate::config::RuntimeSelection;
use crate::error::EngineError;
use crate::state::{EngineState, ProvisionTask};

#[instrument(skip(state, intent), fields(owner = %owner_id))]
pub async fn create_lab(state: &Arc<EngineState>, owner_id: &str, intent: Intent) -> Result<Lab, EngineError> {
    let active = state.repository.list_active_by_owner(owner_id).await?;
    let current_active_count = active.iter().filter(|l| counts_against_quota(l.status)).count() as u32;

    match evaluate_admission(&state.policy_config, state.role, &intent, current_active_count) {
        Decision::Deny(denial) => return Err(EngineError::PolicyDenied(denial)),
        Decision::Allow => {}
    }

    let now = Utc::now();
    let lab_id = Uuid::new_v4().to_string();
    let runtime_kind = match state.config.runtime {
        RuntimeSelection::Compose => RuntimeKind::Compose,
        RuntimeSelection::MicroVm => RuntimeKind::MicroVm,
        RuntimeSelection::Noop => RuntimeKind::Noop,
    };

    let lab = Lab {
        id: lab_id.clone(),
        owner_id: owner_id.to_string(),
        recipe_id: recipe_id_for(&intent),
        status: LabStatus::Requested,
        runtime_kind,
        backend_handle: None,
        connection_url: None,
        expires_at: Some(now + chrono::Duration::minutes(intent.ttl_minutes as i64)),
        created_at: now,
        updated_at: now,
        build_id: None,
        cause: None,
    };

    state.repository.create_lab(lab.clone()).await?;
    info!(lab_id = %lab_id, "lab admitted, enqueuing provisioning");

    state
        .provision_tx
        .send(ProvisionTask { lab_id: lab_id.clone() })
        .await
        .map_err(|_| EngineError::Internal("provisioning queue closed".to_string()))?;

    Ok(lab)
}

/// The catalog/recipe-selection layer is out of scope; intents name a
/// software/version/exploit family that already maps 1:1 to a recipe id
/// in this engine's deployment.
fn recipe_id_for(intent: &Intent) -> String {
    format!("{}-{}-{}", intent.software, intent.version, intent.exploit_family)
}
