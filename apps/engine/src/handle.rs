// [apps/engine/src/handle.rs]
//! `EngineHandle`: the public API surface this crate exposes to whatever
//! thin transport wraps it (the admin router here, a future request
//! surface elsewhere). Every method either does its own CAS or delegates
//! to a module that does; none of them trust a caller-supplied status.

use std::sync::Arc;

use chrono::Utc;
use octolab_domain_models::cause::Cause;
use octolab_domain_models::evidence::EvidenceBundle;
use octolab_domain_models::intent::Intent;
use octolab_domain_models::lab::{Lab, LabStatus};
use octolab_policy::{evaluate_extension, Decision};
use octolab_repository::{RepositoryError, StatusUpdate};
use tracing::instrument;

use crate::admission;
use crate::error::EngineError;
use crate::state::{EngineState, TeardownTask};

#[derive(Clone)]
pub struct EngineHandle {
    state: Arc<EngineState>,
}

impl EngineHandle {
    pub fn new(state: Arc<EngineState>) -> Self {
        EngineHandle { state }
    }

    pub async fn create_lab(&self, owner_id: &str, intent: Intent) -> Result<Lab, EngineError> {
        admission::create_lab(&self.state, owner_id, intent).await
    }

    pub async fn get_lab(&self, owner_id: &str, lab_id: &str) -> Result<Lab, EngineError> {
        let lab = self.state.repository.get_lab(lab_id).await?.ok_or_else(|| EngineError::NotFound(lab_id.to_string()))?;
        if lab.owner_id != owner_id {
            return Err(EngineError::NotOwner(lab_id.to_string()));
        }
        Ok(lab)
    }

    pub async fn list_active(&self, owner_id: &str) -> Result<Vec<Lab>, EngineError> {
        Ok(self.state.repository.list_active_by_owner(owner_id).await?)
    }

    /// Requests a stop: CAS the lab into ENDING with `Cause::user_stop()`
    /// and enqueue teardown. Returns immediately; callers that need to
    /// know when the lab actually reaches a terminal status should poll
    /// `get_lab`.
    #[instrument(skip(self), fields(lab_id = %lab_id))]
    pub async fn stop_lab(&self, owner_id: &str, lab_id: &str) -> Result<Lab, EngineError> {
        let lock = self.state.lab_locks.lock_for(lab_id).await;
        let _permit = lock.lock().await;

        let lab = self.get_lab(owner_id, lab_id).await?;
        if lab.status.is_terminal() {
            return Err(EngineError::InvalidTransition(lab_id.to_string()));
        }
        if !lab.status.can_transition_to(LabStatus::Ending) {
            return Err(EngineError::InvalidTransition(lab_id.to_string()));
        }

        let updated = match self
            .state
            .repository
            .update_status(lab_id, lab.status, LabStatus::Ending, StatusUpdate::with_cause(Cause::user_stop()))
            .await
        {
            Ok(lab) => lab,
            Err(RepositoryError::StaleState { .. }) => return Err(EngineError::InvalidTransition(lab_id.to_string())),
            Err(err) => return Err(err.into()),
        };

        let _ = self.state.teardown_tx.send(TeardownTask { lab_id: lab_id.to_string() }).await;
        Ok(updated)
    }

    /// Extends `expires_at` by `additional_minutes`, gated by the same
    /// per-role TTL cap the admission path enforces (spec §4.9).
    #[instrument(skip(self), fields(lab_id = %lab_id))]
    pub async fn extend_lab(&self, owner_id: &str, lab_id: &str, additional_minutes: u32) -> Result<Lab, EngineError> {
        let lab = self.get_lab(owner_id, lab_id).await?;
        if !matches!(lab.status, LabStatus::Ready | LabStatus::Degraded | LabStatus::Provisioning) {
            return Err(EngineError::InvalidTransition(lab_id.to_string()));
        }

        let elapsed_minutes = (Utc::now() - lab.created_at).num_minutes().max(0) as u32;
        match evaluate_extension(&self.state.policy_config, self.state.role, additional_minutes, elapsed_minutes) {
            Decision::Deny(denial) => return Err(EngineError::PolicyDenied(denial)),
            Decision::Allow => {}
        }

        Ok(self.state.repository.extend_expiry(lab_id, additional_minutes as i64).await?)
    }

    pub async fn fetch_evidence(&self, owner_id: &str, lab_id: &str) -> Result<EvidenceBundle, EngineError> {
        Ok(octolab_evidence::fetch_bundle(self.state.repository.as_ref(), lab_id, owner_id).await?)
    }

    pub async fn fetch_verified_evidence(&self, owner_id: &str, lab_id: &str) -> Result<EvidenceBundle, EngineError> {
        let bundle = self.fetch_evidence(owner_id, lab_id).await?;
        Ok(self.state.signer.sign(bundle))
    }
}
