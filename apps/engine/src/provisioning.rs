// [apps/engine/src/provisioning.rs]
//! The provisioning worker pool (spec §4.7 step 2). Each task is handled
//! under that lab's keyed lock so admission/health/expiry/teardown never
//! observe a half-written transition.

use std::sync::Arc;

use octolab_domain_models::cause::{Cause, ErrorClass};
use octolab_domain_models::lab::{Lab, LabStatus};
use octolab_repository::{RepositoryError, StatusUpdate};
use octolab_runtime::RuntimeError;
use tracing::{debug, info, instrument, warn};

use crate::handle_codec;
use crate::retry::{with_retry, RetryPolicy};
use crate::state::{EngineState, ProvisionTask, TeardownTask};

/// Spawns `pool_size` workers draining the shared provisioning channel.
/// Bounded parallelism (spec §5: "one provisioning pool, bounded
/// parallelism P_prov").
pub fn spawn_pool(state: Arc<EngineState>, receiver: tokio::sync::mpsc::Receiver<ProvisionTask>, pool_size: usize) {
    let receiver = Arc::new(tokio::sync::Mutex::new(receiver));
    for worker_id in 0..pool_size {
        let state = state.clone();
        let receiver = receiver.clone();
        tokio::spawn(async move {
            loop {
                let task = {
                    let mut rx = receiver.lock().await;
                    rx.recv().await
                };
                match task {
                    Some(task) => provision_one(&state, &task.lab_id).await,
                    None => {
                        debug!(worker_id, "provisioning channel closed, worker exiting");
                        break;
                    }
                }
            }
        });
    }
}

#[instrument(skip(state), fields(lab_id = %lab_id))]
pub(crate) async fn provision_one(state: &Arc<EngineState>, lab_id: &str) {
    let lock = state.lab_locks.lock_for(lab_id).await;
    let _permit = lock.lock().await;

    let lab = match state.repository.get_lab(lab_id).await {
        Ok(Some(lab)) => lab,
        Ok(None) => {
            warn!("provisioning task for a lab that no longer exists");
            return;
        }
        Err(err) => {
            warn!(%err, "repository unavailable, abandoning provisioning task");
            return;
        }
    };

    if lab.status != LabStatus::Requested {
        debug!(status = ?lab.status, "lab already past REQUESTED, abandoning");
        return;
    }

    let lab = match state
        .repository
        .update_status(lab_id, LabStatus::Requested, LabStatus::Provisioning, StatusUpdate::default())
        .await
    {
        Ok(lab) => lab,
        Err(RepositoryError::StaleState { .. }) => {
            debug!("lost the REQUESTED -> PROVISIONING race to another worker");
            return;
        }
        Err(err) => {
            warn!(%err, "failed to CAS into PROVISIONING");
            return;
        }
    };

    let recipe = match state.repository.get_recipe(&lab.recipe_id).await {
        Ok(Some(recipe)) if recipe.is_approved() => recipe,
        Ok(Some(_)) => {
            fail(state, &lab, Cause::new(ErrorClass::PolicyDenied, "recipe_unapproved", "recipe is not in the approved review state"), None).await;
            return;
        }
        Ok(None) => {
            fail(state, &lab, Cause::new(ErrorClass::PolicyDenied, "recipe_not_found", "no recipe matches this lab's recipe_id"), None).await;
            return;
        }
        Err(err) => {
            warn!(%err, "recipe lookup failed");
            fail(state, &lab, Cause::internal("recipe_lookup"), None).await;
            return;
        }
    };

    let retry_policy = RetryPolicy::default();
    let prepare_result = with_retry(&retry_policy, || state.runtime.prepare(&lab, &recipe)).await;
    let handle = match prepare_result {
        Ok(handle) => handle,
        Err(err) => {
            fail(state, &lab, cause_from_runtime_error(&err), None).await;
            return;
        }
    };

    if let Err(err) = with_retry(&retry_policy, || state.runtime.start(&handle)).await {
        fail(state, &lab, cause_from_runtime_error(&err), Some(&handle)).await;
        return;
    }

    let connection_info = match state.runtime.connection_info(&handle).await {
        Ok(info) => Some(info),
        Err(err) => {
            warn!(%err, "runtime started but connection_info failed; proceeding without it");
            None
        }
    };

    let update = StatusUpdate {
        backend_handle: Some(handle_codec::encode(&handle)),
        connection_url: connection_info.map(|i| i.remote_desktop_url),
        ..Default::default()
    };

    match state.repository.update_status(lab_id, LabStatus::Provisioning, LabStatus::Ready, update).await {
        Ok(_) => info!("lab reached READY"),
        Err(RepositoryError::StaleState { .. }) => warn!("lab left PROVISIONING before the READY CAS could land"),
        Err(err) => warn!(%err, "failed to CAS into READY after a successful start"),
    }
}

async fn fail(state: &Arc<EngineState>, lab: &Lab, cause: Cause, handle: Option<&octolab_runtime::Handle>) {
    let update = StatusUpdate {
        cause: Some(cause.clone()),
        backend_handle: handle.map(handle_codec::encode),
        ..Default::default()
    };
    match state.repository.update_status(&lab.id, LabStatus::Provisioning, LabStatus::Failed, update).await {
        Ok(_) => warn!(tag = %cause.tag, "provisioning failed"),
        Err(err) => warn!(%err, "failed to record provisioning failure"),
    }
    let _ = state.teardown_tx.send(TeardownTask { lab_id: lab.id.clone() }).await;
}

fn cause_from_runtime_error(err: &RuntimeError) -> Cause {
    match err {
        RuntimeError::Transient(detail) => Cause::new(ErrorClass::Transient, "runtime_transient", detail.clone()),
        RuntimeError::Fatal(detail) => Cause::new(ErrorClass::Fatal, "runtime_fatal", detail.clone()),
        RuntimeError::NotMyHandle => Cause::new(ErrorClass::Fatal, "runtime_handle_mismatch", "handle belongs to another runtime"),
    }
}
