// [apps/engine/src/teardown.rs]
//! The teardown worker pool (spec §4.7). Tolerant of being invoked on a
//! lab that already reached a terminal status (e.g. a provisioning
//! failure that CAS'd straight to FAILED without an ENDING hop) — in
//! that case it only performs resource reclamation, skipping the status
//! transitions.

use std::sync::Arc;

use octolab_domain_models::cause::Cause;
use octolab_domain_models::lab::{Lab, LabStatus};
use octolab_repository::{RepositoryError, StatusUpdate};
use tracing::{debug, info, instrument, warn};

use crate::handle_codec;
use crate::state::{EngineState, TeardownTask};

/// Bounded parallelism P_td (spec §5: "teardown must not be starved").
pub fn spawn_pool(state: Arc<EngineState>, receiver: tokio::sync::mpsc::Receiver<TeardownTask>, pool_size: usize) {
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
                    Some(task) => teardown_one(&state, &task.lab_id).await,
                    None => {
                        debug!(worker_id, "teardown channel closed, worker exiting");
                        break;
                    }
                }
            }
        });
    }
}

#[instrument(skip(state), fields(lab_id = %lab_id))]
pub(crate) async fn teardown_one(state: &Arc<EngineState>, lab_id: &str) {
    let lock = state.lab_locks.lock_for(lab_id).await;
    let _permit = lock.lock().await;

    let Some(mut lab) = fetch(state, lab_id).await else { return };

    if lab.status.is_non_terminal() && lab.status != LabStatus::Ending {
        match state
            .repository
            .update_status(lab_id, lab.status, LabStatus::Ending, StatusUpdate::with_cause(lab.cause.clone().unwrap_or_else(Cause::user_stop)))
            .await
        {
            Ok(updated) => lab = updated,
            Err(RepositoryError::StaleState { .. }) => {
                debug!("another worker already moved this lab past its current status");
                let Some(refreshed) = fetch(state, lab_id).await else { return };
                lab = refreshed;
            }
            Err(err) => {
                warn!(%err, "failed to CAS into ENDING, continuing with best-effort cleanup anyway");
            }
        }
    }

    let budget = state.config.teardown_budget;
    let outcome = tokio::time::timeout(budget, reclaim_resources(state, &lab)).await;
    if outcome.is_err() {
        warn!("teardown exceeded its wall-clock budget, forcing FAILED");
        force_failed(state, &lab, Cause::teardown_timeout()).await;
        return;
    }

    if lab.status.is_terminal() {
        return;
    }

    let final_status = if lab.cause.as_ref().map(Cause::is_error).unwrap_or(false) { LabStatus::Failed } else { LabStatus::Finished };
    match state.repository.update_status(lab_id, LabStatus::Ending, final_status, StatusUpdate::default()).await {
        Ok(_) => info!(final_status = ?final_status, "teardown reached a terminal state"),
        Err(RepositoryError::StaleState { .. }) => debug!("lab already reached a terminal state by another path"),
        Err(err) => warn!(%err, "failed to record the final teardown status"),
    }
}

async fn fetch(state: &Arc<EngineState>, lab_id: &str) -> Option<Lab> {
    match state.repository.get_lab(lab_id).await {
        Ok(Some(lab)) => Some(lab),
        Ok(None) => {
            warn!(lab_id, "teardown task for a lab that no longer exists");
            None
        }
        Err(err) => {
            warn!(lab_id, %err, "repository unavailable, abandoning teardown task");
            None
        }
    }
}

async fn reclaim_resources(state: &Arc<EngineState>, lab: &Lab) {
    if let Some(raw_handle) = &lab.backend_handle {
        match handle_codec::decode(raw_handle) {
            Ok(handle) => state.runtime.destroy(&handle).await,
            Err(err) => warn!(?err, "stored backend_handle is corrupt, skipping runtime destroy"),
        }
    }

    if let Err(err) = state.netd.destroy_network(&lab.id).await {
        warn!(%err, "C3 destroy_network failed during teardown (best-effort)");
    }
}

async fn force_failed(state: &Arc<EngineState>, lab: &Lab, cause: Cause) {
    let update = StatusUpdate { cause: Some(cause), ..Default::default() };
    if lab.status == LabStatus::Ending {
        let _ = state.repository.update_status(&lab.id, LabStatus::Ending, LabStatus::Failed, update).await;
    }
}
