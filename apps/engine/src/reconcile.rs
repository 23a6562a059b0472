// [apps/engine/src/reconcile.rs]
//! Startup reconciliation (spec §4.7): after a restart, the engine's own
//! channels are empty, so any lab that was mid-flight when the process
//! died would otherwise sit forever. This walks the repository and C3's
//! live network list once at boot and re-enqueues teardown for anything
//! orphaned.

use std::collections::HashSet;
use std::sync::Arc;

use octolab_domain_models::cause::Cause;
use octolab_domain_models::lab::LabStatus;
use octolab_repository::{RepositoryError, StatusUpdate};
use tracing::{info, warn};

use crate::handle_codec;
use crate::state::{EngineState, TeardownTask};

pub async fn run(state: &Arc<EngineState>) {
    let labs = match state.repository.list_non_terminal().await {
        Ok(labs) => labs,
        Err(err) => {
            warn!(%err, "reconciliation could not list non-terminal labs, skipping");
            return;
        }
    };

    let live_lab_ids: HashSet<String> = labs.iter().map(|lab| lab.id.clone()).collect();

    let networks = match state.netd.list_networks().await {
        Ok(networks) => networks,
        Err(err) => {
            warn!(%err, "could not list C3 networks during reconciliation, skipping orphan checks");
            Vec::new()
        }
    };
    let network_lab_ids: HashSet<String> = networks.iter().map(|n| n.lab_id.clone()).collect();

    // Any lab restored from storage that the process crashed on mid-way
    // through provisioning or teardown needs its work requeued: a
    // non-terminal lab's status alone tells us nothing about whether a
    // worker is still holding it, since workers died with the process.
    for lab in &labs {
        match lab.status {
            LabStatus::Requested => {
                let _ = state.provision_tx.send(crate::state::ProvisionTask { lab_id: lab.id.clone() }).await;
            }
            LabStatus::Provisioning | LabStatus::Ending => {
                info!(lab_id = %lab.id, status = ?lab.status, "reconciliation found a lab stranded mid-transition, re-enqueuing teardown");
                let _ = state.teardown_tx.send(TeardownTask { lab_id: lab.id.clone() }).await;
            }
            LabStatus::Ready | LabStatus::Degraded => {
                let has_handle = lab.backend_handle.as_deref().map(handle_codec::decode).is_some_and(|r| r.is_ok());
                let has_network = network_lab_ids.contains(&lab.id);
                if !has_handle || !has_network {
                    warn!(lab_id = %lab.id, has_handle, has_network, "reconciliation found a lab with no live runtime handle or network, marking orphaned");
                    match state.repository.update_status(&lab.id, lab.status, LabStatus::Ending, StatusUpdate::with_cause(Cause::orphaned())).await {
                        Ok(_) => {
                            let _ = state.teardown_tx.send(TeardownTask { lab_id: lab.id.clone() }).await;
                        }
                        Err(RepositoryError::StaleState { .. }) => {}
                        Err(err) => warn!(%err, lab_id = %lab.id, "failed to CAS orphaned lab into ENDING"),
                    }
                }
            }
            _ => {}
        }
    }

    for network in networks {
        if !live_lab_ids.contains(&network.lab_id) {
            warn!(lab_id = %network.lab_id, "C3 reports a network with no matching non-terminal lab, destroying it");
            if let Err(err) = state.netd.destroy_network(&network.lab_id).await {
                warn!(%err, lab_id = %network.lab_id, "failed to destroy orphaned network");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::test_engine_state;
    use chrono::Utc;
    use octolab_domain_models::lab::{Lab, LabStatus, RuntimeKind};

    fn stranded_lab() -> Lab {
        let now = Utc::now();
        Lab {
            id: "lab-1".to_string(),
            owner_id: "u1".to_string(),
            recipe_id: "r1".to_string(),
            status: LabStatus::Provisioning,
            runtime_kind: RuntimeKind::Noop,
            backend_handle: None,
            connection_url: None,
            expires_at: Some(now + chrono::Duration::minutes(60)),
            created_at: now,
            updated_at: now,
            build_id: None,
            cause: None,
        }
    }

    #[tokio::test]
    async fn stranded_provisioning_lab_is_requeued_for_teardown() {
        let (state, _provision_rx, mut teardown_rx) = test_engine_state();
        let lab = stranded_lab();
        state.repository.create_lab(lab.clone()).await.unwrap();

        run(&state).await;

        let task = teardown_rx.try_recv().unwrap();
        assert_eq!(task.lab_id, lab.id);
    }

    #[tokio::test]
    async fn requested_lab_is_requeued_for_provisioning() {
        let (state, mut provision_rx, _teardown_rx) = test_engine_state();
        let mut lab = stranded_lab();
        lab.status = LabStatus::Requested;
        state.repository.create_lab(lab.clone()).await.unwrap();

        run(&state).await;

        let task = provision_rx.try_recv().unwrap();
        assert_eq!(task.lab_id, lab.id);
    }

    #[tokio::test]
    async fn ready_lab_with_no_backend_handle_is_marked_orphaned() {
        let (state, _provision_rx, mut teardown_rx) = test_engine_state();
        let mut lab = stranded_lab();
        lab.status = LabStatus::Ready;
        lab.backend_handle = None;
        state.repository.create_lab(lab.clone()).await.unwrap();

        run(&state).await;

        let stored = state.repository.get_lab(&lab.id).await.unwrap().unwrap();
        assert_eq!(stored.status, LabStatus::Ending);
        assert_eq!(stored.cause.unwrap().tag, "orphaned");
        let task = teardown_rx.try_recv().unwrap();
        assert_eq!(task.lab_id, lab.id);
    }
}
