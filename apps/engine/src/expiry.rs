// [apps/engine/src/expiry.rs]
//! The expiry ticker (spec §4.7): labs past their `expires_at` are CAS'd
//! into ENDING with `Cause::ttl_expired()` and handed to the teardown pool.
//!
//! `LabStatus::can_transition_to` has no `(Provisioning, Ending)` edge, so a
//! lab that expires mid-provisioning cannot be moved here directly. We skip
//! it this tick; provisioning will land it on READY or FAILED shortly, and
//! a READY lab past its expiry is caught on the next sweep. FAILED needs no
//! further action. This is a deliberate narrowing of spec.md's expiry
//! wording (which lists PROVISIONING as an eligible source status) to the
//! edges the state machine actually allows — see DESIGN.md.

use std::sync::Arc;

use chrono::Utc;
use octolab_domain_models::cause::Cause;
use octolab_domain_models::lab::LabStatus;
use octolab_repository::{RepositoryError, StatusUpdate};
use tracing::{debug, instrument, warn};

use crate::state::{EngineState, TeardownTask};

pub fn spawn(state: Arc<EngineState>) {
    let interval = state.config.expiry_tick_interval;
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            sweep(&state).await;
        }
    });
}

pub(crate) async fn sweep(state: &Arc<EngineState>) {
    let now = Utc::now();
    let expired = match state.repository.list_expired(now).await {
        Ok(labs) => labs,
        Err(err) => {
            warn!(%err, "expiry sweep could not list expired labs");
            return;
        }
    };

    for lab in expired {
        if matches!(lab.status, LabStatus::Ready | LabStatus::Degraded) {
            expire_one(state, &lab.id, lab.status).await;
        } else {
            debug!(lab_id = %lab.id, status = ?lab.status, "expired but not in an ENDING-reachable status this tick");
        }
    }
}

#[instrument(skip(state), fields(lab_id = %lab_id))]
async fn expire_one(state: &Arc<EngineState>, lab_id: &str, from: LabStatus) {
    let lock = state.lab_locks.lock_for(lab_id).await;
    let _permit = lock.lock().await;

    match state
        .repository
        .update_status(lab_id, from, LabStatus::Ending, StatusUpdate::with_cause(Cause::ttl_expired()))
        .await
    {
        Ok(_) => {
            debug!("lab expired, enqueuing teardown");
            let _ = state.teardown_tx.send(TeardownTask { lab_id: lab_id.to_string() }).await;
        }
        Err(RepositoryError::StaleState { .. }) => {}
        Err(err) => warn!(%err, "failed to CAS expired lab into ENDING"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::test_engine_state;
    use octolab_domain_models::lab::{Lab, RuntimeKind};

    fn expired_lab() -> Lab {
        let now = Utc::now();
        Lab {
            id: "lab-1".to_string(),
            owner_id: "u1".to_string(),
            recipe_id: "r1".to_string(),
            status: LabStatus::Ready,
            runtime_kind: RuntimeKind::Noop,
            backend_handle: None,
            connection_url: None,
            expires_at: Some(now - chrono::Duration::minutes(1)),
            created_at: now - chrono::Duration::hours(1),
            updated_at: now - chrono::Duration::hours(1),
            build_id: None,
            cause: None,
        }
    }

    #[tokio::test]
    async fn expired_ready_lab_moves_to_ending_and_enqueues_teardown() {
        let (state, _provision_rx, mut teardown_rx) = test_engine_state();
        let lab = expired_lab();
        state.repository.create_lab(lab.clone()).await.unwrap();

        sweep(&state).await;

        let stored = state.repository.get_lab(&lab.id).await.unwrap().unwrap();
        assert_eq!(stored.status, LabStatus::Ending);
        assert_eq!(stored.cause.unwrap().tag, "ttl_expired");
        let task = teardown_rx.recv().await.unwrap();
        assert_eq!(task.lab_id, lab.id);
    }

    #[tokio::test]
    async fn not_yet_expired_lab_is_untouched() {
        let (state, _provision_rx, _teardown_rx) = test_engine_state();
        let mut lab = expired_lab();
        lab.expires_at = Some(Utc::now() + chrono::Duration::hours(1));
        state.repository.create_lab(lab.clone()).await.unwrap();

        sweep(&state).await;

        let stored = state.repository.get_lab(&lab.id).await.unwrap().unwrap();
        assert_eq!(stored.status, LabStatus::Ready);
    }
}
