// [apps/engine/src/health.rs]
//! The health ticker (spec §4.7): a single sweeper walking READY/DEGRADED
//! labs on an interval, probing each and reacting to N consecutive
//! unreachable results or a dead result.

use std::sync::Arc;

use octolab_domain_models::cause::Cause;
use octolab_domain_models::lab::LabStatus;
use octolab_repository::{RepositoryError, StatusUpdate};
use octolab_runtime::ProbeResult;
use tracing::{debug, instrument, warn};

use crate::handle_codec;
use crate::state::{EngineState, TeardownTask};

pub fn spawn(state: Arc<EngineState>) {
    let interval = state.config.health_tick_interval;
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            sweep(&state).await;
        }
    });
}

async fn sweep(state: &Arc<EngineState>) {
    let labs = match state.repository.list_non_terminal().await {
        Ok(labs) => labs,
        Err(err) => {
            warn!(%err, "health sweep could not list non-terminal labs");
            return;
        }
    };

    for lab in labs {
        if !matches!(lab.status, LabStatus::Ready | LabStatus::Degraded) {
            continue;
        }
        probe_one(state, &lab.id).await;
    }
}

#[instrument(skip(state), fields(lab_id = %lab_id))]
pub(crate) async fn probe_one(state: &Arc<EngineState>, lab_id: &str) {
    let lock = state.lab_locks.lock_for(lab_id).await;
    let _permit = lock.lock().await;

    let Ok(Some(lab)) = state.repository.get_lab(lab_id).await else { return };
    if !matches!(lab.status, LabStatus::Ready | LabStatus::Degraded) {
        return;
    }
    let Some(raw_handle) = &lab.backend_handle else { return };
    let Ok(handle) = handle_codec::decode(raw_handle) else { return };

    match state.runtime.probe(&handle).await {
        Ok(ProbeResult::Ok) => {
            state.clear_unreachable(lab_id).await;
            if lab.status == LabStatus::Degraded {
                match state.repository.update_status(lab_id, LabStatus::Degraded, LabStatus::Ready, StatusUpdate::default()).await {
                    Ok(_) => debug!("lab recovered from DEGRADED to READY"),
                    Err(RepositoryError::StaleState { .. }) => {}
                    Err(err) => warn!(%err, "failed to record recovery from DEGRADED"),
                }
            }
        }
        Ok(ProbeResult::Unreachable) => {
            let streak = state.note_unreachable(lab_id).await;
            if streak >= state.config.health_unreachable_threshold && lab.status == LabStatus::Ready {
                match state.repository.update_status(lab_id, LabStatus::Ready, LabStatus::Degraded, StatusUpdate::default()).await {
                    Ok(_) => warn!(streak, "lab marked DEGRADED after consecutive unreachable probes"),
                    Err(RepositoryError::StaleState { .. }) => {}
                    Err(err) => warn!(%err, "failed to record DEGRADED"),
                }
            }
        }
        Ok(ProbeResult::Dead(cause)) => {
            state.clear_unreachable(lab_id).await;
            let cause = cause.unwrap_or_else(Cause::probe_dead);
            match state.repository.update_status(lab_id, lab.status, LabStatus::Ending, StatusUpdate::with_cause(cause)).await {
                Ok(_) => {
                    warn!("lab reported dead by probe, enqueuing teardown");
                    let _ = state.teardown_tx.send(TeardownTask { lab_id: lab_id.to_string() }).await;
                }
                Err(RepositoryError::StaleState { .. }) => {}
                Err(err) => warn!(%err, "failed to CAS into ENDING after a dead probe"),
            }
        }
        Err(err) => warn!(%err, "probe call itself failed, treating as unreachable this tick"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::test_engine_state;
    use chrono::Utc;
    use octolab_domain_models::lab::{Lab, RuntimeKind};
    use octolab_runtime::Handle;

    fn ready_lab() -> Lab {
        let now = Utc::now();
        let handle = Handle::new("noop", serde_json::json!({"lab_id": "lab-1"}));
        Lab {
            id: "lab-1".to_string(),
            owner_id: "u1".to_string(),
            recipe_id: "r1".to_string(),
            status: LabStatus::Ready,
            runtime_kind: RuntimeKind::Noop,
            backend_handle: Some(handle_codec::encode(&handle)),
            connection_url: Some("noop://lab-1".to_string()),
            expires_at: Some(now + chrono::Duration::minutes(60)),
            created_at: now,
            updated_at: now,
            build_id: None,
            cause: None,
        }
    }

    #[tokio::test]
    async fn ok_probe_leaves_ready_labs_untouched() {
        let (state, _provision_rx, _teardown_rx) = test_engine_state();
        let lab = ready_lab();
        state.repository.create_lab(lab.clone()).await.unwrap();

        probe_one(&state, &lab.id).await;

        let stored = state.repository.get_lab(&lab.id).await.unwrap().unwrap();
        assert_eq!(stored.status, LabStatus::Ready);
    }
}
