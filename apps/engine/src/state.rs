// [apps/engine/src/state.rs]
//! Shared, `Arc`-wrapped engine state. Everything cross-worker lives here;
//! each worker otherwise owns its loop locally, matching the teacher's
//! `AppState` composition (one clonable handle threaded into every daemon).

use std::collections::HashMap;
use std::sync::Arc;

use octolab_evidence::BundleSigner;
use octolab_netd_proto::NetdClient;
use octolab_policy::{PolicyConfig, Role};
use octolab_repository::RepositoryPort;
use octolab_runtime::Runtime;
use tokio::sync::{mpsc, Mutex};

use crate::config::EngineConfig;
use crate::locks::LabLocks;

#[derive(Debug, Clone)]
pub struct ProvisionTask {
    pub lab_id: String,
}

#[derive(Debug, Clone)]
pub struct TeardownTask {
    pub lab_id: String,
}

pub struct EngineState {
    pub config: EngineConfig,
    pub repository: Arc<dyn RepositoryPort>,
    pub runtime: Arc<dyn Runtime>,
    pub netd: Arc<NetdClient>,
    pub policy_config: PolicyConfig,
    pub role: Role,
    pub signer: BundleSigner,
    pub lab_locks: LabLocks,
    pub provision_tx: mpsc::Sender<ProvisionTask>,
    pub teardown_tx: mpsc::Sender<TeardownTask>,
    /// Consecutive-unreachable counters for the health ticker's N-strikes
    /// rule (spec §4.7); reset to zero on any `ok` probe.
    pub unreachable_streaks: Mutex<HashMap<String, u32>>,
}

impl EngineState {
    pub async fn note_unreachable(&self, lab_id: &str) -> u32 {
        let mut streaks = self.unreachable_streaks.lock().await;
        let count = streaks.entry(lab_id.to_string()).or_insert(0);
        *count += 1;
        *count
    }

    pub async fn clear_unreachable(&self, lab_id: &str) {
        self.unreachable_streaks.lock().await.remove(lab_id);
    }
}
