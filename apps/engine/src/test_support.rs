// [apps/engine/src/test_support.rs]
//! Builders for unit and scenario tests: an `EngineState` wired to
//! `InMemoryRepository` + `NoopRuntime`, exactly the stack spec.md §2.4
//! names for testing the lifecycle engine without a database or host
//! resources.

use std::sync::Arc;
use std::time::Duration;

use octolab_evidence::BundleSigner;
use octolab_netd_proto::client::RetryPolicy as NetdRetryPolicy;
use octolab_netd_proto::NetdClient;
use octolab_policy::Role;
use octolab_repository::InMemoryRepository;
use octolab_runtime::NoopRuntime;
use tokio::sync::{mpsc, Mutex};

use crate::config::{EngineConfig, RuntimeSelection};
use crate::locks::LabLocks;
use crate::state::{EngineState, ProvisionTask, TeardownTask};

pub fn test_engine_config() -> EngineConfig {
    let mut config = EngineConfig::from_env();
    config.runtime = RuntimeSelection::Noop;
    config.max_active_per_user = 2;
    config.default_ttl_minutes = 60;
    config.max_ttl_minutes = 480;
    config.netd_socket_path = "/nonexistent/octolab-test.sock".to_string();
    config
}

pub fn test_engine_state() -> (Arc<EngineState>, mpsc::Receiver<ProvisionTask>, mpsc::Receiver<TeardownTask>) {
    let config = test_engine_config();
    let (provision_tx, provision_rx) = mpsc::channel(64);
    let (teardown_tx, teardown_rx) = mpsc::channel(64);
    let role = Role::standard(&config.policy_config());

    let state = Arc::new(EngineState {
        policy_config: config.policy_config(),
        role,
        repository: Arc::new(InMemoryRepository::new()),
        runtime: Arc::new(NoopRuntime::default()),
        netd: Arc::new(NetdClient::new(config.netd_socket_path.clone()).with_retry_policy(NetdRetryPolicy {
            max_attempts: 1,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
        })),
        signer: BundleSigner::new(config.evidence_signing_secret.clone().into_bytes()),
        lab_locks: LabLocks::default(),
        provision_tx,
        teardown_tx,
        unreachable_streaks: Mutex::new(Default::default()),
        config,
    });

    (state, provision_rx, teardown_rx)
}

/// Drives one provisioning attempt synchronously, bypassing the worker
/// pool's channel. For integration tests that need deterministic control
/// over when a lab advances rather than racing a background task.
pub async fn drive_provisioning(state: &Arc<EngineState>, lab_id: &str) {
    crate::provisioning::provision_one(state, lab_id).await;
}

pub async fn drive_teardown(state: &Arc<EngineState>, lab_id: &str) {
    crate::teardown::teardown_one(state, lab_id).await;
}

pub async fn drive_expiry_sweep(state: &Arc<EngineState>) {
    crate::expiry::sweep(state).await;
}

pub async fn drive_health_probe(state: &Arc<EngineState>, lab_id: &str) {
    crate::health::probe_one(state, lab_id).await;
}
