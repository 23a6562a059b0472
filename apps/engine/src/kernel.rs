// [apps/engine/src/kernel.rs]
//! Composition root. Wires the repository, the selected runtime, and
//! every background worker, then serves the admin HTTP surface. Grounded
//! on the teacher's `OrchestratorKernel::ignite` / `launch_sovereign_operations`
//! split between "connect to the outside world" and "start everything".

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use octolab_compose_runtime::{ComposeRuntime, ComposeRuntimeConfig, ShellContainerEngine};
use octolab_evidence::BundleSigner;
use octolab_microvm_runtime::{MicroVmRuntime, MicroVmRuntimeConfig, ProcessVmm};
use octolab_netd_proto::NetdClient;
use octolab_policy::Role;
use octolab_repository::{InMemoryRepository, LibsqlRepository, RepositoryPort};
use octolab_runtime::{NoopRuntime, Runtime};
use tokio::sync::{mpsc, Mutex};
use tracing::{error, info};

use crate::build_cache_adapter::RepositoryBuildCache;
use crate::config::{EngineConfig, RuntimeSelection};
use crate::locks::LabLocks;
use crate::state::EngineState;
use crate::{doctor, expiry, health, provisioning, reconcile, router, teardown};

pub struct Kernel {
    state: Arc<EngineState>,
}

impl Kernel {
    pub async fn ignite(config: EngineConfig) -> Self {
        let repository: Arc<dyn RepositoryPort> = match config.runtime {
            RuntimeSelection::Noop => Arc::new(InMemoryRepository::new()),
            _ => Arc::new(
                LibsqlRepository::connect(&config.database_url, config.database_auth_token.clone())
                    .await
                    .expect("database connection failed, cannot start"),
            ),
        };

        let netd = Arc::new(NetdClient::new(config.netd_socket_path.clone()));
        let runtime: Arc<dyn Runtime> = Self::build_runtime(&config, repository.clone(), netd.clone());

        let (provision_tx, provision_rx) = mpsc::channel(256);
        let (teardown_tx, teardown_rx) = mpsc::channel(256);
        let role = Role::standard(&config.policy_config());

        let state = Arc::new(EngineState {
            policy_config: config.policy_config(),
            role,
            repository,
            runtime,
            netd,
            signer: BundleSigner::new(config.evidence_signing_secret.clone().into_bytes()),
            lab_locks: LabLocks::default(),
            provision_tx,
            teardown_tx,
            unreachable_streaks: Mutex::new(HashMap::new()),
            config,
        });

        let report = doctor::run(&state.config).await;
        if !report.is_healthy() {
            for check in &report.checks {
                if !check.passed {
                    error!(check = %check.name, detail = %check.detail, "preflight check failed");
                }
            }
            panic!("preflight failed, refusing to start");
        }

        reconcile::run(&state).await;

        provisioning::spawn_pool(state.clone(), provision_rx, state.config.provisioning_pool_size);
        teardown::spawn_pool(state.clone(), teardown_rx, state.config.teardown_pool_size);

        Kernel { state }
    }

    fn build_runtime(config: &EngineConfig, repository: Arc<dyn RepositoryPort>, netd: Arc<NetdClient>) -> Arc<dyn Runtime> {
        match config.runtime {
            RuntimeSelection::Noop => Arc::new(NoopRuntime::default()),
            RuntimeSelection::Compose => {
                let build_cache = Arc::new(RepositoryBuildCache::new(repository));
                let engine = Arc::new(ShellContainerEngine::default());
                Arc::new(ComposeRuntime::new(ComposeRuntimeConfig::default(), engine, build_cache))
            }
            RuntimeSelection::MicroVm => {
                let vmm_config = MicroVmRuntimeConfig {
                    state_root: config.state_root.clone().into(),
                    base_rootfs_path: config.base_rootfs_path.clone().into(),
                    kernel_path: config.kernel_path.clone().into(),
                    vmm_binary: "firecracker".to_string(),
                    vcpu_count: config.vcpu_count as u8,
                    mem_mib: config.mem_mib,
                    jailer_disabled: config.jailer_disabled,
                    socket_wait_timeout: config.boot_timeout,
                    agent_reach_timeout: config.boot_timeout,
                    agent_reach_retry_interval: std::time::Duration::from_millis(500),
                    vsock_port: 52,
                    serial_device: "/dev/ttyS0".to_string(),
                    serial_baud: 115200,
                    shutdown_timeout: config.teardown_budget,
                    ctrl_alt_del_timeout: std::time::Duration::from_secs(5),
                    halt_timeout: std::time::Duration::from_secs(5),
                };
                Arc::new(MicroVmRuntime::new(vmm_config, Arc::new(ProcessVmm), netd))
            }
        }
    }

    pub async fn run(self) {
        health::spawn(self.state.clone());
        expiry::spawn(self.state.clone());

        let app = router::build(self.state.clone());
        let addr = SocketAddr::new(IpAddr::from([0, 0, 0, 0]), self.state.config.admin_port);
        info!(%addr, "admin surface listening");

        let listener = tokio::net::TcpListener::bind(addr).await.expect("failed to bind admin port");
        if let Err(err) = axum::serve(listener, app).await {
            error!(%err, "admin server exited");
            std::process::exit(1);
        }
    }

    pub fn handle(&self) -> crate::handle::EngineHandle {
        crate::handle::EngineHandle::new(self.state.clone())
    }
}
