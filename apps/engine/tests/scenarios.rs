// [apps/engine/tests/scenarios.rs]
//! End-to-end scenarios against the Noop runtime + in-memory repository
//! stack, driving provisioning/teardown/expiry synchronously rather than
//! racing the background tickers, so outcomes are deterministic.

#![cfg(feature = "test-support")]

use chrono::Utc;
use octolab_engine::error::EngineError;
use octolab_engine::test_support::{drive_expiry_sweep, drive_provisioning, drive_teardown, test_engine_state};
use octolab_engine::EngineHandle;
use octolab_domain_models::intent::{Intent, Severity};
use octolab_domain_models::lab::LabStatus;
use octolab_domain_models::recipe::{Recipe, ReviewState, SourceFile};

fn approved_intent() -> Intent {
    Intent {
        software: "apache-httpd".to_string(),
        version: "2.4.49".to_string(),
        exploit_family: "path-traversal".to_string(),
        notes: None,
        severity: Severity::Low,
        ttl_minutes: 60,
        cve_reference: Some("CVE-2021-41773".to_string()),
        justification: None,
        acknowledgement: false,
    }
}

fn approved_recipe(id: &str) -> Recipe {
    Recipe {
        id: id.to_string(),
        name: "httpd-cve-2021-41773".to_string(),
        software: "apache-httpd".to_string(),
        version_constraint: "=2.4.49".to_string(),
        exploit_family: "path-traversal".to_string(),
        base_image: "httpd:2.4.49".to_string(),
        dockerfile: "FROM httpd:2.4.49\n".to_string(),
        source_files: vec![SourceFile { path: "httpd.conf".to_string(), contents: b"ok".to_vec() }],
        exposed_ports: vec![80],
        exploit_hint: "CVE-2021-41773".to_string(),
        aliases: vec!["CVE-2021-41773".to_string()],
        review_state: ReviewState::Approved,
    }
}

fn recipe_id(intent: &Intent) -> String {
    format!("{}-{}-{}", intent.software, intent.version, intent.exploit_family)
}

/// S1 — happy path: REQUESTED -> READY with a connection URL, then (once
/// a lab is past its `expires_at`) an expiry sweep moves it to ENDING and
/// teardown lands it on FINISHED with cause `ttl_expired`.
#[tokio::test]
async fn s1_happy_path_reaches_finished_on_expiry() {
    use octolab_domain_models::lab::{Lab, RuntimeKind};

    let (state, _provision_rx, mut teardown_rx) = test_engine_state();
    let intent = approved_intent();
    state.repository.put_recipe(approved_recipe(&recipe_id(&intent))).await.unwrap();
    let handle = EngineHandle::new(state.clone());

    let lab = handle.create_lab("u1", intent).await.unwrap();
    assert_eq!(lab.status, LabStatus::Requested);

    drive_provisioning(&state, &lab.id).await;
    let ready = state.repository.get_lab(&lab.id).await.unwrap().unwrap();
    assert_eq!(ready.status, LabStatus::Ready);
    assert!(ready.connection_url.is_some());

    // a second lab, already past its expires_at, stands in for the first
    // one ttl minutes later: `expires_at` only ever moves forward through
    // the public API, so this is the deterministic way to exercise the
    // expiry->teardown leg of the same path without a real 60-minute wait.
    let now = Utc::now();
    let expired = Lab {
        id: "s1-expired".to_string(),
        owner_id: "u1".to_string(),
        recipe_id: ready.recipe_id.clone(),
        status: LabStatus::Ready,
        runtime_kind: RuntimeKind::Noop,
        backend_handle: None,
        connection_url: ready.connection_url.clone(),
        expires_at: Some(now - chrono::Duration::minutes(1)),
        created_at: now - chrono::Duration::hours(1),
        updated_at: now - chrono::Duration::hours(1),
        build_id: None,
        cause: None,
    };
    state.repository.create_lab(expired.clone()).await.unwrap();

    drive_expiry_sweep(&state).await;
    let ending = state.repository.get_lab(&expired.id).await.unwrap().unwrap();
    assert_eq!(ending.status, LabStatus::Ending);
    assert_eq!(ending.cause.as_ref().unwrap().tag, "ttl_expired");
    let task = teardown_rx.recv().await.unwrap();
    assert_eq!(task.lab_id, expired.id);

    drive_teardown(&state, &expired.id).await;
    let finished = state.repository.get_lab(&expired.id).await.unwrap().unwrap();
    assert_eq!(finished.status, LabStatus::Finished);
}

/// S2 — quota exceeded: a third intent from an owner already at quota is
/// denied and creates no row.
#[tokio::test]
async fn s2_quota_exceeded_denies_without_creating_a_row() {
    let (state, _provision_rx, _teardown_rx) = test_engine_state();
    let handle = EngineHandle::new(state.clone());

    for _ in 0..2 {
        let intent = approved_intent();
        let _ = state.repository.put_recipe(approved_recipe(&recipe_id(&intent))).await;
        handle.create_lab("u2", intent).await.unwrap();
    }

    let before = state.repository.list_active_by_owner("u2").await.unwrap().len();
    let result = handle.create_lab("u2", approved_intent()).await;
    assert!(matches!(result, Err(EngineError::PolicyDenied(_))));
    let after = state.repository.list_active_by_owner("u2").await.unwrap().len();
    assert_eq!(before, after);
}

/// S3 — concurrent stop and expiry race: whichever CAS lands first wins;
/// the other observes `StaleState` and is a no-op; exactly one teardown
/// run reaches FINISHED.
#[tokio::test]
async fn s3_stop_and_expiry_race_converge_on_one_teardown() {
    let (state, _provision_rx, _teardown_rx) = test_engine_state();
    let intent = approved_intent();
    state.repository.put_recipe(approved_recipe(&recipe_id(&intent))).await.unwrap();
    let handle = EngineHandle::new(state.clone());

    let lab = handle.create_lab("u1", intent).await.unwrap();
    drive_provisioning(&state, &lab.id).await;

    // caller-stop wins the race
    let stopped = handle.stop_lab("u1", &lab.id).await.unwrap();
    assert_eq!(stopped.status, LabStatus::Ending);

    // expiry arrives a moment later against the same lab; it must not
    // find a READY/DEGRADED row to act on any more
    drive_expiry_sweep(&state).await;
    let after_race = state.repository.get_lab(&lab.id).await.unwrap().unwrap();
    assert_eq!(after_race.status, LabStatus::Ending);
    assert_eq!(after_race.cause.as_ref().unwrap().tag, "user_stop");

    drive_teardown(&state, &lab.id).await;
    let final_lab = state.repository.get_lab(&lab.id).await.unwrap().unwrap();
    assert_eq!(final_lab.status, LabStatus::Finished);
}

/// S4 — microVM boot failure: the VMM process dies before the guest
/// agent ever becomes reachable. `PROVISIONING` -> `FAILED` with a cause
/// tag of `runtime_fatal` and a detail containing `vmm_exit`; the
/// network C3 allocated for the lab is destroyed by teardown, so a
/// follow-up `list_networks` call has no entry for it.
#[tokio::test]
async fn s4_microvm_boot_failure_fails_and_tears_down_the_network() {
    use async_trait::async_trait;
    use octolab_domain_models::lab::{Lab, RuntimeKind};
    use octolab_engine::config::RuntimeSelection;
    use octolab_engine::test_support::{drive_teardown, test_engine_config};
    use octolab_microvm_runtime::{MicroVmRuntime, MicroVmRuntimeConfig, VmmError};
    use octolab_microvm_runtime::vmm::Vmm;
    use octolab_netd::config::NetdConfig;
    use octolab_netd::link::mock::MockLinkManager;
    use octolab_netd::store::AllocationStore;
    use octolab_netd_proto::NetdClient;
    use octolab_repository::InMemoryRepository;
    use octolab_evidence::BundleSigner;
    use octolab_engine::locks::LabLocks;
    use octolab_engine::state::EngineState;
    use std::net::Ipv4Addr;
    use std::path::Path;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::{mpsc, Mutex};

    struct DeadOnBootVmm;

    #[async_trait]
    impl Vmm for DeadOnBootVmm {
        async fn spawn(&self, _binary: &str, _api_socket: &Path, _log_path: &Path, _jailer_disabled: bool) -> Result<u32, VmmError> {
            Ok(1)
        }
        async fn wait_for_socket(&self, api_socket: &Path, _timeout: Duration) -> Result<(), VmmError> {
            tokio::fs::write(api_socket, b"").await?;
            Ok(())
        }
        async fn put_machine_config(&self, _api_socket: &Path, _vcpu_count: u8, _mem_mib: u32) -> Result<(), VmmError> {
            Ok(())
        }
        async fn put_boot_source(&self, _api_socket: &Path, _kernel_path: &Path, _boot_args: &str) -> Result<(), VmmError> {
            Ok(())
        }
        async fn put_root_drive(&self, _api_socket: &Path, _rootfs_path: &Path) -> Result<(), VmmError> {
            Ok(())
        }
        async fn instance_start(&self, _api_socket: &Path) -> Result<(), VmmError> {
            Ok(())
        }
        async fn send_ctrl_alt_del(&self, _api_socket: &Path) -> Result<(), VmmError> {
            Ok(())
        }
        async fn instance_halt(&self, _api_socket: &Path) -> Result<(), VmmError> {
            Ok(())
        }
        async fn process_alive(&self, _pid: u32) -> bool {
            false
        }
        async fn kill_process(&self, _pid: u32) {}
        async fn log_tail(&self, _log_path: &Path, _lines: usize) -> String {
            "firecracker: fatal error during boot".to_string()
        }
    }

    let netd_dir = tempfile::tempdir().unwrap();
    let socket_path = netd_dir.path().join("netd.sock");
    let netd_config = NetdConfig {
        socket_path: socket_path.clone(),
        allocation_log_path: netd_dir.path().join("alloc.jsonl"),
        pool_base: Ipv4Addr::new(10, 201, 0, 0),
        pool_prefix_len: 16,
    };
    let store = AllocationStore::load_or_create(&netd_config.allocation_log_path).unwrap();
    let links: Arc<dyn octolab_netd::link::LinkManager> = Arc::new(MockLinkManager::default());
    tokio::spawn(octolab_netd::server::serve(netd_config, store, links));
    // give the listener a moment to bind, same allowance the netd client's
    // own tests give their in-process echo servers
    tokio::time::sleep(Duration::from_millis(20)).await;

    let netd_client = Arc::new(NetdClient::new(&socket_path));

    let vm_state_root = tempfile::tempdir().unwrap();
    let base_rootfs = tempfile::NamedTempFile::new().unwrap();
    tokio::fs::write(base_rootfs.path(), b"fake-rootfs").await.unwrap();
    let kernel = tempfile::NamedTempFile::new().unwrap();
    tokio::fs::write(kernel.path(), b"fake-kernel").await.unwrap();

    let runtime_config = MicroVmRuntimeConfig {
        state_root: vm_state_root.path().to_path_buf(),
        base_rootfs_path: base_rootfs.path().to_path_buf(),
        kernel_path: kernel.path().to_path_buf(),
        agent_reach_timeout: Duration::from_millis(200),
        agent_reach_retry_interval: Duration::from_millis(20),
        ..Default::default()
    };
    let runtime = Arc::new(MicroVmRuntime::new(runtime_config, Arc::new(DeadOnBootVmm), netd_client.clone()));

    let mut config = test_engine_config();
    config.runtime = RuntimeSelection::MicroVm;
    let role = octolab_policy::Role::standard(&config.policy_config());
    let (provision_tx, _provision_rx) = mpsc::channel(8);
    let (teardown_tx, mut teardown_rx) = mpsc::channel(8);

    let state = Arc::new(EngineState {
        policy_config: config.policy_config(),
        role,
        repository: Arc::new(InMemoryRepository::new()),
        runtime,
        netd: netd_client,
        signer: BundleSigner::new(config.evidence_signing_secret.clone().into_bytes()),
        lab_locks: LabLocks::default(),
        provision_tx,
        teardown_tx,
        unreachable_streaks: Mutex::new(Default::default()),
        config,
    });

    let recipe = approved_recipe("httpd-microvm");
    state.repository.put_recipe(recipe.clone()).await.unwrap();
    let now = Utc::now();
    let lab = Lab {
        id: "s4-lab".to_string(),
        owner_id: "u1".to_string(),
        recipe_id: recipe.id.clone(),
        status: LabStatus::Requested,
        runtime_kind: RuntimeKind::MicroVm,
        backend_handle: None,
        connection_url: None,
        expires_at: Some(now + chrono::Duration::minutes(60)),
        created_at: now,
        updated_at: now,
        build_id: None,
        cause: None,
    };
    state.repository.create_lab(lab.clone()).await.unwrap();

    drive_provisioning(&state, &lab.id).await;

    let failed = state.repository.get_lab(&lab.id).await.unwrap().unwrap();
    assert_eq!(failed.status, LabStatus::Failed);
    let cause = failed.cause.unwrap();
    assert_eq!(cause.tag, "runtime_fatal");
    assert!(cause.detail.contains("vmm_exit"), "detail was: {}", cause.detail);

    let task = teardown_rx.recv().await.unwrap();
    assert_eq!(task.lab_id, lab.id);
    drive_teardown(&state, &lab.id).await;

    let networks = state.netd.list_networks().await.unwrap();
    assert!(networks.iter().all(|n| n.lab_id != lab.id));
}

/// S5 — daemon restart mid-lab: netd's on-disk allocation log survives a
/// restart; replaying it via `reconcile` recreates any missing devices
/// without the engine observing anything. The lab's own health probe,
/// which never touches C3 directly, is unaffected either way.
#[tokio::test]
async fn s5_netd_restart_replays_log_without_disturbing_a_ready_lab() {
    use octolab_engine::test_support::drive_health_probe;
    use octolab_netd::link::mock::MockLinkManager;
    use octolab_netd::store::{self, AllocationStore, AllocationRecord};
    use std::net::Ipv4Addr;

    let dir = tempfile::tempdir().unwrap();
    let log_path = dir.path().join("alloc.jsonl");

    let record = AllocationRecord {
        lab_id: "s5-lab".to_string(),
        bridge_name: "obrs5lab".to_string(),
        tap_name: "otps5lab".to_string(),
        host_ip: Ipv4Addr::new(10, 202, 0, 1),
        guest_ip: Ipv4Addr::new(10, 202, 0, 2),
        netmask: Ipv4Addr::new(255, 255, 255, 252),
        block_index: 0,
    };
    let before_restart = AllocationStore::load_or_create(&log_path).unwrap();
    before_restart.record(record.clone()).unwrap();
    drop(before_restart);

    // simulate the daemon process restarting: a fresh store replays the
    // same on-disk log, and reconcile recreates any devices the (mocked)
    // link layer no longer reports as present.
    let after_restart = AllocationStore::load_or_create(&log_path).unwrap();
    assert_eq!(after_restart.get(&record.lab_id), Some(record.clone()));

    let links = MockLinkManager::default();
    let report = store::reconcile(&after_restart, &links).await.unwrap();
    assert_eq!(report.recreated, 1);
    assert_eq!(report.dropped, 0);
    assert!(links.devices.lock().unwrap().contains(&record.bridge_name));
    assert!(links.devices.lock().unwrap().contains(&record.tap_name));

    // the engine side never talks to netd during a health probe (only
    // during prepare/destroy), so a restart there has no bearing on an
    // already-ready lab's probe outcome.
    let (state, _provision_rx, _teardown_rx) = test_engine_state();
    use octolab_domain_models::lab::{Lab, RuntimeKind};
    use octolab_runtime::Handle;
    let now = Utc::now();
    let handle = Handle::new("noop", serde_json::json!({"lab_id": "s5-lab"}));
    let lab = Lab {
        id: "s5-lab".to_string(),
        owner_id: "u1".to_string(),
        recipe_id: "r1".to_string(),
        status: LabStatus::Ready,
        runtime_kind: RuntimeKind::Noop,
        backend_handle: Some(octolab_engine::handle_codec::encode(&handle)),
        connection_url: Some("noop://s5-lab".to_string()),
        expires_at: Some(now + chrono::Duration::minutes(60)),
        created_at: now,
        updated_at: now,
        build_id: None,
        cause: None,
    };
    state.repository.create_lab(lab.clone()).await.unwrap();

    drive_health_probe(&state, &lab.id).await;

    let stored = state.repository.get_lab(&lab.id).await.unwrap().unwrap();
    assert_eq!(stored.status, LabStatus::Ready);
}

/// S6 — bundle integrity: a verified fetch's MAC verifies, and every
/// manifest entry's recorded sha256 is exactly what was stored.
#[tokio::test]
async fn s6_verified_bundle_mac_covers_the_stored_manifest() {
    use octolab_domain_models::evidence::{ContainerRecord, EvidenceBundle, EvidenceFile, Trust};

    let (state, _provision_rx, _teardown_rx) = test_engine_state();
    let intent = approved_intent();
    state.repository.put_recipe(approved_recipe(&recipe_id(&intent))).await.unwrap();
    let handle = EngineHandle::new(state.clone());
    let lab = handle.create_lab("u1", intent).await.unwrap();
    drive_provisioning(&state, &lab.id).await;

    let bundle = EvidenceBundle {
        lab_id: lab.id.clone(),
        generated_at: Utc::now(),
        files: vec![EvidenceFile { path: "session.log".to_string(), sha256: "abc123".to_string(), size: 6, trust: Trust::Authoritative }],
        containers: vec![ContainerRecord { name: "target".to_string(), image: "httpd:2.4.49".to_string(), status: "exited".to_string() }],
        mac: None,
    };
    state.repository.put_bundle(bundle.clone()).await.unwrap();

    let verified = handle.fetch_verified_evidence("u1", &lab.id).await.unwrap();
    assert!(verified.mac.is_some());
    assert!(state.signer.verify(&verified));
    assert_eq!(verified.files, bundle.files);

    let non_owner = handle.fetch_verified_evidence("mallory", &lab.id).await;
    assert!(matches!(non_owner, Err(EngineError::Evidence(_))));
}
