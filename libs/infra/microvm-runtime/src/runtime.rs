// [libs/infra/microvm-runtime/src/runtime.rs]
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use octolab_domain_models::cause::{Cause, ErrorClass};
use octolab_domain_models::lab::Lab;
use octolab_domain_models::recipe::Recipe;
use octolab_guest_protocol::{wait_until_reachable, AgentClient, FallbackTransport, SerialTransport, VsockTransport};
use octolab_netd_proto::NetdClient;
use octolab_runtime::{ConnectionInfo, Handle, ProbeResult, Runtime, RuntimeError};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::error::VmmError;
use crate::vmm::Vmm;

const RUNTIME_KIND: &str = "microvm";

#[derive(Debug, Clone)]
pub struct MicroVmRuntimeConfig {
    pub state_root: PathBuf,
    pub base_rootfs_path: PathBuf,
    pub kernel_path: PathBuf,
    pub vmm_binary: String,
    pub vcpu_count: u8,
    pub mem_mib: u32,
    pub jailer_disabled: bool,
    pub socket_wait_timeout: Duration,
    pub agent_reach_timeout: Duration,
    pub agent_reach_retry_interval: Duration,
    pub vsock_port: u32,
    pub serial_device: String,
    pub serial_baud: u32,
    pub shutdown_timeout: Duration,
    pub ctrl_alt_del_timeout: Duration,
    pub halt_timeout: Duration,
}

impl Default for MicroVmRuntimeConfig {
    fn default() -> Self {
        MicroVmRuntimeConfig {
            state_root: PathBuf::from("/var/lib/octolab/microvm-labs"),
            base_rootfs_path: PathBuf::from("/var/lib/octolab/images/base-rootfs.img"),
            kernel_path: PathBuf::from("/var/lib/octolab/images/vmlinux"),
            vmm_binary: "firecracker".to_string(),
            vcpu_count: 2,
            mem_mib: 1024,
            jailer_disabled: false,
            socket_wait_timeout: Duration::from_secs(5),
            agent_reach_timeout: Duration::from_secs(30),
            agent_reach_retry_interval: Duration::from_millis(500),
            vsock_port: 9000,
            serial_device: "/dev/null".to_string(),
            serial_baud: 115_200,
            shutdown_timeout: Duration::from_secs(10),
            ctrl_alt_del_timeout: Duration::from_secs(5),
            halt_timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct MicroVmPayload {
    lab_id: String,
    state_dir: String,
    api_socket: String,
    vm_log: String,
    rootfs_path: String,
    compose_spec_path: String,
    token: String,
    vsock_cid: u32,
    bridge_name: String,
    tap_name: String,
    guest_ip: String,
    host_ip: String,
    exposed_ports: Vec<u16>,
    pid: Option<u32>,
}

pub struct MicroVmRuntime {
    config: MicroVmRuntimeConfig,
    vmm: Arc<dyn Vmm>,
    netd: Arc<NetdClient>,
}

impl MicroVmRuntime {
    pub fn new(config: MicroVmRuntimeConfig, vmm: Arc<dyn Vmm>, netd: Arc<NetdClient>) -> Self {
        MicroVmRuntime { config, vmm, netd }
    }

    fn agent_client(&self, payload: &MicroVmPayload) -> AgentClient {
        let transport = FallbackTransport {
            primary: VsockTransport { cid: payload.vsock_cid, port: self.config.vsock_port },
            fallback: SerialTransport { device_path: self.config.serial_device.clone(), baud_rate: self.config.serial_baud },
        };
        AgentClient::new(payload.token.clone(), Arc::new(transport))
    }

    fn render_compose(&self, recipe: &Recipe) -> String {
        let ports = recipe.exposed_ports.iter().map(|p| format!("      - \"{p}:{p}\"")).collect::<Vec<_>>().join("\n");
        format!("version: \"3.8\"\nservices:\n  target:\n    build: /opt/octolab/recipe\n    ports:\n{ports}\n  attacker:\n    image: octolab/attacker-workstation:latest\n")
    }
}

#[async_trait]
impl Runtime for MicroVmRuntime {
    #[instrument(skip(self, lab, recipe), fields(lab_id = %lab.id))]
    async fn prepare(&self, lab: &Lab, recipe: &Recipe) -> Result<Handle, RuntimeError> {
        let state_dir = self.config.state_root.join(&lab.id);
        tokio::fs::create_dir_all(&state_dir).await.map_err(|e| RuntimeError::Fatal(e.to_string()))?;
        set_restrictive_permissions(&state_dir).await;

        let rootfs_path = state_dir.join("rootfs.img");
        tokio::fs::copy(&self.config.base_rootfs_path, &rootfs_path).await.map_err(|e| RuntimeError::Fatal(format!("rootfs clone failed: {e}")))?;

        let allocation = self.netd.create_network(&lab.id).await.map_err(|e| {
            if e.is_transient() {
                RuntimeError::Transient(e.to_string())
            } else {
                RuntimeError::Fatal(e.to_string())
            }
        })?;

        let mut token_bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut token_bytes);
        let token = hex::encode(token_bytes);
        let token_file = state_dir.join("token.sealed");
        tokio::fs::write(&token_file, &token).await.map_err(|e| RuntimeError::Fatal(e.to_string()))?;
        set_restrictive_permissions(&token_file).await;

        let compose_spec_path = state_dir.join("compose.yml");
        tokio::fs::write(&compose_spec_path, self.render_compose(recipe)).await.map_err(|e| RuntimeError::Fatal(e.to_string()))?;

        let payload = MicroVmPayload {
            lab_id: lab.id.clone(),
            state_dir: state_dir.to_string_lossy().to_string(),
            api_socket: state_dir.join("api.sock").to_string_lossy().to_string(),
            vm_log: state_dir.join("vm.log").to_string_lossy().to_string(),
            rootfs_path: rootfs_path.to_string_lossy().to_string(),
            compose_spec_path: compose_spec_path.to_string_lossy().to_string(),
            token,
            vsock_cid: vsock_cid_for(&lab.id),
            bridge_name: allocation.bridge_name,
            tap_name: allocation.tap_name,
            guest_ip: allocation.guest_ip,
            host_ip: allocation.host_ip,
            exposed_ports: recipe.exposed_ports.clone(),
            pid: None,
        };

        let boot_config = serde_json::json!({
            "kernel_path": self.config.kernel_path,
            "rootfs_path": payload.rootfs_path,
            "tap": payload.tap_name,
            "boot_args": boot_args(&payload),
        });
        tokio::fs::write(state_dir.join("boot-config.json"), boot_config.to_string())
            .await
            .map_err(|e| RuntimeError::Fatal(e.to_string()))?;

        info!(state_dir = %payload.state_dir, "microvm lab prepared");
        Ok(Handle::new(RUNTIME_KIND, payload))
    }

    #[instrument(skip(self, handle))]
    async fn start(&self, handle: &Handle) -> Result<(), RuntimeError> {
        let mut payload: MicroVmPayload = handle.decode()?;
        let api_socket = PathBuf::from(&payload.api_socket);

        let pid = self
            .vmm
            .spawn(&self.config.vmm_binary, &api_socket, &PathBuf::from(&payload.vm_log), !self.config.jailer_disabled)
            .await
            .map_err(classify)?;
        payload.pid = Some(pid);

        self.vmm.wait_for_socket(&api_socket, self.config.socket_wait_timeout).await.map_err(classify)?;
        self.vmm.put_machine_config(&api_socket, self.config.vcpu_count, self.config.mem_mib).await.map_err(classify)?;
        self.vmm.put_boot_source(&api_socket, &self.config.kernel_path, &boot_args(&payload)).await.map_err(classify)?;
        self.vmm.put_root_drive(&api_socket, &PathBuf::from(&payload.rootfs_path)).await.map_err(classify)?;
        self.vmm.instance_start(&api_socket).await.map_err(classify)?;

        let client = self.agent_client(&payload);
        if let Err(e) = wait_until_reachable(&client, self.config.agent_reach_timeout, self.config.agent_reach_retry_interval).await {
            if !self.vmm.process_alive(pid).await {
                let tail = self.vmm.log_tail(&PathBuf::from(&payload.vm_log), 40).await;
                return Err(RuntimeError::Fatal(format!("vmm_exit: vmm process {pid} exited during boot: {tail}")));
            }
            return Err(RuntimeError::Transient(format!("guest agent never became reachable: {e}")));
        }

        let compose_spec = tokio::fs::read_to_string(&payload.compose_spec_path).await.map_err(|e| RuntimeError::Fatal(e.to_string()))?;
        client.setup(compose_spec).await.map_err(|e| RuntimeError::Fatal(format!("agent setup failed: {e}")))?;

        Ok(())
    }

    async fn probe(&self, handle: &Handle) -> Result<ProbeResult, RuntimeError> {
        let payload: MicroVmPayload = handle.decode()?;
        let client = self.agent_client(&payload);
        if client.ping().await.is_ok() {
            return Ok(ProbeResult::Ok);
        }

        let Some(pid) = payload.pid else {
            return Ok(ProbeResult::Dead(Some(Cause::new(ErrorClass::Fatal, "vmm_never_started", "no pid recorded"))));
        };
        if !self.vmm.process_alive(pid).await {
            let tail = self.vmm.log_tail(&PathBuf::from(&payload.vm_log), 40).await;
            return Ok(ProbeResult::Dead(Some(Cause::new(ErrorClass::Fatal, "vmm_exit", tail))));
        }
        if !PathBuf::from(&payload.api_socket).exists() {
            return Ok(ProbeResult::Dead(Some(Cause::new(
                ErrorClass::Fatal,
                "api_socket_missing",
                "vmm process is alive but its API socket is gone",
            ))));
        }
        Ok(ProbeResult::Unreachable)
    }

    #[instrument(skip(self, handle))]
    async fn stop(&self, handle: &Handle, reason: &str) -> Result<(), RuntimeError> {
        let payload: MicroVmPayload = handle.decode()?;
        info!(reason, "stopping microvm lab");
        let client = self.agent_client(&payload);

        if tokio::time::timeout(self.config.shutdown_timeout, client.shutdown()).await.is_err() {
            warn!("agent shutdown did not complete in time, escalating");
        }

        let api_socket = PathBuf::from(&payload.api_socket);
        if tokio::time::timeout(self.config.ctrl_alt_del_timeout, self.vmm.send_ctrl_alt_del(&api_socket)).await.is_err() {
            warn!("SendCtrlAltDel did not complete in time, escalating");
        }
        if tokio::time::timeout(self.config.halt_timeout, self.vmm.instance_halt(&api_socket)).await.is_err() {
            warn!("InstanceHalt did not complete in time, escalating to SIGKILL");
        }
        if let Some(pid) = payload.pid {
            self.vmm.kill_process(pid).await;
        }
        Ok(())
    }

    #[instrument(skip(self, handle))]
    async fn destroy(&self, handle: &Handle) {
        let payload: MicroVmPayload = match handle.decode() {
            Ok(p) => p,
            Err(err) => {
                warn!(%err, "cannot decode handle during destroy, nothing to clean up");
                return;
            }
        };
        if let Some(pid) = payload.pid {
            self.vmm.kill_process(pid).await;
        }
        if let Err(err) = tokio::fs::remove_dir_all(&payload.state_dir).await {
            warn!(%err, "state directory removal failed during destroy");
        }
        if let Err(err) = self.netd.destroy_network(&payload.lab_id).await {
            warn!(%err, "network destruction failed during destroy");
        }
    }

    async fn connection_info(&self, handle: &Handle) -> Result<ConnectionInfo, RuntimeError> {
        let payload: MicroVmPayload = handle.decode()?;
        Ok(ConnectionInfo { remote_desktop_url: format!("rdp://{}:3389", payload.guest_ip), exposed_ports: payload.exposed_ports })
    }
}

fn boot_args(payload: &MicroVmPayload) -> String {
    format!("octolab.token={} ip={}::{}:255.255.255.252::eth0:off", payload.token, payload.guest_ip, payload.host_ip)
}

fn vsock_cid_for(lab_id: &str) -> u32 {
    let mut hash: u32 = 2166136261;
    for byte in lab_id.bytes() {
        hash ^= byte as u32;
        hash = hash.wrapping_mul(16777619);
    }
    // CIDs 0-2 are reserved (hypervisor, local, host); keep clear of them.
    3 + (hash % (u32::MAX - 3))
}

async fn set_restrictive_permissions(path: &std::path::Path) {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Ok(metadata) = tokio::fs::metadata(path).await {
            let mut perms = metadata.permissions();
            perms.set_mode(0o600);
            let _ = tokio::fs::set_permissions(path, perms).await;
        }
    }
}

fn classify(err: VmmError) -> RuntimeError {
    if err.is_transient() {
        RuntimeError::Transient(err.to_string())
    } else {
        RuntimeError::Fatal(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vmm::mock::MockVmm;
    use octolab_domain_models::lab::{LabStatus, RuntimeKind};
    use octolab_domain_models::recipe::{ReviewState, SourceFile};

    fn sample_lab() -> Lab {
        Lab {
            id: "lab-1".to_string(),
            owner_id: "user-1".to_string(),
            recipe_id: "recipe-1".to_string(),
            status: LabStatus::Provisioning,
            runtime_kind: RuntimeKind::MicroVm,
            backend_handle: None,
            connection_url: None,
            expires_at: None,
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
            build_id: None,
            cause: None,
        }
    }

    fn sample_recipe() -> Recipe {
        Recipe {
            id: "recipe-1".to_string(),
            name: "httpd path traversal".to_string(),
            software: "apache-httpd".to_string(),
            version_constraint: "=2.4.49".to_string(),
            exploit_family: "path-traversal".to_string(),
            base_image: "httpd:2.4.49".to_string(),
            dockerfile: "FROM httpd:2.4.49\n".to_string(),
            source_files: vec![SourceFile { path: "httpd.conf".to_string(), contents: b"Listen 80".to_vec() }],
            exposed_ports: vec![80],
            exploit_hint: "CVE-2021-41773".to_string(),
            aliases: vec!["CVE-2021-41773".to_string()],
            review_state: ReviewState::Approved,
        }
    }

    #[tokio::test]
    async fn prepare_writes_state_dir_and_token() {
        let state_dir = tempfile::tempdir().unwrap();
        let base_rootfs = tempfile::NamedTempFile::new().unwrap();
        tokio::fs::write(base_rootfs.path(), b"fake-rootfs").await.unwrap();

        let netd = Arc::new(NetdClient::new(tempfile::tempdir().unwrap().path().join("netd.sock")));
        let config = MicroVmRuntimeConfig {
            state_root: state_dir.path().to_path_buf(),
            base_rootfs_path: base_rootfs.path().to_path_buf(),
            ..Default::default()
        };
        let runtime = MicroVmRuntime::new(config, Arc::new(MockVmm::default()), netd);

        // create_network will fail against a nonexistent socket; prepare
        // should surface that as a runtime error rather than panic.
        let result = runtime.prepare(&sample_lab(), &sample_recipe()).await;
        assert!(result.is_err());
    }

    #[test]
    fn vsock_cid_is_stable_and_above_reserved_range() {
        let a = vsock_cid_for("lab-1");
        let b = vsock_cid_for("lab-1");
        assert_eq!(a, b);
        assert!(a > 2);
    }
}
