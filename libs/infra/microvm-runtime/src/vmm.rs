// [libs/infra/microvm-runtime/src/vmm.rs]
//! `Vmm` is the seam between the microVM runtime's lifecycle logic and
//! an actual VMM (a Firecracker-shaped REST API over a Unix socket:
//! `machine-config`, `boot-source`, `drives/rootfs`, `actions`).

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use hyper::{Body, Client, Method, Request};
use hyperlocal::UnixClientExt;
use tracing::warn;

use crate::error::VmmError;

#[async_trait]
pub trait Vmm: Send + Sync {
    async fn spawn(&self, binary: &str, api_socket: &Path, log_path: &Path, jailer_disabled: bool) -> Result<u32, VmmError>;
    async fn wait_for_socket(&self, api_socket: &Path, timeout: Duration) -> Result<(), VmmError>;
    async fn put_machine_config(&self, api_socket: &Path, vcpu_count: u8, mem_mib: u32) -> Result<(), VmmError>;
    async fn put_boot_source(&self, api_socket: &Path, kernel_path: &Path, boot_args: &str) -> Result<(), VmmError>;
    async fn put_root_drive(&self, api_socket: &Path, rootfs_path: &Path) -> Result<(), VmmError>;
    async fn instance_start(&self, api_socket: &Path) -> Result<(), VmmError>;
    async fn send_ctrl_alt_del(&self, api_socket: &Path) -> Result<(), VmmError>;
    async fn instance_halt(&self, api_socket: &Path) -> Result<(), VmmError>;
    async fn process_alive(&self, pid: u32) -> bool;
    async fn kill_process(&self, pid: u32);
    async fn log_tail(&self, log_path: &Path, lines: usize) -> String;
}

pub struct ProcessVmm;

impl ProcessVmm {
    async fn put(&self, api_socket: &Path, uri_path: &str, body: serde_json::Value) -> Result<(), VmmError> {
        let client: Client<hyperlocal::UnixConnector, Body> = Client::unix();
        let uri: hyper::Uri = hyperlocal::Uri::new(api_socket, uri_path).into();
        let request = Request::builder()
            .method(Method::PUT)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .map_err(|e| VmmError::ApiCallFailed(e.to_string()))?;
        let response = client.request(request).await.map_err(|e| VmmError::ApiCallFailed(e.to_string()))?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(VmmError::ApiCallFailed(format!("{uri_path} returned {}", response.status())))
        }
    }
}

#[async_trait]
impl Vmm for ProcessVmm {
    async fn spawn(&self, binary: &str, api_socket: &Path, log_path: &Path, jailer_disabled: bool) -> Result<u32, VmmError> {
        if !jailer_disabled {
            warn!("jailer sandbox helper is disabled by configuration, not by code path — see doctor checks");
        }
        let log_file = std::fs::File::create(log_path)?;
        let child = tokio::process::Command::new(binary)
            .arg("--api-sock")
            .arg(api_socket)
            .stdout(std::process::Stdio::from(log_file.try_clone()?))
            .stderr(std::process::Stdio::from(log_file))
            .spawn()
            .map_err(|e| VmmError::SpawnFailed(e.to_string()))?;
        let pid = child.id().ok_or_else(|| VmmError::SpawnFailed("process exited immediately".to_string()))?;
        // Detach: the runtime tracks liveness by pid, not by holding the Child.
        std::mem::forget(child);
        Ok(pid)
    }

    async fn wait_for_socket(&self, api_socket: &Path, timeout: Duration) -> Result<(), VmmError> {
        let deadline = tokio::time::Instant::now() + timeout;
        while tokio::time::Instant::now() < deadline {
            if api_socket.exists() {
                return Ok(());
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        Err(VmmError::SocketTimeout)
    }

    async fn put_machine_config(&self, api_socket: &Path, vcpu_count: u8, mem_mib: u32) -> Result<(), VmmError> {
        self.put(api_socket, "/machine-config", serde_json::json!({"vcpu_count": vcpu_count, "mem_size_mib": mem_mib})).await
    }

    async fn put_boot_source(&self, api_socket: &Path, kernel_path: &Path, boot_args: &str) -> Result<(), VmmError> {
        self.put(
            api_socket,
            "/boot-source",
            serde_json::json!({"kernel_image_path": kernel_path.to_string_lossy(), "boot_args": boot_args}),
        )
        .await
    }

    async fn put_root_drive(&self, api_socket: &Path, rootfs_path: &Path) -> Result<(), VmmError> {
        self.put(
            api_socket,
            "/drives/rootfs",
            serde_json::json!({"drive_id": "rootfs", "path_on_host": rootfs_path.to_string_lossy(), "is_root_device": true, "is_read_only": false}),
        )
        .await
    }

    async fn instance_start(&self, api_socket: &Path) -> Result<(), VmmError> {
        self.put(api_socket, "/actions", serde_json::json!({"action_type": "InstanceStart"})).await
    }

    async fn send_ctrl_alt_del(&self, api_socket: &Path) -> Result<(), VmmError> {
        self.put(api_socket, "/actions", serde_json::json!({"action_type": "SendCtrlAltDel"})).await
    }

    async fn instance_halt(&self, api_socket: &Path) -> Result<(), VmmError> {
        self.put(api_socket, "/actions", serde_json::json!({"action_type": "InstanceHalt"})).await
    }

    async fn process_alive(&self, pid: u32) -> bool {
        std::path::Path::new(&format!("/proc/{pid}")).exists()
    }

    async fn kill_process(&self, pid: u32) {
        let _ = tokio::process::Command::new("kill").args(["-9", &pid.to_string()]).output().await;
    }

    async fn log_tail(&self, log_path: &Path, lines: usize) -> String {
        match tokio::fs::read_to_string(log_path).await {
            Ok(content) => content.lines().rev().take(lines).collect::<Vec<_>>().into_iter().rev().collect::<Vec<_>>().join("\n"),
            Err(_) => String::new(),
        }
    }
}
