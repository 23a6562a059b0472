// [libs/infra/compose-runtime/src/engine.rs]
//! `ContainerEngine` is the seam between the compose runtime's lifecycle
//! logic and an actual container engine, so `ComposeRuntime` itself is
//! testable without Docker/Podman installed.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::warn;

use crate::error::EngineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerState {
    Running,
    Exited,
    Missing,
}

#[async_trait]
pub trait ContainerEngine: Send + Sync {
    async fn build_image(&self, build_dir: &Path, dockerfile: &Path, tag: &str, budget: Duration) -> Result<(), EngineError>;
    async fn create_network(&self, name: &str) -> Result<(), EngineError>;
    async fn remove_network(&self, name: &str) -> Result<(), EngineError>;
    async fn compose_up(&self, compose_file: &Path, project: &str) -> Result<(), EngineError>;
    async fn compose_down(&self, compose_file: &Path, project: &str) -> Result<(), EngineError>;
    async fn container_state(&self, project: &str, service: &str) -> Result<ContainerState, EngineError>;
    async fn stop_container(&self, project: &str, service: &str, timeout: Duration) -> Result<(), EngineError>;
    async fn kill_container(&self, project: &str, service: &str) -> Result<(), EngineError>;
    async fn healthcheck(&self, project: &str, service: &str, port: u16) -> Result<bool, EngineError>;
}

/// Shells out to `docker compose`, matching the teacher's pattern of
/// driving external tooling as subprocesses rather than linking a client
/// library.
pub struct ShellContainerEngine {
    pub binary: String,
}

impl Default for ShellContainerEngine {
    fn default() -> Self {
        ShellContainerEngine { binary: "docker".to_string() }
    }
}

#[async_trait]
impl ContainerEngine for ShellContainerEngine {
    async fn build_image(&self, build_dir: &Path, dockerfile: &Path, tag: &str, budget: Duration) -> Result<(), EngineError> {
        let run = Command::new(&self.binary)
            .args(["build", "-t", tag, "-f"])
            .arg(dockerfile)
            .arg(build_dir)
            .output();
        match tokio::time::timeout(budget, run).await {
            Ok(Ok(output)) if output.status.success() => Ok(()),
            Ok(Ok(output)) => Err(EngineError::BuildFailed(String::from_utf8_lossy(&output.stderr).to_string())),
            Ok(Err(err)) => Err(EngineError::Unresponsive(err.to_string())),
            Err(_) => Err(EngineError::BuildFailed("build exceeded its wall-clock budget".to_string())),
        }
    }

    async fn create_network(&self, name: &str) -> Result<(), EngineError> {
        let output = Command::new(&self.binary).args(["network", "create", name]).output().await.map_err(|e| EngineError::Unresponsive(e.to_string()))?;
        if output.status.success() || String::from_utf8_lossy(&output.stderr).contains("already exists") {
            Ok(())
        } else {
            Err(EngineError::ComposeFailed(String::from_utf8_lossy(&output.stderr).to_string()))
        }
    }

    async fn remove_network(&self, name: &str) -> Result<(), EngineError> {
        let output = Command::new(&self.binary).args(["network", "rm", name]).output().await.map_err(|e| EngineError::Unresponsive(e.to_string()))?;
        if !output.status.success() {
            warn!(network = name, stderr = %String::from_utf8_lossy(&output.stderr), "network removal reported failure");
        }
        Ok(())
    }

    async fn compose_up(&self, compose_file: &Path, project: &str) -> Result<(), EngineError> {
        run_compose(&self.binary, compose_file, project, &["up", "-d"]).await
    }

    async fn compose_down(&self, compose_file: &Path, project: &str) -> Result<(), EngineError> {
        run_compose(&self.binary, compose_file, project, &["down", "--volumes"]).await
    }

    async fn container_state(&self, project: &str, service: &str) -> Result<ContainerState, EngineError> {
        let output = Command::new(&self.binary)
            .args(["compose", "-p", project, "ps", "--status=running", "--services"])
            .output()
            .await
            .map_err(|e| EngineError::Unresponsive(e.to_string()))?;
        if !output.status.success() {
            return Err(EngineError::Unresponsive(String::from_utf8_lossy(&output.stderr).to_string()));
        }
        let running: Vec<&str> = std::str::from_utf8(&output.stdout).unwrap_or_default().lines().collect();
        Ok(if running.contains(&service) { ContainerState::Running } else { ContainerState::Exited })
    }

    async fn stop_container(&self, project: &str, service: &str, timeout: Duration) -> Result<(), EngineError> {
        let output = Command::new(&self.binary)
            .args(["compose", "-p", project, "stop", "-t", &timeout.as_secs().to_string(), service])
            .output()
            .await
            .map_err(|e| EngineError::Unresponsive(e.to_string()))?;
        if output.status.success() {
            Ok(())
        } else {
            Err(EngineError::ComposeFailed(String::from_utf8_lossy(&output.stderr).to_string()))
        }
    }

    async fn kill_container(&self, project: &str, service: &str) -> Result<(), EngineError> {
        let output = Command::new(&self.binary).args(["compose", "-p", project, "kill", service]).output().await.map_err(|e| EngineError::Unresponsive(e.to_string()))?;
        if !output.status.success() {
            warn!(project, service, stderr = %String::from_utf8_lossy(&output.stderr), "kill reported failure");
        }
        Ok(())
    }

    async fn healthcheck(&self, _project: &str, service: &str, port: u16) -> Result<bool, EngineError> {
        match tokio::net::TcpStream::connect((service, port)).await {
            Ok(_) => Ok(true),
            Err(_) => Ok(false),
        }
    }
}

async fn run_compose(binary: &str, compose_file: &Path, project: &str, args: &[&str]) -> Result<(), EngineError> {
    let output = Command::new(binary)
        .arg("compose")
        .arg("-f")
        .arg(compose_file)
        .args(["-p", project])
        .args(args)
        .output()
        .await
        .map_err(|e| EngineError::Unresponsive(e.to_string()))?;
    if output.status.success() {
        Ok(())
    } else {
        Err(EngineError::ComposeFailed(String::from_utf8_lossy(&output.stderr).to_string()))
    }
}

pub type ComposeFilePath = PathBuf;

#[cfg(test)]
pub mod mock {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct MockContainerEngine {
        pub states: Mutex<HashMap<(String, String), ContainerState>>,
        pub build_fails: Mutex<bool>,
        pub healthy: Mutex<bool>,
        pub networks: Mutex<std::collections::HashSet<String>>,
    }

    impl MockContainerEngine {
        pub fn set_state(&self, project: &str, service: &str, state: ContainerState) {
            self.states.lock().unwrap().insert((project.to_string(), service.to_string()), state);
        }
    }

    #[async_trait]
    impl ContainerEngine for MockContainerEngine {
        async fn build_image(&self, _build_dir: &Path, _dockerfile: &Path, _tag: &str, _budget: Duration) -> Result<(), EngineError> {
            if *self.build_fails.lock().unwrap() {
                Err(EngineError::BuildFailed("mock build failure".to_string()))
            } else {
                Ok(())
            }
        }

        async fn create_network(&self, name: &str) -> Result<(), EngineError> {
            self.networks.lock().unwrap().insert(name.to_string());
            Ok(())
        }

        async fn remove_network(&self, name: &str) -> Result<(), EngineError> {
            self.networks.lock().unwrap().remove(name);
            Ok(())
        }

        async fn compose_up(&self, _compose_file: &Path, project: &str) -> Result<(), EngineError> {
            self.set_state(project, "target", ContainerState::Running);
            self.set_state(project, "attacker", ContainerState::Running);
            *self.healthy.lock().unwrap() = true;
            Ok(())
        }

        async fn compose_down(&self, _compose_file: &Path, project: &str) -> Result<(), EngineError> {
            let mut states = self.states.lock().unwrap();
            states.remove(&(project.to_string(), "target".to_string()));
            states.remove(&(project.to_string(), "attacker".to_string()));
            Ok(())
        }

        async fn container_state(&self, project: &str, service: &str) -> Result<ContainerState, EngineError> {
            Ok(self.states.lock().unwrap().get(&(project.to_string(), service.to_string())).copied().unwrap_or(ContainerState::Missing))
        }

        async fn stop_container(&self, project: &str, service: &str, _timeout: Duration) -> Result<(), EngineError> {
            self.set_state(project, service, ContainerState::Exited);
            Ok(())
        }

        async fn kill_container(&self, project: &str, service: &str) -> Result<(), EngineError> {
            self.set_state(project, service, ContainerState::Exited);
            Ok(())
        }

        async fn healthcheck(&self, _project: &str, _service: &str, _port: u16) -> Result<bool, EngineError> {
            Ok(*self.healthy.lock().unwrap())
        }
    }
}
