// [apps/guest-agent/src/handler.rs]
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use octolab_compose_runtime::engine::{ContainerEngine, ContainerState, ShellContainerEngine};
use octolab_guest_protocol::{Action, ActionHandler, AgentResponse};
use serde_json::json;
use tracing::{info, warn};

const PROJECT: &str = "octolab-guest";
const COMPOSE_PATH: &str = "/run/octolab/compose.yml";
const SETUP_WAIT_BUDGET: Duration = Duration::from_secs(60);

pub struct GuestActionHandler {
    engine: Arc<dyn ContainerEngine>,
}

impl GuestActionHandler {
    pub fn new() -> Self {
        GuestActionHandler { engine: Arc::new(ShellContainerEngine::default()) }
    }
}

#[async_trait]
impl ActionHandler for GuestActionHandler {
    async fn handle(&self, action: Action) -> AgentResponse {
        match action {
            Action::Ping => AgentResponse::ok(),
            Action::Uname => run_diagnostic("uname", &["-a"]).await,
            Action::Id => run_diagnostic("id", &[]).await,
            Action::Setup { compose_spec } => self.setup(compose_spec).await,
            Action::Status => self.status().await,
            Action::Shutdown => self.shutdown().await,
        }
    }
}

async fn run_diagnostic(program: &str, args: &[&str]) -> AgentResponse {
    match tokio::process::Command::new(program).args(args).output().await {
        Ok(output) => AgentResponse {
            ok: output.status.success(),
            stdout: Some(String::from_utf8_lossy(&output.stdout).to_string()),
            stderr: Some(String::from_utf8_lossy(&output.stderr).to_string()),
            exit_code: output.status.code(),
            data: None,
        },
        Err(err) => AgentResponse::failure(err.to_string()),
    }
}

impl GuestActionHandler {
    async fn setup(&self, compose_spec: String) -> AgentResponse {
        if let Some(parent) = PathBuf::from(COMPOSE_PATH).parent() {
            if let Err(err) = tokio::fs::create_dir_all(parent).await {
                return AgentResponse::failure(err.to_string());
            }
        }
        if let Err(err) = tokio::fs::write(COMPOSE_PATH, &compose_spec).await {
            return AgentResponse::failure(err.to_string());
        }
        if let Err(err) = self.engine.compose_up(&PathBuf::from(COMPOSE_PATH), PROJECT).await {
            return AgentResponse::failure(err.to_string());
        }

        let deadline = tokio::time::Instant::now() + SETUP_WAIT_BUDGET;
        loop {
            let target = self.engine.container_state(PROJECT, "target").await;
            let attacker = self.engine.container_state(PROJECT, "attacker").await;
            if matches!(target, Ok(ContainerState::Running)) && matches!(attacker, Ok(ContainerState::Running)) {
                info!("guest compose stack reported ready");
                return AgentResponse::ok();
            }
            if tokio::time::Instant::now() >= deadline {
                return AgentResponse::failure("compose stack did not become ready within the setup budget");
            }
            tokio::time::sleep(Duration::from_millis(500)).await;
        }
    }

    async fn status(&self) -> AgentResponse {
        let target = self.engine.container_state(PROJECT, "target").await.unwrap_or(ContainerState::Missing);
        let attacker = self.engine.container_state(PROJECT, "attacker").await.unwrap_or(ContainerState::Missing);
        AgentResponse::ok_with_data(json!({
            "target": format!("{target:?}"),
            "attacker": format!("{attacker:?}"),
        }))
    }

    async fn shutdown(&self) -> AgentResponse {
        for service in ["target", "attacker"] {
            if let Err(err) = self.engine.stop_container(PROJECT, service, Duration::from_secs(10)).await {
                warn!(service, %err, "graceful container stop failed during guest shutdown");
            }
        }
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            let _ = tokio::process::Command::new("poweroff").output().await;
        });
        AgentResponse::ok()
    }
}
