// [libs/infra/compose-runtime/src/runtime.rs]
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use octolab_domain_models::cause::Cause;
use octolab_domain_models::lab::Lab;
use octolab_domain_models::recipe::Recipe;
use octolab_runtime::{ConnectionInfo, Handle, ProbeResult, Runtime, RuntimeError};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::build_cache::BuildCache;
use crate::engine::{ContainerEngine, ContainerState};

const RUNTIME_KIND: &str = "compose";
const TARGET_SERVICE: &str = "target";
const ATTACKER_SERVICE: &str = "attacker";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ComposePayload {
    lab_id: String,
    scratch_dir: String,
    network_name: String,
    compose_file: String,
    image_tag: String,
    remote_desktop_port: u16,
    exposed_ports: Vec<u16>,
}

#[derive(Debug, Clone)]
pub struct ComposeRuntimeConfig {
    pub scratch_root: PathBuf,
    pub build_budget: Duration,
    pub attacker_image: String,
    pub remote_desktop_port: u16,
    pub stop_timeout: Duration,
    pub health_retries: u32,
    pub health_retry_interval: Duration,
}

impl Default for ComposeRuntimeConfig {
    fn default() -> Self {
        ComposeRuntimeConfig {
            scratch_root: PathBuf::from("/var/lib/octolab/compose-labs"),
            build_budget: Duration::from_secs(300),
            attacker_image: "octolab/attacker-workstation:latest".to_string(),
            remote_desktop_port: 3389,
            stop_timeout: Duration::from_secs(20),
            health_retries: 30,
            health_retry_interval: Duration::from_secs(2),
        }
    }
}

pub struct ComposeRuntime {
    config: ComposeRuntimeConfig,
    engine: Arc<dyn ContainerEngine>,
    build_cache: Arc<dyn BuildCache>,
}

impl ComposeRuntime {
    pub fn new(config: ComposeRuntimeConfig, engine: Arc<dyn ContainerEngine>, build_cache: Arc<dyn BuildCache>) -> Self {
        ComposeRuntime { config, engine, build_cache }
    }

    fn project_name(lab_id: &str) -> String {
        format!("octolab-{lab_id}")
    }

    fn network_name(lab_id: &str) -> String {
        format!("octolab-net-{lab_id}")
    }

    fn scratch_dir(&self, lab_id: &str) -> PathBuf {
        self.config.scratch_root.join(lab_id)
    }

    fn render_compose(&self, payload: &ComposePayload, recipe: &Recipe) -> String {
        let ports = recipe
            .exposed_ports
            .iter()
            .map(|p| format!("      - \"{p}:{p}\""))
            .collect::<Vec<_>>()
            .join("\n");
        format!(
            "version: \"3.8\"\nservices:\n  {target}:\n    image: {image_tag}\n    networks: [lab]\n    ports:\n{ports}\n  {attacker}:\n    image: {attacker_image}\n    networks: [lab]\n    ports:\n      - \"{rdp}:{rdp}\"\nnetworks:\n  lab:\n    external: true\n    name: {network}\n",
            target = TARGET_SERVICE,
            image_tag = payload.image_tag,
            attacker = ATTACKER_SERVICE,
            attacker_image = self.config.attacker_image,
            rdp = self.config.remote_desktop_port,
            network = payload.network_name,
        )
    }
}

#[async_trait]
impl Runtime for ComposeRuntime {
    #[instrument(skip(self, lab, recipe), fields(lab_id = %lab.id))]
    async fn prepare(&self, lab: &Lab, recipe: &Recipe) -> Result<Handle, RuntimeError> {
        let fingerprint = recipe.fingerprint();
        let image_tag = match self.build_cache.get_image_tag(&fingerprint).await {
            Some(tag) => tag,
            None => {
                let scratch = self.scratch_dir(&lab.id);
                let build_dir = scratch.join("build");
                tokio::fs::create_dir_all(&build_dir).await.map_err(|e| RuntimeError::Fatal(e.to_string()))?;
                let dockerfile_path = build_dir.join("Dockerfile");
                tokio::fs::write(&dockerfile_path, &recipe.dockerfile).await.map_err(|e| RuntimeError::Fatal(e.to_string()))?;
                for file in &recipe.source_files {
                    let dest = build_dir.join(&file.path);
                    if let Some(parent) = dest.parent() {
                        tokio::fs::create_dir_all(parent).await.map_err(|e| RuntimeError::Fatal(e.to_string()))?;
                    }
                    tokio::fs::write(&dest, &file.contents).await.map_err(|e| RuntimeError::Fatal(e.to_string()))?;
                }
                let tag = format!("octolab-target:{}", &fingerprint[..16]);
                self.engine
                    .build_image(&build_dir, &dockerfile_path, &tag, self.config.build_budget)
                    .await
                    .map_err(|e| RuntimeError::Fatal(format!("build failed, recipe is at fault: {e}")))?;
                self.build_cache.put_image_tag(&fingerprint, &tag).await;
                tag
            }
        };

        let network_name = Self::network_name(&lab.id);
        self.engine.create_network(&network_name).await.map_err(|e| classify(e))?;

        let scratch = self.scratch_dir(&lab.id);
        tokio::fs::create_dir_all(&scratch).await.map_err(|e| RuntimeError::Fatal(e.to_string()))?;

        let payload = ComposePayload {
            lab_id: lab.id.clone(),
            scratch_dir: scratch.to_string_lossy().to_string(),
            network_name,
            compose_file: scratch.join("docker-compose.yml").to_string_lossy().to_string(),
            image_tag,
            remote_desktop_port: self.config.remote_desktop_port,
            exposed_ports: recipe.exposed_ports.clone(),
        };
        let compose_text = self.render_compose(&payload, recipe);
        tokio::fs::write(&payload.compose_file, compose_text).await.map_err(|e| RuntimeError::Fatal(e.to_string()))?;

        info!(network = %payload.network_name, image = %payload.image_tag, "compose lab prepared");
        Ok(Handle::new(RUNTIME_KIND, payload))
    }

    #[instrument(skip(self, handle))]
    async fn start(&self, handle: &Handle) -> Result<(), RuntimeError> {
        let payload: ComposePayload = handle.decode()?;
        let project = Self::project_name(&payload.lab_id);
        self.engine.compose_up(&PathBuf::from(&payload.compose_file), &project).await.map_err(classify)?;

        for attempt in 0..self.config.health_retries {
            let target_up = self.engine.container_state(&project, TARGET_SERVICE).await.map_err(classify)? == ContainerState::Running;
            let attacker_up = self.engine.container_state(&project, ATTACKER_SERVICE).await.map_err(classify)? == ContainerState::Running;
            let healthy = self.engine.healthcheck(&project, ATTACKER_SERVICE, payload.remote_desktop_port).await.map_err(classify)?;
            if target_up && attacker_up && healthy {
                return Ok(());
            }
            warn!(attempt, "waiting for compose lab containers to report healthy");
            tokio::time::sleep(self.config.health_retry_interval).await;
        }
        Err(RuntimeError::Transient("attacker remote-desktop health check never passed".to_string()))
    }

    async fn probe(&self, handle: &Handle) -> Result<ProbeResult, RuntimeError> {
        let payload: ComposePayload = handle.decode()?;
        let project = Self::project_name(&payload.lab_id);
        let target = self.engine.container_state(&project, TARGET_SERVICE).await;
        let attacker = self.engine.container_state(&project, ATTACKER_SERVICE).await;
        match (target, attacker) {
            (Ok(ContainerState::Running), Ok(ContainerState::Running)) => Ok(ProbeResult::Ok),
            (Ok(_), Ok(_)) => Ok(ProbeResult::Dead(Some(Cause::new(
                octolab_domain_models::cause::ErrorClass::Fatal,
                "compose_container_exited",
                "target or attacker container exited",
            )))),
            (Err(e), _) | (_, Err(e)) if e.is_transient() => Ok(ProbeResult::Unreachable),
            (Err(e), _) | (_, Err(e)) => Err(classify(e)),
        }
    }

    #[instrument(skip(self, handle))]
    async fn stop(&self, handle: &Handle, reason: &str) -> Result<(), RuntimeError> {
        let payload: ComposePayload = handle.decode()?;
        let project = Self::project_name(&payload.lab_id);
        info!(reason, "stopping compose lab");
        for service in [TARGET_SERVICE, ATTACKER_SERVICE] {
            if let Err(err) = self.engine.stop_container(&project, service, self.config.stop_timeout).await {
                warn!(service, %err, "graceful stop failed, killing");
                self.engine.kill_container(&project, service).await.map_err(classify)?;
            }
        }
        Ok(())
    }

    #[instrument(skip(self, handle))]
    async fn destroy(&self, handle: &Handle) {
        let payload: ComposePayload = match handle.decode() {
            Ok(p) => p,
            Err(err) => {
                warn!(%err, "cannot decode handle during destroy, nothing to clean up");
                return;
            }
        };
        let project = Self::project_name(&payload.lab_id);
        if let Err(err) = self.engine.compose_down(&PathBuf::from(&payload.compose_file), &project).await {
            warn!(%err, "compose down failed during destroy");
        }
        if let Err(err) = self.engine.remove_network(&payload.network_name).await {
            warn!(%err, "network removal failed during destroy");
        }
        if let Err(err) = tokio::fs::remove_dir_all(&payload.scratch_dir).await {
            warn!(%err, "scratch directory removal failed during destroy");
        }
    }

    async fn connection_info(&self, handle: &Handle) -> Result<ConnectionInfo, RuntimeError> {
        let payload: ComposePayload = handle.decode()?;
        Ok(ConnectionInfo {
            remote_desktop_url: format!("rdp://{}:{}", payload.network_name, payload.remote_desktop_port),
            exposed_ports: payload.exposed_ports,
        })
    }
}

fn classify(err: crate::error::EngineError) -> RuntimeError {
    if err.is_transient() {
        RuntimeError::Transient(err.to_string())
    } else {
        RuntimeError::Fatal(err.to_string())
    }
}
