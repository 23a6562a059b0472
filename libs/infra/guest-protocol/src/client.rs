// [libs/infra/guest-protocol/src/client.rs]
use std::sync::Arc;

use crate::error::AgentError;
use crate::transport::AgentTransport;
use crate::wire::{Action, AgentRequest, AgentResponse};

#[derive(Clone)]
pub struct AgentClient {
    token: String,
    transport: Arc<dyn AgentTransport>,
}

impl AgentClient {
    pub fn new(token: impl Into<String>, transport: Arc<dyn AgentTransport>) -> Self {
        AgentClient { token: token.into(), transport }
    }

    async fn send(&self, action: Action) -> Result<AgentResponse, AgentError> {
        let deadline = action.deadline();
        let request = AgentRequest { token: self.token.clone(), action };
        let response = self.transport.send(&request, deadline).await?;
        if !response.ok {
            return Err(AgentError::Rejected);
        }
        Ok(response)
    }

    pub async fn ping(&self) -> Result<(), AgentError> {
        self.send(Action::Ping).await.map(|_| ())
    }

    pub async fn setup(&self, compose_spec: String) -> Result<(), AgentError> {
        self.send(Action::Setup { compose_spec }).await.map(|_| ())
    }

    pub async fn status(&self) -> Result<serde_json::Value, AgentError> {
        self.send(Action::Status).await.map(|r| r.data.unwrap_or(serde_json::Value::Null))
    }

    pub async fn shutdown(&self) -> Result<(), AgentError> {
        self.send(Action::Shutdown).await.map(|_| ())
    }
}

/// Polls `ping` until it succeeds or `deadline` elapses, used while
/// bringing a microVM up (spec §4.5 start step 4).
pub async fn wait_until_reachable(client: &AgentClient, deadline: std::time::Duration, retry_interval: std::time::Duration) -> Result<(), AgentError> {
    let start = tokio::time::Instant::now();
    loop {
        if client.ping().await.is_ok() {
            return Ok(());
        }
        if start.elapsed() >= deadline {
            return Err(AgentError::Timeout);
        }
        tokio::time::sleep(retry_interval).await;
    }
}
