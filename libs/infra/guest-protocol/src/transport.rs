// [libs/infra/guest-protocol/src/transport.rs]
//! `AgentTransport` abstracts the byte pipe between the client (microVM
//! runtime, running on the host) and the in-guest agent. vsock is
//! preferred; serial is a fallback for hosts/VMMs without vsock support.

use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio_serial::SerialPortBuilderExt;
use tokio_vsock::VsockStream;
use tracing::warn;

use crate::error::AgentError;
use crate::wire::{AgentRequest, AgentResponse, MAX_RESPONSE_BYTES};

#[async_trait]
pub trait AgentTransport: Send + Sync {
    async fn send(&self, request: &AgentRequest, deadline: Duration) -> Result<AgentResponse, AgentError>;
}

async fn send_over<S>(stream: S, request: &AgentRequest, deadline: Duration) -> Result<AgentResponse, AgentError>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send,
{
    tokio::time::timeout(deadline, send_over_inner(stream, request)).await.map_err(|_| AgentError::Timeout)?
}

async fn send_over_inner<S>(stream: S, request: &AgentRequest) -> Result<AgentResponse, AgentError>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send,
{
    let (read_half, mut write_half) = tokio::io::split(stream);
    let mut reader = BufReader::new(read_half);

    let mut line = serde_json::to_string(request).map_err(|e| AgentError::Protocol(e.to_string()))?;
    line.push('\n');
    write_half.write_all(line.as_bytes()).await.map_err(|e| AgentError::Transport(e.to_string()))?;
    write_half.flush().await.map_err(|e| AgentError::Transport(e.to_string()))?;

    let mut buf = String::new();
    let read = reader.read_line(&mut buf).await.map_err(|e| AgentError::Transport(e.to_string()))?;
    if read == 0 {
        return Err(AgentError::Transport("connection closed before a response arrived".to_string()));
    }
    if buf.len() > MAX_RESPONSE_BYTES {
        return Err(AgentError::ResponseTooLarge);
    }
    serde_json::from_str(buf.trim_end()).map_err(|e| AgentError::Protocol(e.to_string()))
}

pub struct VsockTransport {
    pub cid: u32,
    pub port: u32,
}

#[async_trait]
impl AgentTransport for VsockTransport {
    async fn send(&self, request: &AgentRequest, deadline: Duration) -> Result<AgentResponse, AgentError> {
        let stream = VsockStream::connect(self.cid, self.port).await.map_err(|e| AgentError::Transport(e.to_string()))?;
        send_over(stream, request, deadline).await
    }
}

pub struct SerialTransport {
    pub device_path: String,
    pub baud_rate: u32,
}

#[async_trait]
impl AgentTransport for SerialTransport {
    async fn send(&self, request: &AgentRequest, deadline: Duration) -> Result<AgentResponse, AgentError> {
        let port = tokio_serial::new(&self.device_path, self.baud_rate).open_native_async().map_err(|e| AgentError::Transport(e.to_string()))?;
        send_over(port, request, deadline).await
    }
}

/// Tries vsock first, falling back to serial on any transport-level
/// failure (spec §4.6: "vsock (preferred) or a serial port (fallback)").
pub struct FallbackTransport {
    pub primary: VsockTransport,
    pub fallback: SerialTransport,
}

#[async_trait]
impl AgentTransport for FallbackTransport {
    async fn send(&self, request: &AgentRequest, deadline: Duration) -> Result<AgentResponse, AgentError> {
        match self.primary.send(request, deadline).await {
            Ok(response) => Ok(response),
            Err(err) => {
                warn!(%err, "vsock transport failed, falling back to serial");
                self.fallback.send(request, deadline).await
            }
        }
    }
}
