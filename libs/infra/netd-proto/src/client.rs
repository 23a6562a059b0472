// [libs/infra/netd-proto/src/client.rs]
//! Unix-socket client for the network daemon. Each call opens a fresh
//! connection, writes one line-delimited JSON request, and reads back
//! the matching response. Retries are bounded and jittered so a flapping
//! daemon doesn't turn into a thundering herd of reconnect attempts.

use std::path::{Path, PathBuf};
use std::time::Duration;

use rand::Rng;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tracing::{instrument, warn};
use uuid::Uuid;

use crate::error::NetdError;
use crate::wire::{Request, RequestBody, Response, ResponseBody};

const MAX_LINE_BYTES: usize = 64 * 1024;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy { max_attempts: 5, base_delay: Duration::from_millis(100), max_delay: Duration::from_secs(5) }
    }
}

#[derive(Debug, Clone)]
pub struct NetdClient {
    socket_path: PathBuf,
    retry: RetryPolicy,
}

impl NetdClient {
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        NetdClient { socket_path: socket_path.into(), retry: RetryPolicy::default() }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    #[instrument(skip(self), fields(socket = %self.socket_path.display()))]
    pub async fn create_network(&self, lab_id: &str) -> Result<crate::wire::NetworkAllocation, NetdError> {
        match self.call(RequestBody::CreateNetwork { lab_id: lab_id.to_string() }).await? {
            ResponseBody::NetworkCreated(allocation) => Ok(allocation),
            ResponseBody::Error { message } => Err(NetdError::Rejected(message)),
            other => Err(NetdError::Protocol(format!("unexpected response to create_network: {other:?}"))),
        }
    }

    #[instrument(skip(self), fields(socket = %self.socket_path.display()))]
    pub async fn destroy_network(&self, lab_id: &str) -> Result<(), NetdError> {
        match self.call(RequestBody::DestroyNetwork { lab_id: lab_id.to_string() }).await? {
            ResponseBody::NetworkDestroyed => Ok(()),
            ResponseBody::Error { message } => Err(NetdError::Rejected(message)),
            other => Err(NetdError::Protocol(format!("unexpected response to destroy_network: {other:?}"))),
        }
    }

    pub async fn list_networks(&self) -> Result<Vec<crate::wire::NetworkAllocation>, NetdError> {
        match self.call(RequestBody::ListNetworks).await? {
            ResponseBody::Networks(networks) => Ok(networks),
            ResponseBody::Error { message } => Err(NetdError::Rejected(message)),
            other => Err(NetdError::Protocol(format!("unexpected response to list_networks: {other:?}"))),
        }
    }

    pub async fn ping(&self) -> Result<(), NetdError> {
        match self.call(RequestBody::Ping).await? {
            ResponseBody::Pong => Ok(()),
            other => Err(NetdError::Protocol(format!("unexpected response to ping: {other:?}"))),
        }
    }

    /// Sends `body` with bounded, jittered retry. Only transient failures
    /// (socket unreachable, retries-exhausted from a prior layer) are
    /// retried; a protocol-level rejection from the daemon is returned
    /// immediately since retrying it would only get the same answer.
    async fn call(&self, body: RequestBody) -> Result<ResponseBody, NetdError> {
        let mut last_err = None;
        for attempt in 0..self.retry.max_attempts {
            match self.call_once(body.clone()).await {
                Ok(response) => return Ok(response),
                Err(err) if err.is_transient() => {
                    warn!(attempt, error = %err, "network daemon call failed, retrying");
                    last_err = Some(err);
                    tokio::time::sleep(self.backoff(attempt)).await;
                }
                Err(err) => return Err(err),
            }
        }
        Err(last_err.unwrap_or(NetdError::RetriesExhausted { attempts: self.retry.max_attempts }))
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let exp = self.retry.base_delay.saturating_mul(1 << attempt.min(10));
        let capped = exp.min(self.retry.max_delay);
        let jitter_ms = rand::thread_rng().gen_range(0..=capped.as_millis() as u64 / 2 + 1);
        capped + Duration::from_millis(jitter_ms)
    }

    async fn call_once(&self, body: RequestBody) -> Result<ResponseBody, NetdError> {
        let correlation_id = Uuid::new_v4().to_string();
        let request = Request { correlation_id: correlation_id.clone(), body };

        let stream = UnixStream::connect(&self.socket_path)
            .await
            .map_err(|e| NetdError::Unreachable(format!("{}: {e}", self.socket_path.display())))?;
        let (read_half, mut write_half) = stream.into_split();
        let mut reader = BufReader::new(read_half);

        let mut line = serde_json::to_string(&request).map_err(|e| NetdError::Protocol(e.to_string()))?;
        line.push('\n');
        write_half.write_all(line.as_bytes()).await.map_err(|e| NetdError::Unreachable(e.to_string()))?;
        write_half.flush().await.map_err(|e| NetdError::Unreachable(e.to_string()))?;

        let mut buf = String::new();
        let read = reader.read_line(&mut buf).await.map_err(|e| NetdError::Unreachable(e.to_string()))?;
        if read == 0 {
            return Err(NetdError::Unreachable("connection closed before a response arrived".to_string()));
        }
        if buf.len() > MAX_LINE_BYTES {
            return Err(NetdError::Protocol("response exceeded the line size cap".to_string()));
        }

        let response: Response = serde_json::from_str(buf.trim_end()).map_err(|e| NetdError::Protocol(e.to_string()))?;
        if response.correlation_id != correlation_id {
            return Err(NetdError::Protocol("response correlation id mismatch".to_string()));
        }
        Ok(response.body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::NetworkAllocation;
    use tokio::io::AsyncReadExt;
    use tokio::net::UnixListener;

    async fn echo_server(path: PathBuf, respond: impl Fn(RequestBody) -> ResponseBody + Send + 'static) {
        let listener = UnixListener::bind(&path).unwrap();
        tokio::spawn(async move {
            loop {
                let (stream, _) = match listener.accept().await {
                    Ok(pair) => pair,
                    Err(_) => return,
                };
                let (read_half, mut write_half) = stream.into_split();
                let mut reader = BufReader::new(read_half);
                let mut buf = String::new();
                if reader.read_line(&mut buf).await.unwrap_or(0) == 0 {
                    continue;
                }
                let request: Request = serde_json::from_str(buf.trim_end()).unwrap();
                let response = Response { correlation_id: request.correlation_id, body: respond(request.body) };
                let mut line = serde_json::to_string(&response).unwrap();
                line.push('\n');
                let _ = write_half.write_all(line.as_bytes()).await;
            }
        });
        // give the listener a moment to be ready for connections
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    #[tokio::test]
    async fn create_network_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("netd.sock");
        echo_server(path.clone(), |body| match body {
            RequestBody::CreateNetwork { lab_id } => ResponseBody::NetworkCreated(NetworkAllocation {
                lab_id,
                bridge_name: "obr0000000000".to_string(),
                tap_name: "otp0000000000".to_string(),
                guest_ip: "10.200.0.2".to_string(),
                host_ip: "10.200.0.1".to_string(),
                netmask: "255.255.255.252".to_string(),
            }),
            _ => ResponseBody::Error { message: "unexpected".to_string() },
        })
        .await;

        let client = NetdClient::new(&path);
        let allocation = client.create_network("lab-1").await.unwrap();
        assert_eq!(allocation.lab_id, "lab-1");
    }

    #[tokio::test]
    async fn unreachable_socket_is_transient_and_exhausts_retries() {
        let client = NetdClient::new("/nonexistent/socket/path.sock")
            .with_retry_policy(RetryPolicy { max_attempts: 2, base_delay: Duration::from_millis(1), max_delay: Duration::from_millis(5) });
        let err = client.ping().await.unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn daemon_rejection_is_not_retried() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("netd.sock");
        echo_server(path.clone(), |_| ResponseBody::Error { message: "not your lab".to_string() }).await;

        let client = NetdClient::new(&path);
        let err = client.destroy_network("lab-1").await.unwrap_err();
        assert!(matches!(err, NetdError::Rejected(_)));
        assert!(!err.is_transient());
    }
}
