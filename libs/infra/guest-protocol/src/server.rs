// [libs/infra/guest-protocol/src/server.rs]
//! Connection-handling helper for the in-guest agent binary. Kept in
//! this crate so the token-timing and size-cap rules live next to the
//! protocol they protect, rather than being re-derived in the binary.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::warn;

use crate::wire::{Action, AgentRequest, AgentResponse, MAX_RESPONSE_BYTES};

/// Uniform delay applied on every token mismatch so an attacker probing
/// the socket cannot distinguish "wrong token" from "token almost right"
/// by timing.
const TOKEN_MISMATCH_DELAY: Duration = Duration::from_millis(250);
const MAX_REQUEST_BYTES: usize = 16 * 1024;

#[async_trait]
pub trait ActionHandler: Send + Sync {
    async fn handle(&self, action: Action) -> AgentResponse;
}

pub async fn serve_connection<S>(stream: S, expected_token: &str, handler: Arc<dyn ActionHandler>)
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send,
{
    let (read_half, mut write_half) = tokio::io::split(stream);
    let mut reader = BufReader::new(read_half);

    loop {
        let mut line = String::new();
        let read = match reader.read_line(&mut line).await {
            Ok(0) | Err(_) => return,
            Ok(n) => n,
        };
        if read > MAX_REQUEST_BYTES {
            warn!("dropping oversized agent request");
            return;
        }

        let request: AgentRequest = match serde_json::from_str(line.trim_end()) {
            Ok(r) => r,
            Err(_) => {
                let _ = write_response(&mut write_half, &AgentResponse::failure("malformed request")).await;
                continue;
            }
        };

        if !constant_time_eq(request.token.as_bytes(), expected_token.as_bytes()) {
            tokio::time::sleep(TOKEN_MISMATCH_DELAY).await;
            return;
        }

        let deadline = request.action.deadline();
        let response = match tokio::time::timeout(deadline, handler.handle(request.action)).await {
            Ok(response) => response,
            Err(_) => AgentResponse::failure("request exceeded its deadline"),
        };
        if write_response(&mut write_half, &response).await.is_err() {
            return;
        }
    }
}

async fn write_response<W: tokio::io::AsyncWrite + Unpin>(write_half: &mut W, response: &AgentResponse) -> std::io::Result<()> {
    let mut line = serde_json::to_string(response).unwrap_or_else(|_| "{\"ok\":false}".to_string());
    if line.len() > MAX_RESPONSE_BYTES {
        line = serde_json::to_string(&AgentResponse::failure("response exceeded size cap")).unwrap();
    }
    line.push('\n');
    write_half.write_all(line.as_bytes()).await?;
    write_half.flush().await
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

/// Dispatches only the closed allowlist; anything else is rejected
/// without side effect by construction, since `Action` has no catch-all
/// variant to dispatch on in the first place.
pub fn allowlisted_actions() -> &'static [&'static str] {
    &["ping", "uname", "id", "setup", "status", "shutdown"]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_time_eq_rejects_length_mismatch() {
        assert!(!constant_time_eq(b"short", b"longer-token"));
    }

    #[test]
    fn constant_time_eq_accepts_equal_slices() {
        assert!(constant_time_eq(b"matching-token", b"matching-token"));
    }

    struct EchoHandler;

    #[async_trait]
    impl ActionHandler for EchoHandler {
        async fn handle(&self, action: Action) -> AgentResponse {
            match action {
                Action::Ping => AgentResponse::ok(),
                _ => AgentResponse::failure("unsupported in test"),
            }
        }
    }

    #[tokio::test]
    async fn wrong_token_closes_connection_without_response() {
        let (client, server) = tokio::io::duplex(4096);
        let handler = Arc::new(EchoHandler);
        tokio::spawn(serve_connection(server, "correct-token", handler));

        let (mut read_half, mut write_half) = tokio::io::split(client);
        let request = AgentRequest { token: "wrong-token".to_string(), action: Action::Ping };
        let mut line = serde_json::to_string(&request).unwrap();
        line.push('\n');
        write_half.write_all(line.as_bytes()).await.unwrap();

        let mut buf = [0u8; 16];
        let read = tokio::time::timeout(Duration::from_millis(500), tokio::io::AsyncReadExt::read(&mut read_half, &mut buf)).await.unwrap().unwrap();
        assert_eq!(read, 0);
    }
}
