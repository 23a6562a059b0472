// [apps/netd/src/server.rs]
use std::collections::HashMap;
use std::sync::Arc;

use octolab_netd_proto::wire::{NetworkAllocation, Request, RequestBody, Response, ResponseBody};
use octolab_netd_proto::naming::Ipv4Pool;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{error, info, instrument, warn};

use crate::allocator::Allocator;
use crate::config::NetdConfig;
use crate::link::LinkManager;
use crate::store::AllocationStore;

const MAX_LINE_BYTES: usize = 64 * 1024;

/// Per-lab-id locks so concurrent requests for the same lab serialize
/// while unrelated lab ids proceed in parallel, per spec's concurrency
/// requirement for the daemon.
struct LabLocks {
    locks: AsyncMutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl LabLocks {
    fn new() -> Self {
        LabLocks { locks: AsyncMutex::new(HashMap::new()) }
    }

    async fn get(&self, lab_id: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self.locks.lock().await;
        locks.entry(lab_id.to_string()).or_insert_with(|| Arc::new(AsyncMutex::new(()))).clone()
    }
}

struct Daemon {
    store: AllocationStore,
    links: Arc<dyn LinkManager>,
    allocator: Allocator,
    lab_locks: LabLocks,
}

pub async fn serve(config: NetdConfig, store: AllocationStore, links: Arc<dyn LinkManager>) -> anyhow::Result<()> {
    if config.socket_path.exists() {
        std::fs::remove_file(&config.socket_path)?;
    }
    if let Some(parent) = config.socket_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let listener = UnixListener::bind(&config.socket_path)?;
    info!(socket = %config.socket_path.display(), "network daemon listening");

    let pool = Ipv4Pool::new(config.pool_base, config.pool_prefix_len);
    let daemon = Arc::new(Daemon { store, links, allocator: Allocator::new(pool), lab_locks: LabLocks::new() });

    loop {
        let (stream, _) = listener.accept().await?;
        let daemon = daemon.clone();
        tokio::spawn(async move {
            if let Err(err) = handle_connection(daemon, stream).await {
                warn!(%err, "connection handling failed");
            }
        });
    }
}

async fn handle_connection(daemon: Arc<Daemon>, stream: UnixStream) -> anyhow::Result<()> {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    loop {
        let mut line = String::new();
        let read = reader.read_line(&mut line).await?;
        if read == 0 {
            return Ok(());
        }
        if line.len() > MAX_LINE_BYTES {
            warn!("dropping oversized request line");
            continue;
        }
        let request: Request = match serde_json::from_str(line.trim_end()) {
            Ok(request) => request,
            Err(err) => {
                warn!(%err, "malformed request");
                continue;
            }
        };
        let response = dispatch(&daemon, request).await;
        let mut out = serde_json::to_string(&response)?;
        out.push('\n');
        write_half.write_all(out.as_bytes()).await?;
        write_half.flush().await?;
    }
}

#[instrument(skip(daemon, request), fields(correlation_id = %request.correlation_id))]
async fn dispatch(daemon: &Daemon, request: Request) -> Response {
    let correlation_id = request.correlation_id.clone();
    let body = match request.body {
        RequestBody::CreateNetwork { lab_id } => handle_create(daemon, &lab_id).await,
        RequestBody::DestroyNetwork { lab_id } => handle_destroy(daemon, &lab_id).await,
        RequestBody::ListNetworks => ResponseBody::Networks(
            daemon
                .store
                .list()
                .into_iter()
                .map(|r| NetworkAllocation {
                    lab_id: r.lab_id,
                    bridge_name: r.bridge_name,
                    tap_name: r.tap_name,
                    guest_ip: r.guest_ip.to_string(),
                    host_ip: r.host_ip.to_string(),
                    netmask: r.netmask.to_string(),
                })
                .collect(),
        ),
        RequestBody::Ping => ResponseBody::Pong,
    };
    Response { correlation_id, body }
}

/// Policy: the daemon refuses to create a network for a `lab_id` it
/// already owns (create is not idempotent — a caller that actually wants
/// idempotence should destroy first).
async fn handle_create(daemon: &Daemon, lab_id: &str) -> ResponseBody {
    let lock = daemon.lab_locks.get(lab_id).await;
    let _guard = lock.lock().await;

    if daemon.store.get(lab_id).is_some() {
        return ResponseBody::Error { message: format!("lab {lab_id} already has a network allocated") };
    }

    let taken = daemon.store.taken_blocks();
    let Some(allocation) = daemon.allocator.allocate(lab_id, &taken) else {
        return ResponseBody::Error { message: "address pool exhausted".to_string() };
    };

    if let Err(err) = daemon.links.create_bridge(&allocation.bridge_name, allocation.host_ip, allocation.netmask).await {
        error!(lab_id, %err, "bridge creation failed");
        return ResponseBody::Error { message: "bridge creation failed".to_string() };
    }
    if let Err(err) = daemon.links.create_tap(&allocation.tap_name, &allocation.bridge_name).await {
        error!(lab_id, %err, "tap creation failed");
        let _ = daemon.links.destroy(&allocation.bridge_name).await;
        return ResponseBody::Error { message: "tap creation failed".to_string() };
    }

    let response = NetworkAllocation {
        lab_id: lab_id.to_string(),
        bridge_name: allocation.bridge_name.clone(),
        tap_name: allocation.tap_name.clone(),
        guest_ip: allocation.guest_ip.to_string(),
        host_ip: allocation.host_ip.to_string(),
        netmask: allocation.netmask.to_string(),
    };
    if let Err(err) = daemon.store.record(allocation) {
        error!(lab_id, %err, "failed to persist allocation record");
    }
    ResponseBody::NetworkCreated(response)
}

/// `destroy` is the sole operation the daemon will perform on a lab id
/// it doesn't recognize — it simply no-ops, matching the spec's carve-out
/// that lets reconciliation GC orphans without first proving ownership.
async fn handle_destroy(daemon: &Daemon, lab_id: &str) -> ResponseBody {
    let lock = daemon.lab_locks.get(lab_id).await;
    let _guard = lock.lock().await;

    let Some(record) = daemon.store.get(lab_id) else {
        return ResponseBody::NetworkDestroyed;
    };
    if let Err(err) = daemon.links.destroy(&record.tap_name).await {
        warn!(lab_id, %err, "tap deletion reported an error, continuing");
    }
    if let Err(err) = daemon.links.destroy(&record.bridge_name).await {
        warn!(lab_id, %err, "bridge deletion reported an error, continuing");
    }
    if let Err(err) = daemon.store.remove(lab_id) {
        error!(lab_id, %err, "failed to record destruction in allocation log");
    }
    ResponseBody::NetworkDestroyed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::mock::MockLinkManager;
    use std::net::Ipv4Addr;

    fn daemon_with(links: MockLinkManager) -> (Daemon, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = AllocationStore::load_or_create(&dir.path().join("alloc.jsonl")).unwrap();
        let daemon = Daemon {
            store,
            links: Arc::new(links),
            allocator: Allocator::new(Ipv4Pool::new(Ipv4Addr::new(10, 200, 0, 0), 24)),
            lab_locks: LabLocks::new(),
        };
        (daemon, dir)
    }

    #[tokio::test]
    async fn create_then_duplicate_create_is_rejected() {
        let (daemon, _dir) = daemon_with(MockLinkManager::default());
        let first = handle_create(&daemon, "lab-1").await;
        assert!(matches!(first, ResponseBody::NetworkCreated(_)));

        let second = handle_create(&daemon, "lab-1").await;
        assert!(matches!(second, ResponseBody::Error { .. }));
    }

    #[tokio::test]
    async fn destroy_on_unknown_lab_is_a_noop_success() {
        let (daemon, _dir) = daemon_with(MockLinkManager::default());
        let response = handle_destroy(&daemon, "never-created").await;
        assert!(matches!(response, ResponseBody::NetworkDestroyed));
    }

    #[tokio::test]
    async fn destroy_then_recreate_succeeds() {
        let (daemon, _dir) = daemon_with(MockLinkManager::default());
        handle_create(&daemon, "lab-1").await;
        handle_destroy(&daemon, "lab-1").await;
        let recreated = handle_create(&daemon, "lab-1").await;
        assert!(matches!(recreated, ResponseBody::NetworkCreated(_)));
    }
}
