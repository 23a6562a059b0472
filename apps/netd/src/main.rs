// [apps/netd/src/main.rs]
//! `octolab-netd` — the privileged network daemon (C3). Owns bridge/TAP
//! lifecycle for lab microVMs behind a Unix socket RPC. Runs as a
//! standalone process so the engine itself never needs elevated
//! network privileges.

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::info;

use octolab_netd::config::NetdConfig;
use octolab_netd::link::SystemLinkManager;
use octolab_netd::store::{self, AllocationStore};
use octolab_netd::server;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    octolab_telemetry::init_tracing("octolab-netd");

    let config = NetdConfig::parse();
    info!(socket = %config.socket_path.display(), log = %config.allocation_log_path.display(), "starting network daemon");

    let store = AllocationStore::load_or_create(&config.allocation_log_path).context("loading allocation log")?;
    let link_manager: Arc<dyn octolab_netd::link::LinkManager> = Arc::new(SystemLinkManager);

    let reconciled = store::reconcile(&store, link_manager.as_ref()).await?;
    info!(recreated = reconciled.recreated, dropped = reconciled.dropped, "startup reconciliation complete");

    server::serve(config, store, link_manager).await
}
