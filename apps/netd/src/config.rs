// [apps/netd/src/config.rs]
use std::net::Ipv4Addr;
use std::path::PathBuf;

use clap::Parser;

#[derive(Debug, Clone, Parser)]
#[command(name = "octolab-netd")]
pub struct NetdConfig {
    #[arg(long, env = "OCTOLAB_NETD_SOCKET", default_value = "/run/octolab/netd.sock")]
    pub socket_path: PathBuf,

    #[arg(long, env = "OCTOLAB_NETD_LOG", default_value = "/var/lib/octolab/netd-allocations.jsonl")]
    pub allocation_log_path: PathBuf,

    #[arg(long, env = "OCTOLAB_NETD_POOL_BASE", default_value = "10.200.0.0")]
    pub pool_base: Ipv4Addr,

    #[arg(long, env = "OCTOLAB_NETD_POOL_PREFIX", default_value_t = 16)]
    pub pool_prefix_len: u8,
}
