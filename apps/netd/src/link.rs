// [apps/netd/src/link.rs]
//! Abstraction over actual bridge/TAP device creation so the daemon's
//! request handling and reconciliation logic can be unit tested without
//! root or a real network namespace.

use async_trait::async_trait;
use std::net::Ipv4Addr;
use tokio::process::Command;
use tracing::warn;

#[async_trait]
pub trait LinkManager: Send + Sync {
    async fn create_bridge(&self, name: &str, host_ip: Ipv4Addr, netmask: Ipv4Addr) -> anyhow::Result<()>;
    async fn create_tap(&self, name: &str, bridge: &str) -> anyhow::Result<()>;
    async fn device_exists(&self, name: &str) -> bool;
    async fn destroy(&self, name: &str) -> anyhow::Result<()>;
}

/// Shells out to `ip` as the teacher's reaper shells out to its process
/// supervision tools. `ip` is the standard Linux tool for this and is
/// assumed present on the host running the daemon.
pub struct SystemLinkManager;

#[async_trait]
impl LinkManager for SystemLinkManager {
    async fn create_bridge(&self, name: &str, host_ip: Ipv4Addr, netmask: Ipv4Addr) -> anyhow::Result<()> {
        run(&["link", "add", "name", name, "type", "bridge"]).await?;
        run(&["addr", "add", &format!("{host_ip}/{}", prefix_len(netmask)), "dev", name]).await?;
        run(&["link", "set", name, "up"]).await?;
        Ok(())
    }

    async fn create_tap(&self, name: &str, bridge: &str) -> anyhow::Result<()> {
        run(&["tuntap", "add", "dev", name, "mode", "tap"]).await?;
        run(&["link", "set", name, "master", bridge]).await?;
        run(&["link", "set", name, "up"]).await?;
        Ok(())
    }

    async fn device_exists(&self, name: &str) -> bool {
        Command::new("ip").args(["link", "show", name]).output().await.map(|o| o.status.success()).unwrap_or(false)
    }

    async fn destroy(&self, name: &str) -> anyhow::Result<()> {
        let output = Command::new("ip").args(["link", "delete", name]).output().await?;
        if !output.status.success() {
            warn!(device = name, stderr = %String::from_utf8_lossy(&output.stderr), "device deletion reported failure");
        }
        Ok(())
    }
}

async fn run(args: &[&str]) -> anyhow::Result<()> {
    let output = Command::new("ip").args(args).output().await?;
    if !output.status.success() {
        anyhow::bail!("ip {:?} failed: {}", args, String::from_utf8_lossy(&output.stderr));
    }
    Ok(())
}

fn prefix_len(mask: Ipv4Addr) -> u32 {
    u32::from(mask).count_ones()
}

#[cfg(any(test, feature = "test-support"))]
pub mod mock {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct MockLinkManager {
        pub devices: Mutex<HashSet<String>>,
        pub fail_create: Mutex<HashSet<String>>,
    }

    #[async_trait]
    impl LinkManager for MockLinkManager {
        async fn create_bridge(&self, name: &str, _host_ip: Ipv4Addr, _netmask: Ipv4Addr) -> anyhow::Result<()> {
            if self.fail_create.lock().unwrap().contains(name) {
                anyhow::bail!("forced failure for {name}");
            }
            self.devices.lock().unwrap().insert(name.to_string());
            Ok(())
        }

        async fn create_tap(&self, name: &str, _bridge: &str) -> anyhow::Result<()> {
            if self.fail_create.lock().unwrap().contains(name) {
                anyhow::bail!("forced failure for {name}");
            }
            self.devices.lock().unwrap().insert(name.to_string());
            Ok(())
        }

        async fn device_exists(&self, name: &str) -> bool {
            self.devices.lock().unwrap().contains(name)
        }

        async fn destroy(&self, name: &str) -> anyhow::Result<()> {
            self.devices.lock().unwrap().remove(name);
            Ok(())
        }
    }
}
