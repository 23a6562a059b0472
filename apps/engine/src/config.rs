// [apps/engine/src/config.rs]
//! Single source of configuration, populated from the environment via
//! `dotenvy` + `std::env` (the teacher's `dotenv().ok()` pattern). Unknown
//! keys are ignored by construction: this loader only looks up the keys
//! it names below.

use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeSelection {
    Compose,
    MicroVm,
    Noop,
}

impl RuntimeSelection {
    fn parse(raw: &str) -> Self {
        match raw.to_ascii_lowercase().as_str() {
            "compose" => RuntimeSelection::Compose,
            "microvm" => RuntimeSelection::MicroVm,
            _ => RuntimeSelection::Noop,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub runtime: RuntimeSelection,
    pub database_url: String,
    pub database_auth_token: Option<String>,
    pub netd_socket_path: String,
    pub state_root: String,
    pub kernel_path: String,
    pub base_rootfs_path: String,
    pub vcpu_count: u32,
    pub mem_mib: u32,
    pub jailer_disabled: bool,
    pub boot_timeout: Duration,
    pub command_timeout: Duration,
    pub teardown_budget: Duration,
    pub max_active_per_user: u32,
    pub default_ttl_minutes: u32,
    pub max_ttl_minutes: u32,
    pub retention_days: u32,
    pub evidence_signing_secret: String,
    pub provisioning_pool_size: usize,
    pub teardown_pool_size: usize,
    pub health_tick_interval: Duration,
    pub expiry_tick_interval: Duration,
    pub health_unreachable_threshold: u32,
    pub admin_port: u16,
}

impl EngineConfig {
    pub fn from_env() -> Self {
        EngineConfig {
            runtime: RuntimeSelection::parse(&env_or("OCTOLAB_RUNTIME", "noop")),
            database_url: env_or("DATABASE_URL", "file:octolab.db"),
            database_auth_token: std::env::var("DATABASE_AUTH_TOKEN").ok(),
            netd_socket_path: env_or("OCTOLAB_NETD_SOCKET", "/run/octolab/netd.sock"),
            state_root: env_or("OCTOLAB_STATE_ROOT", "/var/lib/octolab/state"),
            kernel_path: env_or("OCTOLAB_KERNEL_PATH", "/var/lib/octolab/vmlinux"),
            base_rootfs_path: env_or("OCTOLAB_BASE_ROOTFS", "/var/lib/octolab/base.ext4"),
            vcpu_count: env_or("OCTOLAB_VCPU_COUNT", "2").parse().unwrap_or(2),
            mem_mib: env_or("OCTOLAB_MEM_MIB", "1024").parse().unwrap_or(1024),
            jailer_disabled: env_or("OCTOLAB_JAILER_DISABLED", "false").parse().unwrap_or(false),
            boot_timeout: Duration::from_secs(env_or("OCTOLAB_BOOT_TIMEOUT_SECS", "60").parse().unwrap_or(60)),
            command_timeout: Duration::from_secs(env_or("OCTOLAB_COMMAND_TIMEOUT_SECS", "20").parse().unwrap_or(20)),
            teardown_budget: Duration::from_secs(env_or("OCTOLAB_TEARDOWN_BUDGET_SECS", "60").parse().unwrap_or(60)),
            max_active_per_user: env_or("OCTOLAB_MAX_ACTIVE_PER_USER", "2").parse().unwrap_or(2),
            default_ttl_minutes: env_or("OCTOLAB_DEFAULT_TTL_MINUTES", "120").parse().unwrap_or(120),
            max_ttl_minutes: env_or("OCTOLAB_MAX_TTL_MINUTES", "480").parse().unwrap_or(480),
            retention_days: env_or("OCTOLAB_RETENTION_DAYS", "7").parse().unwrap_or(7),
            evidence_signing_secret: env_or("OCTOLAB_EVIDENCE_SECRET", "dev-only-insecure-secret"),
            provisioning_pool_size: env_or("OCTOLAB_PROVISIONING_POOL_SIZE", "4").parse().unwrap_or(4),
            teardown_pool_size: env_or("OCTOLAB_TEARDOWN_POOL_SIZE", "4").parse().unwrap_or(4),
            health_tick_interval: Duration::from_secs(env_or("OCTOLAB_HEALTH_TICK_SECS", "10").parse().unwrap_or(10)),
            expiry_tick_interval: Duration::from_secs(env_or("OCTOLAB_EXPIRY_TICK_SECS", "15").parse().unwrap_or(15)),
            health_unreachable_threshold: env_or("OCTOLAB_HEALTH_UNREACHABLE_THRESHOLD", "3").parse().unwrap_or(3),
            admin_port: env_or("OCTOLAB_ADMIN_PORT", "9090").parse().unwrap_or(9090),
        }
    }

    pub fn policy_config(&self) -> octolab_policy::PolicyConfig {
        octolab_policy::PolicyConfig {
            max_active_per_user: self.max_active_per_user,
            default_ttl_minutes: self.default_ttl_minutes,
            max_ttl_minutes: self.max_ttl_minutes,
            critical_justification_min_len: 50,
            retention_days: self.retention_days,
        }
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}
