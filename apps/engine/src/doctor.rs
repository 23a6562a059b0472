// [apps/engine/src/doctor.rs]
//! Startup preflight (C9). Grounded on the teacher's
//! `Bootstrap::spawn_diagnostics` / forensic-ignition pattern of gating
//! service start on an integrity check, generalized from "forensic DNA"
//! verification to infrastructure readiness checks. A single `Fatal`
//! result blocks the engine from starting the provisioning/teardown
//! pools; `Warning` results are only surfaced on the admin endpoint.

use std::path::Path;

use octolab_netd_proto::NetdClient;
use serde::{Deserialize, Serialize};

use crate::config::{EngineConfig, RuntimeSelection};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Fatal,
    Warning,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckResult {
    pub name: String,
    pub severity: Severity,
    pub passed: bool,
    pub detail: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DoctorReport {
    pub checks: Vec<CheckResult>,
}

impl DoctorReport {
    pub fn is_healthy(&self) -> bool {
        self.checks.iter().all(|c| c.passed || c.severity != Severity::Fatal)
    }

    pub fn warnings(&self) -> Vec<&CheckResult> {
        self.checks.iter().filter(|c| !c.passed && c.severity == Severity::Warning).collect()
    }
}

/// Runs every check named in spec §4.9 and returns the aggregate report.
/// Never panics: a check that cannot even run records itself as a failed
/// check rather than aborting the battery.
pub async fn run(config: &EngineConfig) -> DoctorReport {
    let mut checks = Vec::new();

    checks.push(check_path_readable("state_directory_writable", &config.state_root, true));

    match config.runtime {
        RuntimeSelection::MicroVm => {
            checks.push(check_path_readable("kernel_readable", &config.kernel_path, false));
            checks.push(check_path_readable("rootfs_readable", &config.base_rootfs_path, false));
            checks.push(cpu_virtualization_check());
            if config.jailer_disabled {
                checks.push(CheckResult {
                    name: "jailer_disabled".to_string(),
                    severity: Severity::Fatal,
                    passed: false,
                    detail: "sandbox helper (jailer) is disabled; this is a development-only switch and must never run in production".to_string(),
                });
            }
        }
        RuntimeSelection::Compose => {
            checks.push(container_engine_check().await);
        }
        RuntimeSelection::Noop => {}
    }

    if !matches!(config.runtime, RuntimeSelection::Noop) {
        checks.push(netd_socket_check(config).await);
    }

    DoctorReport { checks }
}

fn check_path_readable(name: &str, path: &str, needs_write: bool) -> CheckResult {
    let p = Path::new(path);
    let exists = p.exists();
    let writable = !needs_write || std::fs::metadata(p).map(|m| !m.permissions().readonly()).unwrap_or(false);
    let passed = exists && writable;
    CheckResult {
        name: name.to_string(),
        severity: Severity::Fatal,
        passed,
        detail: if passed { format!("{path} is accessible") } else { format!("{path} is missing or not accessible") },
    }
}

fn cpu_virtualization_check() -> CheckResult {
    let supported = std::fs::read_to_string("/proc/cpuinfo")
        .map(|flags| flags.contains("vmx") || flags.contains("svm"))
        .unwrap_or(false);
    CheckResult {
        name: "cpu_virtualization_available".to_string(),
        severity: Severity::Fatal,
        passed: supported,
        detail: if supported { "hardware virtualization flags present".to_string() } else { "no vmx/svm flag found in /proc/cpuinfo".to_string() },
    }
}

async fn container_engine_check() -> CheckResult {
    let output = tokio::process::Command::new("docker").arg("version").output().await;
    match output {
        Ok(out) if out.status.success() => {
            CheckResult { name: "container_engine_reachable".to_string(), severity: Severity::Fatal, passed: true, detail: "docker responded to `docker version`".to_string() }
        }
        Ok(out) => CheckResult {
            name: "container_engine_reachable".to_string(),
            severity: Severity::Fatal,
            passed: false,
            detail: format!("docker exited with {}", out.status),
        },
        Err(err) => CheckResult {
            name: "container_engine_reachable".to_string(),
            severity: Severity::Fatal,
            passed: false,
            detail: format!("could not run docker: {err}"),
        },
    }
}

async fn netd_socket_check(config: &EngineConfig) -> CheckResult {
    let client = NetdClient::new(&config.netd_socket_path);
    match client.ping().await {
        Ok(()) => CheckResult { name: "netd_socket_reachable".to_string(), severity: Severity::Fatal, passed: true, detail: "network daemon answered ping".to_string() },
        Err(err) => CheckResult {
            name: "netd_socket_reachable".to_string(),
            severity: Severity::Fatal,
            passed: false,
            detail: format!("network daemon unreachable: {err}"),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn noop_runtime_skips_host_checks() {
        let mut config = EngineConfig::from_env();
        config.runtime = RuntimeSelection::Noop;
        config.state_root = std::env::temp_dir().to_string_lossy().to_string();
        let report = run(&config).await;
        assert!(report.checks.iter().all(|c| c.name != "netd_socket_reachable"));
    }

    #[tokio::test]
    async fn missing_state_root_is_fatal() {
        let mut config = EngineConfig::from_env();
        config.runtime = RuntimeSelection::Noop;
        config.state_root = "/nonexistent/path/for/doctor/test".to_string();
        let report = run(&config).await;
        assert!(!report.is_healthy());
    }
}
