// [libs/domain/models/src/intent.rs]
use serde::{Deserialize, Serialize};

/// Severity of the CVE/exploit family being rehearsed. Drives the severity
/// gates enforced by the policy crate (spec §4.10).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

/// An immutable request to provision a lab. Built by an out-of-scope
/// collaborator (the dialogue/catalog layer) and consumed once by
/// admission.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Intent {
    pub software: String,
    pub version: String,
    pub exploit_family: String,
    pub notes: Option<String>,
    pub severity: Severity,
    pub ttl_minutes: u32,
    pub cve_reference: Option<String>,
    /// Present when `severity == Critical`; policy requires >= 50 chars.
    pub justification: Option<String>,
    /// Present when `severity == High`; policy requires this to be `true`.
    pub acknowledgement: bool,
}
