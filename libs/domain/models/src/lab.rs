// [libs/domain/models/src/lab.rs]
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::cause::Cause;

/// Which isolation runtime materializes a lab's workloads.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeKind {
    Compose,
    MicroVm,
    Noop,
}

/// Authoritative lab status, spec §3. `Degraded` is a transient sub-state
/// of `Ready`; `Expired` is not a separate variant — it is `Failed` with
/// `cause.tag == "ttl_expired"` — but we keep it out of the enum entirely
/// since spec treats it as a specialization, not a distinct state.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum LabStatus {
    Requested,
    Provisioning,
    Ready,
    Degraded,
    Ending,
    Finished,
    Failed,
}

impl LabStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, LabStatus::Finished | LabStatus::Failed)
    }

    pub fn is_non_terminal(self) -> bool {
        !self.is_terminal()
    }

    /// True if `self -> to` is an edge of the graph in spec §3. `Degraded`
    /// is reachable only from `Ready` and returns only to `Ready`; it is
    /// never itself a CAS target for external callers other than the
    /// health ticker.
    pub fn can_transition_to(self, to: LabStatus) -> bool {
        use LabStatus::*;
        matches!(
            (self, to),
            (Requested, Provisioning)
                | (Requested, Failed)
                | (Provisioning, Ready)
                | (Provisioning, Failed)
                | (Ready, Degraded)
                | (Ready, Ending)
                | (Ready, Failed)
                | (Degraded, Ready)
                | (Degraded, Ending)
                | (Degraded, Failed)
                | (Ending, Finished)
                | (Ending, Failed)
        )
    }
}

/// The central entity: one materialized environment with a lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Lab {
    pub id: String,
    pub owner_id: String,
    pub recipe_id: String,
    pub status: LabStatus,
    pub runtime_kind: RuntimeKind,
    /// Opaque per-runtime reference; `None` before `prepare` succeeds.
    pub backend_handle: Option<String>,
    pub connection_url: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Guest rootfs identity, set only for `RuntimeKind::MicroVm` labs.
    pub build_id: Option<String>,
    pub cause: Option<Cause>,
}

/// A lab whose `status` is one of the quota-counted states (spec §3
/// invariant: "a user's count of labs with status in {PROVISIONING, READY,
/// DEGRADED, ENDING} is at most the configured per-user quota").
pub fn counts_against_quota(status: LabStatus) -> bool {
    matches!(
        status,
        LabStatus::Provisioning | LabStatus::Ready | LabStatus::Degraded | LabStatus::Ending
    )
}
