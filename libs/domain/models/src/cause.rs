// [libs/domain/models/src/cause.rs]
use serde::{Deserialize, Serialize};

/// The error taxonomy from spec §7. Every non-terminal-preserving
/// transition records which class of failure drove it, so reconciliation
/// and the admin surface can distinguish "the user asked for this" from
/// "something broke".
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    PolicyDenied,
    Transient,
    Fatal,
    TeardownTimeout,
    Orphaned,
    StaleState,
    /// Not an error: a normal end to a lab's life (TTL expiry, explicit
    /// stop). Teardown resolves these to FINISHED rather than FAILED.
    Expected,
}

/// A short, stable, machine-matchable tag plus a human-readable detail.
/// `Cause::tag` values are the ones named throughout spec §4.7/§8, e.g.
/// `ttl_expired`, `probe_dead`, `vmm_exit`, `orphaned`, `teardown_timeout`,
/// `retry_exhausted`, `internal:<tag>`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Cause {
    pub class: ErrorClass,
    pub tag: String,
    pub detail: String,
}

impl Cause {
    pub fn new(class: ErrorClass, tag: impl Into<String>, detail: impl Into<String>) -> Self {
        Self { class, tag: tag.into(), detail: detail.into() }
    }

    pub fn ttl_expired() -> Self {
        Self::new(ErrorClass::Expected, "ttl_expired", "lab reached its expires_at deadline")
    }

    pub fn user_stop() -> Self {
        Self::new(ErrorClass::Expected, "user_stop", "owner requested an explicit stop")
    }

    pub fn deadline() -> Self {
        Self::new(ErrorClass::Fatal, "deadline", "an in-flight call was cancelled at its deadline")
    }

    pub fn probe_dead() -> Self {
        Self::new(ErrorClass::Fatal, "probe_dead", "runtime reported the workload as dead")
    }

    pub fn orphaned() -> Self {
        Self::new(ErrorClass::Orphaned, "orphaned", "reconciliation found no matching live resource")
    }

    pub fn teardown_timeout() -> Self {
        Self::new(ErrorClass::TeardownTimeout, "teardown_timeout", "teardown did not reach a terminal state within budget")
    }

    pub fn retry_exhausted(detail: impl Into<String>) -> Self {
        Self::new(ErrorClass::Fatal, "retry_exhausted", detail)
    }

    pub fn internal(tag: impl Into<String>) -> Self {
        let tag = tag.into();
        Self::new(ErrorClass::Fatal, format!("internal:{tag}"), "unexpected error, see engine logs")
    }

    pub fn is_error(&self) -> bool {
        !matches!(self.class, ErrorClass::Expected)
    }
}
