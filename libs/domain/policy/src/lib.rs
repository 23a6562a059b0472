// [libs/domain/policy/src/lib.rs]
//! Pure functions over `(owner, intent, current_active_count, role)` (spec
//! §4.10). No I/O, no clock reads beyond what the caller passes in, so the
//! admission path can unit-test every gate without a database.

use octolab_domain_models::intent::{Intent, Severity};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy)]
pub struct Role {
    pub max_ttl_minutes: u32,
}

impl Role {
    pub fn standard(config: &PolicyConfig) -> Self {
        Role { max_ttl_minutes: config.max_ttl_minutes }
    }
}

#[derive(Debug, Clone)]
pub struct PolicyConfig {
    pub max_active_per_user: u32,
    pub default_ttl_minutes: u32,
    pub max_ttl_minutes: u32,
    pub critical_justification_min_len: usize,
    pub retention_days: u32,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        PolicyConfig {
            max_active_per_user: 2,
            default_ttl_minutes: 120,
            max_ttl_minutes: 480,
            critical_justification_min_len: 50,
            retention_days: 7,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum Denial {
    QuotaExceeded { current: u32, max: u32 },
    TtlExceedsCap { requested: u32, max: u32 },
    MissingJustification { min_len: usize },
    MissingAcknowledgement,
    RecipeUnapproved,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny(Denial),
}

/// Admission gate: quota, then TTL cap, then severity gating. Order
/// matters only for which single `Denial` is surfaced first; spec treats
/// all of these as evaluated "in one transaction".
pub fn evaluate_admission(
    config: &PolicyConfig,
    role: Role,
    intent: &Intent,
    current_active_count: u32,
) -> Decision {
    if current_active_count >= config.max_active_per_user {
        return Decision::Deny(Denial::QuotaExceeded {
            current: current_active_count,
            max: config.max_active_per_user,
        });
    }

    let ttl_cap = role.max_ttl_minutes.min(config.max_ttl_minutes);
    if intent.ttl_minutes > ttl_cap {
        return Decision::Deny(Denial::TtlExceedsCap { requested: intent.ttl_minutes, max: ttl_cap });
    }

    match intent.severity {
        Severity::Critical => {
            let len = intent.justification.as_deref().unwrap_or("").trim().len();
            if len < config.critical_justification_min_len {
                return Decision::Deny(Denial::MissingJustification {
                    min_len: config.critical_justification_min_len,
                });
            }
        }
        Severity::High => {
            if !intent.acknowledgement {
                return Decision::Deny(Denial::MissingAcknowledgement);
            }
        }
        Severity::Medium | Severity::Low => {}
    }

    Decision::Allow
}

/// `extend_lab` gate: the new TTL must not exceed the role's cap measured
/// from the lab's original creation, and the lab must be in an extendable
/// status. Status eligibility itself lives with the engine (it needs the
/// live `LabStatus`); this only checks the numeric cap.
pub fn evaluate_extension(config: &PolicyConfig, role: Role, requested_additional_minutes: u32, elapsed_minutes: u32) -> Decision {
    let ttl_cap = role.max_ttl_minutes.min(config.max_ttl_minutes);
    if elapsed_minutes + requested_additional_minutes > ttl_cap {
        return Decision::Deny(Denial::TtlExceedsCap {
            requested: elapsed_minutes + requested_additional_minutes,
            max: ttl_cap,
        });
    }
    Decision::Allow
}
