// [libs/infra/repository/src/port.rs]
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use octolab_domain_models::cause::Cause;
use octolab_domain_models::lab::{Lab, LabStatus};
use octolab_domain_models::recipe::Recipe;
use octolab_domain_models::evidence::EvidenceBundle;

use crate::error::RepositoryError;

/// Fields that may change alongside a status transition. `None` leaves the
/// corresponding column untouched; `expires_at` is validated by the
/// implementation to never decrease while the lab is non-terminal (spec §3
/// invariant).
#[derive(Debug, Clone, Default)]
pub struct StatusUpdate {
    pub cause: Option<Cause>,
    pub connection_url: Option<String>,
    pub backend_handle: Option<String>,
    pub build_id: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl StatusUpdate {
    pub fn with_cause(cause: Cause) -> Self {
        Self { cause: Some(cause), ..Default::default() }
    }
}

#[derive(Debug, Clone)]
pub struct BuildCacheEntry {
    pub fingerprint: String,
    pub image_tag: String,
}

/// Repeatable-read list operations, compare-and-set mutation: the
/// transactional contract from spec §4.1.
#[async_trait]
pub trait RepositoryPort: Send + Sync {
    async fn create_lab(&self, lab: Lab) -> Result<(), RepositoryError>;
    async fn get_lab(&self, id: &str) -> Result<Option<Lab>, RepositoryError>;
    async fn list_active_by_owner(&self, owner_id: &str) -> Result<Vec<Lab>, RepositoryError>;
    async fn list_non_terminal(&self) -> Result<Vec<Lab>, RepositoryError>;
    async fn list_expired(&self, now: DateTime<Utc>) -> Result<Vec<Lab>, RepositoryError>;

    /// Compare-and-set: succeeds only if the lab's current status equals
    /// `expected_from` and `expected_from.can_transition_to(to)`. Returns
    /// the lab's new row on success, `StaleState` otherwise.
    async fn update_status(
        &self,
        id: &str,
        expected_from: LabStatus,
        to: LabStatus,
        update: StatusUpdate,
    ) -> Result<Lab, RepositoryError>;

    /// Extends `expires_at` by `additional_minutes`, clamped so it never
    /// decreases. No-op on the status.
    async fn extend_expiry(&self, id: &str, additional_minutes: i64) -> Result<Lab, RepositoryError>;

    async fn get_recipe(&self, id: &str) -> Result<Option<Recipe>, RepositoryError>;
    async fn put_recipe(&self, recipe: Recipe) -> Result<(), RepositoryError>;

    async fn get_build_cache(&self, fingerprint: &str) -> Result<Option<BuildCacheEntry>, RepositoryError>;
    async fn put_build_cache(&self, entry: BuildCacheEntry) -> Result<(), RepositoryError>;

    async fn put_bundle(&self, bundle: EvidenceBundle) -> Result<(), RepositoryError>;
    async fn get_bundle(&self, lab_id: &str) -> Result<Option<EvidenceBundle>, RepositoryError>;
    /// Deletes bundles whose `generated_at` predates `older_than`, returning
    /// the count deleted. Bounded per call by the caller's batch size.
    async fn delete_bundles_older_than(&self, older_than: DateTime<Utc>, max: usize) -> Result<usize, RepositoryError>;
}
