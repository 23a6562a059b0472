// [libs/infra/repository/src/memory.rs]
use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use octolab_domain_models::evidence::EvidenceBundle;
use octolab_domain_models::lab::{Lab, LabStatus};
use octolab_domain_models::recipe::Recipe;

use crate::error::RepositoryError;
use crate::port::{BuildCacheEntry, RepositoryPort, StatusUpdate};

/// A `Mutex<HashMap<...>>`-backed implementation of `RepositoryPort` used
/// throughout the workspace's unit and scenario tests, and by the `Noop`
/// runtime's doctor dry-run. Implements the identical CAS semantics as
/// `LibsqlRepository` so tests exercising the state machine do not need a
/// database.
#[derive(Default)]
pub struct InMemoryRepository {
    labs: Mutex<HashMap<String, Lab>>,
    recipes: Mutex<HashMap<String, Recipe>>,
    build_cache: Mutex<HashMap<String, BuildCacheEntry>>,
    bundles: Mutex<HashMap<String, EvidenceBundle>>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RepositoryPort for InMemoryRepository {
    async fn create_lab(&self, lab: Lab) -> Result<(), RepositoryError> {
        self.labs.lock().unwrap().insert(lab.id.clone(), lab);
        Ok(())
    }

    async fn get_lab(&self, id: &str) -> Result<Option<Lab>, RepositoryError> {
        Ok(self.labs.lock().unwrap().get(id).cloned())
    }

    async fn list_active_by_owner(&self, owner_id: &str) -> Result<Vec<Lab>, RepositoryError> {
        Ok(self
            .labs
            .lock()
            .unwrap()
            .values()
            .filter(|l| l.owner_id == owner_id && l.status.is_non_terminal())
            .cloned()
            .collect())
    }

    async fn list_non_terminal(&self) -> Result<Vec<Lab>, RepositoryError> {
        Ok(self.labs.lock().unwrap().values().filter(|l| l.status.is_non_terminal()).cloned().collect())
    }

    async fn list_expired(&self, now: DateTime<Utc>) -> Result<Vec<Lab>, RepositoryError> {
        Ok(self
            .labs
            .lock()
            .unwrap()
            .values()
            .filter(|l| {
                matches!(l.status, LabStatus::Provisioning | LabStatus::Ready | LabStatus::Degraded)
                    && l.expires_at.map(|e| e < now).unwrap_or(false)
            })
            .cloned()
            .collect())
    }

    async fn update_status(
        &self,
        id: &str,
        expected_from: LabStatus,
        to: LabStatus,
        update: StatusUpdate,
    ) -> Result<Lab, RepositoryError> {
        let mut labs = self.labs.lock().unwrap();
        let lab = labs.get_mut(id).ok_or_else(|| RepositoryError::LabNotFound(id.to_string()))?;

        if lab.status != expected_from || !expected_from.can_transition_to(to) {
            return Err(RepositoryError::StaleState { id: id.to_string(), expected: expected_from });
        }

        lab.status = to;
        lab.updated_at = Utc::now();
        if let Some(cause) = update.cause {
            lab.cause = Some(cause);
        }
        if let Some(url) = update.connection_url {
            lab.connection_url = Some(url);
        }
        if let Some(handle) = update.backend_handle {
            lab.backend_handle = Some(handle);
        }
        if let Some(build_id) = update.build_id {
            lab.build_id = Some(build_id);
        }
        if let Some(expires_at) = update.expires_at {
            lab.expires_at = Some(lab.expires_at.map_or(expires_at, |current| current.max(expires_at)));
        }
        Ok(lab.clone())
    }

    async fn extend_expiry(&self, id: &str, additional_minutes: i64) -> Result<Lab, RepositoryError> {
        let mut labs = self.labs.lock().unwrap();
        let lab = labs.get_mut(id).ok_or_else(|| RepositoryError::LabNotFound(id.to_string()))?;
        let base = lab.expires_at.unwrap_or_else(Utc::now);
        let candidate = base + chrono::Duration::minutes(additional_minutes);
        lab.expires_at = Some(lab.expires_at.map_or(candidate, |current| current.max(candidate)));
        lab.updated_at = Utc::now();
        Ok(lab.clone())
    }

    async fn get_recipe(&self, id: &str) -> Result<Option<Recipe>, RepositoryError> {
        Ok(self.recipes.lock().unwrap().get(id).cloned())
    }

    async fn put_recipe(&self, recipe: Recipe) -> Result<(), RepositoryError> {
        self.recipes.lock().unwrap().insert(recipe.id.clone(), recipe);
        Ok(())
    }

    async fn get_build_cache(&self, fingerprint: &str) -> Result<Option<BuildCacheEntry>, RepositoryError> {
        Ok(self.build_cache.lock().unwrap().get(fingerprint).cloned())
    }

    async fn put_build_cache(&self, entry: BuildCacheEntry) -> Result<(), RepositoryError> {
        self.build_cache.lock().unwrap().insert(entry.fingerprint.clone(), entry);
        Ok(())
    }

    async fn put_bundle(&self, bundle: EvidenceBundle) -> Result<(), RepositoryError> {
        self.bundles.lock().unwrap().insert(bundle.lab_id.clone(), bundle);
        Ok(())
    }

    async fn get_bundle(&self, lab_id: &str) -> Result<Option<EvidenceBundle>, RepositoryError> {
        Ok(self.bundles.lock().unwrap().get(lab_id).cloned())
    }

    async fn delete_bundles_older_than(&self, older_than: DateTime<Utc>, max: usize) -> Result<usize, RepositoryError> {
        let mut bundles = self.bundles.lock().unwrap();
        let stale: Vec<String> = bundles
            .iter()
            .filter(|(_, b)| b.generated_at < older_than)
            .take(max)
            .map(|(k, _)| k.clone())
            .collect();
        for key in &stale {
            bundles.remove(key);
        }
        Ok(stale.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use octolab_domain_models::lab::RuntimeKind;

    fn lab(id: &str, owner: &str, status: LabStatus) -> Lab {
        let now = Utc::now();
        Lab {
            id: id.into(),
            owner_id: owner.into(),
            recipe_id: "r1".into(),
            status,
            runtime_kind: RuntimeKind::Noop,
            backend_handle: None,
            connection_url: None,
            expires_at: Some(now + chrono::Duration::minutes(60)),
            created_at: now,
            updated_at: now,
            build_id: None,
            cause: None,
        }
    }

    #[tokio::test]
    async fn cas_rejects_mismatched_expected_from() {
        let repo = InMemoryRepository::new();
        repo.create_lab(lab("l1", "u1", LabStatus::Requested)).await.unwrap();

        let result = repo
            .update_status("l1", LabStatus::Ready, LabStatus::Ending, StatusUpdate::default())
            .await;
        assert!(matches!(result, Err(RepositoryError::StaleState { .. })));

        // no write occurred
        let still = repo.get_lab("l1").await.unwrap().unwrap();
        assert_eq!(still.status, LabStatus::Requested);
    }

    #[tokio::test]
    async fn cas_rejects_illegal_edge_even_with_matching_from() {
        let repo = InMemoryRepository::new();
        repo.create_lab(lab("l1", "u1", LabStatus::Requested)).await.unwrap();

        // Requested -> Ready skips Provisioning and must fail.
        let result = repo
            .update_status("l1", LabStatus::Requested, LabStatus::Ready, StatusUpdate::default())
            .await;
        assert!(matches!(result, Err(RepositoryError::StaleState { .. })));
    }

    #[tokio::test]
    async fn second_cas_from_same_from_after_first_success_is_stale() {
        let repo = InMemoryRepository::new();
        repo.create_lab(lab("l1", "u1", LabStatus::Requested)).await.unwrap();

        repo.update_status("l1", LabStatus::Requested, LabStatus::Provisioning, StatusUpdate::default())
            .await
            .unwrap();

        let retry = repo
            .update_status("l1", LabStatus::Requested, LabStatus::Provisioning, StatusUpdate::default())
            .await;
        assert!(matches!(retry, Err(RepositoryError::StaleState { .. })));
    }

    #[tokio::test]
    async fn expiry_never_decreases() {
        let repo = InMemoryRepository::new();
        let mut l = lab("l1", "u1", LabStatus::Ready);
        let original = l.expires_at.unwrap();
        l.status = LabStatus::Ready;
        repo.create_lab(l).await.unwrap();

        let earlier = original - chrono::Duration::minutes(30);
        let updated = repo
            .update_status(
                "l1",
                LabStatus::Ready,
                LabStatus::Degraded,
                StatusUpdate { expires_at: Some(earlier), ..Default::default() },
            )
            .await
            .unwrap();
        // A smaller expires_at never moves the deadline backwards.
        assert_eq!(updated.expires_at.unwrap(), original);

        let extended = repo.extend_expiry("l1", -120).await.unwrap();
        assert_eq!(extended.expires_at.unwrap(), original);
    }

    #[tokio::test]
    async fn list_active_by_owner_excludes_terminal() {
        let repo = InMemoryRepository::new();
        repo.create_lab(lab("l1", "u1", LabStatus::Ready)).await.unwrap();
        repo.create_lab(lab("l2", "u1", LabStatus::Finished)).await.unwrap();
        let active = repo.list_active_by_owner("u1").await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, "l1");
    }
}
