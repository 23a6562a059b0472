// [libs/infra/evidence/src/fetch.rs]
//! Ownership-checked bundle retrieval for the admin/API surface: a caller
//! can only fetch evidence for labs they own.

use octolab_repository::RepositoryPort;

use crate::error::EvidenceError;

pub async fn fetch_bundle(
    repository: &dyn RepositoryPort,
    lab_id: &str,
    requesting_owner: &str,
) -> Result<octolab_domain_models::evidence::EvidenceBundle, EvidenceError> {
    let lab = repository
        .get_lab(lab_id)
        .await
        .map_err(|e| EvidenceError::Repository(e.to_string()))?
        .ok_or_else(|| EvidenceError::NotFound(lab_id.to_string()))?;

    if lab.owner_id != requesting_owner {
        return Err(EvidenceError::NotOwner(lab_id.to_string()));
    }

    repository
        .get_bundle(lab_id)
        .await
        .map_err(|e| EvidenceError::Repository(e.to_string()))?
        .ok_or_else(|| EvidenceError::NotFound(lab_id.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use octolab_domain_models::evidence::EvidenceBundle;
    use octolab_domain_models::lab::{Lab, LabStatus, RuntimeKind};
    use octolab_repository::InMemoryRepository;

    fn sample_lab(id: &str, owner: &str) -> Lab {
        Lab {
            id: id.to_string(),
            owner_id: owner.to_string(),
            recipe_id: "recipe-1".to_string(),
            status: LabStatus::Ready,
            runtime_kind: RuntimeKind::Compose,
            backend_handle: None,
            connection_url: None,
            expires_at: Some(Utc::now() + chrono::Duration::minutes(30)),
            created_at: Utc::now(),
            updated_at: Utc::now(),
            build_id: None,
            cause: None,
        }
    }

    #[tokio::test]
    async fn owner_can_fetch_their_bundle() {
        let repo = InMemoryRepository::default();
        repo.create_lab(sample_lab("lab-1", "alice")).await.unwrap();
        repo.put_bundle(EvidenceBundle { lab_id: "lab-1".to_string(), generated_at: Utc::now(), files: vec![], containers: vec![], mac: None }).await.unwrap();

        let bundle = fetch_bundle(&repo, "lab-1", "alice").await.unwrap();
        assert_eq!(bundle.lab_id, "lab-1");
    }

    #[tokio::test]
    async fn non_owner_is_rejected() {
        let repo = InMemoryRepository::default();
        repo.create_lab(sample_lab("lab-1", "alice")).await.unwrap();
        repo.put_bundle(EvidenceBundle { lab_id: "lab-1".to_string(), generated_at: Utc::now(), files: vec![], containers: vec![], mac: None }).await.unwrap();

        let result = fetch_bundle(&repo, "lab-1", "mallory").await;
        assert!(matches!(result, Err(EvidenceError::NotOwner(_))));
    }

    #[tokio::test]
    async fn missing_bundle_is_not_found() {
        let repo = InMemoryRepository::default();
        repo.create_lab(sample_lab("lab-1", "alice")).await.unwrap();

        let result = fetch_bundle(&repo, "lab-1", "alice").await;
        assert!(matches!(result, Err(EvidenceError::NotFound(_))));
    }
}
