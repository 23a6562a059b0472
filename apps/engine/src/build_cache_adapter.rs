// [apps/engine/src/build_cache_adapter.rs]
//! Adapts the repository's build-cache table to `octolab_compose_runtime`'s
//! narrow `BuildCache` trait, keeping that crate from depending on
//! `octolab-repository` directly.

use std::sync::Arc;

use async_trait::async_trait;
use octolab_compose_runtime::BuildCache;
use octolab_repository::{BuildCacheEntry, RepositoryPort};
use tracing::warn;

pub struct RepositoryBuildCache {
    repository: Arc<dyn RepositoryPort>,
}

impl RepositoryBuildCache {
    pub fn new(repository: Arc<dyn RepositoryPort>) -> Self {
        RepositoryBuildCache { repository }
    }
}

#[async_trait]
impl BuildCache for RepositoryBuildCache {
    async fn get_image_tag(&self, fingerprint: &str) -> Option<String> {
        match self.repository.get_build_cache(fingerprint).await {
            Ok(entry) => entry.map(|e| e.image_tag),
            Err(err) => {
                warn!(%err, "build cache lookup failed, treating as a miss");
                None
            }
        }
    }

    async fn put_image_tag(&self, fingerprint: &str, image_tag: &str) {
        let entry = BuildCacheEntry { fingerprint: fingerprint.to_string(), image_tag: image_tag.to_string() };
        if let Err(err) = self.repository.put_build_cache(entry).await {
            warn!(%err, "failed to persist build cache entry");
        }
    }
}
