// [libs/infra/compose-runtime/src/build_cache.rs]
//! Narrow port onto the build cache, kept separate from
//! `octolab-repository` so this crate never depends on the persistence
//! layer directly — the engine binary supplies an adapter.

use async_trait::async_trait;

#[async_trait]
pub trait BuildCache: Send + Sync {
    async fn get_image_tag(&self, fingerprint: &str) -> Option<String>;
    async fn put_image_tag(&self, fingerprint: &str, image_tag: &str);
}

#[cfg(test)]
pub mod mock {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct MockBuildCache {
        entries: Mutex<HashMap<String, String>>,
    }

    #[async_trait]
    impl BuildCache for MockBuildCache {
        async fn get_image_tag(&self, fingerprint: &str) -> Option<String> {
            self.entries.lock().unwrap().get(fingerprint).cloned()
        }

        async fn put_image_tag(&self, fingerprint: &str, image_tag: &str) {
            self.entries.lock().unwrap().insert(fingerprint.to_string(), image_tag.to_string());
        }
    }
}
