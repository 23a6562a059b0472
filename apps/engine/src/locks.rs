// [apps/engine/src/locks.rs]
//! Per-lab keyed serialization (spec §5): admission, health, expiry, and
//! teardown never race on the same lab's state or runtime handle. Mirrors
//! the network daemon's `LabLocks` (apps/netd/src/server.rs).

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex as AsyncMutex;

#[derive(Default)]
pub struct LabLocks {
    locks: AsyncMutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl LabLocks {
    pub async fn lock_for(&self, lab_id: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self.locks.lock().await;
        locks.entry(lab_id.to_string()).or_insert_with(|| Arc::new(AsyncMutex::new(()))).clone()
    }
}
