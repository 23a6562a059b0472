// [libs/infra/evidence/src/retention.rs]
//! Scheduled sweep that deletes bundles past the retention window,
//! bounded in work per tick so a large backlog can't stall the engine's
//! other tickers.

use chrono::{DateTime, Duration, Utc};
use octolab_repository::RepositoryPort;
use tracing::info;

const MAX_DELETIONS_PER_TICK: usize = 200;

pub async fn sweep(repository: &dyn RepositoryPort, retention_days: i64, now: DateTime<Utc>) -> Result<usize, octolab_repository::RepositoryError> {
    let cutoff = now - Duration::days(retention_days);
    let deleted = repository.delete_bundles_older_than(cutoff, MAX_DELETIONS_PER_TICK).await?;
    if deleted > 0 {
        info!(deleted, cutoff = %cutoff, "evidence retention sweep removed expired bundles");
    }
    Ok(deleted)
}
