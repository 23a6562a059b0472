// [apps/engine/src/retry.rs]
//! Bounded, jittered retry for `Runtime` calls, mirroring the network
//! daemon client's backoff (`octolab-netd-proto::client`). `RuntimeError`
//! is the only error this wraps: it already classifies `Transient` vs
//! `Fatal`, so the policy here only decides how many times and how long
//! to wait between attempts.

use std::time::Duration;

use octolab_runtime::RuntimeError;
use rand::Rng;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy { max_attempts: 5, base_delay: Duration::from_millis(200), max_delay: Duration::from_secs(10) }
    }
}

fn backoff(policy: &RetryPolicy, attempt: u32) -> Duration {
    let exp = policy.base_delay.saturating_mul(1 << attempt.min(10));
    let capped = exp.min(policy.max_delay);
    let jitter_ms = rand::thread_rng().gen_range(0..=capped.as_millis() as u64 / 2 + 1);
    capped + Duration::from_millis(jitter_ms)
}

/// Retries `f` while it returns `RuntimeError::Transient`. On exhaustion,
/// returns `RuntimeError::Fatal("retry_exhausted: ...")` per spec §7.
pub async fn with_retry<F, Fut, T>(policy: &RetryPolicy, mut f: F) -> Result<T, RuntimeError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, RuntimeError>>,
{
    let mut last_err = None;
    for attempt in 0..policy.max_attempts {
        match f().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() => {
                warn!(attempt, error = %err, "runtime call failed, retrying");
                last_err = Some(err);
                tokio::time::sleep(backoff(policy, attempt)).await;
            }
            Err(err) => return Err(err),
        }
    }
    Err(RuntimeError::Fatal(format!(
        "retry_exhausted: {}",
        last_err.map(|e| e.to_string()).unwrap_or_default()
    )))
}
