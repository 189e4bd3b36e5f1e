//! Bounded, constant-backoff retry around cluster writes.

use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

use crate::cluster::ClusterClient;
use crate::error::ClientError;
use crate::render::Manifest;
use crate::resource::ResourceRef;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    /// Fixed pause between attempts.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: 3,
            backoff: Duration::from_secs(5),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum ApplyOutcome {
    Applied { attempts: u32 },
    Failed { attempts: u32, error: ClientError },
    /// Cancelled while backing off. The last write had already completed.
    Cancelled { attempts: u32, error: Option<ClientError> },
}

impl ApplyOutcome {
    pub fn attempts(&self) -> u32 {
        match self {
            ApplyOutcome::Applied { attempts }
            | ApplyOutcome::Failed { attempts, .. }
            | ApplyOutcome::Cancelled { attempts, .. } => *attempts,
        }
    }
}

/// Run `operation` until it succeeds, fails with a non-retryable error, or
/// `policy.max_attempts` is used up. A write in flight is never interrupted,
/// cancellation only cuts the backoff short.
pub async fn retry_write<F, Fut>(
    policy: &RetryPolicy,
    operation_name: &str,
    cancel: &CancellationToken,
    mut operation: F,
) -> ApplyOutcome
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<(), ClientError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0u32;

    loop {
        attempt += 1;

        let e = match operation().await {
            Ok(()) => return ApplyOutcome::Applied { attempts: attempt },
            Err(e) => e,
        };

        if !e.is_retryable() {
            error!(operation = %operation_name, attempt, error = %e, "Rejected, not retrying");
            return ApplyOutcome::Failed {
                attempts: attempt,
                error: e,
            };
        }
        if attempt >= max_attempts {
            error!(operation = %operation_name, attempt, error = %e, "Failed after max attempts");
            return ApplyOutcome::Failed {
                attempts: attempt,
                error: e,
            };
        }

        warn!(
            operation = %operation_name,
            attempt,
            error = %e,
            delay_ms = policy.backoff.as_millis() as u64,
            "Write failed, retrying"
        );

        tokio::select! {
            _ = cancel.cancelled() => {
                return ApplyOutcome::Cancelled { attempts: attempt, error: Some(e) };
            }
            _ = sleep(policy.backoff) => {}
        }
    }
}

pub async fn apply_with_retry(
    client: &dyn ClusterClient,
    manifest: &Manifest,
    policy: &RetryPolicy,
    cancel: &CancellationToken,
) -> ApplyOutcome {
    let name = format!("apply {}", manifest.resource);
    retry_write(policy, &name, cancel, || client.apply(manifest)).await
}

pub async fn patch_with_retry(
    client: &dyn ClusterClient,
    resource: &ResourceRef,
    patch: &serde_json::Value,
    policy: &RetryPolicy,
    cancel: &CancellationToken,
) -> ApplyOutcome {
    let name = format!("patch {}", resource);
    retry_write(policy, &name, cancel, || client.patch(resource, patch)).await
}

pub async fn delete_with_retry(
    client: &dyn ClusterClient,
    resource: &ResourceRef,
    policy: &RetryPolicy,
    cancel: &CancellationToken,
) -> ApplyOutcome {
    let name = format!("delete {}", resource);
    retry_write(policy, &name, cancel, || async move {
        match client.delete(resource).await {
            Err(e) if e.is_not_found() => Ok(()),
            other => other,
        }
    })
    .await
}
