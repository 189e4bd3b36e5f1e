//! Wait for an external controller to report a condition on a resource.

use serde_json::Value;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cluster::ClusterClient;
use crate::error::{ClientError, Error};
use crate::resource::{Condition, ResourceRef};

/// Consecutive failed fetches (other than not-found) tolerated before giving up.
pub const DEFAULT_STALL_THRESHOLD: u32 = 12;

#[derive(Clone, Debug)]
pub struct PollSpec {
    pub resource: ResourceRef,
    pub condition: Condition,
    pub interval: Duration,
    /// Zero polls until satisfied or cancelled.
    pub timeout: Duration,
    pub stall_threshold: u32,
}

impl PollSpec {
    pub fn new(resource: ResourceRef, condition: Condition, interval: Duration) -> PollSpec {
        PollSpec {
            resource,
            condition,
            interval,
            timeout: Duration::ZERO,
            stall_threshold: DEFAULT_STALL_THRESHOLD,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> PollSpec {
        self.timeout = timeout;
        self
    }

    pub fn with_stall_threshold(mut self, stall_threshold: u32) -> PollSpec {
        self.stall_threshold = stall_threshold;
        self
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.interval.is_zero() {
            return Err(Error::invalid_plan(format!(
                "poll interval for {} must be greater than 0",
                self.resource
            )));
        }
        if self.stall_threshold == 0 {
            return Err(Error::invalid_plan(format!(
                "stall threshold for {} must be at least 1",
                self.resource
            )));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum PollOutcome {
    /// Snapshot that satisfied the condition, `None` for a satisfied `Absent`.
    Satisfied(Option<Value>),
    TimedOut {
        last_observed: Option<Value>,
        last_error: Option<ClientError>,
    },
    Cancelled,
}

/// Fetch, evaluate, sleep; until the condition holds, the budget runs out or
/// `cancel` fires. Only reads from the cluster.
pub async fn await_condition(
    client: &dyn ClusterClient,
    spec: &PollSpec,
    cancel: &CancellationToken,
) -> PollOutcome {
    let start = Instant::now();
    let mut stalled = 0u32;
    let mut last_observed: Option<Value> = None;
    let mut last_error: Option<ClientError> = None;

    loop {
        if cancel.is_cancelled() {
            return PollOutcome::Cancelled;
        }

        let snapshot = match client.get(&spec.resource).await {
            Ok(snapshot) => Some(snapshot),
            Err(e) if e.is_not_found() => Some(None),
            Err(e) => {
                stalled += 1;
                warn!(
                    resource = %spec.resource,
                    attempt = stalled,
                    error = %e,
                    "Poll fetch failed, retrying"
                );
                last_error = Some(e);
                if stalled >= spec.stall_threshold {
                    return PollOutcome::TimedOut {
                        last_observed,
                        last_error,
                    };
                }
                None
            }
        };

        if let Some(snapshot) = snapshot {
            stalled = 0;
            let truth = spec.condition.evaluate(snapshot.as_ref());
            if truth.is_true() {
                info!(resource = %spec.resource, condition = %spec.condition, "Condition satisfied");
                return PollOutcome::Satisfied(snapshot);
            }
            debug!(
                resource = %spec.resource,
                condition = %spec.condition,
                truth = ?truth,
                "Condition not yet satisfied"
            );
            last_observed = snapshot;
        }

        let mut pause = spec.interval;
        if !spec.timeout.is_zero() {
            let elapsed = start.elapsed();
            if elapsed >= spec.timeout {
                warn!(resource = %spec.resource, timeout = ?spec.timeout, "Timed out waiting for condition");
                return PollOutcome::TimedOut {
                    last_observed,
                    last_error,
                };
            }
            // Last check lands on the deadline, not up to an interval past it.
            pause = pause.min(spec.timeout - elapsed);
        }

        tokio::select! {
            _ = cancel.cancelled() => return PollOutcome::Cancelled,
            _ = sleep(pause) => {}
        }
    }
}
