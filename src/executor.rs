//! Runs a plan: applies each step once its dependencies are satisfied, waits
//! for its condition, and reports a terminal state for every step.

use chrono::{DateTime, Utc};
use futures::stream::{FuturesUnordered, StreamExt};
use serde::{Serialize, Serializer};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::cluster::ClusterClient;
use crate::error::Error;
use crate::plan::{Plan, Step, StepAction};
use crate::poller::{await_condition, PollOutcome};
use crate::retry::{apply_with_retry, delete_with_retry, patch_with_retry, ApplyOutcome, RetryPolicy};

#[derive(Serialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum StepState {
    Pending,
    Applying,
    Awaiting,
    Satisfied,
    TimedOut,
    Failed,
    /// A dependency did not reach `Satisfied`, so the step never ran.
    Skipped,
    Cancelled,
}

impl StepState {
    pub fn is_terminal(&self) -> bool {
        !matches!(
            self,
            StepState::Pending | StepState::Applying | StepState::Awaiting
        )
    }

    pub fn marker(&self) -> &'static str {
        match self {
            StepState::Satisfied => "✓",
            StepState::TimedOut => "⚠",
            StepState::Skipped => "-",
            StepState::Failed => "✗",
            StepState::Cancelled => "⊘",
            StepState::Pending | StepState::Applying | StepState::Awaiting => "…",
        }
    }
}

impl fmt::Display for StepState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let message = match self {
            StepState::Pending => "Pending",
            StepState::Applying => "Applying",
            StepState::Awaiting => "Awaiting",
            StepState::Satisfied => "Satisfied",
            StepState::TimedOut => "TimedOut",
            StepState::Failed => "Failed",
            StepState::Skipped => "Skipped",
            StepState::Cancelled => "Cancelled",
        };
        write!(f, "{}", message)
    }
}

fn as_secs<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_f64(d.as_secs_f64())
}

#[derive(Serialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub step: String,
    pub state: StepState,
    pub started_at: Option<DateTime<Utc>>,
    #[serde(serialize_with = "as_secs", rename = "elapsedSeconds")]
    pub elapsed: Duration,
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl ExecutionResult {
    fn pending(step: &str) -> ExecutionResult {
        ExecutionResult {
            step: step.to_string(),
            state: StepState::Pending,
            started_at: None,
            elapsed: Duration::ZERO,
            attempts: 0,
            observed: None,
            detail: None,
        }
    }
}

#[derive(Serialize, Clone, Debug)]
pub struct Report {
    pub results: Vec<ExecutionResult>,
}

impl Report {
    pub fn get(&self, step: &str) -> Option<&ExecutionResult> {
        self.results.iter().find(|r| r.step == step)
    }

    pub fn state_of(&self, step: &str) -> Option<StepState> {
        self.get(step).map(|r| r.state)
    }

    pub fn count(&self, state: StepState) -> usize {
        self.results.iter().filter(|r| r.state == state).count()
    }

    pub fn is_success(&self) -> bool {
        self.results.iter().all(|r| r.state == StepState::Satisfied)
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let width = self.results.iter().map(|r| r.step.len()).max().unwrap_or(0);
        for r in &self.results {
            write!(
                f,
                "{} {:<width$}  {:<9}  {:>8.1}s",
                r.state.marker(),
                r.step,
                r.state.to_string(),
                r.elapsed.as_secs_f64(),
                width = width
            )?;
            if let Some(started) = r.started_at {
                write!(f, "  started {}", started.format("%T"))?;
            }
            if let Some(detail) = &r.detail {
                write!(f, "  {}", detail)?;
            }
            writeln!(f)?;
        }
        write!(
            f,
            "{} satisfied, {} skipped, {} timed out, {} failed, {} cancelled",
            self.count(StepState::Satisfied),
            self.count(StepState::Skipped),
            self.count(StepState::TimedOut),
            self.count(StepState::Failed),
            self.count(StepState::Cancelled),
        )
    }
}

/// Result table for one run. Concurrent steps only make simple transitions on it.
struct StepTable {
    results: Mutex<HashMap<String, ExecutionResult>>,
}

impl StepTable {
    fn new(plan: &Plan) -> StepTable {
        StepTable {
            results: Mutex::new(
                plan.steps
                    .iter()
                    .map(|s| (s.name.clone(), ExecutionResult::pending(&s.name)))
                    .collect(),
            ),
        }
    }

    async fn transition(&self, step: &str, state: StepState) {
        if let Some(result) = self.results.lock().await.get_mut(step) {
            if result.started_at.is_none() {
                result.started_at = Some(Utc::now());
            }
            result.state = state;
        }
    }

    async fn finish(
        &self,
        step: &str,
        state: StepState,
        elapsed: Duration,
        attempts: u32,
        observed: Option<Value>,
        detail: Option<String>,
    ) {
        if let Some(result) = self.results.lock().await.get_mut(step) {
            result.state = state;
            result.elapsed = elapsed;
            result.attempts = attempts;
            result.observed = observed;
            result.detail = detail;
        }
    }

    /// Mark steps whose dependencies ended badly as skipped (transitively) and
    /// return the names of steps that may start now, in plan order.
    async fn schedule<'p>(&self, plan: &'p Plan) -> Vec<&'p Step> {
        let mut results = self.results.lock().await;
        loop {
            let mut changed = false;
            for step in &plan.steps {
                if results.get(&step.name).map(|r| r.state) != Some(StepState::Pending) {
                    continue;
                }
                let blocked = step.depends_on.iter().find_map(|dep| {
                    let state = results.get(dep).map(|r| r.state)?;
                    if state.is_terminal() && state != StepState::Satisfied {
                        Some((dep.clone(), state))
                    } else {
                        None
                    }
                });
                if let Some((dep, state)) = blocked {
                    warn!(step = %step.name, dependency = %dep, state = %state, "Skipping step");
                    if let Some(r) = results.get_mut(&step.name) {
                        r.state = StepState::Skipped;
                        r.detail = Some(format!("dependency '{}' ended {}", dep, state));
                    }
                    changed = true;
                }
            }
            if !changed {
                break;
            }
        }

        plan.steps
            .iter()
            .filter(|step| {
                results.get(&step.name).map(|r| r.state) == Some(StepState::Pending)
                    && step.depends_on.iter().all(|dep| {
                        results.get(dep).map(|r| r.state) == Some(StepState::Satisfied)
                    })
            })
            .collect()
    }

    /// Steps that never started because the run was cancelled.
    async fn cancel_pending(&self) {
        for result in self.results.lock().await.values_mut() {
            if result.state == StepState::Pending {
                result.state = StepState::Cancelled;
                result.detail = Some("run cancelled before the step started".into());
            }
        }
    }

    async fn report(&self, plan: &Plan) -> Report {
        let results = self.results.lock().await;
        Report {
            results: plan
                .steps
                .iter()
                .filter_map(|s| results.get(&s.name).cloned())
                .collect(),
        }
    }
}

pub struct Executor<'a> {
    client: &'a dyn ClusterClient,
    retry: RetryPolicy,
    concurrency: usize,
}

impl<'a> Executor<'a> {
    pub fn new(client: &'a dyn ClusterClient) -> Executor<'a> {
        Executor {
            client,
            retry: RetryPolicy::default(),
            concurrency: 1,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Executor<'a> {
        self.retry = retry;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Executor<'a> {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Validate and execute the plan. The only error is an invalid plan, in
    /// which case nothing was sent to the cluster. Step failures are reported,
    /// never raised.
    pub async fn run(&self, plan: &Plan, cancel: &CancellationToken) -> Result<Report, Error> {
        plan.validate()?;
        info!(steps = plan.steps.len(), concurrency = self.concurrency, "Running plan");

        let table = StepTable::new(plan);
        let mut in_flight = FuturesUnordered::new();

        loop {
            if !cancel.is_cancelled() {
                for step in table.schedule(plan).await {
                    if in_flight.len() >= self.concurrency {
                        break;
                    }
                    table.transition(&step.name, StepState::Applying).await;
                    in_flight.push(self.run_step(step, &table, cancel));
                }
            }

            if in_flight.next().await.is_none() {
                break;
            }
        }

        if cancel.is_cancelled() {
            table.cancel_pending().await;
        }

        let report = table.report(plan).await;
        info!(
            satisfied = report.count(StepState::Satisfied),
            total = report.results.len(),
            "Plan finished"
        );
        Ok(report)
    }

    async fn run_step(&self, step: &Step, table: &StepTable, cancel: &CancellationToken) {
        let start = Instant::now();
        let mut attempts = 0u32;
        info!(step = %step.name, "Applying");

        for action in &step.actions {
            if cancel.is_cancelled() {
                table
                    .finish(&step.name, StepState::Cancelled, start.elapsed(), attempts, None, None)
                    .await;
                return;
            }

            let (outcome, best_effort) = match action {
                StepAction::Apply(manifest) => (
                    apply_with_retry(self.client, manifest, &self.retry, cancel).await,
                    false,
                ),
                StepAction::Patch {
                    target,
                    patch,
                    best_effort,
                } => (
                    patch_with_retry(self.client, target, patch, &self.retry, cancel).await,
                    *best_effort,
                ),
                StepAction::Delete(target) => (
                    delete_with_retry(self.client, target, &self.retry, cancel).await,
                    false,
                ),
            };
            attempts += outcome.attempts();

            match outcome {
                ApplyOutcome::Applied { .. } => {}
                ApplyOutcome::Failed { error, .. } if best_effort => {
                    warn!(step = %step.name, target = %action.target(), error = %error, "Best-effort patch failed, continuing");
                }
                ApplyOutcome::Failed { error, .. } => {
                    warn!(step = %step.name, target = %action.target(), error = %error, "Step failed");
                    table
                        .finish(
                            &step.name,
                            StepState::Failed,
                            start.elapsed(),
                            attempts,
                            None,
                            Some(format!("{}: {}", action.target(), error)),
                        )
                        .await;
                    return;
                }
                ApplyOutcome::Cancelled { error, .. } => {
                    table
                        .finish(
                            &step.name,
                            StepState::Cancelled,
                            start.elapsed(),
                            attempts,
                            None,
                            error.map(|e| e.to_string()),
                        )
                        .await;
                    return;
                }
            }
        }

        let spec = match &step.awaits {
            Some(spec) => spec,
            None => {
                info!(step = %step.name, "Satisfied");
                table
                    .finish(&step.name, StepState::Satisfied, start.elapsed(), attempts, None, None)
                    .await;
                return;
            }
        };

        table.transition(&step.name, StepState::Awaiting).await;
        info!(step = %step.name, resource = %spec.resource, condition = %spec.condition, "Awaiting");

        let (state, observed, detail) = match await_condition(self.client, spec, cancel).await {
            PollOutcome::Satisfied(observed) => (StepState::Satisfied, observed, None),
            PollOutcome::TimedOut {
                last_observed,
                last_error,
            } => {
                let detail = match last_error {
                    Some(e) => format!("gave up polling {}: {}", spec.resource, e),
                    None => format!(
                        "{} not reached by {} within {:?}",
                        spec.condition, spec.resource, spec.timeout
                    ),
                };
                (StepState::TimedOut, last_observed, Some(detail))
            }
            PollOutcome::Cancelled => (StepState::Cancelled, None, None),
        };
        info!(step = %step.name, state = %state, "Step finished");
        table
            .finish(&step.name, state, start.elapsed(), attempts, observed, detail)
            .await;
    }
}
